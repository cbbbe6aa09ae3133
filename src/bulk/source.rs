//! Lazy recipient sources

use futures::stream::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::types::Recipient;

/// Stream recipients from JSON lines (`{"id": "...", "variables": {...}}`).
///
/// Blank lines are skipped. Malformed lines are logged and skipped so one
/// bad record does not stop a campaign. A read error ends the stream.
pub fn recipients_from_lines<R>(reader: R) -> impl Stream<Item = Recipient> + Send + 'static
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async_stream::stream! {
        let mut lines = reader.lines();
        let mut line_number = 0usize;

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    line_number += 1;
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Recipient>(trimmed) {
                        Ok(recipient) => yield recipient,
                        Err(e) => {
                            tracing::warn!(
                                line = line_number,
                                error = %e,
                                "Skipping malformed recipient line"
                            );
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        line = line_number,
                        error = %e,
                        "Recipient source read failed, ending stream"
                    );
                    break;
                }
            }
        }
    }
}
