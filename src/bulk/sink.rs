//! Delivery sinks for rendered messages

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::types::RenderedMessage;

/// Delivery failure reported by a sink
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hands rendered messages to a delivery transport.
///
/// Implementations own retries; a returned error is final for that
/// recipient and is reported in the run summary.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, message: &RenderedMessage) -> Result<(), DeliveryError>;
}

/// Sink that keeps every delivered message in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<RenderedMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all delivered messages, in delivery order
    pub fn messages(&self) -> Vec<RenderedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeliverySink for MemorySink {
    async fn deliver(&self, message: &RenderedMessage) -> Result<(), DeliveryError> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.clone());
        Ok(())
    }
}

/// Sink writing one JSON object per line to an async writer
pub struct JsonLinesSink<W> {
    writer: tokio::sync::Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> DeliverySink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&self, message: &RenderedMessage) -> Result<(), DeliveryError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::SelectionPath;

    fn message(id: &str) -> RenderedMessage {
        RenderedMessage {
            recipient_id: id.to_string(),
            text: format!("Hi {}", id),
            path: SelectionPath::new([1, 0]),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.deliver(&message("a")).await.unwrap();
        sink.deliver(&message("b")).await.unwrap();

        let ids: Vec<_> = sink.messages().into_iter().map(|m| m.recipient_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_json_lines_sink_writes_one_line_per_message() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.deliver(&message("a")).await.unwrap();
        sink.deliver(&message("b")).await.unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["recipient_id"], "a");
        assert_eq!(first["path"], serde_json::json!([1, 0]));
    }
}
