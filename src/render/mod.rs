//! Rendering of parsed templates into concrete messages.
//!
//! A render walks the node tree, descends into the alternative chosen by the
//! selection path at every group, and substitutes variables from a typed
//! name-to-value mapping. What happens to a variable missing from the mapping
//! is decided by the caller through `MissingVariablePolicy`.

use std::collections::HashMap;

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::selection::{select, SelectionPath};
use crate::template::{Node, ParsedTemplate};

/// Variable values for one render
pub type Variables = HashMap<String, String>;

/// What to do with a variable that has no value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingVariablePolicy {
    /// Fail the render with `RenderError::MissingVariable`
    #[default]
    Strict,
    /// Substitute an empty string
    Lenient,
}

/// Render-specific error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Missing variable: {0}")]
    MissingVariable(String),

    #[error("Selection path has {actual} entries, template has {expected} groups")]
    PathLengthMismatch { expected: usize, actual: usize },

    #[error("Alternative {index} out of range for group {group} ({count} alternatives)")]
    AlternativeOutOfRange {
        group: usize,
        index: usize,
        count: usize,
    },
}

impl RenderError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RenderError::MissingVariable(_) => "missing_variable",
            RenderError::PathLengthMismatch { .. } | RenderError::AlternativeOutOfRange { .. } => {
                "invalid_path"
            }
        }
    }
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;

/// One group's choice as it was actually rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Choice {
    pub group: usize,
    pub alternative: usize,
}

/// A rendered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// The full path the render was resolved from
    pub path: SelectionPath,
    /// Groups actually visited, in document order
    pub choices: Vec<Choice>,
}

/// Renders parsed templates under a fixed missing-variable policy
#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer {
    policy: MissingVariablePolicy,
}

impl Renderer {
    pub fn new(policy: MissingVariablePolicy) -> Self {
        Self { policy }
    }

    pub fn strict() -> Self {
        Self::new(MissingVariablePolicy::Strict)
    }

    pub fn lenient() -> Self {
        Self::new(MissingVariablePolicy::Lenient)
    }

    pub fn policy(&self) -> MissingVariablePolicy {
        self.policy
    }

    /// Render `template` along `path`
    pub fn render(
        &self,
        template: &ParsedTemplate,
        path: SelectionPath,
        variables: &Variables,
    ) -> RenderResult<Rendered> {
        if path.len() != template.group_count() {
            return Err(RenderError::PathLengthMismatch {
                expected: template.group_count(),
                actual: path.len(),
            });
        }

        let mut text = String::new();
        let mut choices = Vec::new();
        self.render_nodes(template.nodes(), &path, variables, &mut text, &mut choices)?;

        Ok(Rendered {
            text,
            path,
            choices,
        })
    }

    /// Draw a fresh path from `rng`, then render along it
    pub fn render_random<R>(
        &self,
        template: &ParsedTemplate,
        variables: &Variables,
        rng: &mut R,
    ) -> RenderResult<Rendered>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        let path = select(template, rng);
        self.render(template, path, variables)
    }

    fn render_nodes(
        &self,
        nodes: &[Node],
        path: &SelectionPath,
        variables: &Variables,
        out: &mut String,
        choices: &mut Vec<Choice>,
    ) -> RenderResult<()> {
        for node in nodes {
            match node {
                Node::Literal(text) => out.push_str(text),
                Node::Variable(name) => match variables.get(name) {
                    Some(value) => out.push_str(value),
                    None => match self.policy {
                        MissingVariablePolicy::Strict => {
                            return Err(RenderError::MissingVariable(name.clone()));
                        }
                        MissingVariablePolicy::Lenient => {}
                    },
                },
                Node::Group(group) => {
                    // Length was checked against the group count up front.
                    let index = path.get(group.index).unwrap_or_default();
                    let alternative = group.alternatives.get(index).ok_or(
                        RenderError::AlternativeOutOfRange {
                            group: group.index,
                            index,
                            count: group.len(),
                        },
                    )?;
                    choices.push(Choice {
                        group: group.index,
                        alternative: index,
                    });
                    self.render_nodes(&alternative.nodes, path, variables, out, choices)?;
                }
            }
        }
        Ok(())
    }
}
