//! Template types and error definitions

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Combinatorial sizes above this are reported as unbounded
pub const COMBINATION_DISPLAY_LIMIT: u64 = 1_000_000_000;

/// Maximum depth of nested variation groups
pub const MAX_NESTING_DEPTH: usize = 16;

/// Reason a template failed to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    UnmatchedOpenBrace,
    UnmatchedCloseBrace,
    EmptyGroup,
    SingleAlternative,
    EmptyAlternative,
    EmptyVariableName,
    InvalidVariableName,
    UnterminatedVariable,
    InvalidWeight,
    NestingTooDeep,
}

impl ParseErrorKind {
    /// Human-readable reason shown to template authors
    pub fn reason(&self) -> &'static str {
        match self {
            ParseErrorKind::UnmatchedOpenBrace => "Variation group is never closed",
            ParseErrorKind::UnmatchedCloseBrace => "Closing brace has no matching opening brace",
            ParseErrorKind::EmptyGroup => "Variation group is empty",
            ParseErrorKind::SingleAlternative => {
                "Variation group needs at least two alternatives separated by '|'"
            }
            ParseErrorKind::EmptyAlternative => "Variation group contains an empty alternative",
            ParseErrorKind::EmptyVariableName => "Variable reference has an empty name",
            ParseErrorKind::InvalidVariableName => {
                "Variable name must start with a letter or underscore and contain only letters, digits, or underscores"
            }
            ParseErrorKind::UnterminatedVariable => "Variable reference is missing its closing '}}'",
            ParseErrorKind::InvalidWeight => "Alternative weight must be a positive 32-bit integer",
            ParseErrorKind::NestingTooDeep => "Variation groups are nested too deeply",
        }
    }
}

/// Syntax error with the byte offset of the first offending position
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{} at offset {}", .kind.reason(), .offset)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }

    pub fn message(&self) -> &'static str {
        self.kind.reason()
    }
}

/// Result type for parse operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Raw template text together with its content fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTemplate {
    text: Arc<str>,
    fingerprint: u32,
}

impl RawTemplate {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        let fingerprint = fingerprint(&text);
        Self { text, fingerprint }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn shared_text(&self) -> Arc<str> {
        self.text.clone()
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }
}

/// Fast content hash used as the cache key
pub fn fingerprint(text: &str) -> u32 {
    crc32fast::hash(text.as_bytes())
}

/// A single node of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Fixed text, already unescaped
    Literal(String),
    /// `{{name}}` placeholder
    Variable(String),
    /// `{a|b|...}` choice
    Group(VariationGroup),
}

/// A set of alternatives, exactly one of which is rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariationGroup {
    /// Pre-order index of the group within its template
    pub index: usize,
    /// Byte offset of the opening brace
    pub offset: usize,
    /// Always at least two
    pub alternatives: Vec<Alternative>,
}

impl VariationGroup {
    pub fn len(&self) -> usize {
        self.alternatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    /// Whether any alternative carries an explicit weight
    pub fn is_weighted(&self) -> bool {
        self.alternatives.iter().any(|alt| alt.weight.is_some())
    }
}

/// One alternative of a variation group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    pub nodes: Vec<Node>,
    /// Explicit `^N` weight, if one was written
    pub weight: Option<u32>,
}

impl Alternative {
    /// Effective relative weight (1 when none was written)
    pub fn weight(&self) -> u32 {
        self.weight.unwrap_or(1)
    }
}

/// Flattened view of one group, indexed by group index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupShape {
    alternatives: usize,
    weights: Option<Vec<u32>>,
}

impl GroupShape {
    fn from_group(group: &VariationGroup) -> Self {
        let weights = group
            .is_weighted()
            .then(|| group.alternatives.iter().map(Alternative::weight).collect());
        Self {
            alternatives: group.len(),
            weights,
        }
    }

    pub fn alternatives(&self) -> usize {
        self.alternatives
    }

    /// Per-alternative weights, `None` for uniform groups
    pub fn weights(&self) -> Option<&[u32]> {
        self.weights.as_deref()
    }
}

/// Number of distinct messages a template can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinatorialSize {
    Exact(u64),
    Unbounded,
}

impl CombinatorialSize {
    pub fn exact(&self) -> Option<u64> {
        match self {
            CombinatorialSize::Exact(n) => Some(*n),
            CombinatorialSize::Unbounded => None,
        }
    }

    fn from_count(count: Option<u64>) -> Self {
        match count {
            Some(n) if n <= COMBINATION_DISPLAY_LIMIT => CombinatorialSize::Exact(n),
            _ => CombinatorialSize::Unbounded,
        }
    }
}

impl fmt::Display for CombinatorialSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombinatorialSize::Exact(n) => write!(f, "{}", n),
            CombinatorialSize::Unbounded => write!(f, "more than {}", COMBINATION_DISPLAY_LIMIT),
        }
    }
}

impl Serialize for CombinatorialSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CombinatorialSize::Exact(n) => serializer.serialize_u64(*n),
            CombinatorialSize::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

/// Immutable result of parsing a template.
///
/// Identical raw text always parses to an equal value, which is what lets a
/// single instance be shared by every concurrent render without locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTemplate {
    nodes: Vec<Node>,
    groups: Vec<GroupShape>,
    variables: BTreeSet<String>,
    combinations: CombinatorialSize,
}

impl ParsedTemplate {
    pub(crate) fn new(nodes: Vec<Node>) -> Self {
        let mut groups = Vec::new();
        let mut variables = BTreeSet::new();
        collect(&nodes, &mut groups, &mut variables);
        let combinations = CombinatorialSize::from_count(sequence_size(&nodes));

        Self {
            nodes,
            groups,
            variables,
            combinations,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Group shapes in group-index order
    pub fn groups(&self) -> &[GroupShape] {
        &self.groups
    }

    /// Every variable name referenced anywhere in the template
    pub fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    pub fn combinations(&self) -> CombinatorialSize {
        self.combinations
    }

    /// True when the template renders to the same text every time
    pub fn is_static(&self) -> bool {
        self.groups.is_empty()
    }
}

// Pre-order walk; matches the order in which the parser hands out group indices.
fn collect(nodes: &[Node], groups: &mut Vec<GroupShape>, variables: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            Node::Literal(_) => {}
            Node::Variable(name) => {
                variables.insert(name.clone());
            }
            Node::Group(group) => {
                groups.push(GroupShape::from_group(group));
                for alternative in &group.alternatives {
                    collect(&alternative.nodes, groups, variables);
                }
            }
        }
    }
}

/// `None` once the count passes the display limit
fn sequence_size(nodes: &[Node]) -> Option<u64> {
    let mut total: u64 = 1;
    for node in nodes {
        if let Node::Group(group) = node {
            let mut options: u64 = 0;
            for alternative in &group.alternatives {
                options = options.checked_add(sequence_size(&alternative.nodes)?)?;
            }
            total = total.checked_mul(options)?;
            if total > COMBINATION_DISPLAY_LIMIT {
                return None;
            }
        }
    }
    Some(total)
}
