//! Message variation templates.
//!
//! This module provides:
//! - Template syntax: `{{variable}}` placeholders and `{a|b|c}` variation groups
//! - A single-pass parser producing immutable, shareable `ParsedTemplate`s
//! - A validation report for authoring tools
//!
//! # Example
//!
//! ```ignore
//! let parsed = parse("{Hello|Hi} {{name}}, your order is {ready|on its way}.")?;
//!
//! assert_eq!(parsed.group_count(), 2);
//! assert_eq!(parsed.combinations(), CombinatorialSize::Exact(4));
//!
//! let report = validate("{Hello|}");
//! assert!(!report.valid);
//! ```

mod parser;
mod types;
mod validation;

pub use parser::parse;
pub use types::{
    fingerprint, Alternative, CombinatorialSize, GroupShape, Node, ParseError, ParseErrorKind,
    ParseResult, ParsedTemplate, RawTemplate, VariationGroup, COMBINATION_DISPLAY_LIMIT,
    MAX_NESTING_DEPTH,
};
pub use validation::{validate, ValidationIssue, ValidationReport};
