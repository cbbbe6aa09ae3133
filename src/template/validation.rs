//! Read-only validation surface for template authoring tools

use serde::Serialize;

use super::parser::parse;
use super::types::{CombinatorialSize, ParseError, ParseErrorKind};

/// A single problem found in a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: ParseErrorKind,
    pub message: String,
    pub offset: usize,
}

impl From<&ParseError> for ValidationIssue {
    fn from(err: &ParseError) -> Self {
        Self {
            code: err.kind,
            message: err.message().to_string(),
            offset: err.offset,
        }
    }
}

/// Outcome of validating raw template text
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    /// Present only for valid templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combinations: Option<CombinatorialSize>,
    pub group_count: usize,
    pub variables: Vec<String>,
}

/// Validate a template without touching any cache
pub fn validate(raw: &str) -> ValidationReport {
    match parse(raw) {
        Ok(parsed) => ValidationReport {
            valid: true,
            errors: Vec::new(),
            combinations: Some(parsed.combinations()),
            group_count: parsed.group_count(),
            variables: parsed.variables().iter().cloned().collect(),
        },
        Err(err) => ValidationReport {
            valid: false,
            errors: vec![ValidationIssue::from(&err)],
            combinations: None,
            group_count: 0,
            variables: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_report() {
        let report = validate("{Hello|Hi} {{name}}, {ready|delayed|shipped}");
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert_eq!(report.combinations, Some(CombinatorialSize::Exact(6)));
        assert_eq!(report.variables, vec!["name"]);
    }

    #[test]
    fn test_invalid_report() {
        let report = validate("Hello {a||b}");
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, ParseErrorKind::EmptyAlternative);
        assert_eq!(report.errors[0].offset, 9);
        assert!(report.combinations.is_none());
    }

    #[test]
    fn test_report_serialization() {
        let report = validate("{{}}");
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["valid"], json!(false));
        assert_eq!(value["errors"][0]["code"], json!("empty_variable_name"));
        assert_eq!(value["errors"][0]["offset"], json!(0));
        assert!(value.get("combinations").is_none());

        let value = serde_json::to_value(validate("{a|b}")).unwrap();
        assert_eq!(value["combinations"], json!(2));
    }
}
