//! Single-pass parser for variation templates.
//!
//! Grammar:
//! - `{{name}}` references a variable (`[A-Za-z_][A-Za-z0-9_]*`)
//! - `{a|b|c}` is a variation group; `|` only splits the innermost open group
//! - an alternative ending in `^N` carries relative weight `N`
//! - `\{`, `\}`, `\|`, `\\` and `\^` produce the character literally

use std::mem;

use super::types::{
    Alternative, Node, ParseError, ParseErrorKind, ParseResult, ParsedTemplate, VariationGroup,
    MAX_NESTING_DEPTH,
};

/// Parse raw template text.
///
/// Pure and total: either the whole template parses or the first error is
/// returned with its byte offset.
pub fn parse(raw: &str) -> ParseResult<ParsedTemplate> {
    let mut parser = Parser::new(raw);
    let sequence = parser.parse_sequence(0)?;
    debug_assert!(matches!(sequence.end, SequenceEnd::Eof));
    Ok(ParsedTemplate::new(sequence.nodes))
}

/// What terminated a node sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceEnd {
    Eof,
    Pipe,
    Close,
}

struct Sequence {
    nodes: Vec<Node>,
    weight: Option<u32>,
    end: SequenceEnd,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    next_group: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            next_group: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn error(&self, kind: ParseErrorKind, offset: usize) -> ParseError {
        ParseError::new(kind, offset)
    }

    /// Parse nodes until end of input or, inside a group, until `|` or `}`.
    /// The terminator itself is left for the caller.
    fn parse_sequence(&mut self, depth: usize) -> ParseResult<Sequence> {
        let mut nodes = Vec::new();
        let mut text = String::new();
        let mut weight = None;

        loop {
            let Some(c) = self.peek() else {
                flush_literal(&mut text, &mut nodes);
                return Ok(Sequence {
                    nodes,
                    weight,
                    end: SequenceEnd::Eof,
                });
            };

            match c {
                '\\' => {
                    self.pos += 1;
                    match self.peek() {
                        Some(escaped @ ('{' | '}' | '|' | '\\' | '^')) => {
                            text.push(escaped);
                            self.pos += 1;
                        }
                        _ => text.push('\\'),
                    }
                }
                '{' => {
                    flush_literal(&mut text, &mut nodes);
                    match self.variable_ahead()? {
                        Some(name) => nodes.push(Node::Variable(name)),
                        None => nodes.push(self.parse_group(depth)?),
                    }
                }
                '}' if depth == 0 => {
                    return Err(self.error(ParseErrorKind::UnmatchedCloseBrace, self.pos));
                }
                '}' | '|' if depth > 0 => {
                    flush_literal(&mut text, &mut nodes);
                    let end = if c == '}' {
                        SequenceEnd::Close
                    } else {
                        SequenceEnd::Pipe
                    };
                    return Ok(Sequence { nodes, weight, end });
                }
                '^' if depth > 0 => match self.weight_ahead()? {
                    Some(w) => weight = Some(w),
                    None => {
                        text.push('^');
                        self.pos += 1;
                    }
                },
                _ => {
                    text.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    /// Decide whether the `{` at the cursor opens a `{{name}}` reference.
    ///
    /// It does when the text after `{{` reaches `}}` before any other grammar
    /// character. On success the reference is consumed.
    fn variable_ahead(&mut self) -> ParseResult<Option<String>> {
        let start = self.pos;
        let rest = self.rest();
        let Some(body) = rest.strip_prefix("{{") else {
            return Ok(None);
        };

        let stop = body.find(['{', '}', '|', '\\']);
        match stop {
            Some(i) if body[i..].starts_with("}}") => {
                let name = &body[..i];
                if name.is_empty() {
                    return Err(self.error(ParseErrorKind::EmptyVariableName, start));
                }
                if !is_identifier(name) {
                    return Err(self.error(ParseErrorKind::InvalidVariableName, start));
                }
                self.pos += 2 + i + 2;
                Ok(Some(name.to_string()))
            }
            // `{{name` or `{{name}` can only be a reference missing its close.
            None | Some(_)
                if is_identifier(&body[..stop.unwrap_or(body.len())])
                    && stop.map_or(true, |i| body[i..].starts_with('}')) =>
            {
                Err(self.error(ParseErrorKind::UnterminatedVariable, start))
            }
            _ => Ok(None),
        }
    }

    /// Consume a `^N` weight if one sits right before `|` or `}`.
    fn weight_ahead(&mut self) -> ParseResult<Option<u32>> {
        let start = self.pos;
        let after = &self.rest()[1..];
        let digits = after.len() - after.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return Ok(None);
        }
        if !matches!(after[digits..].chars().next(), Some('|' | '}')) {
            return Ok(None);
        }

        let weight = after[..digits]
            .parse::<u32>()
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| self.error(ParseErrorKind::InvalidWeight, start))?;
        self.pos += 1 + digits;
        Ok(Some(weight))
    }

    fn parse_group(&mut self, depth: usize) -> ParseResult<Node> {
        let open = self.pos;
        if depth + 1 > MAX_NESTING_DEPTH {
            return Err(self.error(ParseErrorKind::NestingTooDeep, open));
        }
        self.pos += 1;

        let index = self.next_group;
        self.next_group += 1;
        let mut alternatives: Vec<Alternative> = Vec::new();

        loop {
            let sequence = self.parse_sequence(depth + 1)?;
            let terminator = self.pos;

            if sequence.end == SequenceEnd::Eof {
                return Err(self.error(ParseErrorKind::UnmatchedOpenBrace, open));
            }

            if sequence.nodes.is_empty() {
                let kind = if sequence.end == SequenceEnd::Close
                    && alternatives.is_empty()
                    && sequence.weight.is_none()
                {
                    ParseErrorKind::EmptyGroup
                } else {
                    ParseErrorKind::EmptyAlternative
                };
                let offset = if kind == ParseErrorKind::EmptyGroup {
                    open
                } else {
                    terminator
                };
                return Err(self.error(kind, offset));
            }

            alternatives.push(Alternative {
                nodes: sequence.nodes,
                weight: sequence.weight,
            });
            self.pos += 1;

            if sequence.end == SequenceEnd::Close {
                if alternatives.len() < 2 {
                    return Err(self.error(ParseErrorKind::SingleAlternative, open));
                }
                return Ok(Node::Group(VariationGroup {
                    index,
                    offset: open,
                    alternatives,
                }));
            }
        }
    }
}

fn flush_literal(text: &mut String, nodes: &mut Vec<Node>) {
    if !text.is_empty() {
        nodes.push(Node::Literal(mem::take(text)));
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::CombinatorialSize;
    use proptest::prelude::*;

    fn err_kind(raw: &str) -> (ParseErrorKind, usize) {
        let err = parse(raw).unwrap_err();
        (err.kind, err.offset)
    }

    fn literal_alternatives(node: &Node) -> Vec<String> {
        match node {
            Node::Group(group) => group
                .alternatives
                .iter()
                .map(|alt| match alt.nodes.as_slice() {
                    [Node::Literal(text)] => text.clone(),
                    other => panic!("expected single literal, got {:?}", other),
                })
                .collect(),
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_text() {
        let parsed = parse("Hello there | friend").unwrap();
        assert_eq!(
            parsed.nodes(),
            &[Node::Literal("Hello there | friend".to_string())]
        );
        assert_eq!(parsed.group_count(), 0);
    }

    #[test]
    fn test_empty_template() {
        let parsed = parse("").unwrap();
        assert!(parsed.nodes().is_empty());
        assert_eq!(parsed.combinations(), CombinatorialSize::Exact(1));
    }

    #[test]
    fn test_variable_reference() {
        let parsed = parse("Hi {{first_name}}!").unwrap();
        assert_eq!(
            parsed.nodes(),
            &[
                Node::Literal("Hi ".to_string()),
                Node::Variable("first_name".to_string()),
                Node::Literal("!".to_string()),
            ]
        );
        assert!(parsed.variables().contains("first_name"));
    }

    #[test]
    fn test_simple_group() {
        let parsed = parse("{Hello|Hi|Hey} there").unwrap();
        assert_eq!(parsed.group_count(), 1);
        assert_eq!(
            literal_alternatives(&parsed.nodes()[0]),
            vec!["Hello", "Hi", "Hey"]
        );
        assert_eq!(parsed.nodes()[1], Node::Literal(" there".to_string()));
    }

    #[test]
    fn test_order_example() {
        let parsed =
            parse("{Hello|Hi} {{name}}, your order {{order}} is {ready|on its way|delayed}.")
                .unwrap();
        assert_eq!(parsed.group_count(), 2);
        assert_eq!(parsed.combinations(), CombinatorialSize::Exact(6));
        let vars: Vec<_> = parsed.variables().iter().cloned().collect();
        assert_eq!(vars, vec!["name", "order"]);
    }

    #[test]
    fn test_nested_group_indices_are_preorder() {
        let parsed = parse("{a {x|y}|b} {c|d}").unwrap();
        assert_eq!(parsed.group_count(), 3);

        let Node::Group(outer) = &parsed.nodes()[0] else {
            panic!("expected group");
        };
        assert_eq!(outer.index, 0);
        let Node::Group(inner) = &outer.alternatives[0].nodes[1] else {
            panic!("expected nested group");
        };
        assert_eq!(inner.index, 1);
        let Node::Group(last) = &parsed.nodes()[2] else {
            panic!("expected group");
        };
        assert_eq!(last.index, 2);
    }

    #[test]
    fn test_pipe_in_nested_group_does_not_split_outer() {
        let parsed = parse("{one {two|three}|four}").unwrap();
        let Node::Group(outer) = &parsed.nodes()[0] else {
            panic!("expected group");
        };
        assert_eq!(outer.len(), 2);
    }

    #[test]
    fn test_group_may_start_with_nested_group() {
        let parsed = parse("{{Hi|Hello} there|Hey}").unwrap();
        assert_eq!(parsed.group_count(), 2);
        assert_eq!(parsed.combinations(), CombinatorialSize::Exact(3));
    }

    #[test]
    fn test_variable_inside_group() {
        let parsed = parse("{Dear {{name}}|Hi}").unwrap();
        let Node::Group(group) = &parsed.nodes()[0] else {
            panic!("expected group");
        };
        assert_eq!(
            group.alternatives[0].nodes,
            vec![
                Node::Literal("Dear ".to_string()),
                Node::Variable("name".to_string())
            ]
        );
    }

    #[test]
    fn test_escapes_produce_single_literal() {
        let parsed = parse(r"\{\}\|\\ and \{x\|y\}").unwrap();
        assert_eq!(parsed.group_count(), 0);
        assert_eq!(
            parsed.nodes(),
            &[Node::Literal(r"{}|\ and {x|y}".to_string())]
        );
    }

    #[test]
    fn test_unknown_escape_keeps_backslash() {
        let parsed = parse(r"C:\path\").unwrap();
        assert_eq!(parsed.nodes(), &[Node::Literal(r"C:\path\".to_string())]);
    }

    #[test]
    fn test_weights() {
        let parsed = parse("{common^5|rare|mid^2}").unwrap();
        let Node::Group(group) = &parsed.nodes()[0] else {
            panic!("expected group");
        };
        let weights: Vec<_> = group.alternatives.iter().map(|a| a.weight).collect();
        assert_eq!(weights, vec![Some(5), None, Some(2)]);
        assert_eq!(parsed.groups()[0].weights(), Some(&[5, 1, 2][..]));
    }

    #[test]
    fn test_caret_that_is_not_a_weight() {
        let parsed = parse("{2^10 bytes|x^y|\\^3} ^4").unwrap();
        assert_eq!(
            literal_alternatives(&parsed.nodes()[0]),
            vec!["2^10 bytes", "x^y", "^3"]
        );
        assert_eq!(parsed.groups()[0].weights(), None);
        assert_eq!(parsed.nodes()[1], Node::Literal(" ^4".to_string()));
    }

    #[test]
    fn test_invalid_weight() {
        assert_eq!(err_kind("{a^0|b}"), (ParseErrorKind::InvalidWeight, 2));
        assert_eq!(
            err_kind("{a^99999999999|b}"),
            (ParseErrorKind::InvalidWeight, 2)
        );
    }

    #[test]
    fn test_unmatched_open_brace() {
        assert_eq!(
            err_kind("Hi {there|you"),
            (ParseErrorKind::UnmatchedOpenBrace, 3)
        );
    }

    #[test]
    fn test_unmatched_close_brace() {
        assert_eq!(
            err_kind("Hi there}"),
            (ParseErrorKind::UnmatchedCloseBrace, 8)
        );
    }

    #[test]
    fn test_single_alternative() {
        assert_eq!(
            err_kind("pick {only}"),
            (ParseErrorKind::SingleAlternative, 5)
        );
    }

    #[test]
    fn test_empty_group() {
        assert_eq!(err_kind("x {}"), (ParseErrorKind::EmptyGroup, 2));
    }

    #[test]
    fn test_empty_alternatives() {
        assert_eq!(err_kind("{a||b}"), (ParseErrorKind::EmptyAlternative, 3));
        assert_eq!(err_kind("{|a}"), (ParseErrorKind::EmptyAlternative, 1));
        assert_eq!(err_kind("{a|}"), (ParseErrorKind::EmptyAlternative, 3));
    }

    #[test]
    fn test_empty_variable_name() {
        assert_eq!(
            err_kind("Hello {{}}"),
            (ParseErrorKind::EmptyVariableName, 6)
        );
    }

    #[test]
    fn test_invalid_variable_name() {
        assert_eq!(
            err_kind("{{first name}}"),
            (ParseErrorKind::InvalidVariableName, 0)
        );
        assert_eq!(
            err_kind("{{1st}}"),
            (ParseErrorKind::InvalidVariableName, 0)
        );
    }

    #[test]
    fn test_unterminated_variable() {
        assert_eq!(
            err_kind("Hi {{name"),
            (ParseErrorKind::UnterminatedVariable, 3)
        );
        assert_eq!(
            err_kind("Hi {{name} x"),
            (ParseErrorKind::UnterminatedVariable, 3)
        );
    }

    #[test]
    fn test_nesting_too_deep() {
        let mut raw = String::new();
        for _ in 0..=MAX_NESTING_DEPTH {
            raw.push_str("{a|");
        }
        raw.push('b');
        for _ in 0..=MAX_NESTING_DEPTH {
            raw.push('}');
        }
        let (kind, offset) = err_kind(&raw);
        assert_eq!(kind, ParseErrorKind::NestingTooDeep);
        assert_eq!(offset, MAX_NESTING_DEPTH * 3);
    }

    #[test]
    fn test_multibyte_offsets() {
        // "é" is two bytes
        assert_eq!(err_kind("é}"), (ParseErrorKind::UnmatchedCloseBrace, 2));
        let parsed = parse("{café|thé}").unwrap();
        assert_eq!(literal_alternatives(&parsed.nodes()[0]), vec!["café", "thé"]);
    }

    proptest! {
        #[test]
        fn prop_parse_is_idempotent(raw in r"[a-c{}|\\^0-9 ]{0,24}") {
            prop_assert_eq!(parse(&raw), parse(&raw));
        }

        #[test]
        fn prop_group_count_matches_shapes(raw in r"(\{[a-z]{1,3}\|[a-z]{1,3}\} ?){0,6}") {
            let parsed = parse(&raw).unwrap();
            prop_assert_eq!(parsed.group_count(), parsed.groups().len());
            prop_assert_eq!(parsed.group_count(), raw.matches('{').count());
        }
    }
}
