//! Rule list parser
//!
//! One rule per line:
//!
//! ```text
//! # comment
//! wrong/page -> correct/page
//! ~^legacy/(.*)$ -> archive/$1 $priority=5,status=302
//! old/about -> @42 $forward
//! www.example.com/old -> new $host
//! ```
//!
//! A leading `~` marks a regular expression pattern, an `@N` target points at
//! node `N`, and options follow a ` $`. A `type=` option (`exact`, `regex`)
//! overrides the `~` marker.

use md_core::types::{MappingRule, NodeId, PatternType, RuleTarget};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Missing '->' between pattern and target")]
    MissingArrow,
    #[error("Empty pattern")]
    EmptyPattern,
    #[error("Empty target")]
    EmptyTarget,
    #[error("Invalid node reference '{0}'")]
    InvalidNode(String),
    #[error("Unknown option '{0}'")]
    UnknownOption(String),
    #[error("Invalid value '{value}' for option '{option}'")]
    InvalidValue { option: String, value: String },
}

/// A line that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number
    pub line: usize,
    pub text: String,
    pub error: ParseError,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedList {
    pub rules: Vec<MappingRule>,
    pub rejected: Vec<RejectedLine>,
}

pub fn parse_rule_list(text: &str) -> ParsedList {
    let mut parsed = ParsedList::default();

    for (idx, raw_line) in text.lines().enumerate() {
        match parse_rule_line(raw_line) {
            Ok(Some(rule)) => parsed.rules.push(rule),
            Ok(None) => {}
            Err(error) => parsed.rejected.push(RejectedLine {
                line: idx + 1,
                text: raw_line.trim().to_string(),
                error,
            }),
        }
    }

    parsed
}

/// Parse a single line. Blank lines and comments yield `Ok(None)`.
pub fn parse_rule_line(raw_line: &str) -> Result<Option<MappingRule>, ParseError> {
    let line = raw_line.trim();
    if line.is_empty() || is_comment_line(line) {
        return Ok(None);
    }

    let (pattern_part, rest) = line.split_once("->").ok_or(ParseError::MissingArrow)?;
    let (target_part, options_text) = split_rule_options(rest.trim());

    let pattern_part = pattern_part.trim();
    let (pattern_type, pattern) = match pattern_part.strip_prefix('~') {
        Some(regex) => (PatternType::Pattern, regex.trim()),
        None => (PatternType::Exact, pattern_part),
    };
    if pattern.is_empty() {
        return Err(ParseError::EmptyPattern);
    }

    let target_part = target_part.trim();
    if target_part.is_empty() {
        return Err(ParseError::EmptyTarget);
    }
    let target = match target_part.strip_prefix('@') {
        Some(node) => {
            let id = node
                .parse::<u32>()
                .map_err(|_| ParseError::InvalidNode(target_part.to_string()))?;
            RuleTarget::Node(NodeId(id))
        }
        None => RuleTarget::Link(target_part.to_string()),
    };

    let mut rule = match (&pattern_type, target) {
        (PatternType::Exact, RuleTarget::Link(link)) => MappingRule::link(pattern, &link),
        (PatternType::Pattern, RuleTarget::Link(link)) => MappingRule::regex(pattern, &link),
        (_, RuleTarget::Node(node)) => MappingRule {
            pattern_type,
            ..MappingRule::node(pattern, node)
        },
    };

    if let Some(options_text) = options_text {
        apply_options(&mut rule, options_text)?;
    }

    Ok(Some(rule))
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('#') || line.starts_with('!')
}

/// Options start at the first ` $` followed by a letter, so `$1` style
/// backreferences in targets are left alone.
fn split_rule_options(text: &str) -> (&str, Option<&str>) {
    let bytes = text.as_bytes();
    for i in 1..bytes.len().saturating_sub(1) {
        if bytes[i] == b'$' && bytes[i - 1].is_ascii_whitespace() && bytes[i + 1].is_ascii_alphabetic() {
            return (&text[..i], Some(&text[i + 1..]));
        }
    }
    (text, None)
}

fn apply_options(rule: &mut MappingRule, text: &str) -> Result<(), ParseError> {
    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (name, value) = match raw.split_once('=') {
            Some((name, value)) => (name.trim().to_ascii_lowercase(), Some(value.trim())),
            None => (raw.to_ascii_lowercase(), None),
        };

        match (name.as_str(), value) {
            ("priority", Some(value)) => rule.priority = parse_value(&name, value)?,
            ("status", Some(value)) => rule.status_code = parse_value(&name, value)?,
            ("type", Some(value)) => rule.pattern_type = parse_value(&name, value)?,
            ("forward" | "forward-body", None) => rule.forward_body = true,
            ("host" | "includes-hostname", None) => rule.includes_hostname = true,
            ("restrict", Some(value)) if !value.is_empty() => {
                rule.hostname_restriction = Some(value.to_string());
            }
            _ => return Err(ParseError::UnknownOption(raw.to_string())),
        }
    }

    Ok(())
}

fn parse_value<T: std::str::FromStr>(option: &str, value: &str) -> Result<T, ParseError> {
    value.parse::<T>().map_err(|_| ParseError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_and_pattern_rules() {
        let list = parse_rule_list(
            "# comment\n\nwrong/page -> correct/page\n~^legacy/(.*)$ -> archive/$1 $priority=5,status=302\n",
        );
        assert!(list.rejected.is_empty());
        assert_eq!(list.rules.len(), 2);

        assert_eq!(list.rules[0], MappingRule::link("wrong/page", "correct/page"));

        let regex = &list.rules[1];
        assert_eq!(regex.pattern_type, PatternType::Pattern);
        assert_eq!(regex.pattern, "^legacy/(.*)$");
        assert_eq!(regex.target, RuleTarget::Link("archive/$1".to_string()));
        assert_eq!(regex.priority, 5);
        assert_eq!(regex.status_code, 302);
    }

    #[test]
    fn parses_node_targets_and_flags() {
        let rule = parse_rule_line("old/about -> @42 $forward,host,restrict=www.site.com")
            .expect("line should parse")
            .expect("line is a rule");
        assert_eq!(rule.target, RuleTarget::Node(NodeId(42)));
        assert!(rule.forward_body);
        assert!(rule.includes_hostname);
        assert_eq!(rule.hostname_restriction.as_deref(), Some("www.site.com"));
    }

    #[test]
    fn keeps_backreferences_in_target() {
        let rule = parse_rule_line("~^www\\.wrong\\.com/(.*)$ -> https://www.correct.com$1 $host")
            .expect("line should parse")
            .expect("line is a rule");
        assert_eq!(rule.target, RuleTarget::Link("https://www.correct.com$1".to_string()));
        assert!(rule.includes_hostname);
    }

    #[test]
    fn type_option_sets_pattern_type() {
        let rule = parse_rule_line("^old/(.*)$ -> new/$1 $type=regex")
            .expect("line should parse")
            .expect("line is a rule");
        assert_eq!(rule.pattern_type, PatternType::Pattern);

        let rule = parse_rule_line("~a.b -> c $type=Simple")
            .expect("line should parse")
            .expect("line is a rule");
        assert_eq!(rule.pattern_type, PatternType::Exact);

        let err = parse_rule_line("a -> b $type=glob").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidValue {
                option: "type".to_string(),
                value: "glob".to_string(),
            }
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        let list = parse_rule_list("no arrow here\n -> target\nsource -> \nx -> @abc\nx -> y $bogus\nx -> y $priority=high");
        let errors: Vec<_> = list.rejected.iter().map(|r| (r.line, r.error.clone())).collect();
        assert_eq!(
            errors,
            vec![
                (1, ParseError::MissingArrow),
                (2, ParseError::EmptyPattern),
                (3, ParseError::EmptyTarget),
                (4, ParseError::InvalidNode("@abc".to_string())),
                (5, ParseError::UnknownOption("bogus".to_string())),
                (
                    6,
                    ParseError::InvalidValue {
                        option: "priority".to_string(),
                        value: "high".to_string(),
                    }
                ),
            ]
        );
        assert!(list.rules.is_empty());
    }
}
