//! Parameter Processor (spec.md §4.3): typed JSON in, rewritten SQL and an
//! ordered binding list out. Two independent passes:
//!
//! 1. [`parse_typed_json`] turns the client's `{TYPE: {name: value}}` object
//!    into a flat, type-checked map.
//! 2. [`rewrite`] scans the SQL template for `:name` tokens (skipping string
//!    literals and comments), replaces each with the engine's native
//!    placeholder, and emits the bindings in placeholder order.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::engine::PlaceholderStyle;
use crate::error::ParameterError;
use crate::types::{ParameterList, TypedParameter, TypedValue};

pub const MAX_PARAMETERS: usize = 100;

/// Parses the client's tagged-by-type JSON object into a flat, validated map.
/// `{"INTEGER":{"userId":7},"STRING":{"username":"jo"}}` becomes
/// `{"userId": Integer(7), "username": String("jo")}`.
pub fn parse_typed_json(value: &Value) -> Result<HashMap<String, TypedValue>, ParameterError> {
    let mut out = HashMap::new();
    let Some(obj) = value.as_object() else {
        return Ok(out);
    };

    for (tag, names) in obj {
        let Some(names) = names.as_object() else {
            continue;
        };
        for (name, raw) in names {
            let typed = match tag.as_str() {
                "INTEGER" => raw
                    .as_i64()
                    .map(TypedValue::Integer)
                    .ok_or_else(|| mismatch(name, "INTEGER", raw))?,
                "STRING" => raw
                    .as_str()
                    .map(|s| TypedValue::String(s.to_owned()))
                    .ok_or_else(|| mismatch(name, "STRING", raw))?,
                "BOOLEAN" => raw
                    .as_bool()
                    .map(TypedValue::Boolean)
                    .ok_or_else(|| mismatch(name, "BOOLEAN", raw))?,
                "FLOAT" => raw
                    .as_f64()
                    .map(TypedValue::Float)
                    .ok_or_else(|| mismatch(name, "FLOAT", raw))?,
                other => {
                    return Err(ParameterError::TypeMismatch {
                        name: name.clone(),
                        expected: "INTEGER|STRING|BOOLEAN|FLOAT",
                        actual: leak(other),
                    })
                }
            };
            out.insert(name.clone(), typed);
        }
    }

    Ok(out)
}

fn mismatch(name: &str, expected: &'static str, actual: &Value) -> ParameterError {
    ParameterError::TypeMismatch {
        name: name.to_owned(),
        expected,
        actual: json_kind(actual),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// Only used for the "unknown tag" branch above, which is rare enough that
// leaking a short, bounded string is an acceptable way to get a `&'static str`.
fn leak(s: &str) -> &'static str {
    Box::leak(s.to_owned().into_boxed_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    SingleQuoted,
    LineComment,
    BlockComment,
}

/// Scans `template` for `:identifier` tokens in first-appearance order,
/// skipping tokens inside `'...'` string literals or `--`/`/* */` comments.
fn scan_placeholders(template: &str) -> Vec<(usize, usize, String)> {
    let chars: Vec<char> = template.chars().collect();
    let mut state = ScanState::Normal;
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match state {
            ScanState::SingleQuoted => {
                if c == '\'' {
                    state = ScanState::Normal;
                }
                i += 1;
            }
            ScanState::LineComment => {
                if c == '\n' {
                    state = ScanState::Normal;
                }
                i += 1;
            }
            ScanState::BlockComment => {
                if c == '*' && chars.get(i + 1) == Some(&'/') {
                    state = ScanState::Normal;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            ScanState::Normal => {
                if c == '\'' {
                    state = ScanState::SingleQuoted;
                    i += 1;
                } else if c == '-' && chars.get(i + 1) == Some(&'-') {
                    state = ScanState::LineComment;
                    i += 2;
                } else if c == '/' && chars.get(i + 1) == Some(&'*') {
                    state = ScanState::BlockComment;
                    i += 2;
                } else if c == ':' && is_ident_start(chars.get(i + 1).copied()) {
                    let start = i;
                    let mut j = i + 1;
                    while j < chars.len() && is_ident_continue(chars[j]) {
                        j += 1;
                    }
                    let name: String = chars[i + 1..j].iter().collect();
                    tokens.push((start, j, name));
                    i = j;
                } else {
                    i += 1;
                }
            }
        }
    }

    tokens
}

fn is_ident_start(c: Option<char>) -> bool {
    matches!(c, Some(c) if c.is_ascii_alphabetic() || c == '_')
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Rewrites `template`'s `:name` placeholders to the engine's native style
/// and produces the matching ordered binding list. Fails closed: any named
/// parameter supplied by the client that the template never references is a
/// hard error (spec.md §4.3 step 4 and §9's resolved Open Question).
pub fn rewrite(
    template: &str,
    params: &HashMap<String, TypedValue>,
    style: PlaceholderStyle,
) -> Result<(String, ParameterList), ParameterError> {
    let tokens = scan_placeholders(template);

    if tokens.len() > MAX_PARAMETERS {
        return Err(ParameterError::TooManyParameters { limit: MAX_PARAMETERS });
    }

    let mut rewritten = String::with_capacity(template.len());
    let mut bindings: ParameterList = Vec::with_capacity(tokens.len());
    let mut cursor = 0;
    let mut used: HashSet<&str> = HashSet::new();
    let mut next_positional = 1usize;

    for (start, end, name) in &tokens {
        rewritten.push_str(&template[cursor..*start]);
        let value = params
            .get(name)
            .ok_or_else(|| ParameterError::MissingParameter(name.clone()))?;
        bindings.push(TypedParameter {
            name: name.clone(),
            value: value.clone(),
        });
        used.insert(name.as_str());

        match style {
            PlaceholderStyle::Postgres => {
                rewritten.push('$');
                rewritten.push_str(&next_positional.to_string());
                next_positional += 1;
            }
            PlaceholderStyle::QuestionMark => rewritten.push('?'),
        }
        cursor = *end;
    }
    rewritten.push_str(&template[cursor..]);

    for name in params.keys() {
        if !used.contains(name.as_str()) {
            return Err(ParameterError::UnusedParameter(name.clone()));
        }
    }

    Ok((rewritten, bindings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn named_rewrite_postgres() {
        let params = parse_typed_json(&json!({"INTEGER":{"userId":7},"STRING":{"username":"jo"}})).unwrap();
        let (sql, bindings) = rewrite(
            "SELECT * FROM u WHERE id=:userId AND name=:username",
            &params,
            PlaceholderStyle::Postgres,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM u WHERE id=$1 AND name=$2");
        assert_eq!(bindings[0].value, TypedValue::Integer(7));
        assert_eq!(bindings[1].value, TypedValue::String("jo".into()));
    }

    #[test]
    fn named_rewrite_question_mark() {
        let params = parse_typed_json(&json!({"INTEGER":{"userId":7},"STRING":{"username":"jo"}})).unwrap();
        let (sql, bindings) = rewrite(
            "SELECT * FROM u WHERE id=:userId AND name=:username",
            &params,
            PlaceholderStyle::QuestionMark,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM u WHERE id=? AND name=?");
        assert_eq!(bindings.len(), 2);
    }

    #[test]
    fn repeated_placeholder_appears_once_per_occurrence() {
        let params = parse_typed_json(&json!({"INTEGER":{"a":1},"STRING":{"b":"x","c":"y"}})).unwrap();
        let (sql, bindings) = rewrite(":a, :b, :a, :c", &params, PlaceholderStyle::Postgres).unwrap();
        assert_eq!(sql, "$1, $2, $3, $4");
        let values: Vec<_> = bindings.iter().map(|b| b.name.clone()).collect();
        assert_eq!(values, vec!["a", "b", "a", "c"]);
    }

    #[test]
    fn missing_parameter_errors() {
        let params = parse_typed_json(&json!({})).unwrap();
        let err = rewrite("SELECT :id", &params, PlaceholderStyle::Postgres).unwrap_err();
        assert_eq!(err, ParameterError::MissingParameter("id".into()));
    }

    #[test]
    fn unused_parameter_is_hard_error() {
        let params = parse_typed_json(&json!({"INTEGER":{"id":1,"unused":2}})).unwrap();
        let err = rewrite("SELECT :id", &params, PlaceholderStyle::Postgres).unwrap_err();
        assert_eq!(err, ParameterError::UnusedParameter("unused".into()));
    }

    #[test]
    fn type_mismatch_is_detected_at_parse_time() {
        let err = parse_typed_json(&json!({"INTEGER":{"id":"not-a-number"}})).unwrap_err();
        assert_eq!(
            err,
            ParameterError::TypeMismatch {
                name: "id".into(),
                expected: "INTEGER",
                actual: "string"
            }
        );
    }

    #[test]
    fn placeholder_inside_string_literal_is_ignored() {
        let tokens = scan_placeholders("SELECT ':notaparam' , :real");
        let names: Vec<_> = tokens.into_iter().map(|(_, _, n)| n).collect();
        assert_eq!(names, vec!["real".to_string()]);
    }

    #[test]
    fn placeholder_inside_line_comment_is_ignored() {
        let tokens = scan_placeholders("SELECT 1 -- :notaparam\n, :real");
        let names: Vec<_> = tokens.into_iter().map(|(_, _, n)| n).collect();
        assert_eq!(names, vec!["real".to_string()]);
    }

    #[test]
    fn placeholder_inside_block_comment_is_ignored() {
        let tokens = scan_placeholders("SELECT 1 /* :notaparam */ , :real");
        let names: Vec<_> = tokens.into_iter().map(|(_, _, n)| n).collect();
        assert_eq!(names, vec!["real".to_string()]);
    }

    #[test]
    fn rewrite_is_idempotent_on_already_rewritten_sql() {
        let params = parse_typed_json(&json!({"INTEGER":{"id":1}})).unwrap();
        let (sql, _) = rewrite("SELECT :id", &params, PlaceholderStyle::Postgres).unwrap();
        assert!(scan_placeholders(&sql).is_empty());
    }

    #[test]
    fn empty_params_and_no_placeholders_behave_identically() {
        let empty = parse_typed_json(&json!({})).unwrap();
        let (sql_empty, bindings_empty) = rewrite("SELECT 1", &empty, PlaceholderStyle::Postgres).unwrap();
        assert_eq!(sql_empty, "SELECT 1");
        assert!(bindings_empty.is_empty());
    }

    #[test]
    fn too_many_parameters_rejected() {
        let template: String = (0..101).map(|i| format!(":p{i}")).collect::<Vec<_>>().join(",");
        let mut obj = serde_json::Map::new();
        let mut ints = serde_json::Map::new();
        for i in 0..101 {
            ints.insert(format!("p{i}"), json!(i));
        }
        obj.insert("INTEGER".into(), Value::Object(ints));
        let params = parse_typed_json(&Value::Object(obj)).unwrap();
        let err = rewrite(&template, &params, PlaceholderStyle::Postgres).unwrap_err();
        assert_eq!(err, ParameterError::TooManyParameters { limit: MAX_PARAMETERS });
    }
}
