use crate::template::render_value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Absolute tolerance for numeric equality.
pub const NUMERIC_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    NotContains,
    MatchesRegex,
    LengthEquals,
    StartsWith,
    EndsWith,
    TypeEquals,
    Exists,
    NotExists,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported comparator '{0}'")]
pub struct UnknownComparator(pub String);

impl FromStr for Comparator {
    type Err = UnknownComparator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let comparator = match s.trim() {
            "==" | "eq" => Comparator::Eq,
            "!=" | "ne" => Comparator::Ne,
            ">" | "gt" => Comparator::Gt,
            "<" | "lt" => Comparator::Lt,
            ">=" | "ge" => Comparator::Ge,
            "<=" | "le" => Comparator::Le,
            "contains" | "in" | "包含" => Comparator::Contains,
            "not_contains" | "not in" | "不包含" => Comparator::NotContains,
            "matches_regex" | "regex" | "正则匹配" => Comparator::MatchesRegex,
            "length_equals" | "length" | "长度" => Comparator::LengthEquals,
            "starts_with" | "startswith" | "以开头" => Comparator::StartsWith,
            "ends_with" | "endswith" | "以结尾" => Comparator::EndsWith,
            "type_equals" | "type" | "类型" => Comparator::TypeEquals,
            "exists" | "存在" => Comparator::Exists,
            "not_exists" | "不存在" => Comparator::NotExists,
            other => return Err(UnknownComparator(other.to_string())),
        };
        Ok(comparator)
    }
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
            Comparator::Gt => ">",
            Comparator::Lt => "<",
            Comparator::Ge => ">=",
            Comparator::Le => "<=",
            Comparator::Contains => "contains",
            Comparator::NotContains => "not_contains",
            Comparator::MatchesRegex => "matches_regex",
            Comparator::LengthEquals => "length_equals",
            Comparator::StartsWith => "starts_with",
            Comparator::EndsWith => "ends_with",
            Comparator::TypeEquals => "type_equals",
            Comparator::Exists => "exists",
            Comparator::NotExists => "not_exists",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one comparison. `diagnostic` explains a failure that was not a
/// plain mismatch (unknown operator, bad pattern, coercion failure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub pass: bool,
    pub diagnostic: Option<String>,
}

impl Comparison {
    fn from_bool(pass: bool) -> Self {
        Self {
            pass,
            diagnostic: None,
        }
    }

    fn rejected(diagnostic: impl Into<String>) -> Self {
        Self {
            pass: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// The coercion policy shared by the ordering and equality operators: a
/// value is numeric when it is a JSON number, a boolean (`false` is 0,
/// `true` is 1) or a string that parses as a finite float. Everything else
/// compares by its string form.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    Number(f64),
    Text(String),
}

impl Coerced {
    pub fn from_value(value: &Value) -> Self {
        match as_number(value) {
            Some(number) => Coerced::Number(number),
            None => Coerced::Text(render_value(value)),
        }
    }
}

pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Evaluates `operator` on `actual` and `expected`. Never fails: problems
/// come back as a failing [`Comparison`] with a diagnostic.
///
/// `actual` is `None` when nothing was extracted; that fails every operator
/// except `not_exists`.
pub fn compare(actual: Option<&Value>, expected: &Value, operator: &str) -> Comparison {
    match operator.parse::<Comparator>() {
        Ok(comparator) => compare_with(actual, expected, comparator),
        Err(err) => {
            tracing::warn!(comparator = operator, "unsupported comparator");
            Comparison::rejected(err.to_string())
        }
    }
}

pub fn compare_with(actual: Option<&Value>, expected: &Value, comparator: Comparator) -> Comparison {
    let Some(actual) = actual else {
        return match comparator {
            Comparator::NotExists => Comparison::from_bool(true),
            _ => Comparison::rejected("no value was extracted"),
        };
    };

    match comparator {
        Comparator::Eq => Comparison::from_bool(equals(actual, expected)),
        Comparator::Ne => Comparison::from_bool(!equals(actual, expected)),
        Comparator::Gt | Comparator::Lt | Comparator::Ge | Comparator::Le => {
            order(actual, expected, comparator)
        }
        Comparator::Contains => {
            Comparison::from_bool(render_value(actual).contains(&render_value(expected)))
        }
        Comparator::NotContains => {
            Comparison::from_bool(!render_value(actual).contains(&render_value(expected)))
        }
        Comparator::MatchesRegex => match Regex::new(&render_value(expected)) {
            Ok(pattern) => Comparison::from_bool(pattern.is_match(&render_value(actual))),
            Err(err) => Comparison::rejected(format!("invalid regex pattern: {err}")),
        },
        Comparator::LengthEquals => length_equals(actual, expected),
        Comparator::StartsWith => {
            Comparison::from_bool(render_value(actual).starts_with(&render_value(expected)))
        }
        Comparator::EndsWith => {
            Comparison::from_bool(render_value(actual).ends_with(&render_value(expected)))
        }
        Comparator::TypeEquals => type_equals(actual, expected),
        Comparator::Exists => Comparison::from_bool(true),
        Comparator::NotExists => Comparison::from_bool(false),
    }
}

fn equals(actual: &Value, expected: &Value) -> bool {
    match (Coerced::from_value(actual), Coerced::from_value(expected)) {
        (Coerced::Number(a), Coerced::Number(b)) => (a - b).abs() < NUMERIC_TOLERANCE,
        _ => render_value(actual) == render_value(expected),
    }
}

fn order(actual: &Value, expected: &Value, comparator: Comparator) -> Comparison {
    let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) else {
        return Comparison::rejected(format!(
            "'{}' requires numeric operands, got {} and {}",
            comparator,
            render_value(actual),
            render_value(expected)
        ));
    };
    let pass = match comparator {
        Comparator::Gt => a > b,
        Comparator::Lt => a < b,
        Comparator::Ge => a >= b,
        Comparator::Le => a <= b,
        _ => false,
    };
    Comparison::from_bool(pass)
}

fn length_equals(actual: &Value, expected: &Value) -> Comparison {
    let length = match actual {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => {
            return Comparison::rejected(format!(
                "value {} has no length",
                render_value(other)
            ))
        }
    };
    let expected_len = match expected {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match expected_len {
        Some(expected_len) => Comparison::from_bool(length as u64 == expected_len),
        None => Comparison::rejected(format!(
            "expected length {} is not an integer",
            render_value(expected)
        )),
    }
}

/// Canonical runtime type name of a value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn canonical_type(name: &str) -> Option<&'static str> {
    let canonical = match name.trim().to_ascii_lowercase().as_str() {
        "null" | "none" | "nonetype" => "null",
        "bool" | "boolean" => "boolean",
        "int" | "integer" => "integer",
        "float" | "double" => "float",
        "number" => "number",
        "str" | "string" => "string",
        "list" | "array" | "sequence" => "array",
        "dict" | "object" | "map" => "object",
        _ => return None,
    };
    Some(canonical)
}

fn type_equals(actual: &Value, expected: &Value) -> Comparison {
    let name = render_value(expected);
    let Some(wanted) = canonical_type(&name) else {
        return Comparison::rejected(format!("unknown type name '{name}'"));
    };
    let found = type_name(actual);
    let pass = match wanted {
        "number" => matches!(found, "integer" | "float"),
        other => other == found,
    };
    Comparison::from_bool(pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(actual: Value, expected: Value, operator: &str) -> bool {
        compare(Some(&actual), &expected, operator).pass
    }

    #[test]
    fn equality_uses_numeric_tolerance() {
        assert!(check(json!("1.0000001"), json!("1"), "=="));
        assert!(check(json!(200), json!("200"), "=="));
        assert!(check(json!(1.5), json!(1.5), "=="));
        assert!(!check(json!("1.1"), json!(1), "=="));
        assert!(check(json!("1.1"), json!(1), "!="));
        assert!(!check(json!(3), json!("3.0000000001"), "!="));
    }

    #[test]
    fn equality_falls_back_to_string_form() {
        assert!(check(json!("abc"), json!("abc"), "=="));
        assert!(check(json!(true), json!("true"), "=="));
        assert!(!check(json!("abc"), json!("abd"), "=="));
        assert!(check(json!([1, 2]), json!("[1,2]"), "=="));
    }

    #[test]
    fn booleans_compare_as_zero_and_one() {
        assert!(check(json!(true), json!(1), "=="));
        assert!(check(json!(false), json!(0.0), "=="));
        assert!(check(json!(true), json!("1"), "=="));
        assert!(!check(json!(true), json!(0), "=="));
        assert!(check(json!(true), json!(false), ">"));
        assert!(check(json!(false), json!("false"), "=="));
    }

    #[test]
    fn ordering_requires_numbers() {
        assert!(check(json!("2"), json!("1"), ">"));
        assert!(check(json!(-5), json!("-1"), "<"));
        assert!(check(json!(3), json!(3), ">="));
        assert!(check(json!("3"), json!(3.0), "<="));

        let result = compare(Some(&json!("abc")), &json!(1), ">");
        assert!(!result.pass);
        assert!(result.diagnostic.is_some());
    }

    #[test]
    fn containment_and_affixes() {
        assert!(check(json!("hello world"), json!("lo w"), "contains"));
        assert!(check(json!(["a", "b"]), json!("b"), "contains"));
        assert!(check(json!("hello"), json!("xyz"), "not_contains"));
        assert!(check(json!("hello"), json!("he"), "starts_with"));
        assert!(check(json!("hello"), json!("llo"), "ends_with"));
        assert!(check(json!(12345), json!(12), "startswith"));
    }

    #[test]
    fn regex_searches_anywhere() {
        assert!(check(json!("order-123-x"), json!(r"\d{3}"), "matches_regex"));
        assert!(!check(json!("order"), json!(r"^\d+$"), "regex"));

        let bad = compare(Some(&json!("x")), &json!("("), "matches_regex");
        assert!(!bad.pass);
        assert!(bad.diagnostic.unwrap_or_default().contains("invalid regex"));
    }

    #[test]
    fn length_equals_checks_collections_and_strings() {
        assert!(check(json!([1, 2, 3]), json!(3), "length_equals"));
        assert!(check(json!("héllo"), json!("5"), "length_equals"));
        assert!(check(json!({"a": 1}), json!(1.0), "length"));
        assert!(!check(json!(5), json!(1), "length_equals"));
        assert!(!check(json!([1]), json!("one"), "length_equals"));
    }

    #[test]
    fn type_equals_accepts_aliases() {
        assert!(check(json!("x"), json!("str"), "type_equals"));
        assert!(check(json!("x"), json!("string"), "type_equals"));
        assert!(check(json!(1), json!("int"), "type_equals"));
        assert!(check(json!(1.5), json!("float"), "type_equals"));
        assert!(check(json!(1.5), json!("number"), "type_equals"));
        assert!(check(json!([]), json!("list"), "type"));
        assert!(check(json!({}), json!("dict"), "type_equals"));
        assert!(check(json!(null), json!("NoneType"), "type_equals"));
        assert!(!check(json!("1"), json!("int"), "type_equals"));
    }

    #[test]
    fn absent_actual_only_satisfies_not_exists() {
        assert!(!compare(None, &json!("anything"), "exists").pass);
        assert!(compare(None, &json!(null), "not_exists").pass);
        for operator in ["==", "!=", ">", "contains", "not_contains", "length_equals"] {
            assert!(!compare(None, &json!(1), operator).pass, "{operator}");
        }
    }

    #[test]
    fn extracted_null_exists() {
        assert!(check(json!(null), json!(null), "exists"));
        assert!(!check(json!(null), json!(null), "not_exists"));
    }

    #[test]
    fn unknown_operator_fails_with_diagnostic() {
        let result = compare(Some(&json!(1)), &json!(1), "approximately");
        assert!(!result.pass);
        assert_eq!(
            result.diagnostic.as_deref(),
            Some("unsupported comparator 'approximately'")
        );
    }

    #[test]
    fn operator_names_round_trip() {
        for name in ["==", "!=", ">", "<", ">=", "<=", "contains", "matches_regex", "not_exists"] {
            let comparator: Comparator = name.parse().expect("known operator");
            assert_eq!(comparator.as_str(), name);
        }
    }

    #[test]
    fn legacy_localized_operator_names() {
        let aliases = [
            ("包含", Comparator::Contains),
            ("不包含", Comparator::NotContains),
            ("正则匹配", Comparator::MatchesRegex),
            ("长度", Comparator::LengthEquals),
            ("以开头", Comparator::StartsWith),
            ("以结尾", Comparator::EndsWith),
            ("类型", Comparator::TypeEquals),
            ("存在", Comparator::Exists),
            ("不存在", Comparator::NotExists),
        ];
        for (name, expected) in aliases {
            assert_eq!(name.parse::<Comparator>(), Ok(expected), "{name}");
        }

        assert!(check(json!("abc"), json!("b"), "包含"));
        assert!(!check(json!("abc"), json!("z"), "包含"));
        assert!(check(json!("abc"), json!("^a"), "正则匹配"));
        assert!(compare(None, &json!(null), "不存在").pass);
    }
}
