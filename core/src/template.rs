use crate::store::Variables;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Replaces `${name}` placeholders in every string scalar of `value`.
///
/// Maps and sequences are rebuilt with the same shape; keys are left alone.
/// Placeholders naming an undefined variable stay in the output verbatim.
pub fn substitute(value: &Value, variables: &Variables) -> Value {
    match value {
        Value::String(text) => Value::String(substitute_str(text, variables)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute(item, variables))
                .collect(),
        ),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), substitute(item, variables));
            }
            Value::Object(resolved)
        }
        other => other.clone(),
    }
}

pub fn substitute_str(text: &str, variables: &Variables) -> String {
    if !text.contains("${") {
        return text.to_string();
    }

    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(start_offset) = text[cursor..].find("${") {
        let start_idx = cursor + start_offset;
        result.push_str(&text[cursor..start_idx]);

        let remainder = &text[start_idx + 2..];
        let Some(end_offset) = remainder.find('}') else {
            result.push_str(&text[start_idx..]);
            return result;
        };
        let end_idx = start_idx + 2 + end_offset;
        let name = &remainder[..end_offset];

        // A `${` that does not open a well-formed placeholder is plain text;
        // scanning resumes right after it so a later placeholder still resolves.
        if !is_placeholder_name(name) {
            result.push_str("${");
            cursor = start_idx + 2;
            continue;
        }

        match variables.get(name) {
            Some(replacement) => result.push_str(&render_value(replacement)),
            None => {
                tracing::debug!(variable = name, "placeholder left unresolved");
                result.push_str(&text[start_idx..=end_idx]);
            }
        }
        cursor = end_idx + 1;
    }

    result.push_str(&text[cursor..]);
    result
}

/// Names of all well-formed placeholders referenced anywhere in `value`.
pub fn placeholders(value: &Value) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_placeholders(value, &mut names);
    names
}

fn collect_placeholders(value: &Value, names: &mut BTreeSet<String>) {
    match value {
        Value::String(text) => names.extend(placeholders_in(text)),
        Value::Array(items) => items
            .iter()
            .for_each(|item| collect_placeholders(item, names)),
        Value::Object(map) => map
            .values()
            .for_each(|item| collect_placeholders(item, names)),
        _ => {}
    }
}

pub fn placeholders_in(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = &after[..end];
        if is_placeholder_name(name) {
            names.push(name.to_string());
            rest = &after[end + 1..];
        } else {
            rest = after;
        }
    }
    names
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// String form of a value as it appears when spliced into text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        serde_json::from_value(value).expect("variables map")
    }

    #[test]
    fn replaces_placeholders_in_nested_strings() {
        let variables = vars(json!({"token": "abc", "id": 42}));
        let input = json!({
            "headers": {"Authorization": "Bearer ${token}"},
            "body": [{"user": "${id}"}, "${id}-${token}", 3, true, null],
        });

        let output = substitute(&input, &variables);
        assert_eq!(
            output,
            json!({
                "headers": {"Authorization": "Bearer abc"},
                "body": [{"user": "42"}, "42-abc", 3, true, null],
            })
        );
    }

    #[test]
    fn undefined_placeholder_is_kept() {
        let variables = vars(json!({"a": 1}));
        assert_eq!(substitute_str("x=${missing};a=${a}", &variables), "x=${missing};a=1");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let variables = vars(json!({"a": 1}));
        let input = json!({"k": ["plain", "$ {a}", "{a}", "$a"], "n": 1.5});
        assert_eq!(substitute(&input, &variables), input);
    }

    #[test]
    fn malformed_placeholders_are_left_alone() {
        let variables = vars(json!({"a b": "x", "a": "y"}));
        assert_eq!(substitute_str("${a b}", &variables), "${a b}");
        assert_eq!(substitute_str("${}", &variables), "${}");
        assert_eq!(substitute_str("${a", &variables), "${a");
        assert_eq!(substitute_str("pre ${a} ${a", &variables), "pre y ${a");
    }

    #[test]
    fn stray_opener_does_not_swallow_a_later_placeholder() {
        let variables = vars(json!({"a": "y"}));
        assert_eq!(substitute_str("${${a}}", &variables), "${y}");
        assert_eq!(substitute_str("cost ${ ${a}", &variables), "cost ${ y");
        assert_eq!(placeholders_in("${${a}} ${ ${b}"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn structured_values_render_as_json() {
        let variables = vars(json!({"list": [1, "two"], "obj": {"k": null}}));
        assert_eq!(substitute_str("${list}", &variables), r#"[1,"two"]"#);
        assert_eq!(substitute_str("${obj}", &variables), r#"{"k":null}"#);
    }

    #[test]
    fn collects_referenced_names() {
        let value = json!({"a": "${x} and ${y}", "b": ["${x}", "${bad name}"]});
        let names: Vec<String> = placeholders(&value).into_iter().collect();
        assert_eq!(names, vec!["x".to_string(), "y".to_string()]);
    }
}
