use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

/// One step of a parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Dotted segment (`a.b`). Looks up a key on maps; a run of digits
    /// indexes into sequences.
    Field(String),
    /// Bracketed key, quoted (`['a']`, `["a"]`) or bare (`[a]`).
    Key(String),
    /// Bracketed integer index; negative values count from the end.
    Index(i64),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => write!(f, ".{name}"),
            PathSegment::Key(name) => write!(f, "['{name}']"),
            PathSegment::Index(index) => write!(f, "[{index}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: &'static str },
}

impl PathError {
    fn malformed(path: &str, reason: &'static str) -> Self {
        PathError::MalformedPath {
            path: path.to_string(),
            reason,
        }
    }
}

/// A parsed path expression, kept together with its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    raw: String,
    segments: Vec<PathSegment>,
}

impl PathExpr {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        Ok(Self {
            raw: path.to_string(),
            segments: parse_path(path)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Evaluates against `data`. `None` means the path addresses nothing.
    pub fn evaluate(&self, data: &Value) -> Option<Value> {
        evaluate_segments(data, &self.segments)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses and evaluates `path` against `data` in one go.
pub fn evaluate(data: &Value, path: &str) -> Result<Option<Value>, PathError> {
    let segments = parse_path(path)?;
    Ok(evaluate_segments(data, &segments))
}

/// Splits a path expression into segments.
///
/// A leading `$` and a following `.` are optional. Segments are separated by
/// `.` or wrapped in `[...]`; an empty path addresses the whole document.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, PathError> {
    let trimmed = path.trim();
    let body = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let body = body.strip_prefix('.').unwrap_or(body);

    let chars: Vec<char> = body.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
            }
            '[' => {
                let (segment, next) = parse_bracket(path, &chars, i)?;
                segments.push(segment);
                i = next;
            }
            _ => {
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                segments.push(PathSegment::Field(name));
            }
        }
    }

    Ok(segments)
}

fn parse_bracket(path: &str, chars: &[char], open: usize) -> Result<(PathSegment, usize), PathError> {
    let mut i = open + 1;

    if let Some(&quote) = chars.get(i).filter(|c| **c == '\'' || **c == '"') {
        let start = i + 1;
        let close_quote = chars[start..]
            .iter()
            .position(|c| *c == quote)
            .map(|offset| start + offset)
            .ok_or_else(|| PathError::malformed(path, "unterminated quoted key"))?;
        let key: String = chars[start..close_quote].iter().collect();
        i = close_quote + 1;
        if chars.get(i) != Some(&']') {
            return Err(PathError::malformed(path, "unterminated bracket"));
        }
        return Ok((PathSegment::Key(key), i + 1));
    }

    let close = chars[i..]
        .iter()
        .position(|c| *c == ']')
        .map(|offset| i + offset)
        .ok_or_else(|| PathError::malformed(path, "unterminated bracket"))?;
    let content: String = chars[i..close].iter().collect();
    i = close + 1;

    // Only a bare integer is an index; `[ 1 ]` names the key " 1 ".
    let segment = match parse_index(&content) {
        Some(index) => PathSegment::Index(index),
        None => PathSegment::Key(content),
    };
    Ok((segment, i))
}

fn parse_index(content: &str) -> Option<i64> {
    let digits = content.strip_prefix('-').unwrap_or(content);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    content.parse().ok()
}

pub fn evaluate_segments(data: &Value, segments: &[PathSegment]) -> Option<Value> {
    let mut current = Cow::Borrowed(data);
    for segment in segments {
        current = match current {
            Cow::Borrowed(value) => step(value, segment)?,
            Cow::Owned(value) => Cow::Owned(step(&value, segment)?.into_owned()),
        };
    }
    Some(current.into_owned())
}

fn step<'a>(current: &'a Value, segment: &PathSegment) -> Option<Cow<'a, Value>> {
    match (current, segment) {
        (Value::Object(map), PathSegment::Field(key) | PathSegment::Key(key)) => {
            map.get(key).map(Cow::Borrowed)
        }
        (Value::Array(items), PathSegment::Field(key)) => match parse_index(key) {
            Some(index) if index >= 0 => items.get(index as usize).map(Cow::Borrowed),
            _ => fan_out(items, key),
        },
        (Value::Array(items), PathSegment::Key(key)) => fan_out(items, key),
        (Value::Array(items), PathSegment::Index(index)) => {
            let len = items.len() as i64;
            let position = if *index < 0 { len + index } else { *index };
            if (0..len).contains(&position) {
                items.get(position as usize).map(Cow::Borrowed)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Looks `key` up in every map element of `items`. A single hit unwraps to
/// that value; several hits are collected into a sequence.
fn fan_out<'a>(items: &'a [Value], key: &str) -> Option<Cow<'a, Value>> {
    let mut matches: Vec<&'a Value> = items
        .iter()
        .filter_map(|item| item.as_object().and_then(|map| map.get(key)))
        .collect();
    match matches.len() {
        0 => None,
        1 => matches.pop().map(Cow::Borrowed),
        _ => Some(Cow::Owned(Value::Array(
            matches.into_iter().cloned().collect(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(data: &Value, path: &str) -> Option<Value> {
        evaluate(data, path).expect("path should parse")
    }

    #[test]
    fn tokenizes_mixed_dotted_and_bracketed_segments() {
        let segments = parse_path("$.data.items[0]['first name'][\"x.y\"][-2].id").expect("parse");
        assert_eq!(
            segments,
            vec![
                PathSegment::Field("data".into()),
                PathSegment::Field("items".into()),
                PathSegment::Index(0),
                PathSegment::Key("first name".into()),
                PathSegment::Key("x.y".into()),
                PathSegment::Index(-2),
                PathSegment::Field("id".into()),
            ]
        );
    }

    #[test]
    fn leading_dollar_and_dot_are_optional() {
        let data = json!({"user": {"name": "ada"}});
        assert_eq!(eval(&data, "$.user.name"), Some(json!("ada")));
        assert_eq!(eval(&data, ".user.name"), Some(json!("ada")));
        assert_eq!(eval(&data, "user.name"), Some(json!("ada")));
        assert_eq!(eval(&data, "$['user'][name]"), Some(json!("ada")));
    }

    #[test]
    fn empty_path_returns_whole_document() {
        let data = json!({"a": 1});
        assert_eq!(eval(&data, "$"), Some(data.clone()));
        assert_eq!(eval(&data, ""), Some(data));
    }

    #[test]
    fn negative_index_counts_from_end() {
        let data = json!(["a", "b", "c"]);
        assert_eq!(eval(&data, "[-1]"), Some(json!("c")));
        assert_eq!(eval(&data, "[-3]"), Some(json!("a")));
        assert_eq!(eval(&data, "[-4]"), None);
        assert_eq!(eval(&data, "[3]"), None);
    }

    #[test]
    fn dotted_digits_index_into_sequences() {
        let data = json!({"items": [10, 20]});
        assert_eq!(eval(&data, "items.1"), Some(json!(20)));
        assert_eq!(eval(&data, "items.2"), None);
    }

    #[test]
    fn key_over_sequence_fans_out() {
        let many = json!([{"k": 1}, {"k": 2}]);
        assert_eq!(eval(&many, "k"), Some(json!([1, 2])));

        let single = json!([{"k": 1}, {"x": 2}]);
        assert_eq!(eval(&single, "k"), Some(json!(1)));

        let none = json!([{"x": 1}, 3, "s"]);
        assert_eq!(eval(&none, "k"), None);
        assert_eq!(eval(&none, "['k']"), None);
    }

    #[test]
    fn fan_out_result_can_be_indexed_further() {
        let data = json!({"users": [{"id": 7}, {"id": 8}, {"name": "x"}]});
        assert_eq!(eval(&data, "$.users.id[-1]"), Some(json!(8)));
    }

    #[test]
    fn segments_on_scalars_are_absent() {
        let data = json!({"a": "text", "n": null});
        assert_eq!(eval(&data, "a.b"), None);
        assert_eq!(eval(&data, "a[0]"), None);
        assert_eq!(eval(&data, "n.x"), None);
        assert_eq!(eval(&data, "missing"), None);
    }

    #[test]
    fn present_null_is_not_absent() {
        let data = json!({"n": null});
        assert_eq!(eval(&data, "n"), Some(Value::Null));
    }

    #[test]
    fn index_on_map_is_absent() {
        let data = json!({"0": "zero"});
        assert_eq!(eval(&data, "[0]"), None);
        assert_eq!(eval(&data, "['0']"), Some(json!("zero")));
        assert_eq!(eval(&data, "0"), Some(json!("zero")));
    }

    #[test]
    fn padded_bracket_content_is_a_key() {
        assert_eq!(
            parse_path("$[ 1 ]").expect("parses"),
            vec![PathSegment::Key(" 1 ".to_string())]
        );
        let data = json!({"items": [10, 20], "map": {" 1 ": "spaced"}});
        assert_eq!(eval(&data, "$.items[ 1 ]"), None);
        assert_eq!(eval(&data, "$.map[ 1 ]"), Some(json!("spaced")));
        assert_eq!(eval(&data, "$.items[1]"), Some(json!(20)));
    }

    #[test]
    fn unterminated_bracket_is_malformed() {
        let err = evaluate(&json!({}), "$.items[0").expect_err("should fail");
        assert!(matches!(err, PathError::MalformedPath { ref path, .. } if path == "$.items[0"));

        let err = parse_path("a['b]").expect_err("should fail");
        assert!(err.to_string().contains("a['b]"));
    }

    #[test]
    fn path_expr_keeps_source_text() {
        let expr = PathExpr::parse("$.a[1]").expect("parse");
        assert_eq!(expr.as_str(), "$.a[1]");
        assert_eq!(expr.segments().len(), 2);
        assert_eq!(expr.evaluate(&json!({"a": [0, 5]})), Some(json!(5)));
    }
}
