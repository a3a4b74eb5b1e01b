use anyhow::Context;
use apicase_core::Variables;
use serde_json::Value;
use std::path::Path;

/// One row of a data file, bound to a display name.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub name: String,
    pub values: Variables,
}

/// Reads a CSV data file with a header row. Every data row becomes one set of
/// external variables; cells are typed with [`parse_cell`].
///
/// Rows are named after their first column, falling back to an `id` column
/// and then to `case_<n>`. An empty file still yields one unnamed row so the
/// cases run once.
pub fn load_rows(path: &Path) -> anyhow::Result<Vec<DataRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open data file {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("malformed row {} in {}", index + 1, path.display()))?;
        let mut values = Variables::new();
        for (column, (header, cell)) in headers.iter().zip(record.iter()).enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = if column == 0 && cell.is_empty() {
                Value::String(format!("test_case_{}", index + 1))
            } else {
                parse_cell(cell)
            };
            values.insert(header.clone(), value);
        }

        let name = headers
            .first()
            .and_then(|first| values.get(first))
            .filter(|value| is_truthy(value))
            .or_else(|| values.get("id").filter(|value| is_truthy(value)))
            .map(apicase_core::render_value)
            .unwrap_or_else(|| format!("case_{}", index + 1));

        values.insert("_csv_row".to_string(), Value::from(index + 1));
        values.insert("_csv_file".to_string(), Value::String(file_name.clone()));
        rows.push(DataRow { name, values });
    }

    if rows.is_empty() {
        tracing::warn!(path = %path.display(), "data file has no rows, running once without data");
        rows.push(DataRow {
            name: "case_1".to_string(),
            values: Variables::new(),
        });
    }
    Ok(rows)
}

/// `true`/`false` and `null`/`none` (any case) become booleans and null, an
/// empty cell is null, a cell containing `.` is tried as a float and any
/// other cell as an integer. Anything else stays text.
pub fn parse_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match cell.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "none" => return Value::Null,
        _ => {}
    }
    let trimmed = cell.trim();
    let number = if cell.contains('.') {
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
    } else {
        trimmed.parse::<i64>().ok().map(Value::from)
    };
    number.unwrap_or_else(|| Value::String(cell.to_string()))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn cells_are_typed() {
        assert_eq!(parse_cell(""), Value::Null);
        assert_eq!(parse_cell("TRUE"), json!(true));
        assert_eq!(parse_cell("False"), json!(false));
        assert_eq!(parse_cell("None"), Value::Null);
        assert_eq!(parse_cell("42"), json!(42));
        assert_eq!(parse_cell("-7"), json!(-7));
        assert_eq!(parse_cell("1.5"), json!(1.5));
        assert_eq!(parse_cell("1.2.3"), json!("1.2.3"));
        assert_eq!(parse_cell("0013a"), json!("0013a"));
        assert_eq!(parse_cell("ada"), json!("ada"));
    }

    #[test]
    fn rows_become_named_variable_sets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("login.csv");
        fs::write(
            &path,
            "\u{feff}title,username,password,remember\n\
             valid login,17375770915,secret,true\n\
             ,nobody,,false\n",
        )
        .expect("write");

        let rows = load_rows(&path).expect("rows");
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].name, "valid login");
        assert_eq!(rows[0].values["username"], json!(17375770915_i64));
        assert_eq!(rows[0].values["password"], json!("secret"));
        assert_eq!(rows[0].values["remember"], json!(true));
        assert_eq!(rows[0].values["_csv_row"], json!(1));
        assert_eq!(rows[0].values["_csv_file"], json!("login.csv"));

        assert_eq!(rows[1].name, "test_case_2");
        assert_eq!(rows[1].values["title"], json!("test_case_2"));
        assert_eq!(rows[1].values["password"], Value::Null);
    }

    #[test]
    fn falsy_first_column_falls_back_to_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("flags.csv");
        fs::write(&path, "enabled,user\nfalse,ada\n0,bob\n").expect("write");

        let rows = load_rows(&path).expect("rows");
        let names: Vec<&str> = rows.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, vec!["case_1", "case_2"]);
    }

    #[test]
    fn header_only_file_runs_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.csv");
        fs::write(&path, "name,value\n").expect("write");

        let rows = load_rows(&path).expect("rows");
        assert_eq!(rows, vec![DataRow {
            name: "case_1".to_string(),
            values: Variables::new(),
        }]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_rows(&dir.path().join("nope.csv")).is_err());
    }
}
