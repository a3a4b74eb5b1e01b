use anyhow::Context;
use apicase_core::{CaseFile, Variables};
use serde_json::Value;
use std::fs;
use std::path::Path;

pub fn load_case_file(path: &Path) -> anyhow::Result<CaseFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read case file {}", path.display()))?;
    let document: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse YAML in {}", path.display()))?;
    CaseFile::from_value(document).with_context(|| format!("invalid case file {}", path.display()))
}

/// `--var` values are read as YAML scalars, so `id=3` is a number and
/// `flag=true` a boolean; anything unparsable stays a string.
pub fn parse_overrides(vars: Vec<(String, String)>) -> Variables {
    vars.into_iter()
        .map(|(key, raw)| {
            let value = serde_yaml::from_str::<Value>(&raw)
                .ok()
                .filter(|value| !value.is_null() || raw.trim() == "null")
                .unwrap_or(Value::String(raw));
            (key, value)
        })
        .collect()
}

pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].trim().is_empty() {
        return Err(format!("expected KEY=VALUE, got '{s}'"));
    }
    Ok((parts[0].trim().to_string(), parts[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_yaml_case_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("login.yml");
        fs::write(
            &path,
            r#"
test_cases:
  - case_name: login ok
    request:
      method: POST
      path: /login
      json: {user: "${user}"}
    extract:
      token: $.data.token
    validate:
      - [$.status_code, "==", 200]
      - [$.token, exists, null, token issued]
"#,
        )
        .expect("write");

        let file = load_case_file(&path).expect("loads");
        let case = file.find("login ok").expect("case");
        assert_eq!(case.validate.len(), 2);
        assert_eq!(case.validate[0].expected, json!(200));
    }

    #[test]
    fn rejects_duplicate_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dup.yml");
        fs::write(&path, "test_cases:\n  - case_name: a\n  - case_name: a\n").expect("write");

        let err = load_case_file(&path).expect_err("duplicates");
        assert!(format!("{err:#}").contains("unique"));
    }

    #[test]
    fn overrides_are_typed() {
        let vars = parse_overrides(vec![
            ("id".into(), "3".into()),
            ("flag".into(), "true".into()),
            ("name".into(), "ada".into()),
            ("empty".into(), "".into()),
        ]);
        assert_eq!(vars["id"], json!(3));
        assert_eq!(vars["flag"], json!(true));
        assert_eq!(vars["name"], json!("ada"));
        assert_eq!(vars["empty"], json!(""));
    }

    #[test]
    fn key_val_requires_separator() {
        assert_eq!(
            parse_key_val("a=b=c").expect("ok"),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }
}
