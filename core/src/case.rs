use crate::store::Variables;
use crate::template::{render_value, substitute, substitute_str};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, thiserror::Error)]
pub enum CaseError {
    #[error("case file is missing the 'test_cases' key")]
    MissingTestCases,
    #[error("case names must be unique, duplicated: {}", .0.join(", "))]
    DuplicateCase(Vec<String>),
    #[error("case '{0}' not found")]
    MissingCase(String),
    #[error("invalid case definition: {0}")]
    Schema(String),
}

/// The parsed contents of one case file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseFile {
    pub test_cases: Vec<CaseDefinition>,
}

impl CaseFile {
    /// Builds a case file from an already-parsed document, rejecting
    /// duplicate case names.
    pub fn from_value(document: Value) -> Result<Self, CaseError> {
        let has_cases = document
            .as_object()
            .is_some_and(|map| map.contains_key("test_cases"));
        if !has_cases {
            return Err(CaseError::MissingTestCases);
        }
        let file: CaseFile =
            serde_json::from_value(document).map_err(|err| CaseError::Schema(err.to_string()))?;
        file.check_unique_names()?;
        Ok(file)
    }

    fn check_unique_names(&self) -> Result<(), CaseError> {
        let mut seen = BTreeSet::new();
        let mut duplicated = BTreeSet::new();
        for case in &self.test_cases {
            if !seen.insert(case.case_name.as_str()) {
                duplicated.insert(case.case_name.clone());
            }
        }
        if duplicated.is_empty() {
            Ok(())
        } else {
            Err(CaseError::DuplicateCase(duplicated.into_iter().collect()))
        }
    }

    pub fn find(&self, name: &str) -> Result<&CaseDefinition, CaseError> {
        self.test_cases
            .iter()
            .find(|case| case.case_name == name)
            .ok_or_else(|| CaseError::MissingCase(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.test_cases.iter().map(|case| case.case_name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub case_name: String,
    #[serde(default)]
    pub request: RequestSpec,
    /// Variable name to extraction expression.
    #[serde(default)]
    pub extract: BTreeMap<String, String>,
    #[serde(default)]
    pub validate: Vec<ValidationRule>,
    #[serde(default)]
    pub teardown: Vec<TeardownAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub json: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub cookies: BTreeMap<String, Value>,
    #[serde(default)]
    pub auth: Option<AuthSpec>,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default = "default_true")]
    pub allow_redirects: bool,
    #[serde(default)]
    pub verify_ssl: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self {
            method: default_method(),
            url: None,
            path: None,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            json: None,
            data: None,
            cookies: BTreeMap::new(),
            auth: None,
            timeout: None,
            allow_redirects: true,
            verify_ssl: false,
        }
    }
}

/// Request payload, chosen from the declared `Content-Type`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Json(Value),
    Form(BTreeMap<String, String>),
}

impl RequestSpec {
    pub fn substitute(&self, variables: &Variables) -> RequestSpec {
        let map = |source: &BTreeMap<String, Value>| -> BTreeMap<String, Value> {
            source
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, variables)))
                .collect()
        };
        RequestSpec {
            method: substitute_str(&self.method, variables),
            url: self.url.as_deref().map(|url| substitute_str(url, variables)),
            path: self.path.as_deref().map(|path| substitute_str(path, variables)),
            headers: map(&self.headers),
            params: map(&self.params),
            json: self.json.as_ref().map(|value| substitute(value, variables)),
            data: self.data.as_ref().map(|value| substitute(value, variables)),
            cookies: map(&self.cookies),
            auth: self.auth.as_ref().map(|auth| auth.substitute(variables)),
            timeout: self.timeout,
            allow_redirects: self.allow_redirects,
            verify_ssl: self.verify_ssl,
        }
    }

    pub fn content_type(&self) -> Option<String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| render_value(value).to_ascii_lowercase())
    }

    /// Form encodings send `data` as flat string pairs; anything else sends
    /// `json`, falling back to `data`, as a JSON document.
    pub fn body(&self) -> RequestBody {
        let content_type = self.content_type().unwrap_or_default();
        let is_form = content_type.contains("application/x-www-form-urlencoded")
            || content_type.contains("multipart/form-data");

        if is_form {
            return match &self.data {
                Some(Value::Object(fields)) => RequestBody::Form(
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), render_value(v)))
                        .collect(),
                ),
                Some(Value::Null) | None => RequestBody::None,
                Some(other) => RequestBody::Json(other.clone()),
            };
        }

        match self.json.as_ref().or(self.data.as_ref()) {
            Some(Value::Null) | None => RequestBody::None,
            Some(value) => RequestBody::Json(value.clone()),
        }
    }

    pub fn header_pairs(&self) -> Vec<(String, String)> {
        pairs(&self.headers)
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        pairs(&self.params)
    }

    pub fn cookie_pairs(&self) -> Vec<(String, String)> {
        pairs(&self.cookies)
    }
}

fn pairs(source: &BTreeMap<String, Value>) -> Vec<(String, String)> {
    source
        .iter()
        .map(|(k, v)| (k.clone(), render_value(v)))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    Basic,
    Bearer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSpec {
    #[serde(rename = "type", default)]
    pub kind: AuthKind,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub token: String,
}

impl AuthSpec {
    fn substitute(&self, variables: &Variables) -> AuthSpec {
        AuthSpec {
            kind: self.kind,
            username: substitute_str(&self.username, variables),
            password: substitute_str(&self.password, variables),
            token: substitute_str(&self.token, variables),
        }
    }
}

/// `[field, comparator, expected, message?]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRule {
    pub field: String,
    pub comparator: String,
    pub expected: Value,
    pub message: Option<String>,
}

impl<'de> Deserialize<'de> for ValidationRule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let items = Vec::<Value>::deserialize(deserializer)?;
        if !(3..=4).contains(&items.len()) {
            return Err(de::Error::custom(format!(
                "validation rule must have 3 or 4 elements, found {}",
                items.len()
            )));
        }
        let mut items = items.into_iter();
        let field = match items.next() {
            Some(Value::String(field)) => field,
            other => {
                return Err(de::Error::custom(format!(
                    "validation field must be a string, found {}",
                    other.map(|v| render_value(&v)).unwrap_or_default()
                )))
            }
        };
        let comparator = items.next().map(|v| render_value(&v)).unwrap_or_default();
        let expected = items.next().unwrap_or(Value::Null);
        let message = items
            .next()
            .filter(|v| !v.is_null())
            .map(|v| render_value(&v));
        Ok(ValidationRule {
            field,
            comparator,
            expected,
            message,
        })
    }
}

impl Serialize for ValidationRule {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.message.is_some() { 4 } else { 3 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.field)?;
        seq.serialize_element(&self.comparator)?;
        seq.serialize_element(&self.expected)?;
        if let Some(message) = &self.message {
            seq.serialize_element(message)?;
        }
        seq.end()
    }
}

/// Raw teardown entry, `{action, params}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownAction {
    pub action: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

/// The closed set of teardown actions.
#[derive(Debug, Clone, PartialEq)]
pub enum Teardown {
    Logout { token: String },
    ClearVariables(Vec<String>),
    CleanExtractFile,
    Unknown(String),
}

impl TeardownAction {
    pub fn resolve(&self, variables: &Variables) -> Teardown {
        match self.action.as_str() {
            "logout" => Teardown::Logout {
                token: self
                    .params
                    .get("token")
                    .map(|token| render_value(&substitute(token, variables)))
                    .unwrap_or_default(),
            },
            "clear_variables" => {
                let names = match self.params.get("variables") {
                    Some(Value::Array(items)) => items.iter().map(render_value).collect(),
                    Some(Value::String(name)) => vec![name.clone()],
                    _ => Vec::new(),
                };
                Teardown::ClearVariables(names)
            }
            "clean_extract_file" => Teardown::CleanExtractFile,
            other => Teardown::Unknown(other.to_string()),
        }
    }
}
