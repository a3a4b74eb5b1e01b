use crate::case::{CaseDefinition, RequestBody, RequestSpec, Teardown};
use crate::compare::compare;
use crate::event::{Event, EventSink, TracingSink};
use crate::path::PathError;
use crate::response::{extract_facet, field_value, RawResponse};
use crate::store::{merge_variables, PersistedStore, SessionStore, Variables};
use crate::template::{placeholders, render_value, substitute, substitute_str};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Sends a fully substituted request. Implementations own timeouts,
/// sessions and TLS; the executor only sees the outcome.
pub trait Transport {
    fn send(&mut self, request: &RequestSpec) -> Result<RawResponse, TransportError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseState {
    Loaded,
    VariablesMerged,
    Substituted,
    Sent,
    Extracted,
    Validated,
    TornDown,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub field: String,
    pub comparator: String,
    pub expected: Value,
    pub actual: Option<Value>,
    pub message: String,
    pub pass: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub case_name: String,
    pub status_code: u16,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub body: Value,
    pub elapsed_secs: f64,
    pub extracted: Variables,
    pub validations: Vec<ValidationResult>,
    pub success: bool,
}

impl ExecutionResult {
    fn new(case_name: &str, response: &RawResponse) -> Self {
        Self {
            case_name: case_name.to_string(),
            status_code: response.status,
            url: response.url.clone(),
            headers: response.headers.clone(),
            cookies: response.cookies.clone(),
            body: response.body.clone(),
            elapsed_secs: response.elapsed.as_secs_f64(),
            extracted: Variables::new(),
            validations: Vec::new(),
            success: false,
        }
    }
}

/// The first validation rule that did not pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationFailure {
    pub field: String,
    pub comparator: String,
    pub expected: Value,
    pub actual: Option<Value>,
    pub message: String,
}

impl From<&ValidationResult> for ValidationFailure {
    fn from(result: &ValidationResult) -> Self {
        Self {
            field: result.field.clone(),
            comparator: result.comparator.clone(),
            expected: result.expected.clone(),
            actual: result.actual.clone(),
            message: result.message.clone(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actual = self
            .actual
            .as_ref()
            .map(render_value)
            .unwrap_or_else(|| "<absent>".to_string());
        if !self.message.is_empty() {
            write!(f, "{}: ", self.message)?;
        }
        write!(
            f,
            "{} {} {}, actual: {}",
            self.field,
            self.comparator,
            render_value(&self.expected),
            actual
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("case '{case}': request failed: {source}")]
    Transport {
        case: String,
        #[source]
        source: TransportError,
    },
    #[error("case '{case}': response status {status} is not a success")]
    Status {
        case: String,
        status: u16,
        result: Box<ExecutionResult>,
    },
    #[error("case '{case}': validation failed: {failure}")]
    Validation {
        case: String,
        failure: ValidationFailure,
        result: Box<ExecutionResult>,
    },
}

impl RunError {
    pub fn case(&self) -> &str {
        match self {
            RunError::Transport { case, .. }
            | RunError::Status { case, .. }
            | RunError::Validation { case, .. } => case,
        }
    }

    /// Whatever was recorded before the case failed.
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            RunError::Transport { .. } => None,
            RunError::Status { result, .. } | RunError::Validation { result, .. } => Some(result),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Treat non-2xx responses as a transport failure.
    pub reject_error_status: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            reject_error_status: true,
        }
    }
}

/// Runs cases one at a time, carrying extracted variables between them.
pub struct Executor {
    transport: Box<dyn Transport>,
    store: Arc<dyn PersistedStore>,
    sink: Box<dyn EventSink>,
    session: SessionStore,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(transport: impl Transport + 'static, store: Arc<dyn PersistedStore>) -> Self {
        Self {
            transport: Box::new(transport),
            store,
            sink: Box::new(TracingSink),
            session: SessionStore::default(),
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn PersistedStore> {
        &self.store
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.session.set(name, value);
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.session.get(name)
    }

    pub fn variables(&self) -> &Variables {
        self.session.all()
    }

    pub fn clear_variables(&mut self) {
        self.session.clear();
    }

    /// Session variables over the persisted store over `external`. The store
    /// is re-read on every call.
    pub fn resolve_variables(&self, external: &Variables) -> Variables {
        let persisted = self.store.read_all().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to read persisted variables, using none");
            Variables::new()
        });
        merge_variables(self.session.all(), &persisted, external)
    }

    pub fn run_case(
        &mut self,
        case: &CaseDefinition,
        external: &Variables,
    ) -> Result<ExecutionResult, RunError> {
        let name = case.case_name.as_str();
        enter(name, CaseState::Loaded);
        self.sink.emit(&Event::CaseStarted {
            case: name.to_string(),
        });

        let variables = self.resolve_variables(external);
        enter(name, CaseState::VariablesMerged);

        let request = case.request.substitute(&variables);
        warn_unresolved(name, &request);
        enter(name, CaseState::Substituted);

        self.sink.emit(&request_event(name, &request));
        let response = match self.transport.send(&request) {
            Ok(response) => response,
            Err(source) => {
                let err = RunError::Transport {
                    case: name.to_string(),
                    source,
                };
                return Err(self.fail(name, err));
            }
        };
        enter(name, CaseState::Sent);
        self.sink.emit(&Event::Response {
            case: name.to_string(),
            status: response.status,
            url: response.url.clone(),
            elapsed_secs: response.elapsed.as_secs_f64(),
            headers: response.headers.clone(),
            body: response.body.clone(),
        });

        let mut result = ExecutionResult::new(name, &response);
        if self.options.reject_error_status && !response.is_success() {
            let err = RunError::Status {
                case: name.to_string(),
                status: response.status,
                result: Box::new(result),
            };
            return Err(self.fail(name, err));
        }

        result.extracted = self.extract(case, &response, &variables);
        enter(name, CaseState::Extracted);

        let failure = self.validate(case, &response, &variables, &mut result);
        enter(name, CaseState::Validated);

        if failure.is_none() && !result.extracted.is_empty() {
            self.persist(&result.extracted);
        }

        self.teardown(case, &variables);
        enter(name, CaseState::TornDown);

        match failure {
            Some(failure) => {
                let err = RunError::Validation {
                    case: name.to_string(),
                    failure,
                    result: Box::new(result),
                };
                Err(self.fail(name, err))
            }
            None => {
                result.success = true;
                enter(name, CaseState::Completed);
                self.sink.emit(&Event::CaseFinished {
                    case: name.to_string(),
                    success: true,
                    error: None,
                });
                Ok(result)
            }
        }
    }

    fn fail(&self, name: &str, err: RunError) -> RunError {
        enter(name, CaseState::Failed);
        self.sink.emit(&Event::CaseFinished {
            case: name.to_string(),
            success: false,
            error: Some(err.to_string()),
        });
        err
    }

    /// Applies every extraction rule. Rules that address nothing, or whose
    /// path is malformed, are skipped.
    fn extract(
        &mut self,
        case: &CaseDefinition,
        response: &RawResponse,
        variables: &Variables,
    ) -> Variables {
        let name = case.case_name.as_str();
        let mut extracted = Variables::new();

        for (variable, expression) in &case.extract {
            let expression = substitute_str(expression, variables);
            match extract_facet(response, &expression) {
                Ok(Some(value)) => {
                    tracing::debug!(case = name, variable = %variable, value = %value, "extracted");
                    self.session.set(variable.clone(), value.clone());
                    extracted.insert(variable.clone(), value);
                }
                Ok(None) => {
                    tracing::warn!(case = name, variable = %variable, path = %expression, "extraction path matched nothing");
                }
                Err(err) => {
                    tracing::warn!(case = name, variable = %variable, error = %err, "extraction skipped");
                }
            }
        }

        self.sink.emit(&Event::Extraction {
            case: name.to_string(),
            variables: extracted.clone(),
        });
        extracted
    }

    /// Evaluates rules in declared order and stops at the first failure.
    fn validate(
        &self,
        case: &CaseDefinition,
        response: &RawResponse,
        variables: &Variables,
        result: &mut ExecutionResult,
    ) -> Option<ValidationFailure> {
        let name = case.case_name.as_str();

        for rule in &case.validate {
            let field = substitute_str(&rule.field, variables);
            let expected = substitute(&rule.expected, variables);
            let declared = rule.message.clone().unwrap_or_default();

            let validation = match field_value(response, &field) {
                Ok(actual) => {
                    let comparison = compare(actual.as_ref(), &expected, &rule.comparator);
                    ValidationResult {
                        field,
                        comparator: rule.comparator.clone(),
                        expected,
                        actual,
                        message: join_message(declared, comparison.diagnostic),
                        pass: comparison.pass,
                    }
                }
                Err(err) => malformed_field(field, rule.comparator.clone(), expected, declared, err),
            };

            self.sink.emit(&Event::Validation {
                case: name.to_string(),
                result: validation.clone(),
            });
            let failure = (!validation.pass).then(|| ValidationFailure::from(&validation));
            result.validations.push(validation);
            if failure.is_some() {
                return failure;
            }
        }
        None
    }

    fn persist(&self, extracted: &Variables) {
        match self.store.write_merge(extracted) {
            Ok(()) => {
                let names: Vec<&str> = extracted.keys().map(String::as_str).collect();
                tracing::info!(variables = ?names, "saved variables to persisted store");
            }
            Err(err) => tracing::error!(error = %err, "failed to save variables to persisted store"),
        }
    }

    fn teardown(&mut self, case: &CaseDefinition, variables: &Variables) {
        let name = case.case_name.as_str();
        for action in &case.teardown {
            self.sink.emit(&Event::Teardown {
                case: name.to_string(),
                action: action.action.clone(),
            });
            match action.resolve(variables) {
                Teardown::Logout { token } => {
                    tracing::info!(case = name, token = %token, "logout");
                }
                Teardown::ClearVariables(names) => {
                    for variable in names {
                        if self.session.remove(&variable).is_some() {
                            tracing::info!(case = name, variable = %variable, "cleared variable");
                        }
                    }
                }
                Teardown::CleanExtractFile => match self.store.truncate() {
                    Ok(()) => tracing::info!(case = name, "cleared persisted store"),
                    Err(err) => {
                        tracing::error!(case = name, error = %err, "failed to clear persisted store")
                    }
                },
                Teardown::Unknown(action) => {
                    tracing::warn!(case = name, action = %action, "ignoring unknown teardown action");
                }
            }
        }
    }
}

fn enter(case: &str, state: CaseState) {
    tracing::debug!(case, state = ?state, "case state");
}

fn join_message(declared: String, diagnostic: Option<String>) -> String {
    match diagnostic {
        Some(diagnostic) if declared.is_empty() => diagnostic,
        Some(diagnostic) => format!("{declared} ({diagnostic})"),
        None => declared,
    }
}

fn malformed_field(
    field: String,
    comparator: String,
    expected: Value,
    declared: String,
    err: PathError,
) -> ValidationResult {
    ValidationResult {
        field,
        comparator,
        expected,
        actual: None,
        message: join_message(declared, Some(err.to_string())),
        pass: false,
    }
}

fn request_event(case: &str, request: &RequestSpec) -> Event {
    let body = match request.body() {
        RequestBody::None => Value::Null,
        RequestBody::Json(value) => value,
        RequestBody::Form(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        ),
    };
    Event::Request {
        case: case.to_string(),
        method: request.method.clone(),
        url: request.url.clone(),
        path: request.path.clone(),
        headers: request.headers.clone(),
        params: request.params.clone(),
        body,
    }
}

fn warn_unresolved(case: &str, request: &RequestSpec) {
    let Ok(value) = serde_json::to_value(request) else {
        return;
    };
    for name in placeholders(&value) {
        tracing::warn!(case, variable = %name, "undefined variable left in request");
    }
}
