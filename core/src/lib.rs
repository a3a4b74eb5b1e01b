pub mod case;
pub mod compare;
pub mod event;
pub mod path;
pub mod response;
pub mod runtime;
pub mod store;
pub mod template;

pub use case::{
    AuthKind, AuthSpec, CaseDefinition, CaseError, CaseFile, RequestBody, RequestSpec, Teardown,
    TeardownAction, ValidationRule,
};
pub use compare::{compare, Comparator, Comparison};
pub use event::{Event, EventRecord, EventSink, FanoutSink, NullSink, RecordingSink, TracingSink};
pub use path::{evaluate, parse_path, PathError, PathExpr, PathSegment};
pub use response::{extract_facet, field_value, Facet, RawResponse};
pub use runtime::{
    CaseState, ExecutionResult, Executor, ExecutorOptions, RunError, Transport, TransportError,
    ValidationFailure, ValidationResult,
};
pub use store::{
    merge_variables, FileStore, MemoryStore, PersistedStore, SessionStore, StoreError, Variables,
};
pub use template::{placeholders, render_value, substitute, substitute_str};
