use thiserror::Error;

/// Errors raised while lowering one entry of a [`CatalogDocument`](crate::compiler::CatalogDocument)
/// into a [`CompiledTask`](crate::compiler::CompiledTask). A `CatalogError` aborts only the entry
/// that produced it; the rest of the catalog keeps compiling.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("entry #{0} is missing the required `run` field")]
    MissingRun(usize),

    #[error("entry `{0}` names unknown command `{1}`")]
    UnknownCommand(String, String),

    #[error("entry `{0}`: malformed probe command line: {1}")]
    MalformedCommand(String, String),

    #[error("entry `{0}`: malformed reference: {1}")]
    MalformedReference(String, String),

    #[error("entry `{0}`: malformed timing clause: {1}")]
    MalformedTiming(String, String),

    #[error("entry `{0}`: malformed control clause `{1}`: {2}")]
    MalformedControlClause(String, String, String),

    #[error("entry `{0}`: {1}")]
    Expr(String, #[source] ExprError),
}

/// Errors raised by a single probe invocation (an agent-function call). Caught at the iteration
/// boundary by the task runtime; the iteration aborts but the task keeps running.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("command `{0}` is not registered")]
    NotFound(String),

    #[error("command `{0}` failed: {1}")]
    Failed(String, String),

    #[error("expression error: {0}")]
    Expr(#[from] ExprError),
}

/// Errors raised by a [`Collector`](crate::collector::Collector). Subject to the same
/// catch-and-log policy as [`ProbeError`].
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("collector `{0}` failed: {1}")]
    Failed(String, String),
}

/// Raised when a [`TaskSchedule`](crate::schedule::TaskSchedule) cannot produce a next duration.
/// Compile-time validation should make this unreachable in practice; if it happens anyway it is
/// fatal to the one task that hit it.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("cron field `{0}` has no matching value reachable from the current time")]
    Unsatisfiable(&'static str),

    #[error("interval schedule carries a negative duration")]
    NegativeInterval,
}

/// Raised when the base or monitor configuration cannot be loaded. Fatal to the supervisor.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file `{0}`: {1}")]
    Io(String, String),

    #[error("could not parse config file `{0}` as YAML: {1}")]
    Parse(String, String),

    #[error("catalog is missing or empty")]
    EmptyCatalog,
}

/// Raised by the restricted expression evaluator (C9), both at parse time (surfaced as a
/// [`CatalogError::Expr`]) and at evaluation time (surfaced as a [`ProbeError`]-equivalent at the
/// iteration boundary).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEof,

    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),

    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),

    #[error("no field `{0}` on value of kind `{1}`")]
    NoSuchField(String, &'static str),

    #[error("index `{0}` out of bounds for value of kind `{1}`")]
    IndexOutOfBounds(String, &'static str),

    #[error("type mismatch: expected {0}, found {1}")]
    TypeMismatch(&'static str, &'static str),

    #[error("division by zero")]
    DivisionByZero,

    #[error("unknown format spec `{0}`")]
    BadFormatSpec(String),
}
