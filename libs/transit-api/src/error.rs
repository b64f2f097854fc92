use std::fmt;

/// Which collaborator concern a [`ClientError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad connection settings or an unusable topic pattern.
    Config,
    /// Broker unreachable or the connection dropped.
    Io,
    /// Bytes on the wire do not match the expected framing or encoding.
    Format,
    /// Schema registry rejected or does not know a schema.
    Schema,
    /// A broker request ran past its deadline.
    Timeout,
    /// The broker refused the request: unknown topic, topic already
    /// exists, closed connection.
    Logic,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Format => "format",
            ErrorKind::Schema => "schema",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Logic => "broker",
        }
    }
}

/// Failure reported by a broker connection, the topic admin or the schema
/// registry. The engine wraps it into its own error type and decides per
/// call site whether it stops a component or only gets logged.
#[derive(Debug, Clone)]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClientError {
    fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Format, msg)
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Logic, msg)
    }

    /// Prefix the message with what was being attempted, e.g. the topic or
    /// subject name. The kind is kept.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self::new(self.kind, format!("{ctx}: {}", self.message))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

/// Payloads that fail to parse as JSON.
impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::format(e.to_string())
    }
}

/// Payloads that are neither JSON nor UTF-8 text.
impl From<std::string::FromUtf8Error> for ClientError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::format(e.to_string())
    }
}

/// Topic patterns starting with `^` that do not compile.
impl From<regex::Error> for ClientError {
    fn from(e: regex::Error) -> Self {
        Self::config(e.to_string())
    }
}
