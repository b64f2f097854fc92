use transit_api::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("topic creation failed for {topic}: {source}")]
    TopicCreation { topic: String, source: ClientError },

    #[error("producer for '{0}' is closed")]
    ProducerClosed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Client` variant, context is added to the inner `ClientError`.
    /// For other string variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Client(e) => EngineError::Client(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::Codec(msg) => EngineError::Codec(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

/// Failure raised by a record handler. The dispatcher logs it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("cannot decode record: {0}")]
    Decode(String),

    #[error("publish failed: {0}")]
    Publish(#[from] EngineError),

    #[error("{0}")]
    Rejected(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Decode(e.to_string())
    }
}
