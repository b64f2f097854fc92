use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use transit_api::RawRecord;

use crate::error::HandlerError;

/// Per-record handler fed by a consumer.
///
/// Runs to completion inside the poll loop that dispatched the record; a
/// slow handler delays the next poll of that loop.
pub trait RecordHandler: Send {
    fn handle(&mut self, record: &RawRecord) -> Result<(), HandlerError>;
}

impl<F> RecordHandler for F
where
    F: FnMut(&RawRecord) -> Result<(), HandlerError> + Send,
{
    fn handle(&mut self, record: &RawRecord) -> Result<(), HandlerError> {
        self(record)
    }
}

/// Generic handler that only logs what it receives.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl RecordHandler for LoggingHandler {
    fn handle(&mut self, record: &RawRecord) -> Result<(), HandlerError> {
        tracing::info!(
            record = %record.id(),
            key = ?record.key,
            value = ?record.value,
            "received record"
        );
        Ok(())
    }
}

/// What happened to a dispatched record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// The handler failed; the record counts as consumed anyway.
    Failed,
}

/// Invokes the handler exactly once per record and isolates its failures.
///
/// A failing record is logged with its identity and dropped: the loop
/// neither retries it nor re-polls its offset. A handler panic counts as a
/// failure too, as long as the build unwinds on panic.
pub struct Dispatcher<H> {
    handler: H,
}

impl<H: RecordHandler> Dispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub fn dispatch(&mut self, record: &RawRecord) -> DispatchOutcome {
        let handler = &mut self.handler;
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(record))) {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Err(payload) => {
                tracing::error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    panic = panic_message(payload.as_ref()),
                    "handler panicked, record dropped"
                );
                DispatchOutcome::Failed
            }
            Ok(Err(e)) => {
                tracing::error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "handler failed, record dropped"
                );
                DispatchOutcome::Failed
            }
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
