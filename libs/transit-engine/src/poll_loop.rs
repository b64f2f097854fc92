use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use transit_api::{PollError, PollResult};

use crate::dispatcher::{DispatchOutcome, Dispatcher, RecordHandler};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_SLEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Anything the loop can poll for decoded records.
pub trait RecordSource: Send {
    /// Wait at most `timeout` for the next record.
    fn poll(&mut self, timeout: Duration) -> Pin<Box<dyn Future<Output = PollResult> + Send + '_>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Dispatch,
    Sleep,
}

/// Result of one POLLING step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// A record arrived and went through the dispatcher.
    Dispatched(DispatchOutcome),
    /// Nothing arrived within the poll timeout.
    Empty,
    /// The transport or decoder reported an error. Treated like `Empty`.
    Error,
}

impl PollStep {
    fn got_record(self) -> bool {
        matches!(self, PollStep::Dispatched(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub polls: u64,
    pub dispatched: u64,
    pub failed: u64,
    pub empty_polls: u64,
    pub poll_errors: u64,
    pub sleeps: u64,
}

/// Cooperative drain-then-sleep loop over one record source.
///
/// ```text
/// IDLE → POLLING ─record─→ DISPATCH → POLLING
///            └──nothing / error──→ SLEEP → POLLING
/// ```
///
/// While records keep arriving the loop polls again without sleeping. A
/// poll that yields nothing, or fails, sends the loop to sleep for the fixed
/// interval. The loop only suspends inside the bounded poll and the sleep;
/// cancellation is observed right after either returns.
pub struct PollLoop<S, H> {
    name: String,
    source: S,
    dispatcher: Dispatcher<H>,
    poll_timeout: Duration,
    sleep_interval: Duration,
    state: LoopState,
    stats: LoopStats,
}

impl<S: RecordSource, H: RecordHandler> PollLoop<S, H> {
    pub fn new(
        name: impl Into<String>,
        source: S,
        handler: H,
        poll_timeout: Duration,
        sleep_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            dispatcher: Dispatcher::new(handler),
            poll_timeout,
            sleep_interval,
            state: LoopState::Idle,
            stats: LoopStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn handler(&self) -> &H {
        self.dispatcher.handler()
    }

    pub fn handler_mut(&mut self) -> &mut H {
        self.dispatcher.handler_mut()
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// One POLLING step, followed by DISPATCH when a record arrives.
    pub async fn poll_once(&mut self) -> PollStep {
        self.state = LoopState::Polling;
        self.stats.polls += 1;

        match self.source.poll(self.poll_timeout).await {
            Some(Ok(record)) => {
                self.state = LoopState::Dispatch;
                let outcome = self.dispatcher.dispatch(&record);
                self.stats.dispatched += 1;
                if outcome == DispatchOutcome::Failed {
                    self.stats.failed += 1;
                }
                self.state = LoopState::Polling;
                PollStep::Dispatched(outcome)
            }
            Some(Err(e)) => {
                self.stats.poll_errors += 1;
                match &e {
                    PollError::Transport(err) => {
                        tracing::error!(consumer = %self.name, error = %err, "error from consumer")
                    }
                    PollError::Decode { .. } => {
                        tracing::error!(consumer = %self.name, error = %e, "error consuming message")
                    }
                }
                PollStep::Error
            }
            None => {
                self.stats.empty_polls += 1;
                PollStep::Empty
            }
        }
    }

    /// Poll until a poll yields no record. Returns the number of records
    /// dispatched. Stops early once `token` is cancelled.
    pub async fn drain(&mut self, token: &CancellationToken) -> u64 {
        let mut dispatched = 0;
        loop {
            let step = self.poll_once().await;
            if step.got_record() {
                dispatched += 1;
            }
            if token.is_cancelled() || !step.got_record() {
                return dispatched;
            }
        }
    }

    /// Run until `token` is cancelled.
    pub async fn run(&mut self, token: &CancellationToken) {
        tracing::debug!(consumer = %self.name, "poll loop started");
        loop {
            let drained = self.drain(token).await;
            if token.is_cancelled() {
                break;
            }
            tracing::trace!(consumer = %self.name, drained, "topic drained, sleeping");

            self.state = LoopState::Sleep;
            self.stats.sleeps += 1;
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.sleep_interval) => {}
            }
        }
        self.state = LoopState::Idle;
        tracing::debug!(consumer = %self.name, stats = ?self.stats, "poll loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;
    use transit_api::{ClientError, RawRecord};

    use super::*;
    use crate::error::HandlerError;

    enum Scripted {
        Record(i64),
        Nothing,
        Fail,
    }

    /// Plays back a fixed script, then cancels the token.
    struct ScriptedSource {
        script: VecDeque<Scripted>,
        token: CancellationToken,
    }

    impl ScriptedSource {
        fn new(script: Vec<Scripted>, token: CancellationToken) -> Self {
            Self {
                script: script.into(),
                token,
            }
        }
    }

    impl RecordSource for ScriptedSource {
        fn poll(&mut self, _timeout: Duration) -> Pin<Box<dyn Future<Output = PollResult> + Send + '_>> {
            Box::pin(async move {
                let next = self.script.pop_front();
                if self.script.is_empty() {
                    self.token.cancel();
                }
                match next {
                    Some(Scripted::Record(offset)) => Some(Ok(RawRecord {
                        topic: "t".into(),
                        partition: 0,
                        offset,
                        ts_ms: 0,
                        key: None,
                        value: None,
                    })),
                    Some(Scripted::Fail) => {
                        Some(Err(PollError::Transport(ClientError::io("broker unreachable"))))
                    }
                    Some(Scripted::Nothing) | None => None,
                }
            })
        }
    }

    type Seen = Arc<Mutex<Vec<(i64, Instant)>>>;

    fn recording_handler(seen: Seen) -> impl RecordHandler {
        move |r: &RawRecord| {
            seen.lock().unwrap().push((r.offset, Instant::now()));
            Ok::<(), HandlerError>(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drains_every_available_record_before_sleeping() {
        use Scripted::*;
        let token = CancellationToken::new();
        let seen: Seen = Arc::default();
        let source = ScriptedSource::new(
            vec![Record(0), Record(1), Record(2), Nothing, Record(3), Nothing],
            token.clone(),
        );
        let mut pl = PollLoop::new(
            "test",
            source,
            recording_handler(seen.clone()),
            DEFAULT_POLL_TIMEOUT,
            DEFAULT_SLEEP_INTERVAL,
        );

        let start = Instant::now();
        pl.run(&token).await;

        let seen = seen.lock().unwrap();
        let offsets: Vec<i64> = seen.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3]);
        // The first three arrive back to back, the fourth only after one backoff.
        assert!(seen[..3].iter().all(|(_, t)| *t == start));
        assert_eq!(seen[3].1 - start, DEFAULT_SLEEP_INTERVAL);

        let stats = pl.stats();
        assert_eq!(stats.dispatched, 4);
        assert_eq!(stats.empty_polls, 2);
        assert_eq!(stats.sleeps, 1);
        assert_eq!(pl.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn drain_counts_records_up_to_first_empty_poll() {
        use Scripted::*;
        let token = CancellationToken::new();
        let n = 5;
        let mut script: Vec<Scripted> = (0..n).map(Record).collect();
        script.push(Nothing);
        script.push(Record(99));
        let source = ScriptedSource::new(script, token.clone());
        let mut pl = PollLoop::new(
            "test",
            source,
            recording_handler(Arc::default()),
            DEFAULT_POLL_TIMEOUT,
            DEFAULT_SLEEP_INTERVAL,
        );

        assert_eq!(pl.drain(&token).await, n as u64);
        assert_eq!(pl.stats().polls, n as u64 + 1);
        assert_eq!(pl.state(), LoopState::Polling);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_error_is_absorbed_by_backoff() {
        use Scripted::*;
        let token = CancellationToken::new();
        let seen: Seen = Arc::default();
        let source = ScriptedSource::new(vec![Fail, Record(7), Nothing], token.clone());
        let mut pl = PollLoop::new(
            "test",
            source,
            recording_handler(seen.clone()),
            DEFAULT_POLL_TIMEOUT,
            Duration::from_millis(250),
        );

        let start = Instant::now();
        pl.run(&token).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1 - start, Duration::from_millis(250));
        assert_eq!(pl.stats().poll_errors, 1);
        assert_eq!(pl.stats().sleeps, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_handler_does_not_stop_the_loop() {
        use Scripted::*;
        let token = CancellationToken::new();
        let source = ScriptedSource::new(vec![Record(1), Record(2), Record(3), Nothing], token.clone());
        let handled = Arc::new(Mutex::new(Vec::new()));
        let sink = handled.clone();
        let handler = move |r: &RawRecord| {
            if r.offset == 2 {
                return Err(HandlerError::Rejected("poison".into()));
            }
            sink.lock().unwrap().push(r.offset);
            Ok(())
        };
        let mut pl = PollLoop::new("test", source, handler, DEFAULT_POLL_TIMEOUT, DEFAULT_SLEEP_INTERVAL);

        pl.run(&token).await;

        assert_eq!(*handled.lock().unwrap(), vec![1, 3]);
        assert_eq!(pl.stats().dispatched, 3);
        assert_eq!(pl.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_sleep() {
        let token = CancellationToken::new();
        // Never cancels on its own: the script holds more empties than the test consumes.
        let source = ScriptedSource::new((0..1000).map(|_| Scripted::Nothing).collect(), CancellationToken::new());
        let mut pl = PollLoop::new(
            "test",
            source,
            recording_handler(Arc::default()),
            DEFAULT_POLL_TIMEOUT,
            Duration::from_secs(3600),
        );

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        pl.run(&token).await;
        assert!(Instant::now() - start < Duration::from_secs(3600));
        assert_eq!(pl.stats().sleeps, 1);
    }
}
