use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use transit_api::{
    ConsumerSettings, ConsumerTransport, OffsetReset, PollError, PollResult, TopicPattern,
};

use crate::assignment::AssignmentPolicy;
use crate::codec::MessageDecoder;
use crate::config::{secs, ConsumerConfig};
use crate::context::ClientContext;
use crate::dispatcher::RecordHandler;
use crate::error::EngineError;
use crate::poll_loop::{LoopStats, PollLoop, RecordSource, DEFAULT_POLL_TIMEOUT, DEFAULT_SLEEP_INTERVAL};

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub pattern: TopicPattern,
    pub schema_checked: bool,
    pub offset_earliest: bool,
    pub sleep_interval: Duration,
    pub poll_timeout: Duration,
}

impl ConsumerOptions {
    pub fn new(pattern: TopicPattern) -> Self {
        Self {
            pattern,
            schema_checked: true,
            offset_earliest: false,
            sleep_interval: DEFAULT_SLEEP_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn schema_checked(mut self, yes: bool) -> Self {
        self.schema_checked = yes;
        self
    }

    pub fn offset_earliest(mut self, yes: bool) -> Self {
        self.offset_earliest = yes;
        self
    }

    pub fn sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn from_config(config: &ConsumerConfig) -> Result<Self, EngineError> {
        let pattern = TopicPattern::parse(&config.pattern)?;
        Ok(Self::new(pattern)
            .schema_checked(config.schema_checked)
            .offset_earliest(config.offset_earliest)
            .sleep_interval(secs("sleep_secs", config.sleep_secs)?)
            .poll_timeout(secs("consume_timeout_secs", config.consume_timeout_secs)?))
    }

    fn settings(&self, broker_url: &str) -> ConsumerSettings {
        ConsumerSettings {
            bootstrap_servers: broker_url.to_string(),
            group_id: self.pattern.group_id(),
            auto_offset_reset: if self.offset_earliest {
                OffsetReset::Earliest
            } else {
                OffsetReset::Latest
            },
        }
    }
}

// ---------------------------------------------------------------------------
// DecodingSource — transport + decoder
// ---------------------------------------------------------------------------

/// Broker connection seen as a source of decoded records.
///
/// Releases the connection on drop if nobody closed it before.
pub struct DecodingSource {
    transport: Box<dyn ConsumerTransport>,
    decoder: MessageDecoder,
    closed: bool,
}

impl DecodingSource {
    pub fn new(transport: Box<dyn ConsumerTransport>, decoder: MessageDecoder) -> Self {
        Self {
            transport,
            decoder,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close()?;
        Ok(())
    }
}

impl RecordSource for DecodingSource {
    fn poll(&mut self, timeout: Duration) -> Pin<Box<dyn Future<Output = PollResult> + Send + '_>> {
        Box::pin(async move {
            match self.transport.poll(timeout).await? {
                Ok(message) => Some(self.decoder.decode(message).await),
                Err(e) => Some(Err(PollError::Transport(e))),
            }
        })
    }
}

impl Drop for DecodingSource {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close consumer connection");
        }
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Subscribes to a topic pattern and feeds every record to a handler.
pub struct Consumer<H> {
    pattern: TopicPattern,
    policy: Arc<AssignmentPolicy>,
    poll_loop: PollLoop<DecodingSource, H>,
}

impl<H: RecordHandler> Consumer<H> {
    pub fn new(ctx: &ClientContext, options: ConsumerOptions, handler: H) -> Result<Self, EngineError> {
        let settings = options.settings(&ctx.broker_url);
        let transport = ctx
            .broker
            .consumer(&settings)
            .map_err(|e| e.with_context(format!("consumer for '{}'", options.pattern)))?;

        let decoder = if options.schema_checked {
            MessageDecoder::schema_checked(ctx.schema_registry.clone())
        } else {
            MessageDecoder::plain()
        };

        tracing::info!(
            pattern = %options.pattern,
            group = %settings.group_id,
            broker = %ctx.broker_url,
            schema_registry = %ctx.schema_registry_url,
            offset_reset = %settings.auto_offset_reset,
            schema_checked = options.schema_checked,
            "consumer created"
        );

        Ok(Self {
            policy: Arc::new(AssignmentPolicy::new(
                options.pattern.clone(),
                options.offset_earliest,
            )),
            poll_loop: PollLoop::new(
                options.pattern.to_string(),
                DecodingSource::new(transport, decoder),
                handler,
                options.poll_timeout,
                options.sleep_interval,
            ),
            pattern: options.pattern,
        })
    }

    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    pub fn stats(&self) -> LoopStats {
        self.poll_loop.stats()
    }

    pub fn handler(&self) -> &H {
        self.poll_loop.handler()
    }

    pub fn handler_mut(&mut self) -> &mut H {
        self.poll_loop.handler_mut()
    }

    /// Subscribe and run the poll loop until `token` is cancelled. The
    /// connection is closed on every way out, including a failed subscribe.
    pub async fn start(&mut self, token: &CancellationToken) -> Result<LoopStats, EngineError> {
        let listener = self.policy.clone();
        let subscribed = self
            .poll_loop
            .source_mut()
            .transport
            .subscribe(&self.pattern, listener);
        if let Err(e) = subscribed {
            tracing::error!(pattern = %self.pattern, error = %e, "subscribe failed");
            if let Err(close_err) = self.close() {
                tracing::warn!(pattern = %self.pattern, error = %close_err, "failed to close consumer connection");
            }
            return Err(e.with_context(format!("subscribe '{}'", self.pattern)).into());
        }

        self.poll_loop.run(token).await;
        self.close()?;
        Ok(self.poll_loop.stats())
    }

    /// Leave the group and release the connection. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<(), EngineError> {
        let source = self.poll_loop.source_mut();
        if source.is_closed() {
            return Ok(());
        }
        source.close()?;
        tracing::info!(pattern = %self.pattern, "consumer closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use transit_api::{ClientError, Message, PartitionAssignment, RawRecord, RebalanceListener};

    use super::*;
    use crate::error::HandlerError;

    #[derive(Default)]
    struct Probe {
        closed: AtomicBool,
        fail_subscribe: bool,
        fail_close: bool,
    }

    struct ScriptedTransport {
        probe: Arc<Probe>,
        messages: VecDeque<Message>,
        listener: Option<Arc<dyn RebalanceListener>>,
        assigned: Arc<Mutex<Vec<PartitionAssignment>>>,
        token: CancellationToken,
    }

    impl ConsumerTransport for ScriptedTransport {
        fn subscribe(
            &mut self,
            _pattern: &TopicPattern,
            listener: Arc<dyn RebalanceListener>,
        ) -> Result<(), ClientError> {
            if self.probe.fail_subscribe {
                return Err(ClientError::io("group coordinator unavailable"));
            }
            self.listener = Some(listener);
            Ok(())
        }

        fn poll(
            &mut self,
            _timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Option<Result<Message, ClientError>>> + Send + '_>> {
            Box::pin(async move {
                if let Some(listener) = self.listener.take() {
                    let assigned = listener.on_assign(vec![PartitionAssignment::new("t", 0)]);
                    *self.assigned.lock().unwrap() = assigned;
                }
                let next = self.messages.pop_front();
                if next.is_none() {
                    self.token.cancel();
                }
                next.map(Ok)
            })
        }

        fn close(&mut self) -> Result<(), ClientError> {
            self.probe.closed.store(true, Ordering::SeqCst);
            if self.probe.fail_close {
                return Err(ClientError::io("connection reset"));
            }
            Ok(())
        }
    }

    fn message(offset: i64, payload: &str) -> Message {
        Message {
            topic: "t".into(),
            partition: 0,
            offset,
            ts_ms: 0,
            key: None,
            payload: Some(payload.as_bytes().to_vec()),
        }
    }

    fn source(probe: Arc<Probe>, messages: Vec<Message>, token: CancellationToken) -> (DecodingSource, Arc<Mutex<Vec<PartitionAssignment>>>) {
        let assigned = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            probe,
            messages: messages.into(),
            listener: None,
            assigned: assigned.clone(),
            token,
        };
        (DecodingSource::new(Box::new(transport), MessageDecoder::plain()), assigned)
    }

    fn consumer<H: RecordHandler>(src: DecodingSource, earliest: bool, handler: H) -> Consumer<H> {
        let pattern = TopicPattern::parse("t").unwrap();
        Consumer {
            policy: Arc::new(AssignmentPolicy::new(pattern.clone(), earliest)),
            poll_loop: PollLoop::new("t", src, handler, DEFAULT_POLL_TIMEOUT, DEFAULT_SLEEP_INTERVAL),
            pattern,
        }
    }

    #[test]
    fn settings_follow_pattern_and_reset_policy() {
        let options = ConsumerOptions::new(TopicPattern::parse("^org.chicago.cta.station.arrivals.").unwrap())
            .offset_earliest(true);
        let settings = options.settings("PLAINTEXT://localhost:9092");
        assert_eq!(settings.group_id, "^org.chicago.cta.station.arrivals._group");
        assert_eq!(settings.auto_offset_reset, OffsetReset::Earliest);
        assert_eq!(settings.bootstrap_servers, "PLAINTEXT://localhost:9092");

        let latest = ConsumerOptions::new(TopicPattern::parse("t").unwrap()).settings("b");
        assert_eq!(latest.auto_offset_reset, OffsetReset::Latest);
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_until_cancelled_then_closes() {
        let probe = Arc::new(Probe::default());
        let token = CancellationToken::new();
        let (src, assigned) = source(
            probe.clone(),
            vec![message(0, r#"{"a":1}"#), message(1, "not json")],
            token.clone(),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut c = consumer(src, true, move |r: &RawRecord| {
            sink.lock().unwrap().push(r.value.clone());
            Ok::<(), HandlerError>(())
        });

        let stats = c.start(&token).await.unwrap();

        assert_eq!(stats.dispatched, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(serde_json::json!({"a": 1})), Some(serde_json::json!("not json"))]
        );
        assert!(probe.closed.load(Ordering::SeqCst));
        assert!(assigned.lock().unwrap().iter().all(|p| p.offset == transit_api::Offset::Beginning));
    }

    #[tokio::test]
    async fn failed_subscribe_still_releases_the_connection() {
        let probe = Arc::new(Probe {
            fail_subscribe: true,
            ..Default::default()
        });
        let token = CancellationToken::new();
        let (src, _) = source(probe.clone(), Vec::new(), token.clone());
        let mut c = consumer(src, false, |_: &RawRecord| Ok::<(), HandlerError>(()));

        assert!(c.start(&token).await.is_err());
        assert!(probe.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn close_failure_after_failed_subscribe_keeps_the_subscribe_error() {
        let probe = Arc::new(Probe {
            fail_subscribe: true,
            fail_close: true,
            ..Default::default()
        });
        let token = CancellationToken::new();
        let (src, _) = source(probe.clone(), Vec::new(), token.clone());
        let mut c = consumer(src, false, |_: &RawRecord| Ok::<(), HandlerError>(()));

        match c.start(&token).await {
            Err(EngineError::Client(e)) => assert!(e.message.contains("group coordinator unavailable")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(probe.closed.load(Ordering::SeqCst));
        assert!(c.close().is_ok());
    }

    #[test]
    fn dropping_an_unstarted_consumer_closes_it() {
        let probe = Arc::new(Probe::default());
        let (src, _) = source(probe.clone(), Vec::new(), CancellationToken::new());
        let c = consumer(src, false, |_: &RawRecord| Ok::<(), HandlerError>(()));
        drop(c);
        assert!(probe.closed.load(Ordering::SeqCst));
    }
}
