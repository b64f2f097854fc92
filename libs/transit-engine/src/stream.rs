use tokio_util::sync::CancellationToken;

use transit_api::{RawRecord, TopicPattern};

use crate::config::{secs, StreamAppConfig};
use crate::consumer::{Consumer, ConsumerOptions};
use crate::context::ClientContext;
use crate::dispatcher::RecordHandler;
use crate::error::{EngineError, HandlerError};
use crate::poll_loop::LoopStats;
use crate::producer::{Producer, ProducerOptions};
use crate::stations::{transform, TransformedStation};
use crate::table::{MaterializedTable, TableHandle};

pub type StationsTable = MaterializedTable<i64, TransformedStation>;

/// Handler that classifies stations into the stations table.
pub struct StationStream {
    table: StationsTable,
}

impl StationStream {
    pub fn new(table: StationsTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &StationsTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut StationsTable {
        &mut self.table
    }
}

impl RecordHandler for StationStream {
    fn handle(&mut self, record: &RawRecord) -> Result<(), HandlerError> {
        let station = transform(record)?;
        let station_id = station.station_id;
        let line = station.line;
        self.table.put(station_id, station)?;
        tracing::info!(station_id, %line, "transformed station");
        Ok(())
    }
}

/// The stations stream processor: consumes raw stations, keeps the
/// stations table and republishes it on its changelog topic.
pub struct StationApp {
    app_id: String,
    consumer: Consumer<StationStream>,
    view: TableHandle<i64, TransformedStation>,
}

impl StationApp {
    pub async fn new(ctx: &ClientContext, config: &StreamAppConfig) -> Result<Self, EngineError> {
        let changelog = Producer::new(
            ctx,
            ProducerOptions::new(&config.output_topic).partitions(config.partitions, config.replicas),
        )
        .await
        .map_err(|e| e.with_context(format!("app '{}'", config.app_id)))?;

        let table = StationsTable::new(&config.table, Box::new(changelog));
        let view = table.view();

        let options = ConsumerOptions::new(TopicPattern::parse(&config.input_topic)?)
            .schema_checked(false)
            .offset_earliest(config.offset_earliest)
            .sleep_interval(secs("stream.sleep_secs", config.sleep_secs)?)
            .poll_timeout(secs("stream.consume_timeout_secs", config.consume_timeout_secs)?);
        let consumer = Consumer::new(ctx, options, StationStream::new(table))?;

        tracing::info!(
            app = %config.app_id,
            input = %config.input_topic,
            output = %config.output_topic,
            table = %config.table,
            "stream app ready"
        );

        Ok(Self {
            app_id: config.app_id.clone(),
            consumer,
            view,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Shared read handle on the stations table.
    pub fn table(&self) -> TableHandle<i64, TransformedStation> {
        self.view.clone()
    }

    /// Run until `token` is cancelled, then flush the changelog.
    pub async fn run(mut self, token: CancellationToken) -> Result<LoopStats, EngineError> {
        let result = self.consumer.start(&token).await;
        let flushed = self.consumer.handler_mut().table_mut().close();
        let stats = result?;
        flushed?;
        Ok(stats)
    }
}
