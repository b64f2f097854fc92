use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{ConsumerConfig, HandlerKind, TransitConfig};
use crate::consumer::{Consumer, ConsumerOptions};
use crate::context::ClientContext;
use crate::dispatcher::LoggingHandler;
use crate::error::EngineError;
use crate::stream::StationApp;
use crate::table::TableCatalog;

/// Join handle of one running loop.
struct TaskSlot {
    name: String,
    handle: tokio::task::JoinHandle<()>,
}

/// The running engine: the station stream app plus generic consumers, each
/// on its own task, all stopped through one cancellation token.
pub struct Engine {
    tables: Arc<TableCatalog>,
    tasks: Vec<TaskSlot>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tables", &self.tables.names())
            .field("tasks", &self.tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

impl Engine {
    /// Build every configured component and spawn their loops.
    ///
    /// Nothing is spawned if any component fails to build.
    pub async fn bootstrap(config: TransitConfig, ctx: ClientContext) -> Result<Self, EngineError> {
        config.validate()?;

        // --- 1. Stream app ---
        let tables = Arc::new(TableCatalog::new());
        let app = StationApp::new(&ctx, &config.stream).await?;
        tables.register(Arc::new(app.table()));

        // --- 2. Generic consumers ---
        let mut consumers = Vec::new();
        for consumer_cfg in &config.consumers {
            let consumer = build_consumer(&ctx, consumer_cfg)
                .map_err(|e| e.with_context(format!("consumer '{}'", consumer_cfg.pattern)))?;
            consumers.push(consumer);
        }

        // --- 3. Spawn ---
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let name = app.app_id().to_string();
        let token = shutdown.child_token();
        let app_name = name.clone();
        let handle = tokio::spawn(async move {
            match app.run(token).await {
                Ok(stats) => tracing::info!(app = %app_name, ?stats, "stream app stopped"),
                Err(e) => tracing::error!(app = %app_name, error = %e, "stream app failed"),
            }
        });
        tracing::info!(app = %name, "spawned stream app");
        tasks.push(TaskSlot { name, handle });

        for mut consumer in consumers {
            let name = consumer.pattern().to_string();
            let token = shutdown.child_token();
            let pattern = name.clone();
            let handle = tokio::spawn(async move {
                match consumer.start(&token).await {
                    Ok(stats) => tracing::info!(%pattern, ?stats, "consumer stopped"),
                    Err(e) => tracing::error!(%pattern, error = %e, "consumer failed"),
                }
            });
            tracing::info!(pattern = %name, "spawned consumer");
            tasks.push(TaskSlot { name, handle });
        }

        Ok(Engine {
            tables,
            tasks,
            shutdown,
        })
    }

    /// Tables for the query API.
    pub fn tables(&self) -> &Arc<TableCatalog> {
        &self.tables
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Graceful shutdown: cancel every loop and wait for them.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for slot in self.tasks {
            if let Err(e) = slot.handle.await {
                tracing::error!(task = %slot.name, error = %e, "task panicked");
            }
        }
        tracing::info!("engine shut down");
    }
}

fn build_consumer(ctx: &ClientContext, cfg: &ConsumerConfig) -> Result<Consumer<LoggingHandler>, EngineError> {
    let options = ConsumerOptions::from_config(cfg)?;
    match cfg.handler {
        HandlerKind::Log => Consumer::new(ctx, options, LoggingHandler),
    }
}
