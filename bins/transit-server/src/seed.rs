use transit_api::now_ms;
use transit_engine::config::StreamAppConfig;
use transit_engine::error::EngineError;
use transit_engine::{ClientContext, Producer, ProducerOptions, Station};

/// Publish every station of a JSON-lines file to the stream's input topic.
/// Blank lines are skipped. Returns the number of stations published.
pub async fn publish_stations(
    ctx: &ClientContext,
    stream: &StreamAppConfig,
    path: &str,
) -> Result<usize, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;

    let mut stations = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let station: Station = serde_json::from_str(line)
            .map_err(|e| EngineError::Codec(format!("{path}:{}: {e}", n + 1)))?;
        stations.push(station);
    }

    let mut producer = Producer::new(
        ctx,
        ProducerOptions::new(&stream.input_topic).partitions(stream.partitions, stream.replicas),
    )
    .await?;

    for station in &stations {
        let value = serde_json::to_value(station).map_err(|e| EngineError::Codec(e.to_string()))?;
        producer.publish(&serde_json::json!(now_ms()), &value)?;
    }
    producer.close()?;
    Ok(stations.len())
}
