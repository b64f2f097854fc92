use transit_engine::config::{ConfigParser, TransitConfig};
use transit_engine::error::EngineError;

/// Reads `.hcl` configuration files.
pub struct HclParser;

impl ConfigParser for HclParser {
    fn extensions(&self) -> &[&str] {
        &["hcl"]
    }

    fn parse(&self, content: &str) -> Result<TransitConfig, EngineError> {
        hcl::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use transit_engine::config::HandlerKind;

    use super::*;

    #[test]
    fn parses_stream_block_and_consumer_list() {
        let cfg = HclParser
            .parse(
                r#"
                broker_url = "PLAINTEXT://kafka:9092"
                api_port   = 9300

                stream {
                  app_id          = "stations-stream"
                  offset_earliest = false
                  sleep_secs      = 0.5
                }

                consumers = [
                  { pattern = "^org.chicago.cta.station.arrivals." },
                  { pattern = "org.chicago.cta.weather.v1", schema_checked = false, offset_earliest = true },
                ]
                "#,
            )
            .unwrap();

        assert_eq!(cfg.broker_url, "PLAINTEXT://kafka:9092");
        assert_eq!(cfg.api_port, 9300);
        assert!(!cfg.stream.offset_earliest);
        assert_eq!(cfg.stream.sleep_secs, 0.5);
        assert_eq!(cfg.stream.input_topic, "org.chicago.cta.stations");
        assert_eq!(cfg.consumers.len(), 2);
        assert_eq!(cfg.consumers[0].handler, HandlerKind::Log);
        assert!(!cfg.consumers[1].schema_checked);
        assert!(cfg.consumers[1].offset_earliest);
        cfg.validate().unwrap();
    }

    #[test]
    fn syntax_error_is_a_config_error() {
        let err = HclParser.parse("stream {").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
