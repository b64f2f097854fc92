use std::fmt;

use serde::{Deserialize, Serialize};

use transit_api::RawRecord;

use crate::error::HandlerError;

/// Station row as published by the database connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub stop_id: i64,
    pub direction_id: String,
    pub stop_name: String,
    pub station_name: String,
    pub station_descriptive_name: String,
    pub station_id: i64,
    pub order: i64,
    pub red: bool,
    pub blue: bool,
    pub green: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Line {
    Red,
    Blue,
    Green,
    Unknown,
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Line::Red => "red",
            Line::Blue => "blue",
            Line::Green => "green",
            Line::Unknown => "unknown",
        })
    }
}

/// Slimmed-down station, one per `station_id` in the stations table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformedStation {
    pub station_id: i64,
    pub station_name: String,
    pub order: i64,
    pub line: Line,
}

/// Pick the station's line. Flags are checked red, blue, green; the first
/// set one wins. A station without any flag gets [`Line::Unknown`].
pub fn line_of(station: &Station) -> Line {
    if station.red {
        Line::Red
    } else if station.blue {
        Line::Blue
    } else if station.green {
        Line::Green
    } else {
        tracing::warn!(station_id = station.station_id, "no line color found for station");
        Line::Unknown
    }
}

pub fn classify(station: &Station) -> TransformedStation {
    TransformedStation {
        station_id: station.station_id,
        station_name: station.station_name.clone(),
        order: station.order,
        line: line_of(station),
    }
}

/// Decode the record's value as a [`Station`] and classify it.
pub fn transform(record: &RawRecord) -> Result<TransformedStation, HandlerError> {
    let value = record
        .value
        .as_ref()
        .ok_or_else(|| HandlerError::Decode(format!("{}: record has no value", record.id())))?;
    let station: Station = serde_json::from_value(value.clone())?;
    Ok(classify(&station))
}
