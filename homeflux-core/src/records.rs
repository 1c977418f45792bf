use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::error::HomefluxError;

/// Namespace prefix for every destination bucket.
pub const NAMESPACE: &str = "home";

/// Value of the `data_source` tag attached to every persisted point.
pub const DATA_SOURCE: &str = "homeflux";

/// Aggregation granularity of a reading. Determines which bucket the
/// reading is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Timescale {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl Timescale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timescale::Second => "second",
            Timescale::Minute => "minute",
            Timescale::Hour => "hour",
            Timescale::Day => "day",
            Timescale::Week => "week",
        }
    }

    /// Full bucket name for this timescale: `{namespace}-{timescale}`.
    pub fn bucket(&self) -> String {
        format!("{}-{}", NAMESPACE, self.as_str())
    }
}

impl fmt::Display for Timescale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timescale {
    type Err = HomefluxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "second" => Ok(Timescale::Second),
            "minute" => Ok(Timescale::Minute),
            "hour" => Ok(Timescale::Hour),
            "day" => Ok(Timescale::Day),
            "week" => Ok(Timescale::Week),
            other => Err(HomefluxError::InvalidTimescale(other.to_string())),
        }
    }
}

/// The persistable form of a record: one measurement, a tag set, a
/// timestamp and a single numeric field.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub measurement: &'static str,
    pub tags: BTreeMap<String, String>,
    pub time: DateTime<Utc>,
    pub field: (&'static str, f64),
}

/// A power reading in source units, normalized to watt-hours on output.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerReading {
    pub timescale: Timescale,
    pub time: DateTime<Utc>,
    pub raw_value: f64,
    pub unit: String,
    pub source: String,
    pub location: String,
    pub tags: Option<BTreeMap<String, String>>,
}

impl PowerReading {
    /// Reading value converted to watt-hours.
    ///
    /// An unrecognized unit degrades to 0.0 with an error log entry so
    /// producers are not required to validate units before construction.
    pub fn value_watt_hours(&self) -> f64 {
        match self.unit.to_ascii_uppercase().as_str() {
            "KWH" => self.raw_value * 1000.0,
            "WH" => self.raw_value,
            _ => {
                error!(unit = %self.unit, "invalid unit type");
                0.0
            }
        }
    }

    pub fn bucket(&self) -> String {
        self.timescale.bucket()
    }

    pub fn as_point(&self) -> DataPoint {
        let mut tags = BTreeMap::new();
        tags.insert("data_source".to_string(), DATA_SOURCE.to_string());
        tags.insert("source".to_string(), self.source.clone());
        if let Some(extra) = &self.tags {
            for (key, value) in extra {
                tags.insert(key.clone(), value.clone());
            }
        }

        DataPoint {
            measurement: "power",
            tags,
            time: self.time,
            field: ("power_usage", self.value_watt_hours()),
        }
    }
}

impl fmt::Display for PowerReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[PowerReading {} {} {} {}Wh]",
            self.source,
            self.location,
            self.time,
            self.value_watt_hours()
        )
    }
}

/// A temperature reading. The raw value is already in degrees; no
/// conversion is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateReading {
    pub timescale: Timescale,
    pub time: DateTime<Utc>,
    pub raw_value: f64,
    pub source: String,
    pub location: String,
}

impl ClimateReading {
    pub fn value(&self) -> f64 {
        self.raw_value
    }

    pub fn bucket(&self) -> String {
        self.timescale.bucket()
    }

    pub fn as_point(&self) -> DataPoint {
        let mut tags = BTreeMap::new();
        tags.insert("data_source".to_string(), DATA_SOURCE.to_string());
        tags.insert("location".to_string(), self.location.clone());
        tags.insert("source".to_string(), self.source.clone());

        DataPoint {
            measurement: "temperature",
            tags,
            time: self.time,
            field: ("temperature", self.value()),
        }
    }
}

impl fmt::Display for ClimateReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[ClimateReading {} {} {}°]",
            self.source,
            self.time,
            self.value()
        )
    }
}

/// A normalized reading from any source, ready for sink dispatch.
///
/// Records are immutable after construction; the bucket is always
/// recomputed from the timescale, never stored.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedRecord {
    Power(PowerReading),
    Climate(ClimateReading),
}

impl NormalizedRecord {
    pub fn timescale(&self) -> Timescale {
        match self {
            NormalizedRecord::Power(r) => r.timescale,
            NormalizedRecord::Climate(r) => r.timescale,
        }
    }

    pub fn bucket(&self) -> String {
        self.timescale().bucket()
    }

    pub fn as_point(&self) -> DataPoint {
        match self {
            NormalizedRecord::Power(r) => r.as_point(),
            NormalizedRecord::Climate(r) => r.as_point(),
        }
    }
}

impl From<PowerReading> for NormalizedRecord {
    fn from(reading: PowerReading) -> Self {
        NormalizedRecord::Power(reading)
    }
}

impl From<ClimateReading> for NormalizedRecord {
    fn from(reading: ClimateReading) -> Self {
        NormalizedRecord::Climate(reading)
    }
}
