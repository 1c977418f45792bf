use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{HomefluxError, HomefluxResult};
use crate::records::{ClimateReading, PowerReading, Timescale};

use super::SourceAgent;

const METER_NAME: &str = "gwp_opower";
const METER_SOURCE: &str = "homeflux.gwp_opower";
const METER_LOCATION: &str = "gwp_meter";

/// Remote aggregation variant for a meter query. Also fixes the
/// timescale of the records produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Hour,
    Day,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Hour => "hour",
            Aggregate::Day => "day",
        }
    }

    pub fn timescale(&self) -> Timescale {
        match self {
            Aggregate::Hour => Timescale::Hour,
            Aggregate::Day => Timescale::Day,
        }
    }
}

/// Which data set a meter query addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    Power,
    Weather,
}

/// The utility provider's web API, as the meter agent needs it.
///
/// Implementations own the session mechanics (login transport, cookies)
/// and the vendor URL templates; the agent owns date arithmetic and
/// response normalization.
#[async_trait]
pub trait UtilityApi: Send + Sync {
    type Session: Send;

    async fn login(&self) -> HomefluxResult<Self::Session>;

    async fn logout(&self, session: Self::Session);

    /// Build the query URL for one data set over an inclusive ISO date
    /// range.
    fn reads_url(
        &self,
        kind: ReadKind,
        aggregate: Aggregate,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> String;

    /// Fetch and parse JSON from a URL. Degrades to an empty object on
    /// transport or parse failure; never fails the call.
    async fn fetch_json(&self, session: &mut Self::Session, url: &str) -> Value;
}

#[derive(Debug, Deserialize)]
struct ReadsResponse {
    #[serde(default)]
    units: Option<Units>,
    #[serde(default)]
    reads: Vec<PowerRead>,
}

#[derive(Debug, Deserialize)]
struct Units {
    consumption: String,
}

#[derive(Debug, Deserialize)]
struct PowerRead {
    #[serde(rename = "endTime")]
    end_time: DateTime<FixedOffset>,
    consumption: Consumption,
}

#[derive(Debug, Deserialize)]
struct Consumption {
    #[serde(rename = "type")]
    kind: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    #[serde(default)]
    reads: Vec<WeatherRead>,
}

#[derive(Debug, Deserialize)]
struct WeatherRead {
    date: String,
    #[serde(rename = "meanTemperature")]
    mean_temperature: f64,
}

/// Collector for the utility meter: power consumption and local weather
/// readings over day-offset windows.
///
/// Offsets are whole days relative to today (0 = today, -1 = yesterday).
/// The remote query window must not exceed 30 days; callers chunk.
pub struct MeterAgent<C: UtilityApi> {
    api: C,
    session: Option<C::Session>,
}

impl<C: UtilityApi> MeterAgent<C> {
    /// Create the agent without logging in.
    pub fn new(api: C) -> Self {
        Self { api, session: None }
    }

    /// Hourly or daily power readings for the offset window.
    ///
    /// An empty or missing result set is not an error; protocol and
    /// parse failures are logged and also degrade to an empty list.
    pub async fn fetch_power(
        &mut self,
        aggregate: Aggregate,
        start_offset_days: i64,
        end_offset_days: i64,
    ) -> HomefluxResult<Vec<PowerReading>> {
        let (start_date, end_date) = offset_window(start_offset_days, end_offset_days);
        let url = self
            .api
            .reads_url(ReadKind::Power, aggregate, start_date, end_date);

        let Self { api, session } = self;
        let session = session
            .as_mut()
            .ok_or_else(|| HomefluxError::NotConnected(METER_NAME.to_string()))?;
        let data = api.fetch_json(session, &url).await;

        if is_empty_payload(&data) {
            info!(%start_date, %end_date, "no power reads found");
            return Ok(Vec::new());
        }

        let response: ReadsResponse = match serde_json::from_value(data) {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, %url, "failed to parse power reads response");
                return Ok(Vec::new());
            }
        };

        if response.reads.is_empty() {
            info!(%start_date, %end_date, "no power reads found");
            return Ok(Vec::new());
        }

        let unit = match response.units {
            Some(units) => units.consumption,
            None => {
                error!(%url, "power reads response is missing consumption units");
                return Ok(Vec::new());
            }
        };

        let mut result = Vec::new();
        for read in response.reads {
            // Skip non-ACTUAL data; the remote also reports estimates.
            if read.consumption.kind != "ACTUAL" {
                continue;
            }
            let reading = PowerReading {
                timescale: aggregate.timescale(),
                time: read.end_time.with_timezone(&Utc),
                raw_value: read.consumption.value,
                unit: unit.clone(),
                source: METER_SOURCE.to_string(),
                location: METER_LOCATION.to_string(),
                tags: None,
            };
            debug!(reading = %reading, "parsed power read");
            result.push(reading);
        }

        Ok(result)
    }

    /// Hourly or daily weather readings for the offset window.
    pub async fn fetch_climate(
        &mut self,
        aggregate: Aggregate,
        start_offset_days: i64,
        end_offset_days: i64,
    ) -> HomefluxResult<Vec<ClimateReading>> {
        let (start_date, end_date) = offset_window(start_offset_days, end_offset_days);
        let url = self
            .api
            .reads_url(ReadKind::Weather, aggregate, start_date, end_date);

        let Self { api, session } = self;
        let session = session
            .as_mut()
            .ok_or_else(|| HomefluxError::NotConnected(METER_NAME.to_string()))?;
        let data = api.fetch_json(session, &url).await;

        if is_empty_payload(&data) {
            info!(%start_date, %end_date, "no weather reads found");
            return Ok(Vec::new());
        }

        let response: WeatherResponse = match serde_json::from_value(data) {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, %url, "failed to parse weather reads response");
                return Ok(Vec::new());
            }
        };

        if response.reads.is_empty() {
            info!(%start_date, %end_date, "no weather reads found");
            return Ok(Vec::new());
        }

        let mut result = Vec::new();
        for read in response.reads {
            let time = match parse_weather_time(&read.date) {
                Some(time) => time,
                None => {
                    warn!(date = %read.date, "skipping weather read with unparseable date");
                    continue;
                }
            };
            let reading = ClimateReading {
                timescale: aggregate.timescale(),
                time,
                raw_value: read.mean_temperature,
                source: METER_SOURCE.to_string(),
                location: METER_LOCATION.to_string(),
            };
            debug!(reading = %reading, "parsed weather read");
            result.push(reading);
        }

        Ok(result)
    }
}

#[async_trait]
impl<C: UtilityApi> SourceAgent for MeterAgent<C> {
    fn name(&self) -> &str {
        METER_NAME
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(&mut self) -> HomefluxResult<()> {
        if self.session.is_some() {
            debug!("already logged in, logging out first");
            self.disconnect().await;
        }

        info!("logging into GWP OPower");
        let session = self.api.login().await?;
        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) {
        match self.session.take() {
            Some(session) => {
                info!("closing GWP OPower session");
                self.api.logout(session).await;
            }
            None => info!("no session to close"),
        }
    }
}

fn offset_window(start_offset_days: i64, end_offset_days: i64) -> (NaiveDate, NaiveDate) {
    let today = Utc::now().date_naive();
    (
        today + Duration::days(start_offset_days),
        today + Duration::days(end_offset_days),
    )
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Weather timestamps arrive as RFC 3339 for the hourly set and a bare
/// ISO date for the daily set.
fn parse_weather_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Some(time.with_timezone(&Utc));
    }
    let date: NaiveDate = raw.parse().ok()?;
    Some(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0)?,
        Utc,
    ))
}
