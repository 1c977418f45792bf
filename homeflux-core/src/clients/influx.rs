use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{HomefluxError, HomefluxResult};
use crate::records::DataPoint;
use crate::sink::{Store, StoreConnection};

/// Time-series store client for the InfluxDB v2 HTTP write API.
pub struct InfluxStore {
    url: String,
    org: String,
    token: String,
}

impl InfluxStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            url: config.url.trim_end_matches('/').to_string(),
            org: config.org.clone(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl Store for InfluxStore {
    async fn open(&self) -> HomefluxResult<Box<dyn StoreConnection>> {
        let client = Client::builder()
            .build()
            .map_err(|e| HomefluxError::Store(e.to_string()))?;

        debug!(url = %self.url, "opened store connection");
        Ok(Box::new(InfluxConnection {
            client,
            url: self.url.clone(),
            org: self.org.clone(),
            token: self.token.clone(),
        }))
    }
}

pub struct InfluxConnection {
    client: Client,
    url: String,
    org: String,
    token: String,
}

#[async_trait]
impl StoreConnection for InfluxConnection {
    async fn write(&mut self, bucket: &str, point: &DataPoint) -> HomefluxResult<()> {
        let response = self
            .client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", bucket),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line_protocol(point))
            .send()
            .await
            .map_err(|e| HomefluxError::Store(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HomefluxError::Store(format!(
                "write to {} returned {}",
                bucket,
                response.status()
            )));
        }

        Ok(())
    }

    async fn close(self: Box<Self>) -> HomefluxResult<()> {
        debug!(url = %self.url, "closed store connection");
        Ok(())
    }
}

/// Encode one point as InfluxDB line protocol with a nanosecond
/// timestamp.
pub fn line_protocol(point: &DataPoint) -> String {
    let mut line = escape(point.measurement);
    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape(key));
        line.push('=');
        line.push_str(&escape(value));
    }

    let (field_key, field_value) = point.field;
    line.push(' ');
    line.push_str(&escape(field_key));
    line.push('=');
    line.push_str(&field_value.to_string());

    let nanos = point
        .time
        .timestamp_nanos_opt()
        .unwrap_or_else(|| point.time.timestamp_millis().saturating_mul(1_000_000));
    line.push(' ');
    line.push_str(&nanos.to_string());

    line
}

fn escape(raw: &str) -> String {
    raw.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    #[test]
    fn test_line_protocol() {
        let mut tags = BTreeMap::new();
        tags.insert("data_source".to_string(), "homeflux".to_string());
        tags.insert("source".to_string(), "test_source".to_string());

        let point = DataPoint {
            measurement: "power",
            tags,
            time: Utc.with_ymd_and_hms(2021, 4, 20, 0, 0, 0).unwrap(),
            field: ("power_usage", 1.25),
        };

        assert_eq!(
            line_protocol(&point),
            "power,data_source=homeflux,source=test_source power_usage=1.25 1618876800000000000"
        );
    }

    #[test]
    fn test_line_protocol_escapes_tag_values() {
        let mut tags = BTreeMap::new();
        tags.insert("location".to_string(), "back porch".to_string());

        let point = DataPoint {
            measurement: "temperature",
            tags,
            time: Utc.with_ymd_and_hms(2021, 4, 20, 0, 0, 0).unwrap(),
            field: ("temperature", 79.9),
        };

        assert_eq!(
            line_protocol(&point),
            "temperature,location=back\\ porch temperature=79.9 1618876800000000000"
        );
    }
}
