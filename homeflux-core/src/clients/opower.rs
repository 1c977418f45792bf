use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::agents::meter::{Aggregate, ReadKind, UtilityApi};
use crate::config::MeterConfig;
use crate::error::{HomefluxError, HomefluxResult};

const DEFAULT_BASE_URL: &str = "https://gwp.opower.com";

const SIGNIN_PATH: &str = "/ei/edge/apis/user-account-control-v1/cws/v1/gwp/account/signin";
const READS_PATH: &str = "/ei/edge/apis/DataBrowser-v1/cws/utilities/gwp/utilityAccounts";
const WEATHER_PATH: &str = "/ei/edge/apis/DataBrowser-v1/cws/weather";

/// Local-midnight offset appended to hourly weather query dates,
/// URL-encoded.
const LOCAL_MIDNIGHT_OFFSET: &str = "T00%3A00%3A00-07%3A00";

/// Session marker handed out by [`OpowerClient::login`]. The transport
/// session itself lives in the client's cookie jar; the marker enforces
/// login-before-fetch at the call sites.
pub struct OpowerSession {
    started_at: chrono::DateTime<Utc>,
}

/// HTTP client for the Glendale Water and Power gwp.opower.com JSON API.
pub struct OpowerClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    account_uuid: String,
}

impl OpowerClient {
    pub fn new(config: &MeterConfig) -> HomefluxResult<Self> {
        Self::with_credentials(&config.username, &config.password, &config.account_uuid)
    }

    pub fn with_credentials(
        username: &str,
        password: &str,
        account_uuid: &str,
    ) -> HomefluxResult<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| HomefluxError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            account_uuid: account_uuid.to_string(),
        })
    }

    /// Point the client at a different host. Test hook.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl UtilityApi for OpowerClient {
    type Session = OpowerSession;

    async fn login(&self) -> HomefluxResult<OpowerSession> {
        let url = format!("{}{}", self.base_url, SIGNIN_PATH);
        debug!(%url, "signing in");

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await
            .map_err(|e| HomefluxError::connection("gwp_opower", e.to_string()))?;

        if !response.status().is_success() {
            return Err(HomefluxError::connection(
                "gwp_opower",
                format!("signin rejected with status {}", response.status()),
            ));
        }

        Ok(OpowerSession {
            started_at: Utc::now(),
        })
    }

    async fn logout(&self, session: OpowerSession) {
        // The remote session expires on its own; dropping the cookie jar
        // reference is all the cleanup there is.
        info!(
            session_age = ?(Utc::now() - session.started_at),
            "closed GWP OPower session",
        );
    }

    fn reads_url(
        &self,
        kind: ReadKind,
        aggregate: Aggregate,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> String {
        match (kind, aggregate) {
            (ReadKind::Power, _) => format!(
                "{}{}/{}/reads?startDate={}&endDate={}&aggregateType={}",
                self.base_url,
                READS_PATH,
                self.account_uuid,
                start_date,
                end_date,
                aggregate.as_str(),
            ),
            (ReadKind::Weather, Aggregate::Hour) => format!(
                "{}{}/hourly?startDate={}{}&endDate={}{}&useCelsius=false",
                self.base_url,
                WEATHER_PATH,
                start_date,
                LOCAL_MIDNIGHT_OFFSET,
                end_date,
                LOCAL_MIDNIGHT_OFFSET,
            ),
            (ReadKind::Weather, Aggregate::Day) => format!(
                "{}{}/daily?startDate={}&endDate={}&useCelsius=false",
                self.base_url, WEATHER_PATH, start_date, end_date,
            ),
        }
    }

    async fn fetch_json(&self, _session: &mut OpowerSession, url: &str) -> Value {
        debug!(%url, "fetching");

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, %url, "request failed");
                return Value::Object(Default::default());
            }
        };

        if !response.status().is_success() {
            error!(status = %response.status(), %url, "unexpected status");
            return Value::Object(Default::default());
        }

        match response.json().await {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, %url, "failed to read JSON body");
                Value::Object(Default::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpowerClient {
        OpowerClient::with_credentials("user@example.com", "hunter2", "abc-123").unwrap()
    }

    #[test]
    fn test_power_reads_url() {
        let url = client().reads_url(
            ReadKind::Power,
            Aggregate::Hour,
            NaiveDate::from_ymd_opt(2021, 4, 15).unwrap(),
            NaiveDate::from_ymd_opt(2021, 4, 20).unwrap(),
        );
        assert_eq!(
            url,
            "https://gwp.opower.com/ei/edge/apis/DataBrowser-v1/cws/utilities/gwp/utilityAccounts\
             /abc-123/reads?startDate=2021-04-15&endDate=2021-04-20&aggregateType=hour"
        );
    }

    #[test]
    fn test_daily_power_url_differs_only_in_aggregate() {
        let start = NaiveDate::from_ymd_opt(2021, 4, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2021, 4, 20).unwrap();
        let hourly = client().reads_url(ReadKind::Power, Aggregate::Hour, start, end);
        let daily = client().reads_url(ReadKind::Power, Aggregate::Day, start, end);
        assert_eq!(
            hourly.replace("aggregateType=hour", "aggregateType=day"),
            daily
        );
    }

    #[test]
    fn test_hourly_weather_url_carries_midnight_offset() {
        let url = client().reads_url(
            ReadKind::Weather,
            Aggregate::Hour,
            NaiveDate::from_ymd_opt(2021, 4, 15).unwrap(),
            NaiveDate::from_ymd_opt(2021, 4, 20).unwrap(),
        );
        assert_eq!(
            url,
            "https://gwp.opower.com/ei/edge/apis/DataBrowser-v1/cws/weather/hourly\
             ?startDate=2021-04-15T00%3A00%3A00-07%3A00\
             &endDate=2021-04-20T00%3A00%3A00-07%3A00&useCelsius=false"
        );
    }

    #[test]
    fn test_daily_weather_url() {
        let url = client().reads_url(
            ReadKind::Weather,
            Aggregate::Day,
            NaiveDate::from_ymd_opt(2021, 4, 15).unwrap(),
            NaiveDate::from_ymd_opt(2021, 4, 20).unwrap(),
        );
        assert_eq!(
            url,
            "https://gwp.opower.com/ei/edge/apis/DataBrowser-v1/cws/weather/daily\
             ?startDate=2021-04-15&endDate=2021-04-20&useCelsius=false"
        );
    }
}
