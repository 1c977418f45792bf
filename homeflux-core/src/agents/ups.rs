use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use tracing::{debug, info};

use crate::error::{HomefluxError, HomefluxResult};
use crate::records::{PowerReading, Timescale};

use super::SourceAgent;

const UPS_SOURCE: &str = "homeflux.nut";

const LOAD_KEY: &str = "ups.load";
const NOMINAL_POWER_KEY: &str = "ups.realpower.nominal";

/// A UPS monitoring daemon, as the agent needs it. Credentials live on
/// the implementation; the agent supplies address, port and device name.
#[async_trait]
pub trait UpsTransport: Send + Sync {
    type Handle: Send;

    async fn connect(&self, address: &str, port: u16) -> HomefluxResult<Self::Handle>;

    async fn list_vars(
        &self,
        handle: &mut Self::Handle,
        device_name: &str,
    ) -> HomefluxResult<BTreeMap<String, String>>;

    async fn disconnect(&self, handle: Self::Handle);
}

/// Collector for one UPS host. Produces a single current-load power
/// reading per cycle.
pub struct UpsAgent<T: UpsTransport> {
    transport: T,
    label: String,
    address: String,
    port: u16,
    device_name: String,
    timescale: Timescale,
    handle: Option<T::Handle>,
}

impl<T: UpsTransport> UpsAgent<T> {
    /// Create the agent without connecting.
    pub fn new(
        transport: T,
        label: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        device_name: impl Into<String>,
        timescale: Timescale,
    ) -> Self {
        Self {
            transport,
            label: label.into(),
            address: address.into(),
            port,
            device_name: device_name.into(),
            timescale,
            handle: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current load as a power reading.
    ///
    /// Invoked while disconnected, this connects, reads and disconnects
    /// again as a single self-contained operation, for ad-hoc one-off
    /// reads outside the scheduler.
    pub async fn read(&mut self) -> HomefluxResult<PowerReading> {
        let single_shot = self.handle.is_none();
        if single_shot {
            self.connect().await?;
        }

        let result = self.read_connected().await;

        if single_shot {
            self.disconnect().await;
        }

        result
    }

    async fn read_connected(&mut self) -> HomefluxResult<PowerReading> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| HomefluxError::NotConnected(self.label.clone()))?;

        let vars = self.transport.list_vars(handle, &self.device_name).await?;

        let load = self.telemetry_value(&vars, LOAD_KEY)?;
        let value = if load == 0.0 {
            debug!(host = %self.label, "UPS has no load");
            0.0
        } else {
            debug!(host = %self.label, load, "UPS load");
            let nominal = self.telemetry_value(&vars, NOMINAL_POWER_KEY)?;
            round1(nominal * 0.01 * load)
        };

        let now = Utc::now();
        let mut tags = BTreeMap::new();
        tags.insert("ip_address".to_string(), self.address.clone());

        let reading = PowerReading {
            timescale: self.timescale,
            time: now.with_nanosecond(0).unwrap_or(now),
            raw_value: value,
            unit: "WH".to_string(),
            source: UPS_SOURCE.to_string(),
            location: self.label.clone(),
            tags: Some(tags),
        };
        debug!(reading = %reading, "UPS read");

        Ok(reading)
    }

    /// A missing or unparseable telemetry key indicates a configuration
    /// or firmware mismatch; that is a hard failure the caller must
    /// surface, not an empty result.
    fn telemetry_value(&self, vars: &BTreeMap<String, String>, key: &str) -> HomefluxResult<f64> {
        let raw = vars.get(key).ok_or_else(|| {
            HomefluxError::agent(&self.label, format!("missing telemetry key {}", key))
        })?;
        raw.parse().map_err(|_| {
            HomefluxError::agent(
                &self.label,
                format!("unparseable telemetry value for {}: {}", key, raw),
            )
        })
    }
}

#[async_trait]
impl<T: UpsTransport> SourceAgent for UpsAgent<T> {
    fn name(&self) -> &str {
        &self.label
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    async fn connect(&mut self) -> HomefluxResult<()> {
        if self.handle.is_some() {
            debug!(host = %self.label, "already connected, reconnecting");
            self.disconnect().await;
        }

        info!(host = %self.label, address = %self.address, port = self.port, "connecting to UPS");
        let handle = self.transport.connect(&self.address, self.port).await?;
        self.handle = Some(handle);
        Ok(())
    }

    async fn disconnect(&mut self) {
        match self.handle.take() {
            Some(handle) => {
                debug!(host = %self.label, "disconnecting from UPS");
                self.transport.disconnect(handle).await;
            }
            None => debug!(host = %self.label, "no UPS connection to close"),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::with_connection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockTransport {
        vars: BTreeMap<String, String>,
        fail_connect: bool,
        connects: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
    }

    impl MockTransport {
        fn new(vars: &[(&str, &str)]) -> Self {
            Self {
                vars: vars
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                fail_connect: false,
                connects: Arc::new(AtomicUsize::new(0)),
                disconnects: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl UpsTransport for MockTransport {
        type Handle = ();

        async fn connect(&self, address: &str, _port: u16) -> HomefluxResult<()> {
            if self.fail_connect {
                return Err(HomefluxError::connection(address, "no route to host"));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_vars(
            &self,
            _handle: &mut (),
            _device_name: &str,
        ) -> HomefluxResult<BTreeMap<String, String>> {
            Ok(self.vars.clone())
        }

        async fn disconnect(&self, _handle: ()) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn agent(transport: MockTransport) -> UpsAgent<MockTransport> {
        UpsAgent::new(
            transport,
            "garage",
            "10.0.0.5",
            3493,
            "ups",
            Timescale::Minute,
        )
    }

    #[test]
    fn test_construction_never_auto_connects() {
        let agent = agent(MockTransport::new(&[]));
        assert!(!agent.is_connected());
    }

    #[tokio::test]
    async fn test_read_computes_load_power() {
        let mut agent = agent(MockTransport::new(&[
            ("ups.load", "42"),
            ("ups.realpower.nominal", "865"),
        ]));
        agent.connect().await.unwrap();

        let reading = agent.read().await.unwrap();
        // 865 * 0.01 * 42 = 363.3, rounded to one decimal place.
        assert_eq!(reading.raw_value, 363.3);
        assert_eq!(reading.unit, "WH");
        assert_eq!(reading.source, "homeflux.nut");
        assert_eq!(reading.location, "garage");
        assert_eq!(reading.timescale, Timescale::Minute);
        assert_eq!(reading.time.nanosecond(), 0);

        let tags = reading.tags.unwrap();
        assert_eq!(tags.get("ip_address").unwrap(), "10.0.0.5");

        assert!(agent.is_connected());
    }

    #[tokio::test]
    async fn test_zero_load_yields_zero_without_nominal() {
        // No realpower.nominal key at all: must not matter at zero load.
        let mut agent = agent(MockTransport::new(&[("ups.load", "0")]));
        agent.connect().await.unwrap();

        let reading = agent.read().await.unwrap();
        assert_eq!(reading.raw_value, 0.0);
    }

    #[tokio::test]
    async fn test_missing_load_key_is_hard_failure() {
        let mut agent = agent(MockTransport::new(&[("ups.realpower.nominal", "865")]));
        agent.connect().await.unwrap();

        let result = agent.read().await;
        assert!(matches!(result, Err(HomefluxError::Agent { .. })));
    }

    #[tokio::test]
    async fn test_single_shot_read_connects_and_disconnects() {
        let transport = MockTransport::new(&[("ups.load", "10"), ("ups.realpower.nominal", "500")]);
        let connects = transport.connects.clone();
        let disconnects = transport.disconnects.clone();
        let mut agent = agent(transport);

        let reading = agent.read().await.unwrap();
        assert_eq!(reading.raw_value, 50.0);
        assert!(!agent.is_connected());
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let mut transport = MockTransport::new(&[]);
        transport.fail_connect = true;
        let mut agent = agent(transport);

        let result = agent.read().await;
        assert!(matches!(result, Err(HomefluxError::Connection { .. })));
        assert!(!agent.is_connected());
    }

    #[tokio::test]
    async fn test_scoped_use_reads_connected() {
        let transport = MockTransport::new(&[("ups.load", "20"), ("ups.realpower.nominal", "600")]);
        let connects = transport.connects.clone();
        let disconnects = transport.disconnects.clone();
        let mut agent = agent(transport);

        let reading = with_connection(&mut agent, |a: &mut UpsAgent<MockTransport>| {
            Box::pin(async move { a.read().await })
        })
        .await
        .unwrap();

        assert_eq!(reading.raw_value, 120.0);
        assert!(!agent.is_connected());
        // The scoped wrapper owns the connection; read must not add its own.
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }
}
