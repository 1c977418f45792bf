use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::agents::{with_connection, Aggregate, MeterAgent, SourceAgent, UpsAgent};
use crate::clients::{NutTransport, OpowerClient};
use crate::config::HomefluxConfig;
use crate::error::HomefluxResult;
use crate::records::{NormalizedRecord, Timescale};
use crate::scheduler::Job;
use crate::sink::{self, Store};

/// The recurring jobs for one deployment: one meter job, one UPS job.
pub fn build_jobs(config: Arc<HomefluxConfig>, store: Arc<dyn Store>) -> Vec<Job> {
    vec![
        meter_job(Arc::clone(&config), Arc::clone(&store)),
        ups_job(config, store),
    ]
}

pub fn meter_job(config: Arc<HomefluxConfig>, store: Arc<dyn Store>) -> Job {
    let interval = Duration::from_secs(config.meter.interval_secs);
    Job::new("gwp_opower", interval, move || {
        let config = Arc::clone(&config);
        let store = Arc::clone(&store);
        async move { meter_cycle(&config, store.as_ref()).await }
    })
}

pub fn ups_job(config: Arc<HomefluxConfig>, store: Arc<dyn Store>) -> Job {
    let interval = Duration::from_secs(config.ups.interval_secs);
    Job::new("nut", interval, move || {
        let config = Arc::clone(&config);
        let store = Arc::clone(&store);
        async move { ups_cycle(&config, store.as_ref()).await }
    })
}

/// One meter collection cycle: hourly and daily power plus hourly and
/// daily weather over the configured lookback window, each batch
/// dispatched separately.
pub async fn meter_cycle(config: &HomefluxConfig, store: &dyn Store) -> HomefluxResult<usize> {
    let api = OpowerClient::new(&config.meter)?;
    let mut agent = MeterAgent::new(api);
    let start = -i64::from(config.meter.lookback_days);

    let batches = with_connection(&mut agent, |a: &mut MeterAgent<OpowerClient>| {
        Box::pin(async move {
            let power_hourly = to_records(a.fetch_power(Aggregate::Hour, start, 0).await?);
            let climate_hourly = to_records(a.fetch_climate(Aggregate::Hour, start, 0).await?);
            let power_daily = to_records(a.fetch_power(Aggregate::Day, start, 0).await?);
            let climate_daily = to_records(a.fetch_climate(Aggregate::Day, start, 0).await?);
            Ok([power_hourly, climate_hourly, power_daily, climate_daily])
        })
    })
    .await?;

    let total = batches.iter().map(Vec::len).sum();
    info!(records = total, "read records from GWP OPower");

    if config.dry_run {
        info!(records = total, "dry run, skipping sink dispatch");
    } else {
        for batch in &batches {
            sink::dispatch(store, batch).await;
        }
    }

    Ok(total)
}

/// One UPS collection cycle over every configured host, sequentially.
/// A failure on one host is logged and does not stop the others.
pub async fn ups_cycle(config: &HomefluxConfig, store: &dyn Store) -> HomefluxResult<usize> {
    let hosts = config.ups.host_entries();
    if hosts.is_empty() {
        debug!("no UPS hosts configured");
        return Ok(0);
    }

    let mut records = Vec::new();
    for host in hosts {
        let started = Instant::now();
        let transport = NutTransport::new(&config.ups);
        let mut agent = UpsAgent::new(
            transport,
            host.label,
            host.address,
            host.port,
            config.ups.name.clone(),
            Timescale::Minute,
        );

        let result = with_connection(&mut agent, |a: &mut UpsAgent<NutTransport>| {
            Box::pin(async move { a.read().await })
        })
        .await;

        match result {
            Ok(reading) => {
                debug!(
                    host = %agent.name(),
                    elapsed = ?started.elapsed(),
                    "read from UPS host",
                );
                records.push(NormalizedRecord::from(reading));
            }
            Err(e) => error!(
                host = %agent.name(),
                address = %agent.address(),
                error = %e,
                "could not read from UPS host",
            ),
        }
    }

    info!(records = records.len(), "read records from NUT");

    if config.dry_run {
        info!(records = records.len(), "dry run, skipping sink dispatch");
    } else {
        sink::dispatch(store, &records).await;
    }

    Ok(records.len())
}

fn to_records<R: Into<NormalizedRecord>>(readings: Vec<R>) -> Vec<NormalizedRecord> {
    readings.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::DataPoint;
    use crate::sink::StoreConnection;
    use async_trait::async_trait;

    struct NullStore;

    struct NullConnection;

    #[async_trait]
    impl Store for NullStore {
        async fn open(&self) -> HomefluxResult<Box<dyn StoreConnection>> {
            Ok(Box::new(NullConnection))
        }
    }

    #[async_trait]
    impl StoreConnection for NullConnection {
        async fn write(&mut self, _bucket: &str, _point: &DataPoint) -> HomefluxResult<()> {
            Ok(())
        }

        async fn close(self: Box<Self>) -> HomefluxResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ups_cycle_with_no_hosts() {
        let config = HomefluxConfig::default();
        let handled = ups_cycle(&config, &NullStore).await.unwrap();
        assert_eq!(handled, 0);
    }

    #[test]
    fn test_build_jobs_registers_both_sources() {
        let config = Arc::new(HomefluxConfig::default());
        let store: Arc<dyn Store> = Arc::new(NullStore);

        let jobs = build_jobs(config, store);
        let names: Vec<&str> = jobs.iter().map(|j| j.name()).collect();
        assert_eq!(names, vec!["gwp_opower", "nut"]);
    }
}
