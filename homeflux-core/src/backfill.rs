use chrono::NaiveDate;
use tracing::info;

use crate::agents::{Aggregate, MeterAgent, SourceAgent, UtilityApi};
use crate::error::HomefluxResult;
use crate::records::NormalizedRecord;
use crate::sink::{self, Store};

/// Offset windows walked by the backfill, newest first.
///
/// Starting from `(-31, -1)`, each window shifts back 30 days while the
/// start offset is still within `delta` days of today. Windows never
/// exceed the remote 30-day query limit.
pub fn windows(delta_days: i64) -> Vec<(i64, i64)> {
    let mut result = Vec::new();
    let (mut start, mut end) = (-31i64, -1i64);
    while start.abs() < delta_days {
        result.push((start, end));
        start -= 30;
        end -= 30;
    }
    result
}

/// Re-collect meter history from `today` back to `online_since`, one
/// fixed-size window at a time.
///
/// Strictly sequential, to respect the remote rate and window limits.
/// The agent is connected once for the whole run and released on every
/// exit path.
pub async fn run<C: UtilityApi>(
    agent: &mut MeterAgent<C>,
    store: &dyn Store,
    online_since: NaiveDate,
    today: NaiveDate,
    dry_run: bool,
) -> HomefluxResult<()> {
    let delta = (today - online_since).num_days();
    let windows = windows(delta);
    info!(
        %online_since,
        delta_days = delta,
        windows = windows.len(),
        "starting historical backfill",
    );

    agent.connect().await?;
    let result = backfill_windows(agent, store, &windows, dry_run).await;
    agent.disconnect().await;
    result
}

async fn backfill_windows<C: UtilityApi>(
    agent: &mut MeterAgent<C>,
    store: &dyn Store,
    windows: &[(i64, i64)],
    dry_run: bool,
) -> HomefluxResult<()> {
    for &(start, end) in windows {
        info!(start, end, "backfilling window");

        let power_hourly = to_records(agent.fetch_power(Aggregate::Hour, start, end).await?);
        let climate_hourly = to_records(agent.fetch_climate(Aggregate::Hour, start, end).await?);
        let power_daily = to_records(agent.fetch_power(Aggregate::Day, start, end).await?);
        let climate_daily = to_records(agent.fetch_climate(Aggregate::Day, start, end).await?);

        let batches = [power_hourly, climate_hourly, power_daily, climate_daily];
        let total: usize = batches.iter().map(Vec::len).sum();

        if dry_run {
            info!(start, end, records = total, "dry run, skipping sink dispatch");
            continue;
        }

        for batch in &batches {
            sink::dispatch(store, batch).await;
        }
        info!(start, end, records = total, "window backfilled");
    }

    Ok(())
}

fn to_records<R: Into<NormalizedRecord>>(readings: Vec<R>) -> Vec<NormalizedRecord> {
    readings.into_iter().map(Into::into).collect()
}
