use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::HomefluxResult;
use crate::records::{DataPoint, NormalizedRecord};

/// The time-series store, as sink dispatch needs it. One connection is
/// opened per dispatch call; there is no pooling or reuse.
#[async_trait]
pub trait Store: Send + Sync {
    async fn open(&self) -> HomefluxResult<Box<dyn StoreConnection>>;
}

#[async_trait]
pub trait StoreConnection: Send {
    async fn write(&mut self, bucket: &str, point: &DataPoint) -> HomefluxResult<()>;

    async fn close(self: Box<Self>) -> HomefluxResult<()>;
}

/// Group records by destination bucket and write each point to the
/// store.
///
/// The connection is closed even when individual writes fail; write
/// failures are logged, never propagated. Callers decide whether to
/// dispatch at all (dry-run is the orchestrator's call, not the sink's).
pub async fn dispatch(store: &dyn Store, records: &[NormalizedRecord]) {
    if records.is_empty() {
        debug!("no records to write");
        return;
    }

    let started = Instant::now();

    let mut by_bucket: BTreeMap<String, Vec<DataPoint>> = BTreeMap::new();
    for record in records {
        by_bucket
            .entry(record.bucket())
            .or_default()
            .push(record.as_point());
    }

    let mut connection = match store.open().await {
        Ok(connection) => connection,
        Err(e) => {
            error!(error = %e, records = records.len(), "failed to open store connection");
            return;
        }
    };

    let mut written = 0usize;
    for (bucket, points) in &by_bucket {
        let mut count = 0usize;
        for point in points {
            match connection.write(bucket, point).await {
                Ok(()) => count += 1,
                Err(e) => error!(bucket = %bucket, error = %e, "failed to write point"),
            }
        }
        info!(bucket = %bucket, points = count, "wrote points to bucket");
        written += count;
    }

    if let Err(e) = connection.close().await {
        warn!(error = %e, "failed to close store connection");
    }

    info!(
        points = written,
        elapsed = ?started.elapsed(),
        "sink dispatch complete",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HomefluxError;
    use crate::records::{PowerReading, Timescale};
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingStore {
        writes: Arc<Mutex<Vec<(String, DataPoint)>>>,
        closed: Arc<AtomicBool>,
        fail_writes_to: Option<String>,
        fail_open: bool,
    }

    struct RecordingConnection {
        writes: Arc<Mutex<Vec<(String, DataPoint)>>>,
        closed: Arc<AtomicBool>,
        fail_writes_to: Option<String>,
    }

    #[async_trait]
    impl Store for RecordingStore {
        async fn open(&self) -> HomefluxResult<Box<dyn StoreConnection>> {
            if self.fail_open {
                return Err(HomefluxError::Store("connection refused".to_string()));
            }
            Ok(Box::new(RecordingConnection {
                writes: self.writes.clone(),
                closed: self.closed.clone(),
                fail_writes_to: self.fail_writes_to.clone(),
            }))
        }
    }

    #[async_trait]
    impl StoreConnection for RecordingConnection {
        async fn write(&mut self, bucket: &str, point: &DataPoint) -> HomefluxResult<()> {
            if self.fail_writes_to.as_deref() == Some(bucket) {
                return Err(HomefluxError::Store("write rejected".to_string()));
            }
            self.writes
                .lock()
                .unwrap()
                .push((bucket.to_string(), point.clone()));
            Ok(())
        }

        async fn close(self: Box<Self>) -> HomefluxResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn record(timescale: Timescale, raw_value: f64) -> NormalizedRecord {
        NormalizedRecord::Power(PowerReading {
            timescale,
            time: Utc::now(),
            raw_value,
            unit: "WH".to_string(),
            source: "test_source".to_string(),
            location: "test_location".to_string(),
            tags: None,
        })
    }

    #[tokio::test]
    async fn test_dispatch_groups_by_bucket() {
        let store = RecordingStore::default();
        let writes = store.writes.clone();
        let closed = store.closed.clone();

        let records = vec![
            record(Timescale::Hour, 1.0),
            record(Timescale::Minute, 2.0),
            record(Timescale::Hour, 3.0),
        ];
        dispatch(&store, &records).await;

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 3);
        assert_eq!(
            writes.iter().filter(|(b, _)| b == "home-hour").count(),
            2
        );
        assert_eq!(
            writes.iter().filter(|(b, _)| b == "home-minute").count(),
            1
        );
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dispatch_closes_even_when_writes_fail() {
        let store = RecordingStore {
            fail_writes_to: Some("home-hour".to_string()),
            ..Default::default()
        };
        let writes = store.writes.clone();
        let closed = store.closed.clone();

        let records = vec![record(Timescale::Hour, 1.0), record(Timescale::Minute, 2.0)];
        dispatch(&store, &records).await;

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "home-minute");
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dispatch_with_no_records_never_opens() {
        let store = RecordingStore {
            fail_open: true,
            ..Default::default()
        };
        // Must not even attempt to open.
        dispatch(&store, &[]).await;
    }

    #[tokio::test]
    async fn test_dispatch_survives_open_failure() {
        let store = RecordingStore {
            fail_open: true,
            ..Default::default()
        };
        dispatch(&store, &[record(Timescale::Hour, 1.0)]).await;
        assert!(store.writes.lock().unwrap().is_empty());
    }
}
