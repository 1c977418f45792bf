pub mod agents;
pub mod backfill;
pub mod clients;
pub mod config;
pub mod error;
pub mod jobs;
pub mod records;
pub mod scheduler;
pub mod sink;

pub use agents::{
    with_connection, Aggregate, MeterAgent, ReadKind, SourceAgent, UpsAgent, UpsTransport,
    UtilityApi,
};
pub use clients::{InfluxStore, NutTransport, OpowerClient};
pub use config::{
    ConfigError, HomefluxConfig, LoggingConfig, MeterConfig, StoreConfig, UpsConfig, UpsHost,
};
pub use error::{HomefluxError, HomefluxResult};
pub use records::{
    ClimateReading, DataPoint, NormalizedRecord, PowerReading, Timescale, DATA_SOURCE, NAMESPACE,
};
pub use scheduler::{Job, Scheduler};
pub use sink::{Store, StoreConnection};
