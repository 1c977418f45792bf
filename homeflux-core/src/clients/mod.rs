pub mod influx;
pub mod nut;
pub mod opower;

pub use influx::InfluxStore;
pub use nut::NutTransport;
pub use opower::OpowerClient;
