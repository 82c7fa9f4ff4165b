pub mod config;
pub mod distance;
pub mod error;
pub mod flow;
pub mod geo;
pub mod geocode;
pub mod incremental;
pub mod kmeans;
pub mod metricdata;
pub mod outlier;
pub mod partition;
pub mod service;

pub use config::ServiceConfig;
pub use error::{Error, ErrorKind, Result};
pub use geo::GeoPoint;
pub use partition::{Partition, OVERFLOW_LABEL};
pub use service::ClusteringService;
