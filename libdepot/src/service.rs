//! Request-level orchestration: validation, projection, partitioning and
//! outlier filtering for a full request, or a single insertion into an
//! existing partition.
//!
//! Every request runs through its own [`Pipeline`], which moves through the
//! [`Stage`]s in order and ends in either [`Stage::Complete`] or
//! [`Stage::Failed`]. The service itself holds no per-request state and can
//! be shared between threads.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::distance::{DistanceMatrix, DistanceMatrixBuilder, DistanceProvider, Strategy};
use crate::error::{Error, ErrorKind, Result};
use crate::geo::{self, GeoPoint};
use crate::incremental::assign_one;
use crate::kmeans::ConstrainedKMeans;
use crate::outlier::OutlierFilter;
use crate::partition::Partition;

/// A full partitioning request. A `null` coordinate is an address that
/// could not be geocoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionRequest {
    pub coords: Vec<Option<[f64; 2]>>,
    #[serde(alias = "drivers_count")]
    pub drivers_count: i64,
    #[serde(alias = "min_deliveries")]
    pub min_deliveries: i64,
    #[serde(alias = "max_deliveries")]
    pub max_deliveries: i64,
}

/// Adds `new_coord` to `clusters`, whose indices refer to `coords`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    #[serde(alias = "new_coord")]
    pub new_coord: Option<[f64; 2]>,
    pub clusters: Partition,
    pub coords: Vec<Option<[f64; 2]>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionResponse {
    pub clusters: Partition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<PartitionReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionReport {
    pub drivers_used: usize,
    pub effective_max: usize,
    pub sizes: BTreeMap<String, usize>,
    pub inertia: f64,
    pub iterations: usize,
    pub outliers: usize,
    /// Distances the outlier filter ran on, `None` when filtering is off.
    pub distance_strategy: Option<Strategy>,
    /// True when external distances were configured but great-circle
    /// distances had to be used instead.
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignResponse {
    pub clusters: Partition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<AssignReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignReport {
    pub label: String,
    pub index: usize,
    pub mean_distance_km: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Validating,
    Projecting,
    Partitioning,
    Filtering,
    Assigning,
    Complete,
    Failed(ErrorKind),
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed(_))
    }
}

pub struct ClusteringService<'p> {
    config: ServiceConfig,
    distance_provider: Option<&'p dyn DistanceProvider>,
}

impl<'p> ClusteringService<'p> {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            distance_provider: None,
        })
    }

    /// Travel distances for the outlier filter when the configured strategy
    /// is [`Strategy::External`].
    pub fn with_distance_provider(self, provider: &'p dyn DistanceProvider) -> Self {
        Self {
            distance_provider: Some(provider),
            ..self
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn pipeline(&self) -> Pipeline<'_, 'p> {
        Pipeline::new(self)
    }

    pub fn partition(&self, request: &PartitionRequest) -> Result<PartitionResponse> {
        self.pipeline().partition(request)
    }

    pub fn assign(&self, request: &AssignRequest) -> Result<AssignResponse> {
        self.pipeline().assign(request)
    }

    /// JSON in, JSON out. A body that does not parse as a request is a
    /// validation error.
    pub fn partition_json(&self, body: &str) -> Result<String> {
        let request: PartitionRequest = parse_request(body)?;
        Ok(serde_json::to_string(&self.partition(&request)?)?)
    }

    pub fn assign_json(&self, body: &str) -> Result<String> {
        let request: AssignRequest = parse_request(body)?;
        Ok(serde_json::to_string(&self.assign(&request)?)?)
    }

    fn distance_matrix(&self, points: &[GeoPoint]) -> Result<(DistanceMatrix, Strategy, bool)> {
        let settings = &self.config.distance;
        let provider = match (settings.strategy, self.distance_provider) {
            (Strategy::GreatCircle, _) => {
                return Ok((DistanceMatrix::great_circle(points)?, Strategy::GreatCircle, false));
            }
            (Strategy::External, Some(provider)) => provider,
            (Strategy::External, None) => {
                log::warn!("external distances configured but no provider given, using great-circle");
                return Ok((DistanceMatrix::great_circle(points)?, Strategy::GreatCircle, true));
            }
        };

        let built = DistanceMatrixBuilder::external(provider)
            .with_chunk_size(settings.chunk_size)
            .with_timeout(settings.timeout())
            .with_threads(settings.threads)
            .with_max_unresolved_fraction(settings.max_unresolved_fraction)
            .build(points);
        match built {
            Ok(matrix) => Ok((matrix, Strategy::External, false)),
            Err(e @ (Error::DistanceMatrixUnavailable(_) | Error::ProviderTimeout(_))) => {
                log::warn!("{e}, falling back to great-circle distances");
                Ok((DistanceMatrix::great_circle(points)?, Strategy::GreatCircle, true))
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_request<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| Error::validation(format!("malformed request: {e}")))
}

/// Replaces missing coordinates with an error naming the first one.
fn resolve_coords(coords: &[Option<[f64; 2]>]) -> Result<Vec<GeoPoint>> {
    coords
        .iter()
        .enumerate()
        .map(|(i, c)| {
            c.map(GeoPoint::from).ok_or_else(|| {
                Error::validation(format!("coordinate {i} is missing (address not geocoded)"))
            })
        })
        .collect()
}

fn positive(name: &str, value: i64) -> Result<usize> {
    usize::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| Error::validation(format!("{name} must be positive, got {value}")))
}

fn non_negative(name: &str, value: i64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::validation(format!("{name} must not be negative, got {value}")))
}

struct PartitionPlan {
    points: Vec<GeoPoint>,
    drivers: usize,
    min_size: usize,
    max_size: usize,
}

/// The state of one request.
pub struct Pipeline<'s, 'p> {
    service: &'s ClusteringService<'p>,
    stage: Stage,
    history: Vec<Stage>,
}

impl<'s, 'p> Pipeline<'s, 'p> {
    fn new(service: &'s ClusteringService<'p>) -> Self {
        Self {
            service,
            stage: Stage::Idle,
            history: vec![Stage::Idle],
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage entered so far, starting from [`Stage::Idle`].
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    fn enter(&mut self, stage: Stage) {
        log::info!("{:?} -> {:?}", self.stage, stage);
        self.stage = stage;
        self.history.push(stage);
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.stage != Stage::Idle {
            return Err(Error::validation(format!(
                "a pipeline runs a single request, this one is already {:?}",
                self.stage
            )));
        }
        Ok(())
    }

    fn finish<T>(&mut self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.enter(Stage::Complete);
                Ok(value)
            }
            Err(e) => {
                log::error!("request failed while {:?}: {e}", self.stage);
                self.enter(Stage::Failed(e.kind()));
                Err(e)
            }
        }
    }

    pub fn partition(&mut self, request: &PartitionRequest) -> Result<PartitionResponse> {
        self.ensure_idle()?;
        let outcome = self.run_partition(request);
        self.finish(outcome)
    }

    pub fn assign(&mut self, request: &AssignRequest) -> Result<AssignResponse> {
        self.ensure_idle()?;
        let outcome = self.run_assign(request);
        self.finish(outcome)
    }

    fn validate_partition(&self, request: &PartitionRequest) -> Result<PartitionPlan> {
        let config = &self.service.config;
        if request.coords.is_empty() {
            return Err(Error::validation("coords must not be empty"));
        }
        if request.coords.len() > config.max_points {
            return Err(Error::validation(format!(
                "{} coordinates exceed the limit of {}",
                request.coords.len(),
                config.max_points
            )));
        }
        let points = resolve_coords(&request.coords)?;
        let drivers = positive("driversCount", request.drivers_count)?;
        if drivers > config.max_drivers {
            return Err(Error::validation(format!(
                "driversCount {drivers} exceeds the limit of {}",
                config.max_drivers
            )));
        }
        let min_size = non_negative("minDeliveries", request.min_deliveries)?;
        let max_size = positive("maxDeliveries", request.max_deliveries)?;
        if min_size > max_size {
            return Err(Error::validation(format!(
                "minDeliveries {min_size} exceeds maxDeliveries {max_size}"
            )));
        }
        Ok(PartitionPlan {
            points,
            drivers,
            min_size,
            max_size,
        })
    }

    fn run_partition(&mut self, request: &PartitionRequest) -> Result<PartitionResponse> {
        let service = self.service;
        let config = &service.config;

        self.enter(Stage::Validating);
        let plan = self.validate_partition(request)?;

        self.enter(Stage::Projecting);
        let projected = geo::project_points(&plan.points)?;

        self.enter(Stage::Partitioning);
        let fitted = ConstrainedKMeans::new(plan.drivers, plan.min_size, plan.max_size)
            .with_seed(config.seed)
            .with_max_iterations(config.max_iterations)
            .with_n_init(config.n_init)
            .with_tolerance(config.tolerance)
            .fit(&projected)?;
        let partition = fitted.to_partition();

        self.enter(Stage::Filtering);
        let (clusters, distance_strategy, fallback) = if config.outliers.enabled {
            let (matrix, strategy, fallback) = service.distance_matrix(&plan.points)?;
            let filter =
                OutlierFilter::new(config.outliers.threshold).with_min_size(plan.min_size);
            (filter.filter(&partition, &matrix), Some(strategy), fallback)
        } else {
            (partition, None, false)
        };

        let outliers = clusters.overflow().len();
        log::info!(
            "{} points in {} groups, {outliers} in overflow",
            plan.points.len(),
            clusters.num_regular_groups()
        );
        let report = PartitionReport {
            drivers_used: fitted.num_groups(),
            effective_max: fitted.effective_max(),
            sizes: clusters.sizes(),
            inertia: fitted.inertia(),
            iterations: fitted.iterations(),
            outliers,
            distance_strategy,
            fallback,
        };
        Ok(PartitionResponse {
            clusters,
            report: Some(report),
        })
    }

    fn run_assign(&mut self, request: &AssignRequest) -> Result<AssignResponse> {
        let service = self.service;
        let config = &service.config;
        self.enter(Stage::Validating);
        let new_point = request
            .new_coord
            .map(GeoPoint::from)
            .ok_or_else(|| Error::validation("newCoord is missing (address not geocoded)"))?;
        if request.coords.len() >= config.max_points {
            return Err(Error::validation(format!(
                "adding a point to {} coordinates exceeds the limit of {}",
                request.coords.len(),
                config.max_points
            )));
        }
        let coords = resolve_coords(&request.coords)?;
        request.clusters.check_indices(coords.len())?;

        self.enter(Stage::Assigning);
        let inserted = assign_one(new_point, &request.clusters, &coords)?;
        Ok(AssignResponse {
            clusters: inserted.partition,
            report: Some(AssignReport {
                label: inserted.label,
                index: inserted.index,
                mean_distance_km: inserted.mean_distance,
            }),
        })
    }
}
