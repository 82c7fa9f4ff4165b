use libdepot::geo::{project_points, GeoPoint};
use libdepot::kmeans::ConstrainedKMeans;
use libdepot::{ClusteringService, ServiceConfig};
use numpy::*;
use pyo3::{exceptions::PyValueError, prelude::*};

fn load_config(config: Option<&str>) -> PyResult<ServiceConfig> {
    match config {
        Some(json) => Ok(ServiceConfig::from_json(json)?),
        None => Ok(ServiceConfig::default()),
    }
}

/// Partitions a JSON request (`coords`, `driversCount`, `minDeliveries`,
/// `maxDeliveries`) and returns the JSON response.
#[pyfunction]
#[pyo3(signature = (request, config=None))]
fn cluster_deliveries(py: Python<'_>, request: &str, config: Option<&str>) -> PyResult<String> {
    let service = ClusteringService::new(load_config(config)?)?;
    Ok(py.allow_threads(|| service.partition_json(request))?)
}

/// Adds one delivery (`newCoord`) to an existing partition (`clusters`,
/// `coords`) and returns the JSON response.
#[pyfunction]
#[pyo3(signature = (request, config=None))]
fn add_delivery(py: Python<'_>, request: &str, config: Option<&str>) -> PyResult<String> {
    let service = ClusteringService::new(load_config(config)?)?;
    Ok(py.allow_threads(|| service.assign_json(request))?)
}

/// Size-constrained partition of an `(n, 2)` array of degrees, without
/// outlier filtering. Returns the group index of every row.
#[pyfunction]
#[pyo3(signature = (coords, drivers_count, min_deliveries, max_deliveries, seed=42))]
fn cluster_coords<'py>(
    py: Python<'py>,
    coords: PyReadonlyArray2<'py, f64>,
    drivers_count: usize,
    min_deliveries: usize,
    max_deliveries: usize,
    seed: u64,
) -> PyResult<Bound<'py, PyArray1<usize>>> {
    let coords = coords.as_array();
    if coords.ncols() != 2 {
        return Err(PyValueError::new_err(format!(
            "expected (n, 2) latitude/longitude pairs, got {} columns",
            coords.ncols()
        )));
    }
    let points: Vec<GeoPoint> = coords
        .rows()
        .into_iter()
        .map(|row| GeoPoint::new(row[0], row[1]))
        .collect();
    log::debug!("partitioning {} points among {drivers_count} drivers", points.len());

    let assignment = py.allow_threads(|| -> libdepot::Result<Vec<usize>> {
        let projected = project_points(&points)?;
        let fitted = ConstrainedKMeans::new(drivers_count, min_deliveries, max_deliveries)
            .with_seed(seed)
            .fit(&projected)?;
        Ok(fitted.assignment().to_vec())
    })?;
    Ok(assignment.into_pyarray_bound(py))
}

#[pymodule]
#[pyo3(name = "libdepot")]
fn py_libdepot(m: &Bound<'_, PyModule>) -> PyResult<()> {
    pyo3_log::init();
    m.add_function(wrap_pyfunction!(cluster_deliveries, m)?)?;
    m.add_function(wrap_pyfunction!(add_delivery, m)?)?;
    m.add_function(wrap_pyfunction!(cluster_coords, m)?)?;
    Ok(())
}
