use std::time::Duration;

use libdepot::distance::{ProviderRows, Strategy};
use libdepot::geo::haversine_distance;
use libdepot::service::{AssignRequest, PartitionRequest, Stage};
use libdepot::{ClusteringService, Error, ErrorKind, GeoPoint, Partition, ServiceConfig};

fn stops() -> Vec<[f64; 2]> {
    vec![
        [38.8993106, -76.9937824],
        [38.8554358, -76.9951151],
        [38.889226, -76.9356789],
        [38.88555, -76.9482148],
        [38.882273, -76.933624],
        [38.8840008, -76.9350142],
        [38.8588442, -76.9957272],
        [38.8757448, -77.0133817],
        [38.8854471, -76.9486366],
        [38.827499, -76.99454],
        [38.860522, -76.9901938],
        [38.885339, -76.9482539],
        [38.896393, -76.92148],
        [38.8796714, -76.9303432],
        [38.8878192, -76.9511011],
        [38.8853328, -76.948533],
        [38.9000162, -76.9524685],
        [38.8785645, -77.0212272],
        [38.829087, -76.995643],
        [38.8310144, -77.0064032],
    ]
}

fn request(coords: &[[f64; 2]], drivers: i64, min: i64, max: i64) -> PartitionRequest {
    PartitionRequest {
        coords: coords.iter().copied().map(Some).collect(),
        drivers_count: drivers,
        min_deliveries: min,
        max_deliveries: max,
    }
}

fn default_service() -> ClusteringService<'static> {
    ClusteringService::new(ServiceConfig::default()).unwrap()
}

fn external_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.distance.strategy = Strategy::External;
    config.distance.chunk_size = 4;
    config
}

#[test]
fn two_pairs_and_a_straggler() {
    let coords = [
        [38.8993106, -76.9937824],
        [38.8995, -76.9940],
        [38.8554358, -76.9951151],
        [38.8558, -76.9955],
        [38.9533, -76.9937],
    ];
    let response = default_service()
        .partition(&request(&coords, 2, 1, 3))
        .unwrap();
    let clusters = response.clusters;
    assert_eq!(clusters.get("1"), Some(&[0, 1][..]));
    assert_eq!(clusters.get("2"), Some(&[2, 3][..]));
    assert_eq!(clusters.overflow(), &[4]);

    let report = response.report.unwrap();
    assert_eq!(report.drivers_used, 2);
    assert_eq!(report.outliers, 1);
    assert_eq!(report.distance_strategy, Some(Strategy::GreatCircle));
    assert!(!report.fallback);
}

#[test]
fn every_point_lands_exactly_once() {
    let coords = stops();
    let response = default_service()
        .partition(&request(&coords, 3, 4, 8))
        .unwrap();
    assert!(response.clusters.covers(coords.len()));
    assert!(response.clusters.num_regular_groups() <= 3);
    for (_, members) in response.clusters.regular_groups() {
        assert!((4..=8).contains(&members.len()), "{members:?}");
    }
}

#[test]
fn filtered_groups_keep_minimum() {
    let coords = stops();
    let service = default_service();
    for (drivers, min, max) in [(2, 8, 12), (5, 4, 4), (3, 5, 8)] {
        let response = service
            .partition(&request(&coords, drivers, min, max))
            .unwrap();
        let report = response.report.unwrap();
        assert!(response.clusters.covers(coords.len()));
        assert_eq!(response.clusters.num_regular_groups(), report.drivers_used);
        for (label, members) in response.clusters.regular_groups() {
            assert!(
                (min as usize..=report.effective_max).contains(&members.len()),
                "{drivers} {min} {max}: group {label} has {members:?}"
            );
        }
        assert_eq!(report.outliers, response.clusters.overflow().len());
    }
}

#[test]
fn sizes_within_bounds_without_filtering() {
    let mut config = ServiceConfig::default();
    config.outliers.enabled = false;
    let service = ClusteringService::new(config).unwrap();
    let coords = stops();
    let response = service.partition(&request(&coords, 3, 5, 8)).unwrap();
    let sizes: Vec<usize> = response
        .clusters
        .regular_groups()
        .map(|(_, m)| m.len())
        .collect();
    assert_eq!(sizes.len(), 3);
    assert!(sizes.iter().all(|s| (5..=8).contains(s)), "{sizes:?}");
    assert!(response.clusters.overflow().is_empty());
}

#[test]
fn identical_requests_identical_responses() {
    let service = default_service();
    let body = serde_json::json!({
        "coords": stops(),
        "driversCount": 4,
        "minDeliveries": 2,
        "maxDeliveries": 6,
    })
    .to_string();
    let first = service.partition_json(&body).unwrap();
    let second = service.partition_json(&body).unwrap();
    assert_eq!(first, second);
}

#[test]
fn concurrent_requests_do_not_interfere() {
    let service = default_service();
    let coords = stops();
    let expected = service.partition(&request(&coords, 4, 2, 6)).unwrap();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| service.partition(&request(&coords, 4, 2, 6)).unwrap()))
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), expected);
        }
    });
}

#[test]
fn more_drivers_than_points() {
    let coords = stops();
    let response = default_service()
        .partition(&request(&coords[..5], 10, 1, 3))
        .unwrap();
    for i in 0..5 {
        let label = (i + 1).to_string();
        assert_eq!(response.clusters.get(&label), Some(&[i][..]));
    }
    assert!(response.clusters.overflow().is_empty());
    assert_eq!(response.report.unwrap().drivers_used, 5);
}

#[test]
fn infeasible_minimum_is_reported() {
    let service = default_service();
    let mut pipeline = service.pipeline();
    let err = pipeline
        .partition(&request(&stops()[..10], 3, 4, 6))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InfeasibleCapacity {
            min_size: 4,
            drivers: 3,
            points: 10
        }
    ));
    assert_eq!(pipeline.stage(), Stage::Failed(ErrorKind::InfeasibleCapacity));
    assert!(pipeline.history().contains(&Stage::Partitioning));
}

#[test]
fn null_coordinate_is_rejected_before_projection() {
    let body = r#"{"coords": [[38.89, -76.99], null], "driversCount": 1, "minDeliveries": 1, "maxDeliveries": 2}"#;
    let err = default_service().partition_json(body).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn snake_case_fields_are_accepted() {
    let service = default_service();
    let camel = serde_json::json!({
        "coords": stops(),
        "driversCount": 2,
        "minDeliveries": 1,
        "maxDeliveries": 12,
    });
    let snake = serde_json::json!({
        "coords": stops(),
        "drivers_count": 2,
        "min_deliveries": 1,
        "max_deliveries": 12,
    });
    assert_eq!(
        service.partition_json(&camel.to_string()).unwrap(),
        service.partition_json(&snake.to_string()).unwrap()
    );
}

#[test]
fn external_distances_are_used() {
    let provider = |origins: &[GeoPoint], destinations: &[GeoPoint], _: Duration| -> libdepot::Result<ProviderRows> {
        Ok(origins
            .iter()
            .map(|a| {
                destinations
                    .iter()
                    .map(|b| Some(1.4 * haversine_distance(a, b)))
                    .collect()
            })
            .collect())
    };
    let coords = stops();
    let service = ClusteringService::new(external_config())
        .unwrap()
        .with_distance_provider(&provider);
    let response = service.partition(&request(&coords, 3, 4, 8)).unwrap();
    let report = response.report.unwrap();
    assert_eq!(report.distance_strategy, Some(Strategy::External));
    assert!(!report.fallback);

    // a uniformly scaled metric flags the same outliers
    let baseline = default_service()
        .partition(&request(&coords, 3, 4, 8))
        .unwrap();
    assert_eq!(response.clusters, baseline.clusters);
}

#[test]
fn unavailable_provider_falls_back_to_great_circle() {
    let timing_out = |_: &[GeoPoint], _: &[GeoPoint], t: Duration| -> libdepot::Result<ProviderRows> {
        Err(Error::ProviderTimeout(t))
    };
    let unroutable = |o: &[GeoPoint], d: &[GeoPoint], _: Duration| -> libdepot::Result<ProviderRows> {
        Ok(vec![vec![None; d.len()]; o.len()])
    };
    let coords = stops();
    let baseline = default_service()
        .partition(&request(&coords, 3, 4, 8))
        .unwrap();

    for provider in [
        &timing_out as &dyn libdepot::distance::DistanceProvider,
        &unroutable,
    ] {
        let service = ClusteringService::new(external_config())
            .unwrap()
            .with_distance_provider(provider);
        let response = service.partition(&request(&coords, 3, 4, 8)).unwrap();
        let report = response.report.unwrap();
        assert_eq!(report.distance_strategy, Some(Strategy::GreatCircle));
        assert!(report.fallback);
        assert_eq!(response.clusters, baseline.clusters);
    }
}

#[test]
fn new_delivery_leaves_others_in_place() {
    let service = default_service();
    let coords = stops();
    let partitioned = service.partition(&request(&coords, 3, 4, 8)).unwrap();

    let response = service
        .assign(&AssignRequest {
            new_coord: Some([38.9072, -77.0369]),
            clusters: partitioned.clusters.clone(),
            coords: coords.iter().copied().map(Some).collect(),
        })
        .unwrap();
    let report = response.report.unwrap();
    assert_eq!(report.index, coords.len());
    assert_ne!(report.label, libdepot::OVERFLOW_LABEL);
    for i in 0..coords.len() {
        assert_eq!(
            response.clusters.label_of(i),
            partitioned.clusters.label_of(i)
        );
    }
    assert!(response.clusters.covers(coords.len() + 1));
}

#[test]
fn assign_over_json() {
    let body = r#"{
        "new_coord": [38.9072, -77.0369],
        "clusters": {"1": [1, 0], "2": [2], "overflow": []},
        "coords": [[38.90, -77.03], [38.91, -77.04], [38.80, -76.90]]
    }"#;
    let response = default_service().assign_json(body).unwrap();
    let value: serde_json::Value = serde_json::from_str(&response).unwrap();
    let clusters: Partition = serde_json::from_value(value["clusters"].clone()).unwrap();
    assert_eq!(clusters.get("1"), Some(&[0, 1, 3][..]));
    assert_eq!(value["report"]["label"], "1");
}

#[test]
fn stale_partition_is_rejected() {
    let body = r#"{
        "newCoord": [38.9072, -77.0369],
        "clusters": {"1": [0, 7]},
        "coords": [[38.90, -77.03]]
    }"#;
    let err = default_service().assign_json(body).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
