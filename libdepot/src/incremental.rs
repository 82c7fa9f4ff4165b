//! Adding a single point to an existing partition without re-partitioning.

use crate::error::{Error, Result};
use crate::geo::{self, haversine_distance, GeoPoint};
use crate::partition::Partition;

#[derive(Debug, Clone, PartialEq)]
pub struct Insertion {
    pub partition: Partition,
    /// Label of the group that received the point.
    pub label: String,
    /// Index of the new point, `coords.len()`.
    pub index: usize,
    /// Mean great-circle distance (km) to the receiving group's members,
    /// `None` when a new group was opened.
    pub mean_distance: Option<f64>,
}

/// Assigns `new_point` to the regular group whose members are closest on
/// average, by great-circle distance. `coords` are the points the
/// partition's indices refer to; the new point takes index `coords.len()`.
///
/// If no regular group has a member, the point opens a new group.
pub fn assign_one(
    new_point: GeoPoint,
    partition: &Partition,
    coords: &[GeoPoint],
) -> Result<Insertion> {
    geo::validate(coords)?;
    if !new_point.is_valid() {
        return Err(Error::InvalidCoordinate {
            index: coords.len(),
            latitude: new_point.latitude,
            longitude: new_point.longitude,
        });
    }
    partition.check_indices(coords.len())?;

    let index = coords.len();
    let mut best: Option<(&str, f64)> = None;
    for (label, members) in partition.regular_groups() {
        if members.is_empty() {
            continue;
        }
        let mean = members
            .iter()
            .map(|&m| haversine_distance(&new_point, &coords[m]))
            .sum::<f64>()
            / members.len() as f64;
        if best.map_or(true, |(_, d)| mean < d) {
            best = Some((label, mean));
        }
    }

    let (label, mean_distance) = match best {
        Some((label, mean)) => (label.to_string(), Some(mean)),
        None => {
            let label = partition.next_label();
            log::info!("no populated group to join, opening group {label}");
            (label, None)
        }
    };

    let mut updated = partition.clone();
    updated.insert(&label, index);
    log::debug!("point {index} assigned to group {label} ({mean_distance:?} km)");

    Ok(Insertion {
        partition: updated,
        label,
        index,
        mean_distance,
    })
}
