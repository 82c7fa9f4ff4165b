use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Label of the reserved group holding outliers and unassigned points.
pub const OVERFLOW_LABEL: &str = "overflow";

/// Mapping from group label to the indices of its points.
///
/// Regular groups are labelled `"1"`, `"2"`, ... Member lists are kept
/// sorted so that serialized partitions compare byte for byte; lists read
/// from callers are sorted on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Partition {
    groups: BTreeMap<String, Vec<usize>>,
}

impl<'de> Deserialize<'de> for Partition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut partition = Self {
            groups: BTreeMap::deserialize(deserializer)?,
        };
        partition.normalize();
        Ok(partition)
    }
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a partition from a group index per point. Groups are labelled
    /// `"1"`, `"2"`, ... in order of their lowest point index, so the labels
    /// do not depend on how the groups happened to be numbered. The overflow
    /// group is present and empty.
    pub fn from_assignment(assignment: &[usize]) -> Self {
        let mut labels: BTreeMap<usize, String> = BTreeMap::new();
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (point, &group) in assignment.iter().enumerate() {
            let next = labels.len() + 1;
            let label = labels.entry(group).or_insert_with(|| next.to_string());
            groups.entry(label.clone()).or_default().push(point);
        }
        groups.insert(OVERFLOW_LABEL.to_string(), Vec::new());
        Self { groups }
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.groups.iter().map(|(l, m)| (l.as_str(), m.as_slice()))
    }

    pub fn regular_groups(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.groups().filter(|(l, _)| *l != OVERFLOW_LABEL)
    }

    pub fn get(&self, label: &str) -> Option<&[usize]> {
        self.groups.get(label).map(Vec::as_slice)
    }

    pub fn overflow(&self) -> &[usize] {
        self.get(OVERFLOW_LABEL).unwrap_or(&[])
    }

    /// Number of non-empty regular groups.
    pub fn num_regular_groups(&self) -> usize {
        self.regular_groups().filter(|(_, m)| !m.is_empty()).count()
    }

    /// Total number of point memberships across all groups.
    pub fn num_points(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn label_of(&self, point: usize) -> Option<&str> {
        self.groups()
            .find(|(_, m)| m.binary_search(&point).is_ok())
            .map(|(l, _)| l)
    }

    pub fn sizes(&self) -> BTreeMap<String, usize> {
        self.groups
            .iter()
            .map(|(l, m)| (l.clone(), m.len()))
            .collect()
    }

    pub fn insert(&mut self, label: &str, point: usize) {
        let members = self.groups.entry(label.to_string()).or_default();
        if let Err(pos) = members.binary_search(&point) {
            members.insert(pos, point);
        }
    }

    pub fn remove(&mut self, label: &str, point: usize) -> bool {
        match self.groups.get_mut(label) {
            Some(members) => match members.binary_search(&point) {
                Ok(pos) => {
                    members.remove(pos);
                    true
                }
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Moves `point` out of `label` into the overflow group.
    pub fn move_to_overflow(&mut self, label: &str, point: usize) {
        if self.remove(label, point) {
            self.insert(OVERFLOW_LABEL, point);
        }
    }

    /// The smallest numeric label greater than every existing regular label.
    pub fn next_label(&self) -> String {
        let max = self
            .regular_groups()
            .filter_map(|(l, _)| l.parse::<usize>().ok())
            .max()
            .unwrap_or(0);
        (max + 1).to_string()
    }

    /// Checks that every index is below `n` and appears in at most one group.
    pub fn check_indices(&self, n: usize) -> Result<()> {
        let mut seen = vec![false; n];
        for (label, members) in self.groups() {
            for &point in members {
                if point >= n {
                    return Err(Error::validation(format!(
                        "group {label} references point {point}, but only {n} points were given"
                    )));
                }
                if seen[point] {
                    return Err(Error::validation(format!(
                        "point {point} belongs to more than one group"
                    )));
                }
                seen[point] = true;
            }
        }
        Ok(())
    }

    /// True when every index in `0..n` appears exactly once.
    pub fn covers(&self, n: usize) -> bool {
        self.num_points() == n && self.check_indices(n).is_ok()
    }

    fn normalize(&mut self) {
        for members in self.groups.values_mut() {
            members.sort_unstable();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_deserialized_members_are_sorted() {
        let p: Partition = serde_json::from_str(r#"{"1": [3, 0], "2": [2, 1], "overflow": [5, 4]}"#).unwrap();
        assert_eq!(p.get("1"), Some(&[0, 3][..]));
        assert_eq!(p.overflow(), &[4, 5]);
        assert_eq!(p.label_of(3), Some("1"));
        assert_eq!(p.label_of(1), Some("2"));
        assert_eq!(serde_json::to_string(&p).unwrap(), r#"{"1":[0,3],"2":[1,2],"overflow":[4,5]}"#);
    }

    #[test]
    fn test_from_assignment_labels() {
        let p = Partition::from_assignment(&[1, 0, 1, 2]);
        assert_eq!(p.get("1"), Some(&[0, 2][..]));
        assert_eq!(p.get("2"), Some(&[1][..]));
        assert_eq!(p.get("3"), Some(&[3][..]));
        assert!(p.overflow().is_empty());
        assert_eq!(p.num_regular_groups(), 3);
        assert!(p.covers(4));
        assert_eq!(p.label_of(2), Some("1"));
        assert_eq!(p, Partition::from_assignment(&[7, 3, 7, 0]));
    }

    #[test]
    fn test_move_to_overflow() {
        let mut p = Partition::from_assignment(&[0, 0, 1]);
        p.move_to_overflow("1", 1);
        assert_eq!(p.get("1"), Some(&[0][..]));
        assert_eq!(p.overflow(), &[1]);
        assert!(p.covers(3));

        // moving a point that is not in the group is a no-op
        p.move_to_overflow("2", 0);
        assert_eq!(p.overflow(), &[1]);
    }

    #[test]
    fn test_next_label() {
        assert_eq!(Partition::new().next_label(), "1");
        let p: Partition = serde_json::from_str(r#"{"2": [0], "10": [1], "overflow": [2]}"#).unwrap();
        assert_eq!(p.next_label(), "11");
    }

    #[test]
    fn test_check_indices() {
        let p: Partition = serde_json::from_str(r#"{"1": [0, 1], "2": [1]}"#).unwrap();
        assert!(p.check_indices(2).is_err());
        let p: Partition = serde_json::from_str(r#"{"1": [0, 5]}"#).unwrap();
        assert!(p.check_indices(3).is_err());
        assert!(!p.covers(3));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let p = Partition::from_assignment(&[0, 1, 0]);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"1":[0,2],"2":[1],"overflow":[]}"#);
    }
}
