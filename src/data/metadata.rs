//! Perturbation metadata: which experiment received which treatment

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignatureError};

/// Maps experiment ids to perturbation (drug) names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerturbationMetadata {
    experiment_ids: Vec<i64>,
    perturbations: Vec<String>,
}

impl PerturbationMetadata {
    pub fn new(experiment_ids: Vec<i64>, perturbations: Vec<String>) -> Result<Self> {
        if experiment_ids.len() != perturbations.len() {
            return Err(SignatureError::DimensionMismatch {
                expected: format!("{} perturbation names", experiment_ids.len()),
                got: format!("{} perturbation names", perturbations.len()),
            });
        }
        {
            let mut seen = HashSet::new();
            for id in &experiment_ids {
                if !seen.insert(id) {
                    log::warn!("Duplicate experiment ID in metadata: {}. Only the first entry is used.", id);
                }
            }
        }
        Ok(Self {
            experiment_ids,
            perturbations,
        })
    }

    pub fn len(&self) -> usize {
        self.experiment_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiment_ids.is_empty()
    }

    pub fn experiment_ids(&self) -> &[i64] {
        &self.experiment_ids
    }

    /// Perturbation name for an experiment (first entry wins)
    pub fn perturbation_of(&self, experiment_id: i64) -> Option<&str> {
        self.experiment_ids
            .iter()
            .position(|&id| id == experiment_id)
            .map(|i| self.perturbations[i].as_str())
    }

    /// Replicate groups: perturbation name -> member experiment ids.
    ///
    /// Groups are sorted by name; members keep metadata order. Only the first
    /// metadata entry of a duplicated experiment id is used.
    pub fn replicate_groups(&self) -> BTreeMap<String, Vec<i64>> {
        let mut assigned: HashSet<i64> = HashSet::with_capacity(self.len());
        let mut groups: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for (id, name) in self.experiment_ids.iter().zip(&self.perturbations) {
            if !assigned.insert(*id) {
                continue;
            }
            groups.entry(name.clone()).or_default().push(*id);
        }
        groups
    }

    /// Subset to experiments accepted by `keep`, preserving order
    pub fn filter<F: Fn(i64) -> bool>(&self, keep: F) -> Self {
        let (ids, names): (Vec<i64>, Vec<String>) = self
            .experiment_ids
            .iter()
            .zip(&self.perturbations)
            .filter(|(id, _)| keep(**id))
            .map(|(id, name)| (*id, name.clone()))
            .unzip();
        Self {
            experiment_ids: ids,
            perturbations: names,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(i64, &str)]) -> PerturbationMetadata {
        PerturbationMetadata::new(
            pairs.iter().map(|(id, _)| *id).collect(),
            pairs.iter().map(|(_, n)| n.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_replicate_groups_sorted() {
        let m = meta(&[(3, "vorinostat"), (1, "aspirin"), (7, "vorinostat"), (2, "aspirin"), (9, "imatinib")]);
        let groups = m.replicate_groups();
        let names: Vec<&String> = groups.keys().collect();
        assert_eq!(names, vec!["aspirin", "imatinib", "vorinostat"]);
        assert_eq!(groups["aspirin"], vec![1, 2]);
        assert_eq!(groups["vorinostat"], vec![3, 7]);
        assert_eq!(groups["imatinib"], vec![9]);
    }

    #[test]
    fn test_duplicate_id_first_wins() {
        let m = meta(&[(1, "a"), (1, "b"), (2, "b")]);
        let groups = m.replicate_groups();
        assert_eq!(groups["a"], vec![1]);
        assert_eq!(groups["b"], vec![2]);
        assert_eq!(m.perturbation_of(1), Some("a"));
    }

    #[test]
    fn test_filter() {
        let m = meta(&[(1, "a"), (2, "b"), (3, "c")]);
        let sub = m.filter(|id| id != 2);
        assert_eq!(sub.experiment_ids(), &[1, 3]);
    }
}
