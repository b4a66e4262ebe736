//! Leave-one-out replicate statistics

use std::collections::BTreeMap;

use rayon::prelude::*;

use super::ValidationRecord;
use crate::data::SignatureMatrix;
use crate::stats::pearson_test;

/// Sum of all other members for each member: `total - v_i`
pub fn peer_sums(members: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(first) = members.first() else {
        return Vec::new();
    };
    let mut total = vec![0.0; first.len()];
    for member in members {
        for (t, v) in total.iter_mut().zip(member) {
            *t += v;
        }
    }
    members
        .iter()
        .map(|member| total.iter().zip(member).map(|(t, v)| t - v).collect())
        .collect()
}

/// `(r, p)` of each member against the mean of the others.
///
/// Groups with fewer than two members have no peers and yield nothing.
pub fn group_stats(members: &[Vec<f64>]) -> Vec<(f64, f64)> {
    let k = members.len();
    if k < 2 {
        return Vec::new();
    }
    let denom = (k - 1) as f64;
    peer_sums(members)
        .into_iter()
        .zip(members)
        .map(|(peer_sum, member)| {
            let consensus: Vec<f64> = peer_sum.into_iter().map(|s| s / denom).collect();
            pearson_test(member, &consensus)
        })
        .collect()
}

/// Records for every member of every group, groups processed in parallel.
///
/// Validity is left `false`; filters are applied afterwards.
pub fn replicate_stats(signature: &SignatureMatrix, groups: &BTreeMap<String, Vec<i64>>) -> Vec<ValidationRecord> {
    let index = signature.experiment_index();
    let groups: Vec<(&String, &Vec<i64>)> = groups.iter().collect();

    let per_group: Vec<Vec<ValidationRecord>> = groups
        .par_iter()
        .map(|(name, ids)| {
            let present: Vec<(i64, usize)> = ids
                .iter()
                .filter_map(|id| index.get(id).map(|&col| (*id, col)))
                .collect();

            if present.len() <= 1 {
                return present
                    .iter()
                    .map(|&(id, _)| ValidationRecord {
                        experiment_id: id,
                        perturbation: (*name).clone(),
                        r: None,
                        p: None,
                        num_peers: 0,
                        valid: false,
                    })
                    .collect();
            }

            let members: Vec<Vec<f64>> = present
                .iter()
                .map(|&(_, col)| signature.experiment(col).to_vec())
                .collect();
            let num_peers = members.len() - 1;
            present
                .iter()
                .zip(group_stats(&members))
                .map(|(&(id, _), (r, p))| ValidationRecord {
                    experiment_id: id,
                    perturbation: (*name).clone(),
                    r: Some(r),
                    p: Some(p),
                    num_peers,
                    valid: false,
                })
                .collect()
        })
        .collect();

    let records: Vec<ValidationRecord> = per_group.into_iter().flatten().collect();
    log::debug!("Computed statistics for {} experiments", records.len());
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SignatureKind;
    use ndarray::array;

    #[test]
    fn test_peer_sum_identity() {
        let members = vec![
            vec![1.0, 2.0, 3.0, 4.0],
            vec![0.5, -1.0, 2.5, 8.0],
            vec![3.0, 3.0, -3.0, 0.0],
            vec![0.1, 0.2, 0.3, 0.4],
        ];
        let sums = peer_sums(&members);
        for (i, sum) in sums.iter().enumerate() {
            for g in 0..4 {
                let direct: f64 = members
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, m)| m[g])
                    .sum();
                assert!((sum[g] - direct).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_pair_group_correlates_against_other_member() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let b = vec![2.0, 1.0, 4.0, 3.0, 5.0];
        let stats = group_stats(&[a, b]);
        assert_eq!(stats.len(), 2);
        assert!((stats[0].0 - 0.8).abs() < 1e-12);
        assert!((stats[1].0 - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_constant_member_gives_sentinel() {
        let stats = group_stats(&[vec![1.0, 1.0, 1.0], vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]]);
        assert_eq!(stats[0], (0.0, 1.0));
    }

    #[test]
    fn test_replicate_stats_records() {
        let sig = SignatureMatrix::new(
            array![[1.0, 2.0, 9.0], [2.0, 1.0, 8.0], [3.0, 4.0, 7.0], [4.0, 3.0, 1.0]],
            vec![1, 2, 3, 4],
            vec![10, 11, 12],
            SignatureKind::Rank,
        )
        .unwrap();
        let mut groups = BTreeMap::new();
        groups.insert("pair".to_string(), vec![10, 11]);
        groups.insert("single".to_string(), vec![12]);

        let records = replicate_stats(&sig, &groups);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].num_peers, 1);
        assert!(records[0].r.unwrap() > 0.0);
        assert_eq!(records[2].experiment_id, 12);
        assert_eq!(records[2].r, None);
        assert!(records.iter().all(|r| !r.valid));
    }
}
