//! Gene identifier harmonization: symbols to unique canonical numeric ids
//!
//! Each gene symbol of an [`EffectTable`] is looked up in a [`GeneMap`]; ids
//! are coerced to integers, genes that share an id are collapsed to their
//! elementwise mean, and an optional [`SharedIdSet`] restricts the result.
//! Dropped genes are counted in the [`HarmonizeReport`], never fatal.

use std::collections::{BTreeMap, HashMap, HashSet};

use ndarray::Array2;

use crate::data::{EffectTable, SignatureKind, SignatureMatrix};
use crate::error::{Result, SignatureError};

/// Symbol -> raw canonical id lookup (first occurrence of a symbol wins)
#[derive(Debug, Clone, Default)]
pub struct GeneMap {
    ids: HashMap<String, String>,
}

impl GeneMap {
    /// Build from (symbol, id) pairs. Pairs with an empty symbol or id are
    /// dropped; repeated symbols keep their first id.
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        let total = pairs.len();
        let mut ids = HashMap::with_capacity(total);
        let mut n_empty = 0;
        let mut n_duplicate = 0;
        for (symbol, id) in pairs {
            let symbol = symbol.trim().to_string();
            let id = id.trim().to_string();
            if symbol.is_empty() || id.is_empty() || id.eq_ignore_ascii_case("na") {
                n_empty += 1;
                continue;
            }
            if ids.contains_key(&symbol) {
                n_duplicate += 1;
                continue;
            }
            ids.insert(symbol, id);
        }
        if n_empty > 0 {
            log::warn!("Gene map: dropped {} rows with a missing symbol or id", n_empty);
        }
        if n_duplicate > 0 {
            log::warn!("Gene map: dropped {} duplicate symbols (first occurrence kept)", n_duplicate);
        }
        log::info!("Gene map: {} unique symbols from {} rows", ids.len(), total);
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Raw id for a symbol, as read from the mapping table
    pub fn lookup(&self, symbol: &str) -> Option<&str> {
        self.ids.get(symbol).map(|s| s.as_str())
    }
}

/// Reference set of canonical ids the output must stay within
#[derive(Debug, Clone)]
pub struct SharedIdSet {
    ids: HashSet<i64>,
}

impl SharedIdSet {
    pub fn new<I: IntoIterator<Item = i64>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Integer form of a raw id; accepts integral floats such as `"7157.0"`
pub fn coerce_id(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Some(id);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Counts of what happened to each input gene
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarmonizeReport {
    pub n_input: usize,
    pub n_unmapped: usize,
    pub n_coercion_failed: usize,
    /// Symbols merged into an id already claimed by another symbol
    pub n_collapsed: usize,
    /// Canonical ids removed by the shared-id constraint
    pub n_shared_dropped: usize,
    pub n_output: usize,
}

/// Map, collapse and filter an effect table into a canonical-id signature.
///
/// The output has one row per canonical id, ascending, and one column per
/// experiment in table order.
pub fn harmonize(
    table: &EffectTable,
    map: &GeneMap,
    shared: Option<&SharedIdSet>,
) -> Result<(SignatureMatrix, HarmonizeReport)> {
    let mut report = HarmonizeReport {
        n_input: table.n_genes(),
        ..HarmonizeReport::default()
    };

    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (j, symbol) in table.gene_symbols().iter().enumerate() {
        let Some(raw) = map.lookup(symbol) else {
            report.n_unmapped += 1;
            continue;
        };
        match coerce_id(raw) {
            Some(id) => groups.entry(id).or_default().push(j),
            None => report.n_coercion_failed += 1,
        }
    }
    let n_mapped: usize = groups.values().map(|g| g.len()).sum();
    report.n_collapsed = n_mapped - groups.len();

    if report.n_unmapped > 0 {
        log::warn!(
            "{} of {} gene symbols have no canonical id and were dropped",
            report.n_unmapped,
            report.n_input
        );
    }
    if report.n_coercion_failed > 0 {
        log::warn!(
            "{} gene ids could not be read as integers and were dropped",
            report.n_coercion_failed
        );
    }
    if report.n_collapsed > 0 {
        log::info!(
            "Collapsed {} symbols into {} canonical ids by mean",
            n_mapped,
            groups.len()
        );
    }

    if let Some(shared) = shared {
        let before = groups.len();
        groups.retain(|id, _| shared.contains(*id));
        report.n_shared_dropped = before - groups.len();
        log::info!(
            "Shared-id constraint: kept {} of {} canonical ids ({} in reference set)",
            groups.len(),
            before,
            shared.len()
        );
    }

    if groups.is_empty() {
        return Err(SignatureError::EmptyData {
            reason: "no genes left after identifier harmonization".to_string(),
        });
    }

    let values = table.values();
    let n_exp = table.n_experiments();
    let mut out = Array2::<f64>::from_elem((groups.len(), n_exp), f64::NAN);
    for (row, members) in groups.values().enumerate() {
        for e in 0..n_exp {
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for &j in members {
                let v = values[[e, j]];
                if !v.is_nan() {
                    sum += v as f64;
                    count += 1;
                }
            }
            if count > 0 {
                out[[row, e]] = sum / count as f64;
            }
        }
    }

    let gene_ids: Vec<i64> = groups.keys().copied().collect();
    report.n_output = gene_ids.len();
    log::info!(
        "Harmonized {} symbols into {} canonical genes x {} experiments",
        report.n_input,
        report.n_output,
        n_exp
    );

    let signature = SignatureMatrix::new(
        out,
        gene_ids,
        table.experiment_ids().to_vec(),
        SignatureKind::EffectSize,
    )?;
    Ok((signature, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn map(pairs: &[(&str, &str)]) -> GeneMap {
        GeneMap::new(
            pairs
                .iter()
                .map(|(s, i)| (s.to_string(), i.to_string()))
                .collect(),
        )
    }

    fn table(values: Array2<f32>, symbols: &[&str]) -> EffectTable {
        let ids = (0..values.nrows() as i64).collect();
        EffectTable::new(values, ids, symbols.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_mean_collapse() {
        // Genes A and B both map to id 7 with vectors [1,2,3] and [3,4,5]
        let t = table(array![[1.0f32, 3.0], [2.0, 4.0], [3.0, 5.0]], &["A", "B"]);
        let (sig, report) = harmonize(&t, &map(&[("A", "7"), ("B", "7")]), None).unwrap();
        assert_eq!(sig.gene_ids(), &[7]);
        assert_eq!(sig.values().row(0).to_vec(), vec![2.0, 3.0, 4.0]);
        assert_eq!(report.n_collapsed, 1);
    }

    #[test]
    fn test_unique_ascending_ids_independent_of_order() {
        let symbols = ["A", "B", "C", "D"];
        let values = array![[0.1f32, 0.2, 0.3, 0.4], [1.0, 2.0, 3.0, 4.0]];
        let m = map(&[("A", "30"), ("B", "10"), ("C", "30"), ("D", "20")]);
        let (sig, _) = harmonize(&table(values.clone(), &symbols), &m, None).unwrap();
        assert_eq!(sig.gene_ids(), &[10, 20, 30]);

        // Reverse the gene columns: identical output
        let rev: Vec<usize> = (0..4).rev().collect();
        let rev_values = values.select(ndarray::Axis(1), &rev);
        let rev_symbols: Vec<&str> = symbols.iter().rev().copied().collect();
        let (sig_rev, _) = harmonize(&table(rev_values, &rev_symbols), &m, None).unwrap();
        assert_eq!(sig.gene_ids(), sig_rev.gene_ids());
        for (a, b) in sig.values().iter().zip(sig_rev.values().iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_shared_ids_constrain_output() {
        let t = table(array![[1.0f32, 2.0, 3.0]], &["A", "B", "C"]);
        let m = map(&[("A", "10"), ("B", "20"), ("C", "30")]);
        let shared = SharedIdSet::new([10, 20]);
        let (sig, report) = harmonize(&t, &m, Some(&shared)).unwrap();
        assert_eq!(sig.gene_ids(), &[10, 20]);
        assert!(sig.gene_ids().iter().all(|&id| shared.contains(id)));
        assert_eq!(report.n_shared_dropped, 1);
    }

    #[test]
    fn test_drops_are_counted() {
        let t = table(array![[1.0f32, 2.0, 3.0, 4.0]], &["A", "B", "C", "D"]);
        let m = map(&[("A", "5"), ("B", "LOC-x"), ("D", "6.0")]);
        let (sig, report) = harmonize(&t, &m, None).unwrap();
        assert_eq!(sig.gene_ids(), &[5, 6]);
        assert_eq!(report.n_unmapped, 1);
        assert_eq!(report.n_coercion_failed, 1);
        assert_eq!(report.n_output, 2);
    }

    #[test]
    fn test_nan_members_skipped() {
        let t = table(array![[f32::NAN, 4.0], [f32::NAN, f32::NAN]], &["A", "B"]);
        let (sig, _) = harmonize(&t, &map(&[("A", "1"), ("B", "1")]), None).unwrap();
        assert_eq!(sig.values()[[0, 0]], 4.0);
        assert!(sig.values()[[0, 1]].is_nan());
    }

    #[test]
    fn test_gene_map_first_wins_and_empty_dropped() {
        let m = map(&[("A", "1"), ("A", "2"), ("", "3"), ("B", "NA")]);
        assert_eq!(m.lookup("A"), Some("1"));
        assert_eq!(m.len(), 1);
        assert_eq!(coerce_id(" 7157.0 "), Some(7157));
        assert_eq!(coerce_id("7157.5"), None);
    }

    #[test]
    fn test_nothing_mapped_is_error() {
        let t = table(array![[1.0f32]], &["A"]);
        assert!(harmonize(&t, &map(&[("Z", "1")]), None).is_err());
    }
}
