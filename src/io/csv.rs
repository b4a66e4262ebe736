//! CSV/TSV reading and writing for pipeline inputs and validation outputs

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use ndarray::Array2;

use crate::data::{EffectTable, ExperimentList, GeneCatalog, PerturbationMetadata};
use crate::error::{Result, SignatureError};
use crate::harmonize::{coerce_id, GeneMap, SharedIdSet};
use crate::validate::{ValidationRecord, ValidationSummary};

const GENE_SYMBOL_COLUMNS: &[&str] = &["Gene_name", "gene_name", "gene_symbol", "symbol"];
const ENTREZ_COLUMNS: &[&str] = &["entrezID", "entrez_id", "EntrezID"];

/// Tab if the header line contains one, comma otherwise
fn detect_delimiter(path: &Path) -> Result<u8> {
    let mut first = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first)?;
    Ok(if first.contains('\t') { b'\t' } else { b',' })
}

fn open_table(path: &Path, what: &str) -> Result<(csv::Reader<File>, Vec<String>)> {
    if !path.exists() {
        return Err(SignatureError::FileNotFound {
            what: what.to_string(),
            path: path.display().to_string(),
        });
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(path)?)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    Ok((reader, headers))
}

fn find_column(headers: &[String], candidates: &[&str], path: &Path) -> Result<usize> {
    candidates
        .iter()
        .find_map(|c| headers.iter().position(|h| h == c))
        .ok_or_else(|| SignatureError::MissingColumn {
            column: candidates.join("|"),
            source_name: path.display().to_string(),
        })
}

/// Parse an effect value; empty and NA cells are missing
fn parse_value(raw: &str) -> Option<f32> {
    match raw {
        "" | "NA" | "NaN" | "nan" | "null" => Some(f32::NAN),
        _ => raw.parse::<f32>().ok(),
    }
}

/// Read a gene catalog with `gene_idx` and `gene_name` columns
pub fn read_gene_catalog<P: AsRef<Path>>(path: P) -> Result<GeneCatalog> {
    let path = path.as_ref();
    let (mut reader, headers) = open_table(path, "Gene catalog")?;
    let idx_col = find_column(&headers, &["gene_idx"], path)?;
    let name_col = find_column(&headers, &["gene_name"], path)?;

    let mut entries = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let raw_idx = record.get(idx_col).unwrap_or("");
        let idx = raw_idx.parse::<usize>().map_err(|_| {
            SignatureError::invalid_input(format!(
                "Invalid gene_idx '{}' on line {} of {}",
                raw_idx,
                line + 2,
                path.display()
            ))
        })?;
        entries.push((idx, record.get(name_col).unwrap_or("").to_string()));
    }
    log::info!("Read {} catalog genes from {}", entries.len(), path.display());
    GeneCatalog::new(entries)
}

/// Write a gene catalog for columns `0..names.len()`
pub fn write_gene_catalog<P: AsRef<Path>>(path: P, names: &[String]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["gene_idx", "gene_name"])?;
    for (idx, name) in names.iter().enumerate() {
        writer.write_record([idx.to_string().as_str(), name.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Read the experiments to extract from an `experiment_id` column
pub fn read_experiment_list<P: AsRef<Path>>(path: P) -> Result<ExperimentList> {
    let path = path.as_ref();
    let (mut reader, headers) = open_table(path, "Experiment list")?;
    let col = find_column(&headers, &["experiment_id"], path)?;

    let mut ids = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let raw = record.get(col).unwrap_or("");
        let id = coerce_id(raw).ok_or_else(|| {
            SignatureError::invalid_input(format!(
                "Invalid experiment_id '{}' on line {} of {}",
                raw,
                line + 2,
                path.display()
            ))
        })?;
        ids.push(id);
    }
    log::info!("Read {} experiment ids from {}", ids.len(), path.display());
    ExperimentList::new(ids)
}

/// Read a symbol -> canonical id mapping table
pub fn read_gene_map<P: AsRef<Path>>(path: P) -> Result<GeneMap> {
    let path = path.as_ref();
    let (mut reader, headers) = open_table(path, "Gene map")?;
    let symbol_col = find_column(&headers, GENE_SYMBOL_COLUMNS, path)?;
    let id_col = find_column(&headers, ENTREZ_COLUMNS, path)?;

    let mut pairs = Vec::new();
    for record in reader.records() {
        let record = record?;
        pairs.push((
            record.get(symbol_col).unwrap_or("").to_string(),
            record.get(id_col).unwrap_or("").to_string(),
        ));
    }
    Ok(GeneMap::new(pairs))
}

/// Read a reference set of canonical ids (named id column or a single column)
pub fn read_shared_ids<P: AsRef<Path>>(path: P) -> Result<SharedIdSet> {
    let path = path.as_ref();
    let (mut reader, headers) = open_table(path, "Shared id list")?;
    let mut ids = Vec::new();
    let col = match find_column(&headers, ENTREZ_COLUMNS, path) {
        Ok(col) => col,
        Err(e) if headers.len() == 1 => {
            // headerless single-column list: the "header" is the first id
            match coerce_id(&headers[0]) {
                Some(id) => ids.push(id),
                None => log::debug!("{}; using the only column '{}'", e, headers[0]),
            }
            0
        }
        Err(e) => return Err(e),
    };

    let mut n_bad = 0;
    for record in reader.records() {
        let record = record?;
        match record.get(col).and_then(coerce_id) {
            Some(id) => ids.push(id),
            None => n_bad += 1,
        }
    }
    if n_bad > 0 {
        log::warn!("Skipped {} non-numeric entries in {}", n_bad, path.display());
    }
    let shared = SharedIdSet::new(ids);
    log::info!("Read {} shared canonical ids from {}", shared.len(), path.display());
    Ok(shared)
}

/// Read a set of gene symbols (named symbol column, or a headerless list)
pub fn read_symbol_list<P: AsRef<Path>>(path: P) -> Result<HashSet<String>> {
    let path = path.as_ref();
    let (mut reader, headers) = open_table(path, "Gene list")?;
    let mut symbols = HashSet::new();
    let col = match find_column(&headers, GENE_SYMBOL_COLUMNS, path) {
        Ok(col) => col,
        Err(_) => {
            // no recognised header: the first line is already a symbol
            if let Some(first) = headers.first().filter(|s| !s.is_empty()) {
                symbols.insert(first.clone());
            }
            0
        }
    };
    for record in reader.records() {
        let record = record?;
        if let Some(symbol) = record.get(col).filter(|s| !s.is_empty()) {
            symbols.insert(symbol.to_string());
        }
    }
    log::info!("Read {} gene symbols from {}", symbols.len(), path.display());
    Ok(symbols)
}

/// Read perturbation metadata (experiment id and perturbation name columns)
pub fn read_metadata<P: AsRef<Path>>(path: P, id_column: &str, name_column: &str) -> Result<PerturbationMetadata> {
    let path = path.as_ref();
    let (mut reader, headers) = open_table(path, "Metadata file")?;
    let id_col = find_column(&headers, &[id_column], path)?;
    let name_col = find_column(&headers, &[name_column], path)?;

    let mut ids = Vec::new();
    let mut names = Vec::new();
    let mut n_bad = 0;
    for record in reader.records() {
        let record = record?;
        let name = record.get(name_col).unwrap_or("");
        match record.get(id_col).and_then(coerce_id) {
            Some(id) if !name.is_empty() => {
                ids.push(id);
                names.push(name.to_string());
            }
            _ => n_bad += 1,
        }
    }
    if n_bad > 0 {
        log::warn!(
            "Dropped {} metadata rows with a missing name or non-integer id",
            n_bad
        );
    }
    log::info!("Read {} metadata entries from {}", ids.len(), path.display());
    PerturbationMetadata::new(ids, names)
}

/// Read an experiments x genes matrix: `experiment_id` then one column per gene
pub fn read_effect_csv<P: AsRef<Path>>(path: P) -> Result<EffectTable> {
    let path = path.as_ref();
    let (mut reader, headers) = open_table(path, "Effect matrix")?;
    if headers.len() < 2 {
        return Err(SignatureError::invalid_input(format!(
            "{} needs an id column and at least one gene column",
            path.display()
        )));
    }
    let symbols: Vec<String> = headers[1..].to_vec();

    let mut ids = Vec::new();
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let raw_id = record.get(0).unwrap_or("");
        ids.push(coerce_id(raw_id).ok_or_else(|| {
            SignatureError::invalid_input(format!(
                "Invalid experiment id '{}' on line {}",
                raw_id,
                line + 2
            ))
        })?);
        for field in record.iter().skip(1) {
            values.push(parse_value(field).ok_or_else(|| {
                SignatureError::invalid_input(format!(
                    "Invalid value '{}' on line {}",
                    field,
                    line + 2
                ))
            })?);
        }
    }
    if ids.is_empty() {
        return Err(SignatureError::EmptyData {
            reason: format!("no rows in {}", path.display()),
        });
    }

    let values = Array2::from_shape_vec((ids.len(), symbols.len()), values)
        .map_err(|e| SignatureError::invalid_input(e.to_string()))?;
    EffectTable::new(values, ids, symbols)
}

fn format_optional(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Write one row per experiment: `id,drug_name,r,p,num_peers,valid`
pub fn write_validation_csv<P: AsRef<Path>>(path: P, records: &[ValidationRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(["id", "drug_name", "r", "p", "num_peers", "valid"])?;
    for record in records {
        writer.write_record([
            record.experiment_id.to_string(),
            record.perturbation.clone(),
            format_optional(record.r),
            format_optional(record.p),
            record.num_peers.to_string(),
            u8::from(record.valid).to_string(),
        ])?;
    }
    writer.flush()?;
    log::info!("Wrote {} validation records to {}", records.len(), path.as_ref().display());
    Ok(())
}

/// Write the plain-text summary report
pub fn write_summary_text<P: AsRef<Path>>(path: P, summary: &ValidationSummary) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "{}", summary.to_report())?;
    Ok(())
}

/// Write the summary as a one-row CSV
pub fn write_summary_csv<P: AsRef<Path>>(path: P, summary: &ValidationSummary) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.serialize(summary)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_read_gene_catalog_tsv() {
        let file = temp_file("gene_idx\tgene_name\n1\tEGFR\n0\tTP53\n");
        let catalog = read_gene_catalog(file.path()).unwrap();
        assert_eq!(catalog.entries()[0], (0, "TP53".to_string()));
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_read_gene_map_alternate_headers() {
        let file = temp_file("gene_name,entrez_id\nTP53,7157\nTP53,9999\nEGFR,1956.0\nBAD,\n");
        let map = read_gene_map(file.path()).unwrap();
        assert_eq!(map.lookup("TP53"), Some("7157"));
        assert_eq!(map.lookup("EGFR"), Some("1956.0"));
        assert_eq!(map.lookup("BAD"), None);
    }

    #[test]
    fn test_missing_column() {
        let file = temp_file("symbol,id\nTP53,7157\n");
        assert!(matches!(
            read_gene_map(file.path()),
            Err(SignatureError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_read_shared_ids() {
        let named = temp_file("entrezID\n10\n20\nx\n");
        let shared = read_shared_ids(named.path()).unwrap();
        assert_eq!(shared.len(), 2);
        let plain = temp_file("10\n20\n30\n");
        let shared = read_shared_ids(plain.path()).unwrap();
        assert_eq!(shared.len(), 3);
        assert!(shared.contains(10));
    }

    #[test]
    fn test_read_symbol_list() {
        let named = temp_file("symbol\nTP53\nEGFR\n");
        assert_eq!(read_symbol_list(named.path()).unwrap().len(), 2);
        let plain = temp_file("TP53\nEGFR\nMYC\n");
        let symbols = read_symbol_list(plain.path()).unwrap();
        assert_eq!(symbols.len(), 3);
        assert!(symbols.contains("TP53"));
    }

    #[test]
    fn test_read_metadata_drops_bad_rows() {
        let file = temp_file("id,name,cell\n3,vorinostat,A549\nx,aspirin,A549\n4,,MCF7\n5.0,aspirin,MCF7\n");
        let meta = read_metadata(file.path(), "id", "name").unwrap();
        assert_eq!(meta.experiment_ids(), &[3, 5]);
        assert_eq!(meta.perturbation_of(5), Some("aspirin"));
    }

    #[test]
    fn test_read_effect_csv() {
        let file = temp_file("experiment_id,TP53,EGFR\n0,1.5,NA\n2,-0.5,2\n");
        let table = read_effect_csv(file.path()).unwrap();
        assert_eq!(table.experiment_ids(), &[0, 2]);
        assert!(table.values()[[0, 1]].is_nan());
        assert_eq!(table.values()[[1, 0]], -0.5);
        let bad = temp_file("experiment_id,TP53\n0,abc\n");
        assert!(read_effect_csv(bad.path()).is_err());
    }

    #[test]
    fn test_write_validation_csv() {
        let file = NamedTempFile::new().unwrap();
        let records = vec![
            ValidationRecord {
                experiment_id: 7,
                perturbation: "aspirin".to_string(),
                r: Some(0.5),
                p: Some(0.01),
                num_peers: 2,
                valid: true,
            },
            ValidationRecord {
                experiment_id: 9,
                perturbation: "solo".to_string(),
                r: None,
                p: None,
                num_peers: 0,
                valid: false,
            },
        ];
        write_validation_csv(file.path(), &records).unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "id,drug_name,r,p,num_peers,valid");
        assert_eq!(lines[1], "7,aspirin,0.5,0.01,2,1");
        assert_eq!(lines[2], "9,solo,,,0,0");
    }
}
