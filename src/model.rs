use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::alleles::is_valid_allele;
use crate::error::MetaxcanError;
use crate::io::parse_number;
use crate::parallel::try_par_map;
use crate::qc::check_file_exists;
use crate::types::{GeneMetadata, ModelWeight};

/// A tissue prediction model: per-gene weighted variants plus gene metadata.
#[derive(Debug, Clone)]
pub struct PredictionModel {
    label: String,
    genes: Vec<String>,
    weights: HashMap<String, Vec<ModelWeight>>,
    metadata: HashMap<String, GeneMetadata>,
}

impl PredictionModel {
    /// Loads the `weights` and `extra` tables of a model database.
    pub fn load(path: &Path, label: &str) -> Result<Self> {
        check_file_exists(path, "model_db")?;
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| model_error(path, e))?;
        let weights = read_weights(&conn).map_err(|e| model_error(path, e))?;
        let metadata = read_extra(&conn, path)?;
        let model = Self::from_parts(label, weights, metadata, path)?;
        info!(
            "Loaded model {} with {} genes from {}",
            model.label,
            model.genes.len(),
            path.display()
        );
        Ok(model)
    }

    /// Builds a model from already-read rows, validating alleles and keys.
    pub fn from_parts(
        label: &str,
        weights: Vec<ModelWeight>,
        metadata: Vec<GeneMetadata>,
        source: &Path,
    ) -> Result<Self> {
        let mut genes = Vec::with_capacity(metadata.len());
        let mut meta_by_gene = HashMap::with_capacity(metadata.len());
        for (i, row) in metadata.into_iter().enumerate() {
            if meta_by_gene.contains_key(&row.gene) {
                return Err(MetaxcanError::DuplicateEntry {
                    entry: format!("extra row {} for gene {}", i + 1, row.gene),
                    file: source.to_path_buf(),
                }
                .into());
            }
            genes.push(row.gene.clone());
            meta_by_gene.insert(row.gene.clone(), row);
        }

        let mut by_gene: HashMap<String, Vec<ModelWeight>> = HashMap::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for (i, w) in weights.into_iter().enumerate() {
            if !is_valid_allele(&w.effect_allele) || !is_valid_allele(&w.non_effect_allele) {
                return Err(MetaxcanError::InputFormat {
                    file: source.to_path_buf(),
                    line: i + 1,
                    message: format!(
                        "variant {} of gene {} has alleles {}/{}; expected uppercase A, C, G or T",
                        w.variant, w.gene, w.effect_allele, w.non_effect_allele
                    ),
                }
                .into());
            }
            if !w.weight.is_finite() {
                return Err(MetaxcanError::InputFormat {
                    file: source.to_path_buf(),
                    line: i + 1,
                    message: format!(
                        "variant {} of gene {} has no numeric weight",
                        w.variant, w.gene
                    ),
                }
                .into());
            }
            if !meta_by_gene.contains_key(&w.gene) {
                return Err(MetaxcanError::InputFormat {
                    file: source.to_path_buf(),
                    line: i + 1,
                    message: format!("weights reference gene {} absent from extra", w.gene),
                }
                .into());
            }
            if !seen.insert((w.gene.clone(), w.variant.clone())) {
                return Err(MetaxcanError::DuplicateEntry {
                    entry: format!("weight for gene {} variant {}", w.gene, w.variant),
                    file: source.to_path_buf(),
                }
                .into());
            }
            by_gene.entry(w.gene.clone()).or_default().push(w);
        }

        Ok(Self {
            label: label.to_string(),
            genes,
            weights: by_gene,
            metadata: meta_by_gene,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn genes(&self) -> impl Iterator<Item = &str> {
        self.genes.iter().map(|g| g.as_str())
    }

    /// Weighted variants of a gene in stored order; empty for unknown genes.
    pub fn weights(&self, gene: &str) -> &[ModelWeight] {
        self.weights.get(gene).map(|w| w.as_slice()).unwrap_or(&[])
    }

    pub fn metadata(&self, gene: &str) -> Option<&GeneMetadata> {
        self.metadata.get(gene)
    }

    pub fn all_variants(&self) -> HashSet<String> {
        self.weights
            .values()
            .flat_map(|ws| ws.iter().map(|w| w.variant.clone()))
            .collect()
    }
}

fn model_error(path: &Path, e: impl std::fmt::Display) -> anyhow::Error {
    MetaxcanError::ModelDatabase {
        file: path.to_path_buf(),
        message: e.to_string(),
    }
    .into()
}

fn read_weights(conn: &Connection) -> rusqlite::Result<Vec<ModelWeight>> {
    let mut stmt = conn.prepare(
        "SELECT rsid, gene, weight, ref_allele, eff_allele FROM weights ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ModelWeight {
            variant: row.get(0)?,
            gene: row.get(1)?,
            weight: value_as_f64(row.get::<_, Value>(2)?).unwrap_or(f64::NAN),
            non_effect_allele: row.get(3)?,
            effect_allele: row.get(4)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Column names of a table with backslashes and quotes stripped, mapped to
/// the identifiers as declared.
fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = HashMap::new();
    for name in names {
        let declared = name?;
        let clean = declared
            .replace('\\', "")
            .trim_matches(|c| c == '"' || c == '`' || c == '\'')
            .to_ascii_lowercase();
        out.insert(clean, declared);
    }
    Ok(out)
}

fn read_extra(conn: &Connection, path: &Path) -> Result<Vec<GeneMetadata>> {
    let columns = table_columns(conn, "extra").map_err(|e| model_error(path, e))?;
    if columns.is_empty() {
        return Err(model_error(path, "missing extra table"));
    }
    let pick = |name: &str| -> String {
        match columns.get(name) {
            Some(declared) => format!("\"{}\"", declared.replace('"', "\"\"")),
            None => "NULL".to_string(),
        }
    };
    if !columns.contains_key("gene") {
        return Err(model_error(path, "extra table has no gene column"));
    }
    let sql = format!(
        "SELECT {}, {}, {}, {}, {}, {} FROM extra ORDER BY rowid",
        pick("gene"),
        pick("genename"),
        pick("n.snps.in.model"),
        pick("pred.perf.r2"),
        pick("pred.perf.pval"),
        pick("pred.perf.qval"),
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| model_error(path, e))?;
    let rows = stmt
        .query_map([], |row| {
            let gene: String = row.get(0)?;
            let gene_name: Option<String> = row.get(1)?;
            Ok(GeneMetadata {
                gene_name: gene_name.unwrap_or_else(|| gene.clone()),
                gene,
                n_snps_in_model: value_as_f64(row.get::<_, Value>(2)?)
                    .filter(|v| *v >= 0.0)
                    .map(|v| v as u32),
                pred_perf_r2: value_as_f64(row.get::<_, Value>(3)?),
                pred_perf_pval: value_as_f64(row.get::<_, Value>(4)?),
                pred_perf_qval: value_as_f64(row.get::<_, Value>(5)?),
            })
        })
        .map_err(|e| model_error(path, e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| model_error(path, e))?);
    }
    Ok(out)
}

fn value_as_f64(value: Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(i as f64),
        Value::Real(r) => Some(r),
        Value::Text(t) => parse_number(&t),
        _ => None,
    }
}

/// Loads several models, keeping the order of `specs`.
pub fn load_models(
    specs: &[(String, PathBuf)],
    cores: Option<usize>,
) -> Result<Vec<PredictionModel>> {
    try_par_map(specs, cores, |(label, path)| PredictionModel::load(path, label))
}
