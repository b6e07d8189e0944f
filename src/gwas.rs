use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use polars::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, info, warn};

use crate::alleles::is_valid_allele;
use crate::error::MetaxcanError;
use crate::io::{
    TableOptions, column_names, number_column, read_table, should_write, string_column,
    write_dataframe,
};
use crate::qc::{check_file_exists, check_non_empty};
use crate::schema::{ColumnMap, GwasColumn, resolve_column_map};
use crate::types::VariantRecord;

/// How the per-variant Z-score is obtained from the GWAS columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZScoreScheme {
    /// zscore column, then beta/se, then p-value with a sign, per row.
    Auto,
    Zscore,
    BetaSe,
    PvalueSign,
}

impl FromStr for ZScoreScheme {
    type Err = MetaxcanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "auto" => Ok(ZScoreScheme::Auto),
            "zscore" | "z" => Ok(ZScoreScheme::Zscore),
            "beta-se" => Ok(ZScoreScheme::BetaSe),
            "pvalue-sign" => Ok(ZScoreScheme::PvalueSign),
            other => Err(MetaxcanError::Configuration(format!(
                "Unknown z-score scheme: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GwasFormat {
    pub columns: HashMap<GwasColumn, String>,
    pub table: TableOptions,
    pub scheme: ZScoreScheme,
}

impl Default for GwasFormat {
    fn default() -> Self {
        Self {
            columns: HashMap::new(),
            table: TableOptions::default(),
            scheme: ZScoreScheme::Auto,
        }
    }
}

/// A Z-score transform whose inputs were found in the table.
enum ZSource {
    Column,
    BetaOverSe,
    PvalueSigned,
}

/// Column values of one table, parsed once per column.
struct TableColumns {
    snp: Vec<Option<String>>,
    effect_allele: Vec<Option<String>>,
    non_effect_allele: Vec<Option<String>>,
    chromosome: Option<Vec<Option<String>>>,
    position: Option<Vec<Option<f64>>>,
    frequency: Option<Vec<Option<f64>>>,
    beta: Option<Vec<Option<f64>>>,
    odds_ratio: Option<Vec<Option<f64>>>,
    beta_sign: Option<Vec<Option<String>>>,
    se: Option<Vec<Option<f64>>>,
    zscore: Option<Vec<Option<f64>>>,
    pvalue: Option<Vec<Option<f64>>>,
}

impl TableColumns {
    fn extract(df: &DataFrame, map: &ColumnMap, filename: &str) -> Result<Self> {
        let required = |column: GwasColumn| -> Result<Vec<Option<String>>> {
            let name = map.get(column).ok_or_else(|| {
                MetaxcanError::MissingColumn(format!(
                    "{} column not found in {filename}",
                    column.option_name()
                ))
            })?;
            string_column(df, name)
        };
        let text = |column: GwasColumn| -> Result<Option<Vec<Option<String>>>> {
            map.get(column).map(|name| string_column(df, name)).transpose()
        };
        let numeric = |column: GwasColumn| -> Result<Option<Vec<Option<f64>>>> {
            map.get(column).map(|name| number_column(df, name)).transpose()
        };
        Ok(Self {
            snp: required(GwasColumn::Snp)?,
            effect_allele: required(GwasColumn::EffectAllele)?,
            non_effect_allele: required(GwasColumn::NonEffectAllele)?,
            chromosome: text(GwasColumn::Chromosome)?,
            position: numeric(GwasColumn::Position)?,
            frequency: numeric(GwasColumn::Frequency)?,
            beta: numeric(GwasColumn::Beta)?,
            odds_ratio: numeric(GwasColumn::OddsRatio)?,
            beta_sign: text(GwasColumn::BetaSign)?,
            se: numeric(GwasColumn::Se)?,
            zscore: numeric(GwasColumn::Zscore)?,
            pvalue: numeric(GwasColumn::Pvalue)?,
        })
    }

    /// Transforms available for this table, in precedence order.
    fn z_sources(&self, scheme: ZScoreScheme, filename: &str) -> Result<Vec<ZSource>> {
        let has_beta = self.beta.is_some() || self.odds_ratio.is_some();
        let mut sources = Vec::new();
        let wants = |s: ZScoreScheme| scheme == ZScoreScheme::Auto || scheme == s;
        if wants(ZScoreScheme::Zscore) && self.zscore.is_some() {
            sources.push(ZSource::Column);
        }
        if wants(ZScoreScheme::BetaSe) && has_beta && self.se.is_some() {
            sources.push(ZSource::BetaOverSe);
        }
        if wants(ZScoreScheme::PvalueSign)
            && self.pvalue.is_some()
            && (has_beta || self.beta_sign.is_some())
        {
            sources.push(ZSource::PvalueSigned);
        }
        if sources.is_empty() {
            return Err(MetaxcanError::Configuration(format!(
                "{filename} lacks the columns needed to compute a z-score with scheme {scheme:?}; \
                 provide zscore, beta (or or) with se, or pvalue with beta, or or beta_sign"
            ))
            .into());
        }
        Ok(sources)
    }

    /// Beta of one row, falling back to ln(OR) when beta is missing there.
    fn beta(&self, row: usize) -> Option<f64> {
        self.beta.as_ref().and_then(|beta| beta[row]).or_else(|| {
            self.odds_ratio
                .as_ref()
                .and_then(|or| or[row])
                .filter(|or| *or > 0.0)
                .map(f64::ln)
        })
    }

    /// Direction of effect: beta or OR first, then a `+`/`-` sign column.
    fn sign(&self, row: usize) -> Option<f64> {
        if let Some(beta) = self.beta(row) {
            return Some(sign_of(beta));
        }
        let text = self.beta_sign.as_ref().and_then(|s| s[row].as_deref())?;
        match text.chars().next() {
            Some('+') => Some(1.0),
            Some('-') => Some(-1.0),
            _ => None,
        }
    }

    fn zscore(&self, sources: &[ZSource], normal: &Normal, row: usize) -> Option<f64> {
        sources.iter().find_map(|source| match source {
            ZSource::Column => self.zscore.as_ref().and_then(|z| z[row]),
            ZSource::BetaOverSe => {
                let beta = self.beta(row)?;
                let se = self.se.as_ref().and_then(|se| se[row])?;
                Some(beta / se)
            }
            ZSource::PvalueSigned => {
                let p = self
                    .pvalue
                    .as_ref()
                    .and_then(|p| p[row])
                    .filter(|p| (0.0..=1.0).contains(p))?;
                let sign = self.sign(row)?;
                Some(sign * -normal.inverse_cdf(p / 2.0))
            }
        })
    }
}

fn sign_of(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Counts of rows dropped while harmonizing one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarmonizeSummary {
    pub rows: usize,
    pub kept: usize,
    pub not_whitelisted: usize,
    pub missing_id: usize,
    pub invalid_alleles: usize,
    pub non_finite_z: usize,
    pub duplicated: usize,
}

pub struct GwasHarmonizer {
    format: GwasFormat,
}

impl GwasHarmonizer {
    pub fn new(format: GwasFormat) -> Self {
        Self { format }
    }

    pub fn harmonize_file(
        &self,
        path: &Path,
        whitelist: Option<&HashSet<String>>,
    ) -> Result<(Vec<VariantRecord>, HarmonizeSummary)> {
        check_file_exists(path, "gwas")?;
        let df = read_table(path, &self.format.table)?;
        self.harmonize_table(&df, &path.display().to_string(), whitelist)
            .with_context(|| format!("harmonize {}", path.display()))
    }

    /// Turns one GWAS table into canonical records, preserving input order.
    pub fn harmonize_table(
        &self,
        df: &DataFrame,
        filename: &str,
        whitelist: Option<&HashSet<String>>,
    ) -> Result<(Vec<VariantRecord>, HarmonizeSummary)> {
        let map = resolve_column_map(&column_names(df), &self.format.columns, filename)?;
        for msg in &map.info {
            debug!("{msg}");
        }
        let columns = TableColumns::extract(df, &map, filename)?;
        let sources = columns.z_sources(self.format.scheme, filename)?;
        let normal = Normal::new(0.0, 1.0).context("normal distribution")?;

        let mut summary = HarmonizeSummary {
            rows: df.height(),
            ..Default::default()
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut records = Vec::new();

        for row in 0..df.height() {
            let Some(id) = columns.snp[row].clone().filter(|s| !s.is_empty()) else {
                summary.missing_id += 1;
                debug!("{filename}: row {} has no variant id; discarded", row + 1);
                continue;
            };
            if let Some(whitelist) = whitelist
                && !whitelist.contains(&id)
            {
                summary.not_whitelisted += 1;
                continue;
            }

            let effect = columns.effect_allele[row]
                .as_deref()
                .unwrap_or("")
                .to_ascii_uppercase();
            let non_effect = columns.non_effect_allele[row]
                .as_deref()
                .unwrap_or("")
                .to_ascii_uppercase();
            if !is_valid_allele(&effect) || !is_valid_allele(&non_effect) {
                summary.invalid_alleles += 1;
                debug!("{filename}: {id} has alleles {effect}/{non_effect}; discarded");
                continue;
            }

            let zscore = match columns.zscore(&sources, &normal, row) {
                Some(z) if z.is_finite() => z,
                _ => {
                    summary.non_finite_z += 1;
                    debug!("{filename}: {id} has no finite z-score; discarded");
                    continue;
                }
            };

            if !seen.insert(id.clone()) {
                summary.duplicated += 1;
                debug!("{filename}: {id} repeated; keeping the first occurrence");
                continue;
            }

            records.push(VariantRecord {
                id,
                chromosome: columns.chromosome.as_ref().and_then(|c| c[row].clone()),
                position: columns
                    .position
                    .as_ref()
                    .and_then(|p| p[row])
                    .filter(|p| *p >= 0.0)
                    .map(|p| p as u64),
                effect_allele: effect,
                non_effect_allele: non_effect,
                frequency: columns.frequency.as_ref().and_then(|f| f[row]),
                zscore,
                beta: columns.beta(row).filter(|b| b.is_finite()),
                se: columns.se.as_ref().and_then(|se| se[row]),
                pvalue: columns.pvalue.as_ref().and_then(|p| p[row]),
            });
        }

        summary.kept = records.len();
        let dropped = summary.missing_id + summary.invalid_alleles + summary.non_finite_z;
        if dropped > 0 {
            warn!(
                "{filename}: discarded {} row(s) without id, {} with invalid alleles, {} without a finite z-score",
                summary.missing_id, summary.invalid_alleles, summary.non_finite_z
            );
        }
        if summary.duplicated > 0 {
            warn!(
                "{filename}: {} repeated variant id(s) ignored",
                summary.duplicated
            );
        }
        Ok((records, summary))
    }
}

/// GWAS records keyed by variant id.
#[derive(Debug, Clone, Default)]
pub struct GwasIndex {
    records: HashMap<String, VariantRecord>,
}

impl GwasIndex {
    pub fn from_records(records: Vec<VariantRecord>) -> Self {
        let mut index = HashMap::with_capacity(records.len());
        for record in records {
            index.entry(record.id.clone()).or_insert(record);
        }
        Self { records: index }
    }

    /// Harmonizes every file in order; the first occurrence of an id wins.
    pub fn load(
        files: &[PathBuf],
        format: &GwasFormat,
        whitelist: Option<&HashSet<String>>,
    ) -> Result<Self> {
        check_non_empty(files, "gwas file")?;
        let harmonizer = GwasHarmonizer::new(format.clone());
        let mut all = Vec::new();
        for file in files {
            let (records, summary) = harmonizer.harmonize_file(file, whitelist)?;
            info!(
                "Loaded {} of {} GWAS rows from {}",
                summary.kept,
                summary.rows,
                file.display()
            );
            all.extend(records);
        }
        Ok(Self::from_records(all))
    }

    pub fn get(&self, id: &str) -> Option<&VariantRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn harmonized_frame(records: &[VariantRecord]) -> Result<DataFrame> {
    let df = df!(
        "snp" => records.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
        "chromosome" => records.iter().map(|r| r.chromosome.clone()).collect::<Vec<_>>(),
        "position" => records.iter().map(|r| r.position).collect::<Vec<_>>(),
        "effect_allele" => records.iter().map(|r| r.effect_allele.clone()).collect::<Vec<_>>(),
        "non_effect_allele" => records.iter().map(|r| r.non_effect_allele.clone()).collect::<Vec<_>>(),
        "frequency" => records.iter().map(|r| r.frequency).collect::<Vec<_>>(),
        "zscore" => records.iter().map(|r| r.zscore).collect::<Vec<_>>(),
        "beta" => records.iter().map(|r| r.beta).collect::<Vec<_>>(),
        "se" => records.iter().map(|r| r.se).collect::<Vec<_>>(),
        "pvalue" => records.iter().map(|r| r.pvalue).collect::<Vec<_>>(),
    )?;
    Ok(df)
}

/// Writes canonical records as a tab-separated table.
pub fn write_harmonized(records: &[VariantRecord], path: &Path, overwrite: bool) -> Result<bool> {
    if !should_write(path, overwrite) {
        return Ok(false);
    }
    let mut df = harmonized_frame(records)?;
    write_dataframe(&mut df, path, b'\t')?;
    Ok(true)
}
