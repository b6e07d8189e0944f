use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, info};

use crate::alleles::{PalindromicPolicy, is_palindromic, reconcile};
use crate::covariance::{CovarianceBackend, CovarianceStore};
use crate::error::MetaxcanError;
use crate::gwas::{GwasFormat, GwasIndex};
use crate::io::should_write;
use crate::logging::{log_line, open_log, warn_line};
use crate::model::PredictionModel;
use crate::qc::{check_file_exists, check_non_empty};
use crate::results::write_association_results;
use crate::types::{AssociationResult, AssociationStatus};

#[derive(Debug, Clone)]
pub struct AssociationConfig {
    pub gwas_files: Vec<PathBuf>,
    pub gwas_format: GwasFormat,
    pub model_db: PathBuf,
    /// Defaults to the model file stem.
    pub model_label: Option<String>,
    pub covariance: PathBuf,
    pub streamed: bool,
    pub palindromic: PalindromicPolicy,
    pub additional_output: bool,
    pub output: PathBuf,
    pub separator: u8,
    pub overwrite: bool,
    pub strict: bool,
    pub log_name: Option<String>,
}

/// A model variant whose GWAS statistics were carried onto the model's
/// effect allele.
struct AlignedVariant {
    weight: f64,
    zscore: f64,
    beta: Option<f64>,
}

pub fn two_sided_p(normal: &Normal, z: f64) -> f64 {
    2.0 * normal.cdf(-z.abs())
}

/// Association of one gene's predicted expression with the trait.
///
/// Returns a row for every gene; failures tied to the data of this gene are
/// reported through the row status. Errors are reserved for the stores.
pub fn associate_gene(
    gene: &str,
    model: &PredictionModel,
    gwas: &GwasIndex,
    store: &mut dyn CovarianceStore,
    palindromic: PalindromicPolicy,
) -> Result<AssociationResult> {
    let metadata = model.metadata(gene);
    let weights = model.weights(gene);
    let mut result = AssociationResult::empty(gene, metadata, AssociationStatus::NoData);
    result.n_snps_in_model = weights.len();
    if weights.is_empty() {
        return Ok(result);
    }

    let mut aligned: HashMap<&str, AlignedVariant> = HashMap::new();
    for w in weights {
        let Some(record) = gwas.get(&w.variant) else {
            continue;
        };
        if palindromic == PalindromicPolicy::Drop
            && is_palindromic(&w.effect_allele, &w.non_effect_allele)
        {
            debug!("{gene}: palindromic variant {} dropped", w.variant);
            continue;
        }
        let Some(orientation) = reconcile(
            (&record.effect_allele, &record.non_effect_allele),
            (&w.effect_allele, &w.non_effect_allele),
        ) else {
            debug!(
                "{gene}: alleles of {} do not match the model ({}/{} vs {}/{})",
                w.variant,
                record.effect_allele,
                record.non_effect_allele,
                w.effect_allele,
                w.non_effect_allele
            );
            continue;
        };
        let sign = orientation.sign();
        aligned.insert(
            w.variant.as_str(),
            AlignedVariant {
                weight: w.weight,
                zscore: record.zscore * sign,
                beta: record.beta.map(|b| b * sign),
            },
        );
    }

    let model_variants: Vec<String> = weights.iter().map(|w| w.variant.clone()).collect();
    let Some(selection) = store.get(gene, Some(&model_variants), false)? else {
        result.status = AssociationStatus::NoCovariance;
        return Ok(result);
    };
    result.n_snps_in_cov = selection.variants.len();

    let used: Vec<usize> = (0..selection.variants.len())
        .filter(|&i| aligned.contains_key(selection.variants[i].as_str()))
        .collect();
    let k = used.len();
    result.n_snps_used = k;
    if k == 0 {
        return Ok(result);
    }

    let gamma = Array2::from_shape_fn((k, k), |(a, b)| selection.matrix[[used[a], used[b]]]);
    let variants: Vec<&AlignedVariant> = used
        .iter()
        .filter_map(|&i| aligned.get(selection.variants[i].as_str()))
        .collect();
    let w = Array1::from_iter(variants.iter().map(|v| v.weight));
    let z = Array1::from_iter(variants.iter().map(|v| v.zscore));
    let sigma = gamma.diag().mapv(|v| v.max(0.0).sqrt());

    let normal = Normal::new(0.0, 1.0).context("normal distribution")?;
    result.best_gwas_p = z
        .iter()
        .map(|zi| two_sided_p(&normal, *zi))
        .min_by(|a, b| a.total_cmp(b));
    result.largest_weight = w.iter().map(|wi| wi.abs()).max_by(|a, b| a.total_cmp(b));

    let var_g = w.dot(&gamma.dot(&w));
    result.var_g = Some(var_g);
    if !(var_g.is_finite() && var_g > 0.0) {
        result.status = AssociationStatus::ZeroVariance;
        return Ok(result);
    }

    let zscore = (&w * &z * &sigma).sum() / var_g.sqrt();
    let betas: Option<Vec<f64>> = variants.iter().map(|v| v.beta).collect();
    result.effect_size = betas.map(|betas| {
        let beta = Array1::from(betas);
        (&w * &beta * &sigma.mapv(|s| s * s)).sum() / var_g
    });
    result.zscore = Some(zscore);
    result.pvalue = Some(two_sided_p(&normal, zscore));
    result.status = AssociationStatus::Ok;
    Ok(result)
}

/// Errors that stop a run whatever the strictness.
pub(crate) fn is_fatal(error: &anyhow::Error) -> bool {
    if error.downcast_ref::<std::io::Error>().is_some() {
        return true;
    }
    match error.downcast_ref::<MetaxcanError>() {
        Some(MetaxcanError::GeneNotInStream(_)) | Some(MetaxcanError::VariantNotInBlock { .. }) => {
            false
        }
        Some(_) => true,
        None => false,
    }
}

fn model_label(config: &AssociationConfig) -> String {
    config.model_label.clone().unwrap_or_else(|| label_from_path(&config.model_db))
}

/// File stem without compression or database suffixes.
pub fn label_from_path(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string();
    let mut label = name.as_str();
    for suffix in [".gz", ".bz2", ".db", ".csv", ".txt", ".tsv"] {
        label = label.strip_suffix(suffix).unwrap_or(label);
    }
    label.to_string()
}

fn validate(config: &AssociationConfig) -> Result<()> {
    check_non_empty(&config.gwas_files, "gwas file")?;
    for file in &config.gwas_files {
        check_file_exists(file, "gwas")?;
    }
    check_file_exists(&config.model_db, "model_db")?;
    check_file_exists(&config.covariance, "covariance")?;
    Ok(())
}

/// Runs every gene of the model through [`associate_gene`].
///
/// Rows come back in visiting order, unsorted.
pub fn associate_all(config: &AssociationConfig) -> Result<Vec<AssociationResult>> {
    validate(config)?;
    let mut log = open_log(config.log_name.as_deref())?;

    let model = PredictionModel::load(&config.model_db, &model_label(config))?;
    let whitelist = model.all_variants();
    let gwas = GwasIndex::load(&config.gwas_files, &config.gwas_format, Some(&whitelist))?;
    log_line(
        &mut log,
        &format!(
            "{} GWAS variants overlap the {} variants of model {}",
            gwas.len(),
            whitelist.len(),
            model.label()
        ),
    )?;
    if gwas.is_empty() {
        warn_line(&mut log, "No GWAS variant matches the model; every gene will lack data")?;
    }

    let mut backend = CovarianceBackend::open(&config.covariance, config.streamed)?;
    let genes: Vec<String> = model.genes().map(|g| g.to_string()).collect();
    let mut results = Vec::with_capacity(genes.len());
    let mut failures = 0usize;

    backend.for_each_gene(&genes, |gene, store| {
        match associate_gene(gene, &model, &gwas, store, config.palindromic) {
            Ok(row) => results.push(row),
            Err(e) if config.strict || is_fatal(&e) => {
                return Err(e.context(format!("association failed for gene {gene}")));
            }
            Err(e) => {
                failures += 1;
                warn_line(&mut log, &format!("gene {gene}: {e:#}"))?;
                let mut row =
                    AssociationResult::empty(gene, model.metadata(gene), AssociationStatus::NoData);
                row.n_snps_in_model = model.weights(gene).len();
                results.push(row);
            }
        }
        Ok(())
    })?;

    let ok = results
        .iter()
        .filter(|r| r.status == AssociationStatus::Ok)
        .count();
    log_line(
        &mut log,
        &format!(
            "Associated {ok} of {} genes of model {} ({failures} failed)",
            results.len(),
            model.label()
        ),
    )?;
    Ok(results)
}

/// Computes and writes the association table.
///
/// Returns `false` without reading any input when the output exists and
/// overwriting is off.
pub fn run_association(config: &AssociationConfig) -> Result<bool> {
    if !should_write(&config.output, config.overwrite) {
        return Ok(false);
    }
    let mut results = associate_all(config)?;
    write_association_results(
        &mut results,
        &config.output,
        config.separator,
        config.additional_output,
    )?;
    info!("Wrote {} rows to {}", results.len(), config.output.display());
    Ok(true)
}
