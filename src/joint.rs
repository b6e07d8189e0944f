//! Joint multi-tissue combination of per-model gene Z-scores.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use tracing::{debug, info};

use crate::alleles::reconcile;
use crate::association::{is_fatal, two_sided_p};
use crate::covariance::{CovarianceBackend, CovarianceStore};
use crate::error::MetaxcanError;
use crate::io::should_write;
use crate::logging::{log_line, open_log, warn_line};
use crate::matrix::{CutoffPolicy, PinvError, real_eigenvalues, truncated_pinv};
use crate::model::{PredictionModel, load_models};
use crate::parallel::try_par_map;
use crate::qc::{check_file_exists, check_non_empty, check_range_f64};
use crate::results::{read_association_results, write_joint_results};
use crate::types::{AssociationResult, JointResult, JointStatus, ModelWeight};

/// Where the model-by-model matrix of a gene comes from.
#[derive(Debug, Clone)]
pub enum CorrelationSource {
    /// Precomputed `GENE MODEL1 MODEL2 VALUE` table keyed by model label.
    ModelProduct(PathBuf),
    /// SNP covariance plus the weights of every model, one database per label.
    Snp {
        covariance: PathBuf,
        models: Vec<(String, PathBuf)>,
    },
}

#[derive(Debug, Clone)]
pub struct JointConfig {
    /// Association tables as `(model label, path)`.
    pub results: Vec<(String, PathBuf)>,
    pub correlation: CorrelationSource,
    pub streamed: bool,
    pub cutoff: CutoffPolicy,
    pub ridge: f64,
    pub output: PathBuf,
    pub overwrite: bool,
    pub strict: bool,
    pub cores: Option<usize>,
    pub log_name: Option<String>,
}

/// `trace(A A+)` may stray from the retained count by this much per model.
const TMI_TOLERANCE: f64 = 1e-3;

/// Drops models whose row holds a non-finite value, worst first.
fn finite_subset(sigma: &Array2<f64>) -> Vec<usize> {
    let mut keep: Vec<usize> = (0..sigma.nrows()).collect();
    loop {
        let bad: Vec<usize> = keep
            .iter()
            .map(|&i| keep.iter().filter(|&&j| !sigma[[i, j]].is_finite()).count())
            .collect();
        let Some((worst, count)) = bad
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(&b.0)))
        else {
            return keep;
        };
        if *count == 0 {
            return keep;
        }
        keep.remove(worst);
    }
}

fn z_summary(result: &mut JointResult, labels: &[&str], z: &Array1<f64>, normal: &Normal) {
    let n = z.len() as f64;
    let mean = z.sum() / n;
    result.z_min = z.iter().copied().reduce(f64::min);
    result.z_max = z.iter().copied().reduce(f64::max);
    result.z_mean = Some(mean);
    result.z_sd = Some((z.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt());

    let p: Vec<f64> = z.iter().map(|v| two_sided_p(normal, *v)).collect();
    let best = (0..p.len()).min_by(|&a, &b| p[a].total_cmp(&p[b]));
    let worst = (0..p.len()).max_by(|&a, &b| p[a].total_cmp(&p[b]));
    if let Some(i) = best {
        result.p_i_best = Some(p[i]);
        result.t_i_best = Some(labels[i].to_string());
    }
    if let Some(i) = worst {
        result.p_i_worst = Some(p[i]);
        result.t_i_worst = Some(labels[i].to_string());
    }
}

/// Combines one gene's model Z-scores into a chi-squared test.
///
/// `zscores` carries `(model label, Z)` pairs with finite Z; `sigma` is the
/// matching model-by-model matrix in the same order.
pub fn combine_gene(
    gene: &str,
    gene_name: Option<String>,
    zscores: &[(String, f64)],
    sigma: Option<&Array2<f64>>,
    cutoff: CutoffPolicy,
    ridge: f64,
) -> Result<JointResult> {
    if zscores.is_empty() {
        return Ok(JointResult::empty(gene, gene_name, JointStatus::NoMetaxcanResults));
    }
    let Some(sigma) = sigma.filter(|s| s.nrows() == zscores.len() && s.ncols() == zscores.len())
    else {
        return Ok(JointResult::empty(gene, gene_name, JointStatus::NoProduct));
    };
    let keep = finite_subset(sigma);
    if keep.is_empty() {
        return Ok(JointResult::empty(gene, gene_name, JointStatus::NoProduct));
    }
    if keep.len() < zscores.len() {
        debug!(
            "{gene}: {} model(s) without a defined product dropped",
            zscores.len() - keep.len()
        );
    }

    let n = keep.len();
    let labels: Vec<&str> = keep.iter().map(|&i| zscores[i].0.as_str()).collect();
    let z = Array1::from_iter(keep.iter().map(|&i| zscores[i].1));
    let sigma = Array2::from_shape_fn((n, n), |(a, b)| sigma[[keep[a], keep[b]]]);

    let normal = Normal::new(0.0, 1.0).context("normal distribution")?;
    let mut result = JointResult::empty(gene, gene_name, JointStatus::Ok);
    result.n_models = n;
    z_summary(&mut result, &labels, &z, &normal);

    let eigenvalues = match real_eigenvalues(&sigma) {
        Ok(values) => values,
        Err(PinvError::Complex) => {
            result.status = JointStatus::ComplexCovariance;
            return Ok(result);
        }
        Err(e) => {
            debug!("{gene}: {e}");
            result.status = JointStatus::InverseError;
            return Ok(result);
        }
    };
    result.eigen_max = eigenvalues.first().copied();
    result.eigen_min = eigenvalues.last().copied();

    let pinv = match truncated_pinv(&sigma, cutoff, ridge) {
        Ok(pinv) => pinv,
        Err(PinvError::Singular) => {
            result.status = JointStatus::SingularCovariance;
            return Ok(result);
        }
        Err(e) => {
            debug!("{gene}: {e}");
            result.status = JointStatus::InverseError;
            return Ok(result);
        }
    };
    debug!(
        "{gene}: kept {} of {n} components above {:.3e}",
        pinv.n_retained, pinv.cutoff
    );
    result.n_indep = pinv.n_retained;
    result.eigen_min_kept = Some(pinv.min_retained);

    let regularized = &sigma + &(Array2::<f64>::eye(n) * ridge);
    let tmi = regularized.dot(&pinv.inverse).diag().sum();
    result.tmi = Some(tmi);

    let statistic = z.dot(&pinv.inverse.dot(&z));
    if !statistic.is_finite() {
        result.status = JointStatus::InverseError;
        return Ok(result);
    }
    let chi2 = ChiSquared::new(pinv.n_retained as f64).context("chi-squared")?;
    let pvalue = chi2.sf(statistic.max(0.0));
    result.pvalue = Some(pvalue);

    result.status = if (tmi - pinv.n_retained as f64).abs() > TMI_TOLERANCE * n as f64 {
        JointStatus::InadequateInverse
    } else if pvalue == 0.0 {
        JointStatus::InsufficientNumericalResolution
    } else {
        JointStatus::Ok
    };
    Ok(result)
}

/// Weights of one model re-expressed on a common allele frame.
struct FramedWeights {
    variants: Vec<String>,
    weights: HashMap<String, f64>,
}

/// Puts every model's weights for `gene` on the alleles of the first model
/// that carries each variant; variants whose alleles cannot be matched are
/// left out of that model.
fn frame_weights(gene: &str, models: &[&PredictionModel]) -> Vec<FramedWeights> {
    let mut reference: HashMap<&str, &ModelWeight> = HashMap::new();
    for model in models {
        for w in model.weights(gene) {
            reference.entry(w.variant.as_str()).or_insert(w);
        }
    }
    models
        .iter()
        .map(|model| {
            let mut framed = FramedWeights {
                variants: Vec::new(),
                weights: HashMap::new(),
            };
            for w in model.weights(gene) {
                let Some(r) = reference.get(w.variant.as_str()) else {
                    continue;
                };
                match reconcile(
                    (&w.effect_allele, &w.non_effect_allele),
                    (&r.effect_allele, &r.non_effect_allele),
                ) {
                    Some(orientation) => {
                        framed.variants.push(w.variant.clone());
                        framed.weights.insert(w.variant.clone(), w.weight * orientation.sign());
                    }
                    None => debug!(
                        "{gene}: {} has alleles in {} that do not match other models",
                        w.variant,
                        model.label()
                    ),
                }
            }
            framed
        })
        .collect()
}

/// `w_a' G w_b` over the variants of both models present in the store.
fn cross_product(
    store: &mut dyn CovarianceStore,
    gene: &str,
    a: &FramedWeights,
    b: &FramedWeights,
) -> Result<Option<f64>> {
    let Some(pair) = store.get_pair(gene, &a.variants, &b.variants)? else {
        return Ok(None);
    };
    let weight = |f: &FramedWeights, v: &String| f.weights.get(v).copied().unwrap_or(0.0);
    let wa = Array1::from_iter(pair.rows.iter().map(|v| weight(a, v)));
    let wb = Array1::from_iter(pair.columns.iter().map(|v| weight(b, v)));
    Ok(Some(wa.dot(&pair.matrix.dot(&wb))))
}

/// Correlation of the predicted expression of `gene` across `models`.
///
/// Entries are NaN where a model has zero predicted variance. `None` when the
/// store has no block for the gene.
pub fn model_correlation(
    gene: &str,
    models: &[&PredictionModel],
    store: &mut dyn CovarianceStore,
) -> Result<Option<Array2<f64>>> {
    let framed = frame_weights(gene, models);
    let n = framed.len();
    let mut variances = Vec::with_capacity(n);
    for f in &framed {
        match cross_product(store, gene, f, f)? {
            Some(v) => variances.push(v),
            None => return Ok(None),
        }
    }
    let mut sigma = Array2::<f64>::from_elem((n, n), f64::NAN);
    for a in 0..n {
        for b in a..n {
            if variances[a] <= 0.0 || variances[b] <= 0.0 {
                continue;
            }
            let numerator = if a == b {
                variances[a]
            } else {
                match cross_product(store, gene, &framed[a], &framed[b])? {
                    Some(v) => v,
                    None => continue,
                }
            };
            let value = numerator / (variances[a] * variances[b]).sqrt();
            sigma[[a, b]] = value;
            sigma[[b, a]] = value;
        }
    }
    Ok(Some(sigma))
}

/// Per-gene rows of every association table, in label order.
struct GeneZscores {
    genes: Vec<String>,
    names: HashMap<String, String>,
    z: HashMap<String, Vec<(String, Option<f64>)>>,
}

impl GeneZscores {
    fn build(tables: &[(String, Vec<AssociationResult>)]) -> Self {
        let mut genes = Vec::new();
        let mut seen = HashSet::new();
        let mut names = HashMap::new();
        let mut z: HashMap<String, Vec<(String, Option<f64>)>> = HashMap::new();
        for (label, rows) in tables {
            for row in rows {
                if seen.insert(row.gene.clone()) {
                    genes.push(row.gene.clone());
                }
                if let Some(name) = &row.gene_name {
                    names.entry(row.gene.clone()).or_insert_with(|| name.clone());
                }
                z.entry(row.gene.clone())
                    .or_default()
                    .push((label.clone(), row.zscore.filter(|v| v.is_finite())));
            }
        }
        Self { genes, names, z }
    }

    /// Finite Z-scores of `gene`, or the status explaining their absence.
    fn finite(&self, gene: &str) -> std::result::Result<Vec<(String, f64)>, JointStatus> {
        let Some(rows) = self.z.get(gene) else {
            return Err(JointStatus::NoMetaxcanResults);
        };
        let finite: Vec<(String, f64)> = rows
            .iter()
            .filter_map(|(label, z)| z.map(|z| (label.clone(), z)))
            .collect();
        if finite.is_empty() {
            return Err(JointStatus::NoData);
        }
        Ok(finite)
    }
}

/// Model-by-model matrix for `labels` from a product table, reordered to
/// `labels`. Labels the table lacks come back as NaN rows.
fn product_matrix(
    store: &mut dyn CovarianceStore,
    gene: &str,
    labels: &[String],
) -> Result<Option<Array2<f64>>> {
    let Some(selection) = store.get(gene, Some(labels), false)? else {
        return Ok(None);
    };
    let index: HashMap<&str, usize> = selection
        .variants
        .iter()
        .enumerate()
        .map(|(i, v)| (v.as_str(), i))
        .collect();
    let n = labels.len();
    let sigma = Array2::from_shape_fn((n, n), |(a, b)| {
        match (index.get(labels[a].as_str()), index.get(labels[b].as_str())) {
            (Some(&i), Some(&j)) => selection.matrix[[i, j]],
            _ => f64::NAN,
        }
    });
    Ok(Some(sigma))
}

fn validate(config: &JointConfig) -> Result<()> {
    check_non_empty(&config.results, "association result")?;
    for (_, path) in &config.results {
        check_file_exists(path, "association result")?;
    }
    check_range_f64(config.ridge, 0.0, f64::MAX, "ridge")?;
    match &config.correlation {
        CorrelationSource::ModelProduct(path) => check_file_exists(path, "model product")?,
        CorrelationSource::Snp { covariance, models } => {
            check_file_exists(covariance, "covariance")?;
            let have: HashSet<&str> = models.iter().map(|(l, _)| l.as_str()).collect();
            for (label, _) in &config.results {
                if !have.contains(label.as_str()) {
                    return Err(MetaxcanError::Configuration(format!(
                        "no model database given for association results labelled {label}"
                    ))
                    .into());
                }
            }
        }
    }
    let mut labels = HashSet::new();
    for (label, _) in &config.results {
        if !labels.insert(label.as_str()) {
            return Err(MetaxcanError::Configuration(format!(
                "association results label {label} given twice"
            ))
            .into());
        }
    }
    Ok(())
}

fn load_tables(config: &JointConfig) -> Result<Vec<(String, Vec<AssociationResult>)>> {
    try_par_map(&config.results, config.cores, |(label, path)| {
        let rows = read_association_results(path)
            .with_context(|| format!("read association results {}", path.display()))?;
        Ok((label.clone(), rows))
    })
}

/// Runs every gene seen in the association tables through [`combine_gene`].
pub fn combine_all(config: &JointConfig) -> Result<Vec<JointResult>> {
    validate(config)?;
    let mut log = open_log(config.log_name.as_deref())?;

    let tables = load_tables(config)?;
    let zscores = GeneZscores::build(&tables);
    log_line(
        &mut log,
        &format!(
            "Loaded association results of {} genes from {} models",
            zscores.genes.len(),
            tables.len()
        ),
    )?;

    let on_the_fly = matches!(config.correlation, CorrelationSource::Snp { .. });
    let (covariance_path, models) = match &config.correlation {
        CorrelationSource::ModelProduct(path) => (path.clone(), Vec::new()),
        CorrelationSource::Snp { covariance, models } => {
            let wanted: Vec<(String, PathBuf)> = models
                .iter()
                .filter(|(label, _)| config.results.iter().any(|(l, _)| l == label))
                .cloned()
                .collect();
            (covariance.clone(), load_models(&wanted, config.cores)?)
        }
    };
    let models_by_label: HashMap<&str, &PredictionModel> =
        models.iter().map(|m| (m.label(), m)).collect();
    let mut backend = CovarianceBackend::open(&covariance_path, config.streamed)?;

    let mut results = Vec::with_capacity(zscores.genes.len());
    let mut failures = 0usize;
    backend.for_each_gene(&zscores.genes, |gene, store| {
        let name = zscores.names.get(gene).cloned();
        let finite = match zscores.finite(gene) {
            Ok(finite) => finite,
            Err(status) => {
                results.push(JointResult::empty(gene, name, status));
                return Ok(());
            }
        };
        let labels: Vec<String> = finite.iter().map(|(l, _)| l.clone()).collect();
        let sigma = if on_the_fly {
            let models: Vec<&PredictionModel> = labels
                .iter()
                .filter_map(|l| models_by_label.get(l.as_str()).copied())
                .collect();
            model_correlation(gene, &models, store)
        } else {
            product_matrix(store, gene, &labels)
        };
        let outcome = sigma.and_then(|sigma| {
            combine_gene(gene, name.clone(), &finite, sigma.as_ref(), config.cutoff, config.ridge)
        });
        match outcome {
            Ok(row) => results.push(row),
            Err(e) if config.strict || is_fatal(&e) => {
                return Err(e.context(format!("joint analysis failed for gene {gene}")));
            }
            Err(e) => {
                failures += 1;
                warn_line(&mut log, &format!("gene {gene}: {e:#}"))?;
                results.push(JointResult::empty(gene, name, JointStatus::InverseError));
            }
        }
        Ok(())
    })?;

    let ok = results.iter().filter(|r| r.status == JointStatus::Ok).count();
    log_line(
        &mut log,
        &format!(
            "Combined {ok} of {} genes ({failures} failed)",
            results.len()
        ),
    )?;
    Ok(results)
}

/// Computes and writes the joint table; `false` when the output is kept.
pub fn run_joint(config: &JointConfig) -> Result<bool> {
    if !should_write(&config.output, config.overwrite) {
        return Ok(false);
    }
    let mut results = combine_all(config)?;
    write_joint_results(&mut results, &config.output)?;
    info!("Wrote {} rows to {}", results.len(), config.output.display());
    Ok(true)
}
