//! Association and joint output tables.

use std::cmp::Ordering;
use std::path::Path;

use anyhow::Result;
use polars::prelude::*;

use crate::error::MetaxcanError;
use crate::io::{TableOptions, column_names, number_column, read_table, string_column, write_dataframe};
use crate::types::{AssociationResult, AssociationStatus, JointResult};

pub const ASSOCIATION_COLUMNS: [&str; 12] = [
    "gene",
    "gene_name",
    "zscore",
    "effect_size",
    "pvalue",
    "var_g",
    "pred_perf_r2",
    "pred_perf_pval",
    "pred_perf_qval",
    "n_snps_used",
    "n_snps_in_cov",
    "n_snps_in_model",
];

pub const JOINT_COLUMNS: [&str; 18] = [
    "gene",
    "gene_name",
    "pvalue",
    "n",
    "n_indep",
    "p_i_best",
    "t_i_best",
    "p_i_worst",
    "t_i_worst",
    "eigen_max",
    "eigen_min",
    "eigen_min_kept",
    "z_min",
    "z_max",
    "z_mean",
    "z_sd",
    "tmi",
    "status",
];

/// Ascending with missing values last.
fn cmp_pvalue(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a.filter(|v| !v.is_nan()), b.filter(|v| !v.is_nan())) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Stable sort by p-value; ties keep visiting order.
pub fn sort_association(results: &mut [AssociationResult]) {
    results.sort_by(|a, b| cmp_pvalue(a.pvalue, b.pvalue));
}

pub fn sort_joint(results: &mut [JointResult]) {
    results.sort_by(|a, b| cmp_pvalue(a.pvalue, b.pvalue).then(a.status.cmp(&b.status)));
}

fn counts(values: impl Iterator<Item = usize>) -> Vec<u64> {
    values.map(|v| v as u64).collect()
}

pub fn association_frame(results: &[AssociationResult], additional_output: bool) -> Result<DataFrame> {
    let mut df = df!(
        "gene" => results.iter().map(|r| r.gene.clone()).collect::<Vec<_>>(),
        "gene_name" => results.iter().map(|r| r.gene_name.clone()).collect::<Vec<_>>(),
        "zscore" => results.iter().map(|r| r.zscore).collect::<Vec<_>>(),
        "effect_size" => results.iter().map(|r| r.effect_size).collect::<Vec<_>>(),
        "pvalue" => results.iter().map(|r| r.pvalue).collect::<Vec<_>>(),
        "var_g" => results.iter().map(|r| r.var_g).collect::<Vec<_>>(),
        "pred_perf_r2" => results.iter().map(|r| r.pred_perf_r2).collect::<Vec<_>>(),
        "pred_perf_pval" => results.iter().map(|r| r.pred_perf_pval).collect::<Vec<_>>(),
        "pred_perf_qval" => results.iter().map(|r| r.pred_perf_qval).collect::<Vec<_>>(),
        "n_snps_used" => counts(results.iter().map(|r| r.n_snps_used)),
        "n_snps_in_cov" => counts(results.iter().map(|r| r.n_snps_in_cov)),
        "n_snps_in_model" => counts(results.iter().map(|r| r.n_snps_in_model)),
        "best_gwas_p" => results.iter().map(|r| r.best_gwas_p).collect::<Vec<_>>(),
        "largest_weight" => results.iter().map(|r| r.largest_weight).collect::<Vec<_>>(),
    )?;
    if !additional_output {
        df = df.select(ASSOCIATION_COLUMNS)?;
    }
    Ok(df)
}

/// Sorts `results` in place and writes them atomically.
pub fn write_association_results(
    results: &mut [AssociationResult],
    path: &Path,
    separator: u8,
    additional_output: bool,
) -> Result<()> {
    sort_association(results);
    let mut df = association_frame(results, additional_output)?;
    write_dataframe(&mut df, path, separator)
}

fn count_column(df: &DataFrame, name: &str) -> Result<Vec<usize>> {
    Ok(number_column(df, name)?
        .into_iter()
        .map(|v| v.filter(|v| *v >= 0.0).map(|v| v as usize).unwrap_or(0))
        .collect())
}

fn optional_numbers(df: &DataFrame, names: &[String], name: &str) -> Result<Vec<Option<f64>>> {
    if names.iter().any(|n| n == name) {
        number_column(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

/// Reads an association table written by [`write_association_results`].
///
/// The status is not stored on disk; it is recovered as `OK` for rows with a
/// Z-score, `zero variance` for rows with used variants but no Z-score and
/// `no data` otherwise.
pub fn read_association_results(path: &Path) -> Result<Vec<AssociationResult>> {
    let df = read_table(path, &TableOptions::default())?;
    let names = column_names(&df);
    for column in ASSOCIATION_COLUMNS {
        if !names.iter().any(|n| n == column) {
            return Err(MetaxcanError::MissingColumn(format!(
                "{column} column not found in {}",
                path.display()
            ))
            .into());
        }
    }
    let gene = string_column(&df, "gene")?;
    let gene_name = string_column(&df, "gene_name")?;
    let zscore = number_column(&df, "zscore")?;
    let effect_size = number_column(&df, "effect_size")?;
    let pvalue = number_column(&df, "pvalue")?;
    let var_g = number_column(&df, "var_g")?;
    let r2 = number_column(&df, "pred_perf_r2")?;
    let pval = number_column(&df, "pred_perf_pval")?;
    let qval = number_column(&df, "pred_perf_qval")?;
    let used = count_column(&df, "n_snps_used")?;
    let in_cov = count_column(&df, "n_snps_in_cov")?;
    let in_model = count_column(&df, "n_snps_in_model")?;
    let best = optional_numbers(&df, &names, "best_gwas_p")?;
    let largest = optional_numbers(&df, &names, "largest_weight")?;

    let mut out = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let Some(id) = gene[i].clone() else {
            return Err(MetaxcanError::InputFormat {
                file: path.to_path_buf(),
                line: i + 2,
                message: "row without gene id".to_string(),
            }
            .into());
        };
        let status = if zscore[i].is_some() {
            AssociationStatus::Ok
        } else if used[i] > 0 {
            AssociationStatus::ZeroVariance
        } else {
            AssociationStatus::NoData
        };
        out.push(AssociationResult {
            gene: id,
            gene_name: gene_name[i].clone(),
            zscore: zscore[i],
            effect_size: effect_size[i],
            pvalue: pvalue[i],
            var_g: var_g[i],
            pred_perf_r2: r2[i],
            pred_perf_pval: pval[i],
            pred_perf_qval: qval[i],
            n_snps_used: used[i],
            n_snps_in_cov: in_cov[i],
            n_snps_in_model: in_model[i],
            best_gwas_p: best[i],
            largest_weight: largest[i],
            status,
        });
    }
    Ok(out)
}

pub fn joint_frame(results: &[JointResult]) -> Result<DataFrame> {
    let df = df!(
        "gene" => results.iter().map(|r| r.gene.clone()).collect::<Vec<_>>(),
        "gene_name" => results.iter().map(|r| r.gene_name.clone()).collect::<Vec<_>>(),
        "pvalue" => results.iter().map(|r| r.pvalue).collect::<Vec<_>>(),
        "n" => counts(results.iter().map(|r| r.n_models)),
        "n_indep" => counts(results.iter().map(|r| r.n_indep)),
        "p_i_best" => results.iter().map(|r| r.p_i_best).collect::<Vec<_>>(),
        "t_i_best" => results.iter().map(|r| r.t_i_best.clone()).collect::<Vec<_>>(),
        "p_i_worst" => results.iter().map(|r| r.p_i_worst).collect::<Vec<_>>(),
        "t_i_worst" => results.iter().map(|r| r.t_i_worst.clone()).collect::<Vec<_>>(),
        "eigen_max" => results.iter().map(|r| r.eigen_max).collect::<Vec<_>>(),
        "eigen_min" => results.iter().map(|r| r.eigen_min).collect::<Vec<_>>(),
        "eigen_min_kept" => results.iter().map(|r| r.eigen_min_kept).collect::<Vec<_>>(),
        "z_min" => results.iter().map(|r| r.z_min).collect::<Vec<_>>(),
        "z_max" => results.iter().map(|r| r.z_max).collect::<Vec<_>>(),
        "z_mean" => results.iter().map(|r| r.z_mean).collect::<Vec<_>>(),
        "z_sd" => results.iter().map(|r| r.z_sd).collect::<Vec<_>>(),
        "tmi" => results.iter().map(|r| r.tmi).collect::<Vec<_>>(),
        "status" => results.iter().map(|r| r.status.as_str().to_string()).collect::<Vec<_>>(),
    )?;
    Ok(df)
}

/// Sorts `results` by p-value then status and writes them tab-separated.
pub fn write_joint_results(results: &mut [JointResult], path: &Path) -> Result<()> {
    sort_joint(results);
    let mut df = joint_frame(results)?;
    write_dataframe(&mut df, path, b'\t')
}
