use std::fmt;

/// Canonical per-variant GWAS record produced by the harmonizer.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub id: String,
    pub chromosome: Option<String>,
    pub position: Option<u64>,
    pub effect_allele: String,
    pub non_effect_allele: String,
    pub frequency: Option<f64>,
    pub zscore: f64,
    pub beta: Option<f64>,
    pub se: Option<f64>,
    pub pvalue: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelWeight {
    pub gene: String,
    pub variant: String,
    pub weight: f64,
    pub effect_allele: String,
    pub non_effect_allele: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneMetadata {
    pub gene: String,
    pub gene_name: String,
    pub n_snps_in_model: Option<u32>,
    pub pred_perf_r2: Option<f64>,
    pub pred_perf_pval: Option<f64>,
    pub pred_perf_qval: Option<f64>,
}

/// A covariance cell as read from disk; `NA` is kept apart from real values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CovCell {
    Real(f64),
    Missing,
}

impl CovCell {
    pub fn value(self) -> Option<f64> {
        match self {
            CovCell::Real(v) => Some(v),
            CovCell::Missing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceRow {
    pub gene: String,
    pub variant1: String,
    pub variant2: String,
    pub value: CovCell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssociationStatus {
    Ok,
    NoData,
    NoCovariance,
    ZeroVariance,
}

impl fmt::Display for AssociationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AssociationStatus::Ok => "OK",
            AssociationStatus::NoData => "no data",
            AssociationStatus::NoCovariance => "no covariance",
            AssociationStatus::ZeroVariance => "zero variance",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssociationResult {
    pub gene: String,
    pub gene_name: Option<String>,
    pub zscore: Option<f64>,
    pub effect_size: Option<f64>,
    pub pvalue: Option<f64>,
    pub var_g: Option<f64>,
    pub pred_perf_r2: Option<f64>,
    pub pred_perf_pval: Option<f64>,
    pub pred_perf_qval: Option<f64>,
    pub n_snps_used: usize,
    pub n_snps_in_cov: usize,
    pub n_snps_in_model: usize,
    pub best_gwas_p: Option<f64>,
    pub largest_weight: Option<f64>,
    pub status: AssociationStatus,
}

impl AssociationResult {
    /// Row with every statistic missing, carrying only identity and metadata.
    pub fn empty(gene: &str, metadata: Option<&GeneMetadata>, status: AssociationStatus) -> Self {
        Self {
            gene: gene.to_string(),
            gene_name: metadata.map(|m| m.gene_name.clone()),
            zscore: None,
            effect_size: None,
            pvalue: None,
            var_g: None,
            pred_perf_r2: metadata.and_then(|m| m.pred_perf_r2),
            pred_perf_pval: metadata.and_then(|m| m.pred_perf_pval),
            pred_perf_qval: metadata.and_then(|m| m.pred_perf_qval),
            n_snps_used: 0,
            n_snps_in_cov: 0,
            n_snps_in_model: 0,
            best_gwas_p: None,
            largest_weight: None,
            status,
        }
    }
}

/// Per-gene outcome of the joint combiner, ordered as it sorts in output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JointStatus {
    Ok,
    InsufficientNumericalResolution,
    InadequateInverse,
    SingularCovariance,
    InverseError,
    ComplexCovariance,
    NoProduct,
    NoMetaxcanResults,
    NoData,
}

impl JointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JointStatus::Ok => "OK",
            JointStatus::NoData => "no data",
            JointStatus::NoMetaxcanResults => "no metaxcan results",
            JointStatus::NoProduct => "no product",
            JointStatus::InsufficientNumericalResolution => "insufficient numerical resolution",
            JointStatus::SingularCovariance => "singular covariance",
            JointStatus::InverseError => "inverse error",
            JointStatus::ComplexCovariance => "complex covariance",
            JointStatus::InadequateInverse => "inadequate inverse",
        }
    }
}

impl fmt::Display for JointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JointResult {
    pub gene: String,
    pub gene_name: Option<String>,
    pub pvalue: Option<f64>,
    pub n_models: usize,
    pub n_indep: usize,
    pub p_i_best: Option<f64>,
    pub t_i_best: Option<String>,
    pub p_i_worst: Option<f64>,
    pub t_i_worst: Option<String>,
    pub eigen_max: Option<f64>,
    pub eigen_min: Option<f64>,
    pub eigen_min_kept: Option<f64>,
    pub z_min: Option<f64>,
    pub z_max: Option<f64>,
    pub z_mean: Option<f64>,
    pub z_sd: Option<f64>,
    pub tmi: Option<f64>,
    pub status: JointStatus,
}

impl JointResult {
    pub fn empty(gene: &str, gene_name: Option<String>, status: JointStatus) -> Self {
        Self {
            gene: gene.to_string(),
            gene_name,
            pvalue: None,
            n_models: 0,
            n_indep: 0,
            p_i_best: None,
            t_i_best: None,
            p_i_worst: None,
            t_i_worst: None,
            eigen_max: None,
            eigen_min: None,
            eigen_min_kept: None,
            z_min: None,
            z_max: None,
            z_mean: None,
            z_sd: None,
            tmi: None,
            status,
        }
    }
}
