use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};

use metaxcan::alleles::PalindromicPolicy;
use metaxcan::association::{AssociationConfig, label_from_path, run_association};
use metaxcan::error::MetaxcanError;
use metaxcan::gwas::{GwasFormat, GwasHarmonizer, ZScoreScheme, write_harmonized};
use metaxcan::io::{TableOptions, should_write};
use metaxcan::joint::{CorrelationSource, JointConfig, run_joint};
use metaxcan::logging::init_tracing;
use metaxcan::matrix::CutoffPolicy;
use metaxcan::schema::GwasColumn;

#[derive(Parser)]
#[command(name = "metaxcan")]
#[command(about = "Gene-level association from GWAS summary statistics", long_about = None)]
struct Cli {
    /// Log filter, e.g. `info` or `metaxcan=debug`; defaults to RUST_LOG.
    #[arg(long, global = true)]
    verbosity: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct GwasArgs {
    #[arg(long = "gwas-file", required = true)]
    gwas_files: Vec<PathBuf>,
    /// Column mapping as `name=COLUMN`, comma separated
    /// (snp, effect_allele, non_effect_allele, chromosome, position,
    /// frequency, beta, or, beta_sign, se, zscore, pvalue).
    #[arg(long)]
    gwas_columns: Option<String>,
    /// Field separator; detected from the header when absent.
    #[arg(long)]
    gwas_separator: Option<String>,
    #[arg(long, default_value_t = 0)]
    gwas_skip_rows: usize,
    #[arg(long, default_value = "auto")]
    zscore_scheme: String,
}

#[derive(Subcommand)]
enum Command {
    /// Write GWAS files as canonical per-variant records.
    Harmonize {
        #[command(flatten)]
        gwas: GwasArgs,
        #[arg(long, required = true)]
        output: PathBuf,
        #[arg(long)]
        overwrite: bool,
    },
    /// Single-model gene association.
    Associate {
        #[command(flatten)]
        gwas: GwasArgs,
        #[arg(long, required = true)]
        model_db: PathBuf,
        #[arg(long)]
        model_label: Option<String>,
        #[arg(long, required = true)]
        covariance: PathBuf,
        /// Read covariance blocks as a forward-only stream.
        #[arg(long)]
        stream_covariance: bool,
        #[arg(long, required = true)]
        palindromic: String,
        #[arg(long)]
        additional_output: bool,
        #[arg(long, required = true)]
        output: PathBuf,
        /// `comma` or `tab`.
        #[arg(long, default_value = "comma")]
        output_separator: String,
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        log_name: Option<String>,
    },
    /// Joint multi-tissue combination of association results.
    #[command(group(
        ArgGroup::new("cutoff")
            .required(true)
            .args(["cutoff_eigen_ratio", "cutoff_trace_ratio", "cutoff_threshold"])
    ))]
    #[command(group(
        ArgGroup::new("correlation")
            .required(true)
            .args(["model_product", "covariance"])
    ))]
    Joint {
        /// Association tables as `label=path`, comma separated.
        #[arg(long, required = true)]
        results: String,
        #[arg(long)]
        model_product: Option<PathBuf>,
        /// SNP covariance used with --model-db to build correlations.
        #[arg(long, requires = "model_db")]
        covariance: Option<PathBuf>,
        /// Model databases as `label=path`, comma separated.
        #[arg(long)]
        model_db: Option<String>,
        #[arg(long)]
        stream_covariance: bool,
        #[arg(long)]
        cutoff_eigen_ratio: Option<f64>,
        #[arg(long)]
        cutoff_trace_ratio: Option<f64>,
        #[arg(long)]
        cutoff_threshold: Option<f64>,
        #[arg(long, default_value_t = 0.0)]
        regularization: f64,
        #[arg(long, required = true)]
        output: PathBuf,
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        cores: Option<usize>,
        #[arg(long)]
        log_name: Option<String>,
    },
}

fn split_string_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_separator(input: &str) -> anyhow::Result<u8> {
    match input.to_ascii_lowercase().as_str() {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "space" | "whitespace" | " " => Ok(b' '),
        other if other.len() == 1 => Ok(other.as_bytes()[0]),
        other => Err(anyhow::anyhow!("Unknown separator: {other}")),
    }
}

fn parse_columns(input: &str) -> anyhow::Result<HashMap<GwasColumn, String>> {
    let mut out = HashMap::new();
    for item in split_string_list(input) {
        let (name, column) = item
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Column mapping {item} should look like name=COLUMN"))?;
        let key = GwasColumn::from_option_name(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown GWAS column option: {name}"))?;
        out.insert(key, column.trim().to_string());
    }
    Ok(out)
}

fn parse_labelled_paths(input: &str) -> anyhow::Result<Vec<(String, PathBuf)>> {
    split_string_list(input)
        .into_iter()
        .map(|item| match item.split_once('=') {
            Some((label, path)) => Ok((label.trim().to_string(), PathBuf::from(path.trim()))),
            None => {
                let path = PathBuf::from(&item);
                Ok((label_from_path(&path), path))
            }
        })
        .collect()
}

fn gwas_format(args: &GwasArgs) -> anyhow::Result<GwasFormat> {
    Ok(GwasFormat {
        columns: match &args.gwas_columns {
            Some(text) => parse_columns(text)?,
            None => HashMap::new(),
        },
        table: TableOptions {
            separator: args.gwas_separator.as_deref().map(parse_separator).transpose()?,
            skip_rows: args.gwas_skip_rows,
        },
        scheme: args.zscore_scheme.parse::<ZScoreScheme>()?,
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbosity.as_deref());

    match cli.command {
        Command::Harmonize {
            gwas,
            output,
            overwrite,
        } => {
            if !should_write(&output, overwrite) {
                return Ok(());
            }
            let harmonizer = GwasHarmonizer::new(gwas_format(&gwas)?);
            let mut records = Vec::new();
            for file in &gwas.gwas_files {
                let (rows, _) = harmonizer.harmonize_file(file, None)?;
                records.extend(rows);
            }
            write_harmonized(&records, &output, overwrite)
                .with_context(|| format!("write {}", output.display()))?;
        }
        Command::Associate {
            gwas,
            model_db,
            model_label,
            covariance,
            stream_covariance,
            palindromic,
            additional_output,
            output,
            output_separator,
            overwrite,
            strict,
            log_name,
        } => {
            let config = AssociationConfig {
                gwas_format: gwas_format(&gwas)?,
                gwas_files: gwas.gwas_files,
                model_db,
                model_label,
                covariance,
                streamed: stream_covariance,
                palindromic: palindromic.parse::<PalindromicPolicy>()?,
                additional_output,
                output,
                separator: parse_separator(&output_separator)?,
                overwrite,
                strict,
                log_name,
            };
            run_association(&config)?;
        }
        Command::Joint {
            results,
            model_product,
            covariance,
            model_db,
            stream_covariance,
            cutoff_eigen_ratio,
            cutoff_trace_ratio,
            cutoff_threshold,
            regularization,
            output,
            overwrite,
            strict,
            cores,
            log_name,
        } => {
            let correlation = match (model_product, covariance) {
                (Some(path), None) => CorrelationSource::ModelProduct(path),
                (None, Some(covariance)) => CorrelationSource::Snp {
                    covariance,
                    models: parse_labelled_paths(model_db.as_deref().unwrap_or(""))?,
                },
                _ => {
                    return Err(MetaxcanError::Configuration(
                        "give exactly one of --model-product or --covariance".to_string(),
                    )
                    .into());
                }
            };
            let config = JointConfig {
                results: parse_labelled_paths(&results)?,
                correlation,
                streamed: stream_covariance,
                cutoff: CutoffPolicy::from_options(
                    cutoff_eigen_ratio,
                    cutoff_trace_ratio,
                    cutoff_threshold,
                )?,
                ridge: regularization,
                output,
                overwrite,
                strict,
                cores,
                log_name,
            };
            run_joint(&config)?;
        }
    }
    Ok(())
}
