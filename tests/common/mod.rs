#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use metaxcan::types::{GeneMetadata, ModelWeight, VariantRecord};
use rusqlite::{Connection, params};

pub fn write_text(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("write fixture");
    path
}

pub fn write_gz(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let file = fs::File::create(&path).expect("create fixture");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(content.as_bytes()).expect("compress fixture");
    encoder.finish().expect("finish fixture");
    path
}

/// `(rsid, gene, weight, ref_allele, eff_allele)`
pub type WeightRow<'a> = (&'a str, &'a str, f64, &'a str, &'a str);

/// Builds a model database with the `weights` and `extra` tables; every
/// gene gets r2 0.5, pval 0.01 and qval 0.02.
pub fn write_model_db(dir: &Path, name: &str, weights: &[WeightRow], genes: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let conn = Connection::open(&path).expect("open model db");
    conn.execute_batch(
        "CREATE TABLE weights (rsid TEXT, gene TEXT, weight DOUBLE, ref_allele CHARACTER, eff_allele CHARACTER);
         CREATE TABLE extra (gene TEXT, genename TEXT, \"n.snps.in.model\" INTEGER,
             \"pred.perf.R2\" DOUBLE, \"pred.perf.pval\" DOUBLE, \"pred.perf.qval\" DOUBLE);",
    )
    .expect("create tables");
    for (gene, name) in genes {
        let n = weights.iter().filter(|w| w.1 == *gene).count() as i64;
        conn.execute(
            "INSERT INTO extra VALUES (?1, ?2, ?3, 0.5, 0.01, 0.02)",
            params![gene, name, n],
        )
        .expect("insert extra");
    }
    for (rsid, gene, weight, ref_allele, eff_allele) in weights {
        conn.execute(
            "INSERT INTO weights VALUES (?1, ?2, ?3, ?4, ?5)",
            params![rsid, gene, weight, ref_allele, eff_allele],
        )
        .expect("insert weight");
    }
    path
}

pub fn weight(gene: &str, variant: &str, w: f64, effect: &str, non_effect: &str) -> ModelWeight {
    ModelWeight {
        gene: gene.to_string(),
        variant: variant.to_string(),
        weight: w,
        effect_allele: effect.to_string(),
        non_effect_allele: non_effect.to_string(),
    }
}

pub fn metadata(gene: &str) -> GeneMetadata {
    GeneMetadata {
        gene: gene.to_string(),
        gene_name: format!("{gene}_name"),
        n_snps_in_model: None,
        pred_perf_r2: Some(0.5),
        pred_perf_pval: Some(0.01),
        pred_perf_qval: None,
    }
}

pub fn record(id: &str, effect: &str, non_effect: &str, z: f64, beta: Option<f64>) -> VariantRecord {
    VariantRecord {
        id: id.to_string(),
        chromosome: None,
        position: None,
        effect_allele: effect.to_string(),
        non_effect_allele: non_effect.to_string(),
        frequency: None,
        zscore: z,
        beta,
        se: None,
        pvalue: None,
    }
}
