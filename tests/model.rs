mod common;

use std::path::{Path, PathBuf};

use metaxcan::error::MetaxcanError;
use metaxcan::model::{PredictionModel, load_models};
use tempfile::tempdir;

use common::{metadata, weight, write_model_db, write_text};

#[test]
fn loads_weights_and_extra() {
    let dir = tempdir().expect("tempdir");
    let path = write_model_db(
        dir.path(),
        "whole_blood.db",
        &[
            ("rs1", "ENSG1", 0.1, "G", "A"),
            ("rs2", "ENSG1", -0.4, "T", "C"),
            ("rs3", "ENSG2", 1.0, "A", "C"),
        ],
        &[("ENSG1", "GENE1"), ("ENSG2", "GENE2")],
    );
    let model = PredictionModel::load(&path, "whole_blood").expect("load model");
    assert_eq!(model.label(), "whole_blood");
    assert_eq!(model.genes().collect::<Vec<_>>(), vec!["ENSG1", "ENSG2"]);

    let weights = model.weights("ENSG1");
    assert_eq!(weights.len(), 2);
    assert_eq!(weights[0].variant, "rs1");
    assert_eq!(weights[0].effect_allele, "A");
    assert_eq!(weights[0].non_effect_allele, "G");
    assert_eq!(weights[1].weight, -0.4);
    assert!(model.weights("ENSG9").is_empty());

    let meta = model.metadata("ENSG1").expect("metadata");
    assert_eq!(meta.gene_name, "GENE1");
    assert_eq!(meta.n_snps_in_model, Some(2));
    assert_eq!(meta.pred_perf_r2, Some(0.5));
    assert_eq!(meta.pred_perf_qval, Some(0.02));

    let variants = model.all_variants();
    assert_eq!(variants.len(), 3);
    assert!(variants.contains("rs3"));
}

#[test]
fn duplicate_weight_is_rejected() {
    let err = PredictionModel::from_parts(
        "m",
        vec![
            weight("G1", "rs1", 0.1, "A", "G"),
            weight("G1", "rs1", 0.2, "A", "G"),
        ],
        vec![metadata("G1")],
        Path::new("m.db"),
    )
    .expect_err("duplicate");
    assert!(matches!(
        err.downcast_ref::<MetaxcanError>(),
        Some(MetaxcanError::DuplicateEntry { .. })
    ));
}

#[test]
fn invalid_alleles_are_rejected() {
    let err = PredictionModel::from_parts(
        "m",
        vec![weight("G1", "rs1", 0.1, "A", "-")],
        vec![metadata("G1")],
        Path::new("m.db"),
    )
    .expect_err("invalid allele");
    assert!(matches!(
        err.downcast_ref::<MetaxcanError>(),
        Some(MetaxcanError::InputFormat { .. })
    ));
}

#[test]
fn weights_must_belong_to_a_described_gene() {
    let err = PredictionModel::from_parts(
        "m",
        vec![weight("G2", "rs1", 0.1, "A", "G")],
        vec![metadata("G1")],
        Path::new("m.db"),
    )
    .expect_err("unknown gene");
    assert!(matches!(
        err.downcast_ref::<MetaxcanError>(),
        Some(MetaxcanError::InputFormat { .. })
    ));
}

#[test]
fn unreadable_database_asks_for_updated_models() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(dir.path(), "broken.db", "this is not a database\n");
    let err = PredictionModel::load(&path, "broken").expect_err("not a database");
    let Some(MetaxcanError::ModelDatabase { .. }) = err.downcast_ref::<MetaxcanError>() else {
        panic!("unexpected error: {err:#}");
    };
    assert!(format!("{err}").contains("update your model files"));
}

#[test]
fn missing_model_file_is_a_configuration_error() {
    let err = PredictionModel::load(Path::new("/nonexistent/model.db"), "m").expect_err("missing");
    assert!(matches!(
        err.downcast_ref::<MetaxcanError>(),
        Some(MetaxcanError::Configuration(_))
    ));
}

#[test]
fn parallel_loading_keeps_order() {
    let dir = tempdir().expect("tempdir");
    let specs: Vec<(String, PathBuf)> = (0..4)
        .map(|i| {
            let gene = format!("G{i}");
            let path = write_model_db(
                dir.path(),
                &format!("m{i}.db"),
                &[("rs1", gene.as_str(), 1.0, "A", "G")],
                &[(gene.as_str(), gene.as_str())],
            );
            (format!("m{i}"), path)
        })
        .collect();
    let models = load_models(&specs, Some(2)).expect("load models");
    let labels: Vec<&str> = models.iter().map(|m| m.label()).collect();
    assert_eq!(labels, vec!["m0", "m1", "m2", "m3"]);
    assert_eq!(models[3].genes().next(), Some("G3"));
}
