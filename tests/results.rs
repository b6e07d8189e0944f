mod common;

use metaxcan::results::{
    ASSOCIATION_COLUMNS, association_frame, read_association_results, sort_joint,
    write_association_results,
};
use metaxcan::types::{AssociationResult, AssociationStatus, JointResult, JointStatus};
use tempfile::tempdir;

use common::metadata;

fn row(gene: &str, z: Option<f64>, p: Option<f64>) -> AssociationResult {
    let mut r = AssociationResult::empty(gene, Some(&metadata(gene)), AssociationStatus::NoData);
    r.zscore = z;
    r.pvalue = p;
    r.n_snps_in_model = 3;
    if z.is_some() {
        r.status = AssociationStatus::Ok;
        r.effect_size = Some(0.123456789);
        r.var_g = Some(0.0678);
        r.n_snps_used = 2;
        r.n_snps_in_cov = 3;
        r.best_gwas_p = Some(1e-8);
        r.largest_weight = Some(0.75);
    }
    r
}

#[test]
fn association_round_trip_keeps_order_and_values() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("assoc.csv");
    let mut rows = vec![
        row("G1", Some(0.5), Some(0.617)),
        row("G2", None, None),
        row("G3", Some(-4.1), Some(4.1e-5)),
        row("G4", Some(1.0), Some(0.317)),
    ];
    write_association_results(&mut rows, &path, b',', true).expect("write");
    let genes: Vec<&str> = rows.iter().map(|r| r.gene.as_str()).collect();
    assert_eq!(genes, vec!["G3", "G4", "G1", "G2"]);

    let reloaded = read_association_results(&path).expect("read");
    assert_eq!(reloaded, rows);
    assert_eq!(reloaded[3].status, AssociationStatus::NoData);
    assert_eq!(reloaded[3].pred_perf_qval, None);
}

#[test]
fn plain_output_has_the_twelve_columns() {
    let frame = association_frame(&[row("G1", Some(0.5), Some(0.6))], false).expect("frame");
    let names: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(names, ASSOCIATION_COLUMNS.to_vec());
}

#[test]
fn joint_rows_sort_by_pvalue_then_status() {
    let mut a = JointResult::empty("A", None, JointStatus::InadequateInverse);
    a.pvalue = Some(0.01);
    let mut b = JointResult::empty("B", None, JointStatus::Ok);
    b.pvalue = Some(0.01);
    let c = JointResult::empty("C", None, JointStatus::NoData);
    let d = JointResult::empty("D", None, JointStatus::NoProduct);
    let mut e = JointResult::empty("E", None, JointStatus::Ok);
    e.pvalue = Some(1e-6);
    let mut rows = vec![a, b, c, d, e];
    sort_joint(&mut rows);
    let genes: Vec<&str> = rows.iter().map(|r| r.gene.as_str()).collect();
    assert_eq!(genes, vec!["E", "B", "A", "D", "C"]);
}
