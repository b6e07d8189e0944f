mod common;

use std::collections::{HashMap, HashSet};

use approx::assert_abs_diff_eq;
use metaxcan::error::MetaxcanError;
use metaxcan::gwas::{GwasFormat, GwasHarmonizer, GwasIndex, ZScoreScheme, write_harmonized};
use metaxcan::io::TableOptions;
use metaxcan::schema::GwasColumn;
use statrs::distribution::{ContinuousCDF, Normal};
use tempfile::tempdir;

use common::{write_gz, write_text};

#[test]
fn synonyms_case_and_discards() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(
        dir.path(),
        "gwas.txt",
        "MarkerName Allele1 Allele2 Z CHR BP\n\
         rs1 a g 1.5 1 100\n\
         rs2 A N 2.0 1 200\n\
         rs3 C T NA 1 300\n\
         NA C T 1.0 1 400\n\
         rs1 A G 9.0 1 100\n\
         rs4 T C -0.5 2 500\n",
    );
    let harmonizer = GwasHarmonizer::new(GwasFormat::default());
    let (records, summary) = harmonizer.harmonize_file(&path, None).expect("harmonize");

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["rs1", "rs4"]);
    assert_eq!(records[0].effect_allele, "A");
    assert_eq!(records[0].non_effect_allele, "G");
    assert_eq!(records[0].zscore, 1.5);
    assert_eq!(records[0].chromosome.as_deref(), Some("1"));
    assert_eq!(records[0].position, Some(100));
    assert_eq!(records[1].zscore, -0.5);

    assert_eq!(summary.rows, 6);
    assert_eq!(summary.kept, 2);
    assert_eq!(summary.invalid_alleles, 1);
    assert_eq!(summary.non_finite_z, 1);
    assert_eq!(summary.missing_id, 1);
    assert_eq!(summary.duplicated, 1);
}

#[test]
fn whitelist_restricts_variants() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(
        dir.path(),
        "gwas.tsv",
        "SNP\tA1\tA2\tZSCORE\nrs1\tA\tG\t1.0\nrs2\tC\tT\t2.0\n",
    );
    let whitelist: HashSet<String> = ["rs2".to_string()].into_iter().collect();
    let harmonizer = GwasHarmonizer::new(GwasFormat::default());
    let (records, summary) = harmonizer
        .harmonize_file(&path, Some(&whitelist))
        .expect("harmonize");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "rs2");
    assert_eq!(summary.not_whitelisted, 1);
}

#[test]
fn beta_over_se_with_decimal_commas() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(
        dir.path(),
        "gwas.txt",
        "rsid ea nea beta se\nrs1 A G 0,2 0,1\nrs2 C T -0.3 0.1\n",
    );
    let format = GwasFormat {
        scheme: ZScoreScheme::BetaSe,
        ..Default::default()
    };
    let (records, _) = GwasHarmonizer::new(format)
        .harmonize_file(&path, None)
        .expect("harmonize");
    assert_abs_diff_eq!(records[0].zscore, 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(records[1].zscore, -3.0, epsilon = 1e-12);
    assert_eq!(records[0].beta, Some(0.2));
}

#[test]
fn pvalue_with_odds_ratio_sign() {
    let dir = tempdir().expect("tempdir");
    let path = write_gz(
        dir.path(),
        "gwas.txt.gz",
        "SNP A1 A2 OR P\nrs1 A G 0.8 0.05\nrs2 C T 1.2 0.01\n",
    );
    let format = GwasFormat {
        scheme: ZScoreScheme::PvalueSign,
        ..Default::default()
    };
    let (records, _) = GwasHarmonizer::new(format)
        .harmonize_file(&path, None)
        .expect("harmonize");
    let normal = Normal::new(0.0, 1.0).expect("normal");
    assert_abs_diff_eq!(records[0].zscore, normal.inverse_cdf(0.025), epsilon = 1e-9);
    assert_abs_diff_eq!(records[1].zscore, -normal.inverse_cdf(0.005), epsilon = 1e-9);
    assert_abs_diff_eq!(records[0].beta.expect("beta from OR"), 0.8f64.ln(), epsilon = 1e-12);
}

#[test]
fn pvalue_with_sign_column() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(
        dir.path(),
        "gwas.txt",
        "SNP A1 A2 P DIRECTION\nrs1 A G 0.05 +\nrs2 C T 0.01 -\nrs3 A C 0.2 ?\nrs4 G T 0.3 NA\n",
    );
    let (records, summary) = GwasHarmonizer::new(GwasFormat::default())
        .harmonize_file(&path, None)
        .expect("harmonize");
    let normal = Normal::new(0.0, 1.0).expect("normal");
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["rs1", "rs2"]);
    assert_abs_diff_eq!(records[0].zscore, -normal.inverse_cdf(0.025), epsilon = 1e-9);
    assert_abs_diff_eq!(records[1].zscore, normal.inverse_cdf(0.005), epsilon = 1e-9);
    assert!(records[0].zscore > 0.0 && records[1].zscore < 0.0);
    assert_eq!(records[0].beta, None);
    assert_eq!(summary.non_finite_z, 2);
}

#[test]
fn missing_beta_falls_back_to_odds_ratio_per_row() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(
        dir.path(),
        "gwas.txt",
        "SNP A1 A2 BETA OR SE\nrs1 A G 0.2 NA 0.1\nrs2 C T NA 2.0 0.5\nrs3 A C NA NA 0.5\n",
    );
    let format = GwasFormat {
        scheme: ZScoreScheme::BetaSe,
        ..Default::default()
    };
    let (records, summary) = GwasHarmonizer::new(format)
        .harmonize_file(&path, None)
        .expect("harmonize");
    assert_eq!(records.len(), 2);
    assert_abs_diff_eq!(records[0].zscore, 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(records[1].zscore, 2.0f64.ln() / 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(records[1].beta.expect("beta from OR"), 2.0f64.ln(), epsilon = 1e-12);
    assert_eq!(summary.non_finite_z, 1);
}

#[test]
fn banner_lines_and_explicit_separator() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(
        dir.path(),
        "gwas.txt",
        "## produced by some pipeline, v2\nSNP;A1;A2;Z\nrs1;A;G;1,5\nrs2;C;T;-2\n",
    );
    let format = GwasFormat {
        table: TableOptions {
            separator: Some(b';'),
            skip_rows: 1,
        },
        ..Default::default()
    };
    let (records, _) = GwasHarmonizer::new(format)
        .harmonize_file(&path, None)
        .expect("harmonize");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].zscore, 1.5);
    assert_eq!(records[1].zscore, -2.0);
}

#[test]
fn compressed_csv_keeps_quoted_separators() {
    let dir = tempdir().expect("tempdir");
    let path = write_gz(
        dir.path(),
        "gwas.csv.gz",
        "# banner\nSNP,A1,A2,Z,NOTE\nrs1,A,G,1.5,\"near ABC1, DEF2\"\nrs2,C,T,-2.0,plain\n",
    );
    let format = GwasFormat {
        table: TableOptions {
            separator: None,
            skip_rows: 1,
        },
        ..Default::default()
    };
    let (records, summary) = GwasHarmonizer::new(format)
        .harmonize_file(&path, None)
        .expect("harmonize");
    assert_eq!(summary.rows, 2);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].zscore, 1.5);
    assert_eq!(records[1].id, "rs2");
    assert_eq!(records[1].zscore, -2.0);
}

#[test]
fn whitespace_tables_honour_quotes() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(
        dir.path(),
        "gwas.txt",
        "SNP  A1 A2   Z NOTE\n\nrs1 A\tG 1.0 \"two words\"\nrs2   C T 2.0 x\n",
    );
    let (records, summary) = GwasHarmonizer::new(GwasFormat::default())
        .harmonize_file(&path, None)
        .expect("harmonize");
    assert_eq!(summary.rows, 2);
    assert_eq!(records[0].zscore, 1.0);
    assert_eq!(records[1].non_effect_allele, "T");
}

#[test]
fn auto_scheme_prefers_zscore_column_per_row() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(
        dir.path(),
        "gwas.txt",
        "SNP A1 A2 Z BETA SE\nrs1 A G 1.1 0.5 0.1\nrs2 A G NA 0.5 0.1\n",
    );
    let (records, _) = GwasHarmonizer::new(GwasFormat::default())
        .harmonize_file(&path, None)
        .expect("harmonize");
    assert_eq!(records[0].zscore, 1.1);
    assert_abs_diff_eq!(records[1].zscore, 5.0, epsilon = 1e-12);
}

#[test]
fn explicit_scheme_without_columns_is_a_configuration_error() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(dir.path(), "gwas.txt", "SNP A1 A2 Z\nrs1 A G 1.0\n");
    let format = GwasFormat {
        scheme: ZScoreScheme::BetaSe,
        ..Default::default()
    };
    let err = GwasHarmonizer::new(format)
        .harmonize_file(&path, None)
        .expect_err("beta/se missing");
    assert!(matches!(
        err.downcast_ref::<MetaxcanError>(),
        Some(MetaxcanError::Configuration(_))
    ));
}

#[test]
fn user_mapping_wins_and_must_exist() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(
        dir.path(),
        "gwas.txt",
        "SNP ID A1 A2 Z\nx1 rs1 A G 1.0\n",
    );
    let mut columns = HashMap::new();
    columns.insert(GwasColumn::Snp, "ID".to_string());
    let format = GwasFormat {
        columns,
        ..Default::default()
    };
    let (records, _) = GwasHarmonizer::new(format)
        .harmonize_file(&path, None)
        .expect("harmonize");
    assert_eq!(records[0].id, "rs1");

    let mut columns = HashMap::new();
    columns.insert(GwasColumn::Zscore, "ZSTAT_MISSING".to_string());
    let format = GwasFormat {
        columns,
        ..Default::default()
    };
    let err = GwasHarmonizer::new(format)
        .harmonize_file(&path, None)
        .expect_err("missing mapped column");
    assert!(matches!(
        err.downcast_ref::<MetaxcanError>(),
        Some(MetaxcanError::MissingColumn(_))
    ));
}

#[test]
fn several_files_keep_first_occurrence() {
    let dir = tempdir().expect("tempdir");
    let a = write_text(dir.path(), "chr1.txt", "SNP A1 A2 Z\nrs1 A G 1.0\n");
    let b = write_text(dir.path(), "chr2.txt", "SNP A1 A2 Z\nrs1 A G 3.0\nrs2 C T 2.0\n");
    let index = GwasIndex::load(&[a, b], &GwasFormat::default(), None).expect("index");
    assert_eq!(index.len(), 2);
    assert_eq!(index.get("rs1").map(|r| r.zscore), Some(1.0));
    assert_eq!(index.get("rs2").map(|r| r.zscore), Some(2.0));
    assert!(index.get("rs3").is_none());
}

#[test]
fn harmonized_output_harmonizes_to_itself() {
    let dir = tempdir().expect("tempdir");
    let path = write_text(
        dir.path(),
        "gwas.txt",
        "SNP A1 A2 BETA SE P CHR BP FRQ\nrs1 A G 0.2 0.1 0.04 1 10 0.3\nrs2 C T -0.1 0.1 0.3 2 20 0.4\n",
    );
    let harmonizer = GwasHarmonizer::new(GwasFormat::default());
    let (records, _) = harmonizer.harmonize_file(&path, None).expect("harmonize");

    let out = dir.path().join("harmonized.tsv");
    assert!(write_harmonized(&records, &out, false).expect("write"));
    assert!(!write_harmonized(&records, &out, false).expect("skip"));

    let (again, _) = harmonizer.harmonize_file(&out, None).expect("reharmonize");
    assert_eq!(again.len(), records.len());
    for (a, b) in again.iter().zip(&records) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.effect_allele, b.effect_allele);
        assert_eq!(a.position, b.position);
        assert_abs_diff_eq!(a.zscore, b.zscore, epsilon = 1e-12);
        assert_eq!(a.beta, b.beta);
    }
}
