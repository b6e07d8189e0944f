use std::collections::HashMap;

use crate::error::{MetaxcanError, Result};

/// The GWAS columns the harmonizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GwasColumn {
    Snp,
    EffectAllele,
    NonEffectAllele,
    Chromosome,
    Position,
    Frequency,
    Beta,
    OddsRatio,
    BetaSign,
    Se,
    Zscore,
    Pvalue,
}

impl GwasColumn {
    pub const ALL: [GwasColumn; 12] = [
        GwasColumn::Snp,
        GwasColumn::EffectAllele,
        GwasColumn::NonEffectAllele,
        GwasColumn::Chromosome,
        GwasColumn::Position,
        GwasColumn::Frequency,
        GwasColumn::Beta,
        GwasColumn::OddsRatio,
        GwasColumn::BetaSign,
        GwasColumn::Se,
        GwasColumn::Zscore,
        GwasColumn::Pvalue,
    ];

    pub fn option_name(&self) -> &'static str {
        match self {
            GwasColumn::Snp => "snp",
            GwasColumn::EffectAllele => "effect_allele",
            GwasColumn::NonEffectAllele => "non_effect_allele",
            GwasColumn::Chromosome => "chromosome",
            GwasColumn::Position => "position",
            GwasColumn::Frequency => "frequency",
            GwasColumn::Beta => "beta",
            GwasColumn::OddsRatio => "or",
            GwasColumn::BetaSign => "beta_sign",
            GwasColumn::Se => "se",
            GwasColumn::Zscore => "zscore",
            GwasColumn::Pvalue => "pvalue",
        }
    }

    pub fn from_option_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.option_name() == lower)
    }

    fn synonyms(&self) -> &'static [&'static str] {
        match self {
            GwasColumn::Snp => &[
                "SNP",
                "SNPID",
                "RSID",
                "RS_NUMBER",
                "MARKERNAME",
                "VARIANT_ID",
                "VARIANTID",
                "SNP_ID",
                "RS_ID",
            ],
            GwasColumn::EffectAllele => &[
                "EFFECT_ALLELE",
                "A1",
                "ALLELE1",
                "EA",
                "INC_ALLELE",
                "ALT",
            ],
            GwasColumn::NonEffectAllele => &[
                "NON_EFFECT_ALLELE",
                "A2",
                "ALLELE2",
                "ALLELE0",
                "OTHER_ALLELE",
                "NEA",
                "OA",
                "REF",
            ],
            GwasColumn::Chromosome => &["CHROMOSOME", "CHR", "CHROM", "#CHROM"],
            GwasColumn::Position => &["POSITION", "POS", "BP", "BASE_PAIR_LOCATION"],
            GwasColumn::Frequency => &[
                "FREQUENCY",
                "FREQ",
                "EAF",
                "FREQ1",
                "EFFECT_ALLELE_FREQ",
                "A1FREQ",
                "MAF",
            ],
            GwasColumn::Beta => &["BETA", "B", "EFFECT", "EFFECTS", "LOG_ODDS", "LOGOR"],
            GwasColumn::OddsRatio => &["OR", "ODDS_RATIO"],
            GwasColumn::BetaSign => &["BETA_SIGN", "DIRECTION", "SIGN"],
            GwasColumn::Se => &["SE", "STDERR", "STANDARD_ERROR", "SEBETA", "STDERRLOGOR"],
            GwasColumn::Zscore => &["ZSCORE", "Z", "Z-SCORE", "ZSTAT", "Z_STAT"],
            GwasColumn::Pvalue => &[
                "PVALUE",
                "P",
                "PVAL",
                "P_VALUE",
                "P-VALUE",
                "P.VALUE",
                "WALD_P",
            ],
        }
    }
}

/// Header name bound to each understood column, as found in one file.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    pub bound: HashMap<GwasColumn, String>,
    pub info: Vec<String>,
}

impl ColumnMap {
    pub fn get(&self, column: GwasColumn) -> Option<&str> {
        self.bound.get(&column).map(|s| s.as_str())
    }

    pub fn has(&self, column: GwasColumn) -> bool {
        self.bound.contains_key(&column)
    }
}

/// Binds understood columns to file headers.
///
/// A column named in `userprovided` must exist in the file; otherwise
/// headers are matched case-insensitively against known synonyms.
pub fn resolve_column_map(
    headers: &[String],
    userprovided: &HashMap<GwasColumn, String>,
    filename: &str,
) -> Result<ColumnMap> {
    let mut map = ColumnMap::default();
    let mut taken: Vec<&str> = Vec::new();

    for column in GwasColumn::ALL {
        if let Some(user_col) = userprovided.get(&column) {
            let found = headers.iter().find(|h| h.trim() == user_col.trim());
            match found {
                Some(h) => {
                    map.info.push(format!(
                        "Interpreting the {h} column as {}, as requested.",
                        column.option_name()
                    ));
                    taken.push(h.as_str());
                    map.bound.insert(column, h.clone());
                }
                None => {
                    return Err(MetaxcanError::MissingColumn(format!(
                        "{user_col} (requested as {}) not found in {filename}",
                        column.option_name()
                    )));
                }
            }
        }
    }

    for column in GwasColumn::ALL {
        if map.bound.contains_key(&column) {
            continue;
        }
        let found = column.synonyms().iter().find_map(|syn| {
            headers
                .iter()
                .find(|h| h.trim().eq_ignore_ascii_case(syn) && !taken.contains(&h.as_str()))
        });
        if let Some(h) = found {
            map.info.push(format!(
                "Interpreting the {h} column as {}.",
                column.option_name()
            ));
            taken.push(h.as_str());
            map.bound.insert(column, h.clone());
        }
    }

    if !map.has(GwasColumn::Snp) {
        return Err(MetaxcanError::MissingColumn(format!(
            "no variant id column found in {filename}"
        )));
    }
    Ok(map)
}
