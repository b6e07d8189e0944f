use std::str::FromStr;

use crate::error::MetaxcanError;

/// How a GWAS allele pair relates to a model allele pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Same,
    Swapped,
    StrandFlipped,
    StrandFlippedSwapped,
}

impl Orientation {
    /// Factor that carries a GWAS signed statistic onto the model effect allele.
    pub fn sign(&self) -> f64 {
        match self {
            Orientation::Same | Orientation::StrandFlipped => 1.0,
            Orientation::Swapped | Orientation::StrandFlippedSwapped => -1.0,
        }
    }
}

/// Whether strand-ambiguous (A/T, C/G) variants take part in the association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PalindromicPolicy {
    Keep,
    Drop,
}

impl FromStr for PalindromicPolicy {
    type Err = MetaxcanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(PalindromicPolicy::Keep),
            "drop" => Ok(PalindromicPolicy::Drop),
            other => Err(MetaxcanError::Configuration(format!(
                "Unknown palindromic policy: {other} (expected keep or drop)"
            ))),
        }
    }
}

pub fn is_valid_allele(allele: &str) -> bool {
    !allele.is_empty() && allele.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T'))
}

pub fn is_snp(a1: &str, a2: &str) -> bool {
    a1.len() == 1 && a2.len() == 1 && is_valid_allele(a1) && is_valid_allele(a2)
}

pub fn is_palindromic(a1: &str, a2: &str) -> bool {
    matches!((a1, a2), ("A", "T") | ("T", "A") | ("C", "G") | ("G", "C"))
}

fn complement(allele: &str) -> &'static str {
    match allele {
        "A" => "T",
        "T" => "A",
        "C" => "G",
        "G" => "C",
        _ => "",
    }
}

/// Reconciles GWAS alleles against model alleles.
///
/// Literal matches are tried before strand complements, so a palindromic
/// pair that matches as written is never negated.
pub fn reconcile(gwas: (&str, &str), model: (&str, &str)) -> Option<Orientation> {
    let (ge, gn) = gwas;
    let (me, mn) = model;
    if ge == me && gn == mn {
        return Some(Orientation::Same);
    }
    if ge == mn && gn == me {
        return Some(Orientation::Swapped);
    }
    if !is_snp(ge, gn) || !is_snp(me, mn) {
        return None;
    }
    let (ce, cn) = (complement(me), complement(mn));
    if ge == ce && gn == cn {
        return Some(Orientation::StrandFlipped);
    }
    if ge == cn && gn == ce {
        return Some(Orientation::StrandFlippedSwapped);
    }
    None
}
