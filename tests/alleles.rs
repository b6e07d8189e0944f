use metaxcan::alleles::{
    Orientation, PalindromicPolicy, is_palindromic, is_snp, is_valid_allele, reconcile,
};

#[test]
fn literal_and_swapped_pairs() {
    assert_eq!(reconcile(("A", "G"), ("A", "G")), Some(Orientation::Same));
    assert_eq!(reconcile(("G", "A"), ("A", "G")), Some(Orientation::Swapped));
    assert_eq!(Orientation::Same.sign(), 1.0);
    assert_eq!(Orientation::Swapped.sign(), -1.0);
}

#[test]
fn strand_complements() {
    assert_eq!(reconcile(("T", "C"), ("A", "G")), Some(Orientation::StrandFlipped));
    assert_eq!(
        reconcile(("C", "T"), ("A", "G")),
        Some(Orientation::StrandFlippedSwapped)
    );
    assert_eq!(Orientation::StrandFlipped.sign(), 1.0);
    assert_eq!(Orientation::StrandFlippedSwapped.sign(), -1.0);
}

#[test]
fn palindromic_match_is_not_negated() {
    assert!(is_palindromic("A", "T"));
    assert!(is_palindromic("G", "C"));
    assert!(!is_palindromic("A", "G"));
    assert_eq!(reconcile(("A", "T"), ("A", "T")), Some(Orientation::Same));
    assert_eq!(reconcile(("T", "A"), ("A", "T")), Some(Orientation::Swapped));
}

#[test]
fn strand_flip_needs_single_nucleotides() {
    assert!(is_snp("A", "G"));
    assert!(!is_snp("AT", "G"));
    assert_eq!(reconcile(("AT", "G"), ("AT", "G")), Some(Orientation::Same));
    assert_eq!(reconcile(("G", "AT"), ("AT", "G")), Some(Orientation::Swapped));
    assert_eq!(reconcile(("TA", "C"), ("AT", "G")), None);
    assert_eq!(reconcile(("A", "C"), ("A", "G")), None);
}

#[test]
fn reconciling_twice_restores_the_statistic() {
    let pairs = [("A", "G"), ("G", "A"), ("T", "C"), ("C", "T"), ("A", "T")];
    let model = ("A", "G");
    for gwas in pairs {
        let Some(orientation) = reconcile(gwas, model) else {
            continue;
        };
        let z = 1.7;
        let aligned = z * orientation.sign();
        let back = reconcile(model, gwas).expect("symmetric reconciliation");
        assert_eq!(aligned * back.sign(), z);
    }
}

#[test]
fn allele_validation() {
    assert!(is_valid_allele("ACGT"));
    assert!(!is_valid_allele(""));
    assert!(!is_valid_allele("a"));
    assert!(!is_valid_allele("N"));
}

#[test]
fn palindromic_policy_parses() {
    assert_eq!("keep".parse::<PalindromicPolicy>().expect("keep"), PalindromicPolicy::Keep);
    assert_eq!("DROP".parse::<PalindromicPolicy>().expect("drop"), PalindromicPolicy::Drop);
    assert!("maybe".parse::<PalindromicPolicy>().is_err());
}
