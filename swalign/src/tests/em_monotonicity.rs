//! spec.md §8: "EM monotonicity" — per-iteration training log-likelihood
//! is non-decreasing (within tolerance `1e-4`) for IBM1, IBM2, and HMM on
//! any fixed corpus.

use std::sync::atomic::AtomicBool;

use crate::corpus::SentencePairStore;
use crate::models::{HmmModel, Ibm1Model, Ibm2Model};
use crate::trainer::{train_sent_pair_range, TrainingConfig};
use crate::vocab::Vocabulary;

const TOLERANCE: f32 = 1e-4;

fn toy_corpus() -> SentencePairStore {
    let mut vocab = Vocabulary::new();
    SentencePairStore::load::<_, _, &[u8]>(
        "the cat sat\nthe dog ran\na cat ran\nthe dog sat\n".as_bytes(),
        "le chat assis\nle chien courut\nun chat courut\nle chien assis\n".as_bytes(),
        None,
        &mut vocab,
    )
    .unwrap()
}

fn assert_nondecreasing(lls: &[f32]) {
    for pair in lls.windows(2) {
        assert!(
            pair[1] >= pair[0] - TOLERANCE,
            "log-likelihood decreased beyond tolerance: {} -> {}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_ibm1_log_likelihood_is_nondecreasing() {
    let corpus = toy_corpus();
    let vocab_size = 32;
    let mut model = Ibm1Model::new();
    let cfg = TrainingConfig::new();
    let cancel = AtomicBool::new(false);
    let mut lls = Vec::new();
    for _ in 0..6 {
        lls.push(train_sent_pair_range(&mut model, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap());
    }
    assert_nondecreasing(&lls);
}

#[test]
fn test_ibm2_log_likelihood_is_nondecreasing() {
    let corpus = toy_corpus();
    let vocab_size = 32;
    let cfg = TrainingConfig::new();
    let cancel = AtomicBool::new(false);

    let mut ibm1 = Ibm1Model::new();
    for _ in 0..3 {
        train_sent_pair_range(&mut ibm1, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap();
    }
    let mut model = Ibm2Model::from_ibm1(ibm1);
    let mut lls = Vec::new();
    for _ in 0..6 {
        lls.push(train_sent_pair_range(&mut model, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap());
    }
    assert_nondecreasing(&lls);
}

#[test]
fn test_hmm_log_likelihood_is_nondecreasing() {
    let corpus = toy_corpus();
    let vocab_size = 32;
    let cfg = TrainingConfig::new();
    let cancel = AtomicBool::new(false);

    let mut ibm1 = Ibm1Model::new();
    for _ in 0..3 {
        train_sent_pair_range(&mut ibm1, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap();
    }
    let mut model = HmmModel::from_ibm1(&ibm1);
    let mut lls = Vec::new();
    for _ in 0..6 {
        lls.push(train_sent_pair_range(&mut model, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap());
    }
    assert_nondecreasing(&lls);
}
