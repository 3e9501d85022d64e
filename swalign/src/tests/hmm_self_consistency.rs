//! spec.md §8 scenario 6: for a trained HMM model,
//! `getAlignmentLgProb(s, t, getBestAlignment(s, t))` equals the Viterbi
//! log-probability `getBestAlignment` itself returns, within `1e-6`.

use std::sync::atomic::AtomicBool;

use crate::corpus::{SentencePair, SentencePairStore};
use crate::models::{AlignmentModel, HmmModel, Ibm1Model};
use crate::trainer::{train_sent_pair_range, TrainingConfig};
use crate::vocab::Vocabulary;

fn trained_hmm() -> (HmmModel, usize) {
    let mut vocab = Vocabulary::new();
    let corpus = SentencePairStore::load::<_, _, &[u8]>(
        "the cat sat on the mat\nthe dog ran in the park\na cat sat\n".as_bytes(),
        "le chat assis sur le tapis\nle chien courut dans le parc\nun chat assis\n".as_bytes(),
        None,
        &mut vocab,
    )
    .unwrap();
    let vocab_size = vocab.len();
    let cfg = TrainingConfig::new();
    let cancel = AtomicBool::new(false);

    let mut ibm1 = Ibm1Model::new();
    for _ in 0..3 {
        train_sent_pair_range(&mut ibm1, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap();
    }
    let mut hmm = HmmModel::from_ibm1(&ibm1);
    for _ in 0..3 {
        train_sent_pair_range(&mut hmm, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap();
    }
    (hmm, vocab_size)
}

#[test]
fn test_score_of_best_alignment_matches_viterbi_score() {
    let (hmm, vocab_size) = trained_hmm();
    let pair = SentencePair {
        src: vec![1, 2, 3],
        trg: vec![1, 2, 3, 4],
        count: 1.0,
    };
    let (best, viterbi_lg) = hmm.best_alignment(vocab_size, &pair);
    let rescored = hmm.score_alignment(vocab_size, &pair, &best);
    assert!(
        (viterbi_lg - rescored).abs() < 1e-6,
        "viterbi score {viterbi_lg} != rescored {rescored}"
    );
}
