//! spec.md §8 scenarios 1, 2, and 5 describe exact alignments/probabilities
//! produced by training on "the pig-latin toy corpus embedded in the test
//! suite" of the original tool. That corpus's text was not part of the
//! retrieved sources this crate was built from, so the literal alignments
//! and the `0.2905` probability cannot be reproduced bit-for-bit here.
//! Instead, this test exercises the same transfer chain spec.md §9
//! describes (IBM1 -> IBM2/HMM -> IBM3 -> IBM4) end to end on a small
//! synthetic parallel corpus and checks the structural properties those
//! scenarios depend on: every stage trains without producing non-finite
//! log-likelihoods, and the resulting IBM4 model's best alignment is a
//! well-formed permutation-with-nulls over the source positions.

use std::sync::atomic::AtomicBool;

use crate::corpus::SentencePairStore;
use crate::models::{AlignmentModel, HmmModel, Ibm1Model, Ibm2Model, Ibm3Model, Ibm4Model};
use crate::trainer::{train_sent_pair_range, TrainingConfig};
use crate::vocab::Vocabulary;
use crate::wordclass::WordClassMap;

#[test]
fn test_ibm1_through_ibm4_transfer_chain_trains_and_aligns() {
    let mut vocab = Vocabulary::new();
    let corpus = SentencePairStore::load::<_, _, &[u8]>(
        "isthay isyay away esttay\nisthay isyay otnay away esttay\nheyay unray esttay\n"
            .as_bytes(),
        "this is a test\nthis is not a test\nhe ran test\n".as_bytes(),
        None,
        &mut vocab,
    )
    .unwrap();
    let vocab_size = vocab.len();
    let cfg = TrainingConfig::new();
    let cancel = AtomicBool::new(false);
    let max_fertility = 9;

    let mut ibm1 = Ibm1Model::new();
    for _ in 0..5 {
        let ll = train_sent_pair_range(&mut ibm1, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap();
        assert!(ll.is_finite());
    }

    let mut ibm2 = Ibm2Model::from_ibm1(ibm1.clone());
    for _ in 0..5 {
        let ll = train_sent_pair_range(&mut ibm2, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap();
        assert!(ll.is_finite());
    }

    let mut hmm = HmmModel::from_ibm1(&ibm1);
    for _ in 0..5 {
        let ll = train_sent_pair_range(&mut hmm, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap();
        assert!(ll.is_finite());
    }

    let mut ibm3 = Ibm3Model::from_hmm(&hmm, max_fertility);
    for _ in 0..3 {
        let ll = train_sent_pair_range(&mut ibm3, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap();
        assert!(ll.is_finite());
    }

    let classes = WordClassMap::new();
    let mut ibm4 = Ibm4Model::from_ibm3(&ibm3, &classes);
    for _ in 0..3 {
        let ll = train_sent_pair_range(&mut ibm4, &corpus, vocab_size, 0, corpus.len(), &cfg, &cancel).unwrap();
        assert!(ll.is_finite());
    }

    let (_, pair) = corpus.iter().next().expect("corpus has at least one pair");
    let (alignment, lg) = ibm4.best_alignment(vocab_size, pair);
    assert_eq!(alignment.len(), pair.tlen());
    assert!(alignment.iter().all(|&i| i <= pair.slen()));
    assert!(lg.is_finite());
}
