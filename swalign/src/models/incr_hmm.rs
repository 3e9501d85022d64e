//! The incremental-HMM variant (spec.md §4.8, SPEC_FULL.md §9), grounded on
//! `original_source/_incrHmmAligModel.h`: rather than a parallel model
//! class, this wraps an owned [`HmmModel`] plus the online-training
//! scratch state the incremental trainer needs between observation
//! batches.

use crate::accum::Accumulator;
use crate::corpus::SentencePair;
use crate::errors::Result;
use crate::models::hmm::{HmmAccum, HmmModel};
use crate::models::AlignmentModel;
use crate::tables::TableFormat;

/// An [`HmmModel`] plus the running sufficient-statistics accumulator and
/// observation counter an online trainer updates between batches (spec.md
/// §4.8's `alpha = 1 / (n + 1)` exponentially-forgetting schedule).
///
/// `baseline` is the HMM as of construction. Each update re-derives `hmm`
/// from `baseline` plus the persisted `running` accumulator rather than
/// folding `running` into `hmm`'s own tables call after call, which would
/// double-count the same decayed history on every update.
pub struct IncrHmmModel {
    baseline: HmmModel,
    hmm: HmmModel,
    running: HmmAccum,
    n: u64,
}

impl IncrHmmModel {
    /// Wraps a (possibly already batch-trained) HMM for incremental
    /// updates, starting with no observations folded yet.
    pub fn new(hmm: HmmModel) -> Self {
        Self {
            baseline: hmm.clone(),
            hmm,
            running: HmmAccum::default(),
            n: 0,
        }
    }

    /// Borrows the underlying HMM (for scoring/Viterbi between updates).
    pub fn hmm(&self) -> &HmmModel {
        &self.hmm
    }

    /// Folds one batch's worth of pairs into the running accumulator at
    /// `alpha = 1 / (n + 1)`, then re-derives `hmm` from `baseline` plus the
    /// now-updated `running` state. No global M-step ever runs over the
    /// whole corpus; `maximize` below only normalizes this one derived
    /// snapshot.
    pub fn update_batch(&mut self, vocab_size: usize, pairs: &[&SentencePair]) -> Result<f32> {
        let mut batch_acc = HmmAccum::default();
        let mut ll = 0.0f32;
        for &pair in pairs {
            let (acc, pair_ll) = self.hmm.accumulate_pair(vocab_size, pair)?;
            batch_acc.merge(acc);
            ll += pair_ll;
        }

        let alpha = 1.0 / (self.n as f32 + 1.0);
        self.running.fold_incremental(&batch_acc, alpha);
        self.n += 1;

        let mut next = self.baseline.clone();
        next.merge_accum(self.running.clone());
        next.maximize();
        for _ in 0..self.n {
            next.bump_iter();
        }
        self.hmm = next;
        Ok(ll)
    }

    /// The Viterbi alignment under the current (possibly mid-training)
    /// HMM state.
    pub fn best_alignment(&self, vocab_size: usize, pair: &SentencePair) -> (Vec<usize>, f32) {
        self.hmm.best_alignment(vocab_size, pair)
    }

    /// Saves the wrapped HMM's tables; the running accumulator and
    /// observation counter are training-only scratch state and are not
    /// persisted.
    pub fn save(&self, prefix: &str, format: TableFormat) -> Result<()> {
        self.hmm.save(prefix, format)
    }

    /// Loads a wrapped HMM, starting a fresh incremental-training session
    /// (`n = 0`, empty running accumulator).
    pub fn load(prefix: &str, format: TableFormat) -> Result<Self> {
        Ok(Self::new(HmmModel::load(prefix, format)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ibm1::Ibm1Model;

    fn toy_hmm() -> HmmModel {
        let mut ibm1 = Ibm1Model::new();
        let pair = SentencePair { src: vec![2, 3], trg: vec![9, 10], count: 1.0 };
        let (acc, _) = ibm1.accumulate_pair(20, &pair).unwrap();
        ibm1.merge_accum(acc);
        ibm1.maximize();
        HmmModel::from_ibm1(&ibm1)
    }

    #[test]
    fn test_update_batch_advances_iter_and_returns_finite_ll() {
        let mut model = IncrHmmModel::new(toy_hmm());
        let pair = SentencePair { src: vec![2, 3], trg: vec![9, 10], count: 1.0 };
        let ll = model.update_batch(20, &[&pair]).unwrap();
        assert!(ll.is_finite());
        assert_eq!(model.hmm().iter(), 1);
    }

    #[test]
    fn test_n_increments_per_batch() {
        let mut model = IncrHmmModel::new(toy_hmm());
        let pair = SentencePair { src: vec![2, 3], trg: vec![9, 10], count: 1.0 };
        model.update_batch(20, &[&pair]).unwrap();
        model.update_batch(20, &[&pair]).unwrap();
        assert_eq!(model.n, 2);
    }
}
