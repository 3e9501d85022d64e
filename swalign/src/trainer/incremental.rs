//! Generic online trainer (spec.md §4.8, SPEC_FULL.md §9).
//!
//! [`IncrementalTrainer`] is the model-agnostic counterpart of
//! [`crate::models::IncrHmmModel`]: it drives any [`AlignmentModel`] through
//! the same `alpha = 1 / (n + 1)` exponentially-forgetting update without
//! assuming HMM-specific state. `IncrHmmModel` stays the concrete type named
//! by the `incr-hmm` CLI model, since spec.md §8's scenario 5 names it
//! directly; this wrapper exists for the other variants' online use.

use crate::accum::Accumulator;
use crate::corpus::SentencePair;
use crate::errors::Result;
use crate::models::AlignmentModel;

/// Wraps a batch-capable model plus the running accumulator and observation
/// counter an online training loop needs between calls to [`Self::update`].
///
/// `baseline` is the model's state as of construction (whatever batch
/// pretraining the caller already did, if any). Every update re-derives the
/// live model by merging `baseline` with the persisted, exponentially-
/// decayed `running` accumulator, rather than folding `running` into the
/// model's own tables call after call — that would double-count the same
/// decayed history on every update.
pub struct IncrementalTrainer<M: AlignmentModel + Clone> {
    baseline: M,
    model: M,
    running: M::Accum,
    n: u64,
}

impl<M: AlignmentModel + Clone> IncrementalTrainer<M> {
    /// Wraps `model` for incremental updates, starting with no observations
    /// folded into the running accumulator yet.
    pub fn new(model: M) -> Self {
        Self {
            baseline: model.clone(),
            model,
            running: M::Accum::default(),
            n: 0,
        }
    }

    /// Borrows the wrapped model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Unwraps the trainer, discarding the running accumulator and
    /// observation count.
    pub fn into_model(self) -> M {
        self.model
    }

    /// Number of batches folded so far.
    pub fn observation_count(&self) -> u64 {
        self.n
    }

    /// Computes one batch's E-step, folds it into the running accumulator at
    /// `alpha = 1 / (n + 1)` (spec.md §4.8's `S_n = (1-alpha_n) S_{n-1} +
    /// alpha_n x_n`), then re-derives the model from `baseline` plus the
    /// now-updated `running` state. No global M-step ever runs over the
    /// whole corpus; the `maximize` call below only normalizes this one
    /// derived snapshot, not a re-accumulation across every past update.
    pub fn update(&mut self, vocab_size: usize, pairs: &[&SentencePair]) -> Result<f32> {
        let mut batch_acc = M::Accum::default();
        let mut ll = 0.0f32;
        for &pair in pairs {
            let (acc, pair_ll) = self.model.accumulate_pair(vocab_size, pair)?;
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
        self.model = next;
        Ok(ll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ibm1Model;

    #[test]
    fn test_update_advances_iter_and_observation_count() {
        let mut trainer = IncrementalTrainer::new(Ibm1Model::new());
        let pair = SentencePair {
            src: vec![2, 3],
            trg: vec![5, 6],
            count: 1.0,
        };
        let ll = trainer.update(10, &[&pair]).unwrap();
        assert!(ll.is_finite());
        assert_eq!(trainer.observation_count(), 1);
        assert_eq!(trainer.model().iter(), 1);

        trainer.update(10, &[&pair]).unwrap();
        assert_eq!(trainer.observation_count(), 2);
    }
}
