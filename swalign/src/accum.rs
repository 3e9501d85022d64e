//! Thread-local sufficient-statistics accumulators shared by the model
//! family's batch and incremental trainers.
//!
//! Each model defines its own accumulator struct (one `HashMap<Key, Cell>`
//! per owned table) and implements [`Accumulator`] in terms of the helpers
//! here, so the batch trainer's chunk-merge and the incremental trainer's
//! exponentially-forgetting fold share one implementation per field instead
//! of being hand-rolled per model.

use std::hash::Hash;

use hashbrown::HashMap;

use crate::common::log_sum_exp;
use crate::tables::Cell;

/// A type a model's E-step accumulates sufficient statistics into.
///
/// `merge` combines two chunk-local accumulators additively (spec.md §4.7
/// step 2: "accumulation is commutative and associative"). `fold_incremental`
/// implements spec.md §4.8's exponentially-forgetting log-domain update.
pub trait Accumulator: Default + Clone + Send {
    /// Additively combines `other` into `self` (batch chunk merge).
    fn merge(&mut self, other: Self);
    /// Folds `new` into `self` as `log((1-alpha)*exp(self) + alpha*exp(new))`
    /// per-entry, computed via log-sum-exp (spec.md §4.8).
    fn fold_incremental(&mut self, new: &Self, alpha: f32);
}

/// Additively merges `from` into `into`, summing both fields of matching
/// cells and inserting absent ones.
pub fn merge_cell_map<K: Eq + Hash + Copy>(into: &mut HashMap<K, Cell>, from: HashMap<K, Cell>) {
    for (k, c) in from {
        let e = into.entry(k).or_insert(Cell::ZERO);
        e.num += c.num;
        e.den += c.den;
    }
}

/// Additively merges `from` into `into` for nested `outer -> inner` maps
/// (the lexicon's two-level shape).
pub fn merge_nested_cell_map<O: Eq + Hash + Copy, I: Eq + Hash + Copy>(
    into: &mut HashMap<O, HashMap<I, Cell>>,
    from: HashMap<O, HashMap<I, Cell>>,
) {
    for (outer, inner_from) in from {
        let inner_into = into.entry(outer).or_default();
        merge_cell_map(inner_into, inner_from);
    }
}

/// Folds `new`'s cells into `into` per spec.md §4.8, via log-sum-exp on
/// each field independently.
pub fn fold_cell_map_incremental<K: Eq + Hash + Copy>(
    into: &mut HashMap<K, Cell>,
    new: &HashMap<K, Cell>,
    alpha: f32,
) {
    for (&k, c) in new {
        let e = into.entry(k).or_insert(Cell::ZERO);
        e.num = fold_scalar(e.num, c.num, alpha);
        e.den = fold_scalar(e.den, c.den, alpha);
    }
}

/// Folds `new`'s cells into `into` for nested `outer -> inner` maps.
pub fn fold_nested_cell_map_incremental<O: Eq + Hash + Copy, I: Eq + Hash + Copy>(
    into: &mut HashMap<O, HashMap<I, Cell>>,
    new: &HashMap<O, HashMap<I, Cell>>,
    alpha: f32,
) {
    for (&outer, inner_new) in new {
        let inner_into = into.entry(outer).or_default();
        fold_cell_map_incremental(inner_into, inner_new, alpha);
    }
}

/// `log((1-alpha)*exp(curr) + alpha*exp(new))`, with both inputs treated as
/// plain (non-log) magnitudes: they are converted to log-space, folded via
/// [`log_sum_exp`], then converted back, so the numerically-sensitive part
/// of spec.md §4.8's update runs in log-space even though suffstat cells are
/// stored as ordinary floats elsewhere in this crate.
pub fn fold_scalar(curr: f32, new: f32, alpha: f32) -> f32 {
    let curr = curr.max(1e-30);
    let new = new.max(1e-30);
    let l1 = (1.0 - alpha).ln() + curr.ln();
    let l2 = alpha.ln() + new.ln();
    log_sum_exp(l1, l2).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_cell_map_sums_fields() {
        let mut into = HashMap::new();
        into.insert(1u32, Cell { num: 2.0, den: 4.0 });
        let mut from = HashMap::new();
        from.insert(1u32, Cell { num: 1.0, den: 1.0 });
        from.insert(2u32, Cell { num: 3.0, den: 3.0 });
        merge_cell_map(&mut into, from);
        assert_eq!(into[&1], Cell { num: 3.0, den: 5.0 });
        assert_eq!(into[&2], Cell { num: 3.0, den: 3.0 });
    }

    #[test]
    fn test_fold_incremental_converges_toward_new_as_alpha_grows() {
        let mut into = HashMap::new();
        into.insert(1u32, Cell { num: 0.0, den: 0.0 });
        let mut new = HashMap::new();
        new.insert(1u32, Cell { num: 10.0, den: 20.0 });
        fold_cell_map_incremental(&mut into, &new, 1.0);
        assert!((into[&1].num - 10.0).abs() < 1e-2);
        assert!((into[&1].den - 20.0).abs() < 1e-2);
    }
}
