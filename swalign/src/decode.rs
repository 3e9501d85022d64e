//! Viterbi and forward-backward routines shared by the HMM-family models
//! (spec.md §4.9). Generalizes the teacher's backpointer-chasing lattice
//! traversal (`tokenizer::lattice::Lattice::append_top_nodes`) from a word
//! lattice to an alignment trellis, and factors out the HMM transition
//! model so IBM3/IBM4's hillclimbing seed can reuse the same trellis code
//! instead of duplicating it per model.

use std::cell::RefCell;

use hashbrown::HashMap;

use crate::common::{clamp_log, log_sum_exp, NULL_WORD, SW_PROB_SMOOTH};
use crate::tables::{HmmAlignTable, LexTable, ParamTable};
use crate::vocab::WordIndex;

fn extended_src(src: &[WordIndex]) -> Vec<WordIndex> {
    let mut v = Vec::with_capacity(src.len() + 1);
    v.push(NULL_WORD);
    v.extend_from_slice(src);
    v
}

fn smoothed_align_prob(align: &HmmAlignTable, prev_i: u32, i: u32, slen: u32, smooth_factor: f32) -> f32 {
    let key = (prev_i, slen, i);
    let (num, found) = align.get_num(key);
    let (den, _) = align.get_den(key);
    let raw = if found && den > 0.0 { num / den } else { SW_PROB_SMOOTH };
    if smooth_factor <= 0.0 {
        raw
    } else {
        let uniform = 1.0 / (slen as f32 + 1.0);
        (1.0 - smooth_factor) * raw + smooth_factor * uniform
    }
}

fn smoothed_lex_prob(lex: &LexTable, s: WordIndex, t: WordIndex, vocab_size: usize, smooth_factor: f32) -> f32 {
    let raw = lex.prob(s, t, vocab_size);
    if smooth_factor <= 0.0 {
        raw
    } else {
        let uniform = 1.0 / vocab_size.max(1) as f32;
        (1.0 - smooth_factor) * raw + smooth_factor * uniform
    }
}

/// Full Viterbi search over the HMM trellis (spec.md §4.9). `PositionIndex`
/// values in the returned path are `0` for null, `1..=slen` otherwise.
/// This is the seed used by IBM3/IBM4's hillclimbing as well as the HMM
/// model's own `best_alignment`.
pub fn hmm_viterbi(
    lex: &LexTable,
    align: &HmmAlignTable,
    lex_smooth: f32,
    align_smooth: f32,
    src: &[WordIndex],
    trg: &[WordIndex],
    vocab_size: usize,
) -> (Vec<usize>, f32) {
    let ext = extended_src(src);
    let slen1 = ext.len();
    let tlen = trg.len();
    if tlen == 0 {
        return (Vec::new(), 0.0);
    }
    let slen = (slen1 - 1) as u32;

    let mut delta = vec![vec![f32::NEG_INFINITY; slen1]; tlen];
    let mut back = vec![vec![0usize; slen1]; tlen];
    let init = 1.0 / slen1 as f32;
    for i in 0..slen1 {
        let emit = clamp_log(smoothed_lex_prob(lex, ext[i], trg[0], vocab_size, lex_smooth).max(SW_PROB_SMOOTH).ln());
        delta[0][i] = init.ln() + emit;
    }
    for j in 1..tlen {
        for i in 0..slen1 {
            let emit = clamp_log(smoothed_lex_prob(lex, ext[i], trg[j], vocab_size, lex_smooth).max(SW_PROB_SMOOTH).ln());
            let mut best = f32::NEG_INFINITY;
            let mut best_prev = 0usize;
            for prev_i in 0..slen1 {
                let tp = clamp_log(smoothed_align_prob(align, prev_i as u32, i as u32, slen, align_smooth).max(SW_PROB_SMOOTH).ln());
                let v = delta[j - 1][prev_i] + tp;
                if v > best {
                    best = v;
                    best_prev = prev_i;
                }
            }
            delta[j][i] = best + emit;
            back[j][i] = best_prev;
        }
    }

    let mut last = 0usize;
    let mut best = f32::NEG_INFINITY;
    for i in 0..slen1 {
        if delta[tlen - 1][i] > best {
            best = delta[tlen - 1][i];
            last = i;
        }
    }
    let mut path = vec![0usize; tlen];
    path[tlen - 1] = last;
    for j in (1..tlen).rev() {
        last = back[j][last];
        path[j - 1] = last;
    }
    (path, best)
}

/// Forward algorithm in log-domain (spec.md §4.9), returning `logZ`.
pub fn forward_log_likelihood(
    lex: &LexTable,
    align: &HmmAlignTable,
    lex_smooth: f32,
    align_smooth: f32,
    src: &[WordIndex],
    trg: &[WordIndex],
    vocab_size: usize,
) -> f32 {
    let ext = extended_src(src);
    let slen1 = ext.len();
    let tlen = trg.len();
    if tlen == 0 {
        return 0.0;
    }
    let slen = (slen1 - 1) as u32;

    let mut alpha = vec![f32::NEG_INFINITY; slen1];
    let init = 1.0 / slen1 as f32;
    for (i, slot) in alpha.iter_mut().enumerate() {
        let emit = clamp_log(smoothed_lex_prob(lex, ext[i], trg[0], vocab_size, lex_smooth).max(SW_PROB_SMOOTH).ln());
        *slot = init.ln() + emit;
    }
    for &t in trg.iter().skip(1) {
        let mut next = vec![f32::NEG_INFINITY; slen1];
        for i in 0..slen1 {
            let emit = clamp_log(smoothed_lex_prob(lex, ext[i], t, vocab_size, lex_smooth).max(SW_PROB_SMOOTH).ln());
            let mut acc = f32::NEG_INFINITY;
            for prev_i in 0..slen1 {
                let tp = clamp_log(smoothed_align_prob(align, prev_i as u32, i as u32, slen, align_smooth).max(SW_PROB_SMOOTH).ln());
                acc = log_sum_exp(acc, alpha[prev_i] + tp);
            }
            next[i] = acc + emit;
        }
        alpha = next;
    }
    alpha.into_iter().fold(f32::NEG_INFINITY, log_sum_exp)
}

/// Memoizes `log a(i | prev_i, slen)` for repeated trellis evaluations
/// against the same source sentence (spec.md §4.9), amortizing lookups
/// when IBM3/IBM4 hillclimbing rescans many swap/move neighbors.
pub struct CachedHmmAligLgProb<'a> {
    align: &'a HmmAlignTable,
    smooth_factor: f32,
    cache: RefCell<HashMap<(u32, u32, u32), f32>>,
}

impl<'a> CachedHmmAligLgProb<'a> {
    /// Creates a cache over `align`, smoothing lookups by `smooth_factor`.
    pub fn new(align: &'a HmmAlignTable, smooth_factor: f32) -> Self {
        Self {
            align,
            smooth_factor,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// `log a(i | prev_i, slen)`, computed once per distinct key.
    pub fn log_prob(&self, prev_i: u32, i: u32, slen: u32) -> f32 {
        let key = (prev_i, i, slen);
        if let Some(&v) = self.cache.borrow().get(&key) {
            return v;
        }
        let v = clamp_log(smoothed_align_prob(self.align, prev_i, i, slen, self.smooth_factor).max(SW_PROB_SMOOTH).ln());
        self.cache.borrow_mut().insert(key, v);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::ParamTable;

    #[test]
    fn test_viterbi_prefers_strong_lex_entry() {
        let mut lex = LexTable::new();
        lex.set_num_den((1, 9), 9.0, 10.0);
        lex.set_num_den((2, 9), 1.0, 10.0);
        let align = HmmAlignTable::new();
        let (path, _) = hmm_viterbi(&lex, &align, 0.0, 0.0, &[1, 2], &[9], 20);
        assert_eq!(path, vec![1]);
    }

    #[test]
    fn test_cached_log_prob_is_stable_across_calls() {
        let mut align = HmmAlignTable::new();
        align.set_num_den((0, 3, 1), 3.0, 4.0);
        let cache = CachedHmmAligLgProb::new(&align, 0.0);
        let a = cache.log_prob(0, 1, 3);
        let b = cache.log_prob(0, 1, 3);
        assert_eq!(a, b);
    }
}
