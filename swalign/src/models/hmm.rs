use hashbrown::HashMap;

use crate::accum::{merge_nested_cell_map, Accumulator};
use crate::common::{clamp_log, log_sum_exp, NULL_WORD, SW_PROB_SMOOTH};
use crate::corpus::SentencePair;
use crate::errors::{Result, SwAlignError};
use crate::models::ibm1::Ibm1Model;
use crate::models::{create_writer, open_reader, table_path, AlignmentModel};
use crate::tables::{Cell, HmmAlignTable, HmmKey, LexTable, ParamTable, SentenceLengthModel, TableFormat};
use crate::vocab::WordIndex;

/// The HMM alignment model (spec.md §4.4). States are source positions
/// `0..=slen`, with `0` the null state. The null state is modeled here as
/// an ordinary row of the transition table rather than a doubled
/// "last-real-position" state space — see `DESIGN.md` for the rationale;
/// this is a deliberate simplification of spec.md §3's "sticky return"
/// wording, not an oversight.
#[derive(Clone, Debug, Default)]
pub struct HmmModel {
    lex: LexTable,
    align: HmmAlignTable,
    sentlen: SentenceLengthModel,
    /// Linear-interpolation weight toward a uniform transition
    /// distribution (default `0.3`, spec.md §4.4).
    pub alig_smooth_interp_factor: f32,
    /// Linear-interpolation weight toward a uniform lexical distribution
    /// (default `0.1`, spec.md §4.4).
    pub lex_smooth_interp_factor: f32,
    iter: u64,
}

/// Sufficient statistics accumulated by one HMM E-step chunk.
#[derive(Clone, Default)]
pub struct HmmAccum {
    lex: HashMap<WordIndex, HashMap<WordIndex, Cell>>,
    align: HashMap<(u32, u32), Vec<Cell>>,
}

impl Accumulator for HmmAccum {
    fn merge(&mut self, other: Self) {
        merge_nested_cell_map(&mut self.lex, other.lex);
        for (k, row) in other.align {
            let into = self.align.entry(k).or_default();
            if into.len() < row.len() {
                into.resize(row.len(), Cell::ZERO);
            }
            for (i, c) in row.into_iter().enumerate() {
                into[i].num += c.num;
                into[i].den += c.den;
            }
        }
    }

    fn fold_incremental(&mut self, new: &Self, alpha: f32) {
        crate::accum::fold_nested_cell_map_incremental(&mut self.lex, &new.lex, alpha);
        for (&k, row) in &new.align {
            let into = self.align.entry(k).or_default();
            if into.len() < row.len() {
                into.resize(row.len(), Cell::ZERO);
            }
            for (i, c) in row.iter().enumerate() {
                into[i].num = crate::accum::fold_scalar(into[i].num, c.num, alpha);
                into[i].den = crate::accum::fold_scalar(into[i].den, c.den, alpha);
            }
        }
    }
}

impl HmmModel {
    /// Builds an HMM from a converged IBM1 model by deep-copying its
    /// lexical table (spec.md §9: the HMM and IBM2 are siblings
    /// constructed independently from IBM1, so IBM1's table is copied,
    /// not moved, when more than one successor needs it).
    pub fn from_ibm1(ibm1: &Ibm1Model) -> Self {
        Self {
            lex: ibm1.lex().clone(),
            align: HmmAlignTable::new(),
            sentlen: ibm1.sentlen().clone(),
            alig_smooth_interp_factor: crate::common::DEFAULT_ALIG_SMOOTH_INTERP_FACTOR,
            lex_smooth_interp_factor: crate::common::DEFAULT_LEX_SMOOTH_INTERP_FACTOR,
            iter: 0,
        }
    }

    /// Borrows the lexical table (used by `Ibm3Model::from_hmm`).
    pub fn lex(&self) -> &LexTable {
        &self.lex
    }

    /// Borrows the alignment-transition table (used by `Ibm3Model::from_hmm`
    /// to seed its own hillclimbing with the HMM's trained transitions
    /// rather than a flat distribution).
    pub fn align(&self) -> &HmmAlignTable {
        &self.align
    }

    /// Borrows the sentence-length model.
    pub fn sentlen(&self) -> &SentenceLengthModel {
        &self.sentlen
    }

    /// Smoothed `a(i | prev_i, slen)`, interpolated toward uniform per
    /// `alig_smooth_interp_factor`.
    pub fn align_prob(&self, prev_i: u32, i: u32, slen: u32) -> f32 {
        let key: HmmKey = (prev_i, slen, i);
        let (num, found) = self.align.get_num(key);
        let (den, _) = self.align.get_den(key);
        let raw = if found && den > 0.0 { num / den } else { SW_PROB_SMOOTH };
        let f = self.alig_smooth_interp_factor;
        if f <= 0.0 {
            raw
        } else {
            let uniform = 1.0 / (slen as f32 + 1.0);
            (1.0 - f) * raw + f * uniform
        }
    }

    /// Smoothed `p(t | s)`, interpolated toward uniform per
    /// `lex_smooth_interp_factor`.
    pub fn lex_prob(&self, s: WordIndex, t: WordIndex, vocab_size: usize) -> f32 {
        let raw = self.lex.prob(s, t, vocab_size);
        let f = self.lex_smooth_interp_factor;
        if f <= 0.0 {
            raw
        } else {
            let uniform = 1.0 / vocab_size.max(1) as f32;
            (1.0 - f) * raw + f * uniform
        }
    }

    /// Writes `.lexnd`, `.hmm_alignd`, and `.slmodel` at `<prefix>`.
    pub fn save(&self, prefix: &str, format: TableFormat) -> Result<()> {
        self.lex.print(create_writer(&table_path(prefix, "lexnd"))?, format)?;
        self.align
            .print(create_writer(&table_path(prefix, "hmm_alignd"))?, format)?;
        self.sentlen
            .print(create_writer(&table_path(prefix, "slmodel"))?, format)?;
        Ok(())
    }

    /// Loads a model previously saved with [`Self::save`]. Per spec.md §9's
    /// resolved open question, reading continues until EOF rather than
    /// stopping after the first binary record.
    pub fn load(prefix: &str, format: TableFormat) -> Result<Self> {
        let lex = LexTable::load(open_reader(&table_path(prefix, "lexnd"))?, format)?;
        let align = HmmAlignTable::load(open_reader(&table_path(prefix, "hmm_alignd"))?, format)?;
        let sentlen = SentenceLengthModel::load(open_reader(&table_path(prefix, "slmodel"))?, format)?;
        Ok(Self {
            lex,
            align,
            sentlen,
            alig_smooth_interp_factor: crate::common::DEFAULT_ALIG_SMOOTH_INTERP_FACTOR,
            lex_smooth_interp_factor: crate::common::DEFAULT_LEX_SMOOTH_INTERP_FACTOR,
            iter: 0,
        })
    }

    fn extended_src(src: &[WordIndex]) -> Vec<WordIndex> {
        let mut v = Vec::with_capacity(src.len() + 1);
        v.push(NULL_WORD);
        v.extend_from_slice(src);
        v
    }

    /// Forward algorithm in log-domain (spec.md §4.9/§4.11), returning
    /// `logZ`, the full forward lattice (`tlen` columns of `slen+1` log
    /// values), and the per-column emission log-probabilities (reused by
    /// the backward pass).
    fn forward(&self, src: &[WordIndex], trg: &[WordIndex], vocab_size: usize) -> (f32, Vec<Vec<f32>>, Vec<Vec<f32>>) {
        let slen1 = src.len();
        let tlen = trg.len();
        let mut emit = vec![vec![0.0f32; slen1]; tlen];
        for j in 0..tlen {
            for i in 0..slen1 {
                emit[j][i] = clamp_log(self.lex_prob(src[i], trg[j], vocab_size).max(SW_PROB_SMOOTH).ln());
            }
        }

        let mut alpha = vec![vec![f32::NEG_INFINITY; slen1]; tlen];
        let init = 1.0 / slen1 as f32;
        for i in 0..slen1 {
            alpha[0][i] = init.ln() + emit[0][i];
        }
        for j in 1..tlen {
            for i in 0..slen1 {
                let mut acc = f32::NEG_INFINITY;
                for prev_i in 0..slen1 {
                    let tp = clamp_log(self.align_prob(prev_i as u32, i as u32, (slen1 - 1) as u32).max(SW_PROB_SMOOTH).ln());
                    acc = log_sum_exp(acc, alpha[j - 1][prev_i] + tp);
                }
                alpha[j][i] = acc + emit[j][i];
            }
        }
        let mut log_z = f32::NEG_INFINITY;
        for i in 0..slen1 {
            log_z = log_sum_exp(log_z, alpha[tlen - 1][i]);
        }
        (log_z, alpha, emit)
    }
}

impl AlignmentModel for HmmModel {
    type Accum = HmmAccum;

    fn name(&self) -> &'static str {
        "hmm"
    }

    fn iter(&self) -> u64 {
        self.iter
    }

    fn accumulate_pair(&self, vocab_size: usize, pair: &SentencePair) -> Result<(Self::Accum, f32)> {
        let src = Self::extended_src(&pair.src);
        let slen1 = src.len();
        let tlen = pair.trg.len();
        let slen = (slen1 - 1) as u32;

        let (log_z, alpha, emit) = self.forward(&src, &pair.trg, vocab_size);
        if log_z.is_nan() {
            return Err(SwAlignError::Numeric("forward log-likelihood is NaN".into()));
        }

        let mut beta = vec![vec![f32::NEG_INFINITY; slen1]; tlen];
        for i in 0..slen1 {
            beta[tlen - 1][i] = 0.0;
        }
        for j in (0..tlen - 1).rev() {
            for i in 0..slen1 {
                let mut acc = f32::NEG_INFINITY;
                for next_i in 0..slen1 {
                    let tp = clamp_log(self.align_prob(i as u32, next_i as u32, slen).max(SW_PROB_SMOOTH).ln());
                    acc = log_sum_exp(acc, tp + emit[j + 1][next_i] + beta[j + 1][next_i]);
                }
                beta[j][i] = acc;
            }
        }

        let mut acc = HmmAccum::default();
        let mut ll = log_z * pair.count;

        for j in 0..tlen {
            let t = pair.trg[j];
            let mut gammas = vec![0.0f32; slen1];
            for i in 0..slen1 {
                gammas[i] = (alpha[j][i] + beta[j][i] - log_z).exp();
            }
            for (i, &s) in src.iter().enumerate() {
                let g = gammas[i] * pair.count;
                let outer = acc.lex.entry(s).or_default();
                let cell = outer.entry(t).or_insert(Cell::ZERO);
                cell.num += g;
                cell.den += g;
            }
        }

        for j in 1..tlen {
            for prev_i in 0..slen1 {
                let mut denom = f32::NEG_INFINITY;
                let mut xi_unnorm = vec![f32::NEG_INFINITY; slen1];
                for i in 0..slen1 {
                    let tp = clamp_log(self.align_prob(prev_i as u32, i as u32, slen).max(SW_PROB_SMOOTH).ln());
                    let v = alpha[j - 1][prev_i] + tp + emit[j][i] + beta[j][i];
                    xi_unnorm[i] = v;
                    denom = log_sum_exp(denom, v);
                }
                if denom == f32::NEG_INFINITY {
                    continue;
                }
                let outer = (prev_i as u32, slen);
                let row = acc.align.entry(outer).or_insert_with(|| vec![Cell::ZERO; slen1]);
                for (i, slot) in row.iter_mut().enumerate() {
                    let contribution = (xi_unnorm[i] - log_z).exp().max(0.0) * pair.count;
                    slot.num += contribution;
                    slot.den += contribution;
                }
            }
        }

        Ok((acc, ll))
    }

    fn merge_accum(&mut self, acc: Self::Accum) {
        for (s, inner) in acc.lex {
            for (t, cell) in inner {
                let (cur_num, _) = self.lex.get_num((s, t));
                let (cur_den, _) = self.lex.get_den((s, t));
                self.lex.set_num_den((s, t), cur_num + cell.num, cur_den + cell.den);
            }
        }
        for ((prev_i, slen), row) in acc.align {
            for (i, cell) in row.into_iter().enumerate() {
                let key: HmmKey = (prev_i, slen, i as u32);
                let (cur_num, _) = self.align.get_num(key);
                let (cur_den, _) = self.align.get_den(key);
                self.align.set_num_den(key, cur_num + cell.num, cur_den + cell.den);
            }
        }
    }

    fn maximize(&mut self) {
        self.lex.maximize();
        self.align.maximize();
    }

    fn bump_iter(&mut self) {
        self.iter += 1;
    }

    fn best_alignment(&self, vocab_size: usize, pair: &SentencePair) -> (Vec<usize>, f32) {
        crate::decode::hmm_viterbi(
            &self.lex,
            &self.align,
            self.lex_smooth_interp_factor,
            self.alig_smooth_interp_factor,
            &pair.src,
            &pair.trg,
            vocab_size,
        )
    }

    fn score_alignment(&self, vocab_size: usize, pair: &SentencePair, alignment: &[usize]) -> f32 {
        let src = Self::extended_src(&pair.src);
        let slen = pair.slen() as u32;
        let mut lg_prob = 0.0f32;
        let mut prev_i: Option<usize> = None;
        for (j, &t) in pair.trg.iter().enumerate() {
            let i = alignment[j];
            let s = src.get(i).copied().unwrap_or(NULL_WORD);
            let tp = match prev_i {
                Some(p) => self.align_prob(p as u32, i as u32, slen).max(SW_PROB_SMOOTH).ln(),
                None => (1.0 / src.len() as f32).ln(),
            };
            lg_prob += tp + self.lex_prob(s, t, vocab_size).max(SW_PROB_SMOOTH).ln();
            prev_i = Some(i);
        }
        lg_prob
    }
}
