use hashbrown::HashMap;

use crate::accum::{merge_nested_cell_map, Accumulator};
use crate::common::{NULL_WORD, SW_PROB_SMOOTH};
use crate::corpus::SentencePair;
use crate::errors::Result;
use crate::models::hmm::HmmModel;
use crate::models::{create_writer, open_reader, table_path, AlignmentModel};
use crate::tables::{
    Cell, FertilityTable, HmmAlignTable, Ibm2AlignTable, LexTable, ParamTable, SentenceLengthModel, TableFormat,
};
use crate::vocab::WordIndex;

/// IBM Model 3's position-dependent distortion `d(j | i, slen, tlen)`.
/// Structurally identical to [`Ibm2AlignTable`]'s outer/dense-inner shape
/// (spec.md §4.1), just reinterpreted: the conditioning key is
/// `(i, slen, tlen)` and the dense inner vector is indexed by the target
/// position `j` instead of the source position.
pub type DistortionTable = Ibm2AlignTable;

/// IBM Model 3 (spec.md §4.5): adds fertility and positional distortion to
/// the lexical table, plus the null-generation Bernoulli `p1`.
#[derive(Clone, Debug)]
pub struct Ibm3Model {
    lex: LexTable,
    fertility: FertilityTable,
    distortion: DistortionTable,
    sentlen: SentenceLengthModel,
    /// The HMM's trained transition table, carried over unchanged to seed
    /// hillclimbing's starting alignment (spec.md §4.5: "use hillclimbing
    /// from a seed alignment (IBM2/HMM Viterbi alignment)"). IBM3 does not
    /// train this table itself.
    align: HmmAlignTable,
    /// Interpolation weight used when scoring `align` during seeding,
    /// carried over from the HMM (spec.md §4.4).
    alig_smooth_interp_factor: f32,
    /// Null-generation probability (spec.md §3, §4.5).
    pub p1: f32,
    iter: u64,
}

impl Default for Ibm3Model {
    fn default() -> Self {
        Self {
            lex: LexTable::default(),
            fertility: FertilityTable::new(crate::common::DEFAULT_MAX_FERTILITY),
            distortion: DistortionTable::default(),
            sentlen: SentenceLengthModel::default(),
            align: HmmAlignTable::new(),
            alig_smooth_interp_factor: crate::common::DEFAULT_ALIG_SMOOTH_INTERP_FACTOR,
            p1: 0.2,
            iter: 0,
        }
    }
}

/// Sufficient statistics accumulated by one IBM3 E-step chunk.
#[derive(Clone, Default)]
pub struct Ibm3Accum {
    lex: HashMap<WordIndex, HashMap<WordIndex, Cell>>,
    fertility: HashMap<WordIndex, Vec<Cell>>,
    distortion: HashMap<(u32, u32, u32), Vec<Cell>>,
    p1_num: f32,
    p1_den: f32,
}

impl Accumulator for Ibm3Accum {
    fn merge(&mut self, other: Self) {
        merge_nested_cell_map(&mut self.lex, other.lex);
        for (k, row) in other.fertility {
            let into = self.fertility.entry(k).or_default();
            if into.len() < row.len() {
                into.resize(row.len(), Cell::ZERO);
            }
            for (i, c) in row.into_iter().enumerate() {
                into[i].num += c.num;
                into[i].den += c.den;
            }
        }
        for (k, row) in other.distortion {
            let into = self.distortion.entry(k).or_default();
            if into.len() < row.len() {
                into.resize(row.len(), Cell::ZERO);
            }
            for (i, c) in row.into_iter().enumerate() {
                into[i].num += c.num;
                into[i].den += c.den;
            }
        }
        self.p1_num += other.p1_num;
        self.p1_den += other.p1_den;
    }

    fn fold_incremental(&mut self, new: &Self, alpha: f32) {
        crate::accum::fold_nested_cell_map_incremental(&mut self.lex, &new.lex, alpha);
        self.p1_num = crate::accum::fold_scalar(self.p1_num, new.p1_num, alpha);
        self.p1_den = crate::accum::fold_scalar(self.p1_den, new.p1_den, alpha);
    }
}

/// A full alignment mapping each target position to a source position
/// (`0` = null), used during hillclimbing.
type Alignment = Vec<usize>;

impl Ibm3Model {
    /// Builds an IBM3 model from a converged HMM, deep-copying its
    /// lexical table (spec.md §9: construction-as-transfer) and its trained
    /// transition table so hillclimbing's seed alignment reflects the HMM's
    /// learned positional structure rather than a flat distribution.
    pub fn from_hmm(hmm: &HmmModel, max_fertility: u32) -> Self {
        Self {
            lex: hmm.lex().clone(),
            fertility: FertilityTable::new(max_fertility),
            distortion: DistortionTable::new(),
            sentlen: hmm.sentlen().clone(),
            align: hmm.align().clone(),
            alig_smooth_interp_factor: hmm.alig_smooth_interp_factor,
            p1: 0.2,
            iter: 0,
        }
    }

    /// Borrows the lexical table (used by `Ibm4Model::from_ibm3`).
    pub fn lex(&self) -> &LexTable {
        &self.lex
    }

    /// Borrows the fertility table (used by `Ibm4Model::from_ibm3`).
    pub fn fertility(&self) -> &FertilityTable {
        &self.fertility
    }

    /// Borrows the sentence-length model.
    pub fn sentlen(&self) -> &SentenceLengthModel {
        &self.sentlen
    }

    /// Borrows the HMM seed transition table (used by `Ibm4Model::from_ibm3`).
    pub fn align(&self) -> &HmmAlignTable {
        &self.align
    }

    /// The interpolation weight used when scoring `align` (used by
    /// `Ibm4Model::from_ibm3`).
    pub fn alig_smooth_interp_factor(&self) -> f32 {
        self.alig_smooth_interp_factor
    }

    /// Overrides the HMM seed's interpolation weight.
    pub fn set_alig_smooth_interp_factor(&mut self, factor: f32) {
        self.alig_smooth_interp_factor = factor;
    }

    fn extended_src(src: &[WordIndex]) -> Vec<WordIndex> {
        let mut v = Vec::with_capacity(src.len() + 1);
        v.push(NULL_WORD);
        v.extend_from_slice(src);
        v
    }

    fn distortion_prob(&self, j: u32, i: u32, slen: u32, tlen: u32) -> f32 {
        self.distortion.prob((i, slen, tlen, j))
    }

    /// Joint log-probability of `pair` under `alignment` (spec.md §4.5's
    /// lexical * fertility * distortion * null-Bernoulli product, in
    /// log-space). `phi!` (the degeneracy factor) is folded in via
    /// `ln_factorial`.
    fn joint_lg_prob(&self, vocab_size: usize, pair: &SentencePair, alignment: &Alignment) -> f32 {
        let src = Self::extended_src(&pair.src);
        let slen = pair.slen() as u32;
        let tlen = pair.tlen() as u32;
        let mut fert = vec![0u32; src.len()];
        for &i in alignment {
            fert[i] += 1;
        }

        let mut lg = 0.0f32;
        for (j, &t) in pair.trg.iter().enumerate() {
            let i = alignment[j];
            let s = src[i];
            lg += self.lex.log_prob(s, t, vocab_size);
            if i != 0 {
                lg += self.distortion_prob(j as u32, i as u32, slen, tlen).max(SW_PROB_SMOOTH).ln();
            }
        }
        for (i, &s) in src.iter().enumerate().skip(1) {
            let phi = fert[i];
            lg += self.fertility.prob(s, phi).max(SW_PROB_SMOOTH).ln();
            lg += ln_factorial(phi);
        }
        let phi0 = fert[0];
        let tlen_f = tlen as f32;
        let p0 = 1.0 - self.p1;
        lg += ln_binomial(tlen.saturating_sub(phi0), phi0) + (phi0 as f32) * self.p1.max(SW_PROB_SMOOTH).ln()
            + (tlen_f - 2.0 * phi0 as f32).max(0.0) * p0.max(SW_PROB_SMOOTH).ln();
        lg
    }

    /// Hillclimbs from `seed` using swap (exchange two target tokens'
    /// source positions) and move (retarget one token) operators until no
    /// neighbor improves the joint log-probability (spec.md §4.5).
    fn hillclimb(&self, vocab_size: usize, pair: &SentencePair, seed: Alignment) -> Alignment {
        let slen1 = pair.slen() + 1;
        let mut current = seed;
        let mut current_lg = self.joint_lg_prob(vocab_size, pair, &current);
        loop {
            let mut best_neighbor: Option<Alignment> = None;
            let mut best_lg = current_lg;

            for j1 in 0..current.len() {
                for j2 in (j1 + 1)..current.len() {
                    if current[j1] == current[j2] {
                        continue;
                    }
                    let mut cand = current.clone();
                    cand.swap(j1, j2);
                    let lg = self.joint_lg_prob(vocab_size, pair, &cand);
                    if lg > best_lg {
                        best_lg = lg;
                        best_neighbor = Some(cand);
                    }
                }
            }

            for j in 0..current.len() {
                for i in 0..slen1 {
                    if current[j] == i {
                        continue;
                    }
                    let mut cand = current.clone();
                    cand[j] = i;
                    let lg = self.joint_lg_prob(vocab_size, pair, &cand);
                    if lg > best_lg {
                        best_lg = lg;
                        best_neighbor = Some(cand);
                    }
                }
            }

            match best_neighbor {
                Some(next) => {
                    current = next;
                    current_lg = best_lg;
                }
                None => break,
            }
        }
        current
    }

    /// Enumerates the pegged-set neighborhood of a locally optimal
    /// alignment (every single swap and move), for computing a normalized
    /// approximate E-step posterior (spec.md §4.5).
    fn pegged_neighborhood(&self, pair: &SentencePair, center: &Alignment) -> Vec<Alignment> {
        let slen1 = pair.slen() + 1;
        let mut neighbors = vec![center.clone()];
        for j1 in 0..center.len() {
            for j2 in (j1 + 1)..center.len() {
                if center[j1] != center[j2] {
                    let mut cand = center.clone();
                    cand.swap(j1, j2);
                    neighbors.push(cand);
                }
            }
        }
        for j in 0..center.len() {
            for i in 0..slen1 {
                if center[j] != i {
                    let mut cand = center.clone();
                    cand[j] = i;
                    neighbors.push(cand);
                }
            }
        }
        neighbors
    }

    /// Writes `.lexnd`, `.fertilnd`, `.distnd`, `.p1`, `.slmodel`, and the
    /// HMM seed transition table (`.hmm_alignd`) at `<prefix>`.
    pub fn save(&self, prefix: &str, format: TableFormat) -> Result<()> {
        self.lex.print(create_writer(&table_path(prefix, "lexnd"))?, format)?;
        self.fertility
            .print(create_writer(&table_path(prefix, "fertilnd"))?, format)?;
        self.distortion
            .print(create_writer(&table_path(prefix, "distnd"))?, format)?;
        self.sentlen
            .print(create_writer(&table_path(prefix, "slmodel"))?, format)?;
        self.align
            .print(create_writer(&table_path(prefix, "hmm_alignd"))?, format)?;
        use std::io::Write as _;
        writeln!(create_writer(&table_path(prefix, "p1"))?, "{}", self.p1)?;
        Ok(())
    }

    /// Loads a model previously saved with [`Self::save`].
    pub fn load(prefix: &str, max_fertility: u32, format: TableFormat) -> Result<Self> {
        use std::io::BufRead as _;
        let lex = LexTable::load(open_reader(&table_path(prefix, "lexnd"))?, format)?;
        let fertility = FertilityTable::load(open_reader(&table_path(prefix, "fertilnd"))?, max_fertility, format)?;
        let distortion = DistortionTable::load(open_reader(&table_path(prefix, "distnd"))?, format)?;
        let sentlen = SentenceLengthModel::load(open_reader(&table_path(prefix, "slmodel"))?, format)?;
        let align = HmmAlignTable::load(open_reader(&table_path(prefix, "hmm_alignd"))?, format)?;
        let mut p1_line = String::new();
        open_reader(&table_path(prefix, "p1"))?.read_line(&mut p1_line)?;
        let p1: f32 = p1_line.trim().parse()?;
        Ok(Self {
            lex,
            fertility,
            distortion,
            sentlen,
            align,
            alig_smooth_interp_factor: crate::common::DEFAULT_ALIG_SMOOTH_INTERP_FACTOR,
            p1,
            iter: 0,
        })
    }
}

fn ln_factorial(n: u32) -> f32 {
    (1..=n).map(|k| (k as f32).ln()).sum()
}

fn ln_binomial(n: u32, k: u32) -> f32 {
    if k > n {
        return f32::NEG_INFINITY;
    }
    ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k)
}

impl AlignmentModel for Ibm3Model {
    type Accum = Ibm3Accum;

    fn name(&self) -> &'static str {
        "ibm3"
    }

    fn iter(&self) -> u64 {
        self.iter
    }

    fn accumulate_pair(&self, vocab_size: usize, pair: &SentencePair) -> Result<(Self::Accum, f32)> {
        let src = Self::extended_src(&pair.src);
        let slen = pair.slen() as u32;
        let tlen = pair.tlen() as u32;

        let (seed, _) = crate::decode::hmm_viterbi(
            &self.lex,
            &self.align,
            0.0,
            self.alig_smooth_interp_factor,
            &pair.src,
            &pair.trg,
            vocab_size,
        );
        let center = self.hillclimb(vocab_size, pair, seed);
        let neighborhood = self.pegged_neighborhood(pair, &center);

        let lg_probs: Vec<f32> = neighborhood
            .iter()
            .map(|a| self.joint_lg_prob(vocab_size, pair, a))
            .collect();
        let max_lg = lg_probs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let weights: Vec<f32> = lg_probs.iter().map(|&lg| (lg - max_lg).exp()).collect();
        let z: f32 = weights.iter().sum();
        let z = if z > 0.0 { z } else { SW_PROB_SMOOTH };

        let mut acc = Ibm3Accum::default();
        for (alignment, &w) in neighborhood.iter().zip(weights.iter()) {
            let post = (w / z) * pair.count;
            let mut fert = vec![0u32; src.len()];
            for &i in alignment {
                fert[i] += 1;
            }
            for (j, &t) in pair.trg.iter().enumerate() {
                let i = alignment[j];
                let s = src[i];
                let lex_outer = acc.lex.entry(s).or_default();
                let cell = lex_outer.entry(t).or_insert(Cell::ZERO);
                cell.num += post;
                cell.den += post;
                if i != 0 {
                    let row = acc
                        .distortion
                        .entry((i as u32, slen, tlen))
                        .or_insert_with(|| vec![Cell::ZERO; tlen as usize]);
                    row[j].num += post;
                    row[j].den += post;
                }
            }
            for (i, &s) in src.iter().enumerate().skip(1) {
                let phi = fert[i];
                let row = acc
                    .fertility
                    .entry(s)
                    .or_insert_with(|| vec![Cell::ZERO; self.fertility.max_fertility() as usize + 1]);
                if (phi as usize) < row.len() {
                    row[phi as usize].num += post;
                    row[phi as usize].den += post;
                }
            }
            acc.p1_num += fert[0] as f32 * post;
            acc.p1_den += pair.tlen() as f32 * post;
        }

        Ok((acc, max_lg * pair.count))
    }

    fn merge_accum(&mut self, acc: Self::Accum) {
        for (s, inner) in acc.lex {
            for (t, cell) in inner {
                let (cur_num, _) = self.lex.get_num((s, t));
                let (cur_den, _) = self.lex.get_den((s, t));
                self.lex.set_num_den((s, t), cur_num + cell.num, cur_den + cell.den);
            }
        }
        for (s, row) in acc.fertility {
            for (phi, cell) in row.into_iter().enumerate() {
                let (cur_num, _) = self.fertility.get_num((s, phi as u32));
                let (cur_den, _) = self.fertility.get_den((s, phi as u32));
                self.fertility.set_num_den((s, phi as u32), cur_num + cell.num, cur_den + cell.den);
            }
        }
        for ((i, slen, tlen), row) in acc.distortion {
            for (j, cell) in row.into_iter().enumerate() {
                let key = (i, slen, tlen, j as u32);
                let (cur_num, _) = self.distortion.get_num(key);
                let (cur_den, _) = self.distortion.get_den(key);
                self.distortion.set_num_den(key, cur_num + cell.num, cur_den + cell.den);
            }
        }
        if acc.p1_den > 0.0 {
            self.p1 = (acc.p1_num / acc.p1_den).clamp(1e-4, 1.0 - 1e-4);
        }
    }

    fn maximize(&mut self) {
        self.lex.maximize();
        self.fertility.maximize();
        self.distortion.maximize();
    }

    fn bump_iter(&mut self) {
        self.iter += 1;
    }

    fn best_alignment(&self, vocab_size: usize, pair: &SentencePair) -> (Vec<usize>, f32) {
        let (seed, _) = crate::decode::hmm_viterbi(
            &self.lex,
            &self.align,
            0.0,
            self.alig_smooth_interp_factor,
            &pair.src,
            &pair.trg,
            vocab_size,
        );
        let best = self.hillclimb(vocab_size, pair, seed);
        let lg = self.joint_lg_prob(vocab_size, pair, &best);
        (best, lg)
    }

    fn score_alignment(&self, vocab_size: usize, pair: &SentencePair, alignment: &[usize]) -> f32 {
        self.joint_lg_prob(vocab_size, pair, &alignment.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ln_binomial_symmetry() {
        assert!((ln_binomial(5, 2) - ln_binomial(5, 3)).abs() < 1e-4);
    }

    #[test]
    fn test_best_alignment_runs_to_completion() {
        let mut model = Ibm3Model::default();
        model.lex.set_num_den((1, 9), 9.0, 10.0);
        model.lex.set_num_den((2, 9), 1.0, 10.0);
        let pair = SentencePair { src: vec![1, 2], trg: vec![9], count: 1.0 };
        let (alignment, _) = model.best_alignment(20, &pair);
        assert_eq!(alignment.len(), 1);
    }
}
