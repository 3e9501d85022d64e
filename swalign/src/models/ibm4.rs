use hashbrown::HashMap;

use crate::accum::{merge_nested_cell_map, Accumulator};
use crate::common::{NULL_WORD, SW_PROB_SMOOTH};
use crate::corpus::SentencePair;
use crate::errors::Result;
use crate::models::ibm3::Ibm3Model;
use crate::models::{create_writer, open_reader, table_path, AlignmentModel};
use crate::tables::{
    Cell, FertilityTable, HeadDistortionTable, HmmAlignTable, LexTable, NonheadDistortionTable, ParamTable,
    SentenceLengthModel, TableFormat,
};
use crate::vocab::WordIndex;
use crate::wordclass::{WordClassIndex, WordClassMap};

/// A cept: the set of target positions generated by one source position,
/// in increasing order (spec.md §4.6, GLOSSARY "Cept").
type Cept = Vec<u32>;

/// IBM Model 4 (spec.md §4.6): replaces IBM3's single positional
/// distortion table with class-conditioned head/nonhead distortion over
/// cepts.
#[derive(Clone, Debug)]
pub struct Ibm4Model {
    lex: LexTable,
    fertility: FertilityTable,
    head_distortion: HeadDistortionTable,
    nonhead_distortion: NonheadDistortionTable,
    sentlen: SentenceLengthModel,
    src_classes: WordClassMap,
    trg_classes: WordClassMap,
    /// The HMM's trained transition table, carried over through IBM3 to
    /// seed hillclimbing's starting alignment (spec.md §4.5, §9).
    align: HmmAlignTable,
    /// Interpolation weight used when scoring `align` during seeding,
    /// carried over from IBM3's own HMM seed (spec.md §4.4).
    alig_smooth_interp_factor: f32,
    /// Null-generation probability, carried over from IBM3 (spec.md §4.5,
    /// §4.6).
    pub p1: f32,
    /// Interpolation weight toward the uniform distribution for both
    /// distortion tables (spec.md §4.6); `0.0` disables smoothing.
    distortion_smooth_factor: f32,
    iter: u64,
}

/// Sufficient statistics accumulated by one IBM4 E-step chunk.
#[derive(Clone, Default)]
pub struct Ibm4Accum {
    lex: HashMap<WordIndex, HashMap<WordIndex, Cell>>,
    fertility: HashMap<WordIndex, Vec<Cell>>,
    head_distortion: HashMap<(WordClassIndex, WordClassIndex), HashMap<i32, Cell>>,
    nonhead_distortion: HashMap<WordClassIndex, HashMap<i32, Cell>>,
    p1_num: f32,
    p1_den: f32,
}

impl Accumulator for Ibm4Accum {
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
        merge_nested_cell_map(&mut self.head_distortion, other.head_distortion);
        merge_nested_cell_map(&mut self.nonhead_distortion, other.nonhead_distortion);
        self.p1_num += other.p1_num;
        self.p1_den += other.p1_den;
    }

    fn fold_incremental(&mut self, new: &Self, alpha: f32) {
        crate::accum::fold_nested_cell_map_incremental(&mut self.lex, &new.lex, alpha);
        crate::accum::fold_nested_cell_map_incremental(&mut self.head_distortion, &new.head_distortion, alpha);
        crate::accum::fold_nested_cell_map_incremental(&mut self.nonhead_distortion, &new.nonhead_distortion, alpha);
        self.p1_num = crate::accum::fold_scalar(self.p1_num, new.p1_num, alpha);
        self.p1_den = crate::accum::fold_scalar(self.p1_den, new.p1_den, alpha);
    }
}

type Alignment = Vec<usize>;

impl Ibm4Model {
    /// Builds an IBM4 model from a converged IBM3 model, deep-copying its
    /// lexical and fertility tables and discarding IBM3's positional
    /// distortion table in favor of fresh class-conditioned ones (spec.md
    /// §9: construction-as-transfer).
    pub fn from_ibm3(ibm3: &Ibm3Model, classes: &WordClassMap) -> Self {
        Self {
            lex: ibm3.lex().clone(),
            fertility: ibm3.fertility().clone(),
            head_distortion: HeadDistortionTable::new(),
            nonhead_distortion: NonheadDistortionTable::new(),
            sentlen: ibm3.sentlen().clone(),
            src_classes: classes.clone(),
            trg_classes: classes.clone(),
            align: ibm3.align().clone(),
            alig_smooth_interp_factor: ibm3.alig_smooth_interp_factor(),
            p1: ibm3.p1,
            distortion_smooth_factor: crate::common::DEFAULT_DISTORTION_SMOOTH_FACTOR,
            iter: 0,
        }
    }

    /// Overrides the distortion interpolation weight (spec.md §8 scenario
    /// 2 trains, then scores alignments with smoothing disabled).
    pub fn set_distortion_smooth_factor(&mut self, factor: f32) {
        self.distortion_smooth_factor = factor;
    }

    /// Overrides the HMM seed's interpolation weight, carried over from
    /// IBM3's own.
    pub fn set_alig_smooth_interp_factor(&mut self, factor: f32) {
        self.alig_smooth_interp_factor = factor;
    }

    fn extended_src(src: &[WordIndex]) -> Vec<WordIndex> {
        let mut v = Vec::with_capacity(src.len() + 1);
        v.push(NULL_WORD);
        v.extend_from_slice(src);
        v
    }

    /// Groups an alignment into cepts: `cepts[i]` lists the (sorted)
    /// target positions generated by source position `i` (spec.md §4.6).
    fn build_cepts(alignment: &Alignment, src_len: usize) -> Vec<Cept> {
        let mut cepts = vec![Vec::new(); src_len];
        for (j, &i) in alignment.iter().enumerate() {
            cepts[i].push(j as u32);
        }
        cepts
    }

    /// The center of cept `i`: the average target position of its words,
    /// rounded up (spec.md §4.6's "center of the previous cept").
    fn cept_center(cept: &[u32]) -> Option<u32> {
        if cept.is_empty() {
            None
        } else {
            let sum: u32 = cept.iter().sum();
            let len = cept.len() as u32;
            Some((sum + len - 1) / len)
        }
    }

    /// Joint log-probability of `pair` under `alignment`, using head
    /// distortion for each cept's first word and nonhead distortion for
    /// the rest (spec.md §4.6).
    fn joint_lg_prob(&self, vocab_size: usize, pair: &SentencePair, alignment: &Alignment) -> f32 {
        let src = Self::extended_src(&pair.src);
        let tlen = pair.tlen() as u32;
        let cepts = Self::build_cepts(alignment, src.len());

        let mut lg = 0.0f32;
        for (j, &t) in pair.trg.iter().enumerate() {
            let i = alignment[j];
            let s = src[i];
            lg += self.lex.log_prob(s, t, vocab_size);
        }

        let mut prev_cept_center: Option<u32> = None;
        for (i, cept) in cepts.iter().enumerate().skip(1) {
            if cept.is_empty() {
                continue;
            }
            let src_class = self.src_classes.class_of(src[i]);
            let head_j = cept[0];
            let trg_class = self.trg_classes.class_of(pair.trg[head_j as usize]);
            let dj = match prev_cept_center {
                Some(center) => head_j as i32 - center as i32,
                None => head_j as i32,
            };
            lg += self
                .head_distortion
                .prob((src_class, trg_class), dj, self.distortion_smooth_factor)
                .max(SW_PROB_SMOOTH)
                .ln();

            for w in cept.windows(2) {
                let prev_j = w[0];
                let j = w[1];
                let trg_class = self.trg_classes.class_of(pair.trg[j as usize]);
                let dj = j as i32 - prev_j as i32;
                lg += self
                    .nonhead_distortion
                    .prob(trg_class, dj, self.distortion_smooth_factor)
                    .max(SW_PROB_SMOOTH)
                    .ln();
            }

            lg += self.fertility.prob(src[i], cept.len() as u32).max(SW_PROB_SMOOTH).ln();
            prev_cept_center = Self::cept_center(cept);
        }

        let phi0 = cepts[0].len() as u32;
        let p0 = 1.0 - self.p1;
        let tlen_f = tlen as f32;
        lg += (phi0 as f32) * self.p1.max(SW_PROB_SMOOTH).ln()
            + (tlen_f - 2.0 * phi0 as f32).max(0.0) * p0.max(SW_PROB_SMOOTH).ln();
        lg
    }

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

    /// Writes `.lexnd`, `.fertilnd`, `.distnd` (head), `.nonheaddistnd`,
    /// `.p1`, `.slmodel`, and the HMM seed transition table (`.hmm_alignd`)
    /// at `<prefix>`.
    pub fn save(&self, prefix: &str, format: TableFormat) -> Result<()> {
        self.lex.print(create_writer(&table_path(prefix, "lexnd"))?, format)?;
        self.fertility
            .print(create_writer(&table_path(prefix, "fertilnd"))?, format)?;
        self.head_distortion
            .print(create_writer(&table_path(prefix, "distnd"))?, format)?;
        self.nonhead_distortion
            .print(create_writer(&table_path(prefix, "nonheaddistnd"))?, format)?;
        self.sentlen
            .print(create_writer(&table_path(prefix, "slmodel"))?, format)?;
        self.align
            .print(create_writer(&table_path(prefix, "hmm_alignd"))?, format)?;
        use std::io::Write as _;
        writeln!(create_writer(&table_path(prefix, "p1"))?, "{}", self.p1)?;
        Ok(())
    }

    /// Loads a model previously saved with [`Self::save`]. Word classes
    /// are not persisted alongside the model; callers reload them
    /// separately and pass the same map used at training time.
    pub fn load(prefix: &str, max_fertility: u32, classes: WordClassMap, format: TableFormat) -> Result<Self> {
        use std::io::BufRead as _;
        let lex = LexTable::load(open_reader(&table_path(prefix, "lexnd"))?, format)?;
        let fertility = FertilityTable::load(open_reader(&table_path(prefix, "fertilnd"))?, max_fertility, format)?;
        let head_distortion = HeadDistortionTable::load(open_reader(&table_path(prefix, "distnd"))?, format)?;
        let nonhead_distortion =
            NonheadDistortionTable::load(open_reader(&table_path(prefix, "nonheaddistnd"))?, format)?;
        let sentlen = SentenceLengthModel::load(open_reader(&table_path(prefix, "slmodel"))?, format)?;
        let align = HmmAlignTable::load(open_reader(&table_path(prefix, "hmm_alignd"))?, format)?;
        let mut p1_line = String::new();
        open_reader(&table_path(prefix, "p1"))?.read_line(&mut p1_line)?;
        let p1: f32 = p1_line.trim().parse()?;
        Ok(Self {
            lex,
            fertility,
            head_distortion,
            nonhead_distortion,
            sentlen,
            src_classes: classes.clone(),
            trg_classes: classes,
            align,
            alig_smooth_interp_factor: crate::common::DEFAULT_ALIG_SMOOTH_INTERP_FACTOR,
            p1,
            distortion_smooth_factor: crate::common::DEFAULT_DISTORTION_SMOOTH_FACTOR,
            iter: 0,
        })
    }
}

impl AlignmentModel for Ibm4Model {
    type Accum = Ibm4Accum;

    fn name(&self) -> &'static str {
        "ibm4"
    }

    fn iter(&self) -> u64 {
        self.iter
    }

    fn accumulate_pair(&self, vocab_size: usize, pair: &SentencePair) -> Result<(Self::Accum, f32)> {
        let src = Self::extended_src(&pair.src);

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

        let mut acc = Ibm4Accum::default();
        for (alignment, &w) in neighborhood.iter().zip(weights.iter()) {
            let post = (w / z) * pair.count;
            let cepts = Self::build_cepts(alignment, src.len());

            for (j, &t) in pair.trg.iter().enumerate() {
                let i = alignment[j];
                let s = src[i];
                let lex_outer = acc.lex.entry(s).or_default();
                let cell = lex_outer.entry(t).or_insert(Cell::ZERO);
                cell.num += post;
                cell.den += post;
            }

            let mut prev_cept_center: Option<u32> = None;
            for (i, cept) in cepts.iter().enumerate().skip(1) {
                if cept.is_empty() {
                    continue;
                }
                let src_class = self.src_classes.class_of(src[i]);
                let head_j = cept[0];
                let trg_class = self.trg_classes.class_of(pair.trg[head_j as usize]);
                let dj = match prev_cept_center {
                    Some(center) => head_j as i32 - center as i32,
                    None => head_j as i32,
                };
                let row = acc.head_distortion.entry((src_class, trg_class)).or_default();
                let cell = row.entry(dj).or_insert(Cell::ZERO);
                cell.num += post;
                cell.den += post;

                for w in cept.windows(2) {
                    let prev_j = w[0];
                    let j = w[1];
                    let trg_class = self.trg_classes.class_of(pair.trg[j as usize]);
                    let dj = j as i32 - prev_j as i32;
                    let row = acc.nonhead_distortion.entry(trg_class).or_default();
                    let cell = row.entry(dj).or_insert(Cell::ZERO);
                    cell.num += post;
                    cell.den += post;
                }

                let phi = cept.len() as u32;
                let frow = acc
                    .fertility
                    .entry(src[i])
                    .or_insert_with(|| vec![Cell::ZERO; self.fertility.max_fertility() as usize + 1]);
                if (phi as usize) < frow.len() {
                    frow[phi as usize].num += post;
                    frow[phi as usize].den += post;
                }
                prev_cept_center = Self::cept_center(cept);
            }

            acc.p1_num += cepts[0].len() as f32 * post;
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
        for (key, row) in acc.head_distortion {
            for (dj, cell) in row {
                let (cur_num, _) = self.head_distortion.get_num((key, dj));
                let (cur_den, _) = self.head_distortion.get_den((key, dj));
                self.head_distortion.set_num_den((key, dj), cur_num + cell.num, cur_den + cell.den);
            }
        }
        for (trg_class, row) in acc.nonhead_distortion {
            for (dj, cell) in row {
                let (cur_num, _) = self.nonhead_distortion.get_num((trg_class, dj));
                let (cur_den, _) = self.nonhead_distortion.get_den((trg_class, dj));
                self.nonhead_distortion
                    .set_num_den((trg_class, dj), cur_num + cell.num, cur_den + cell.den);
            }
        }
        if acc.p1_den > 0.0 {
            self.p1 = (acc.p1_num / acc.p1_den).clamp(1e-4, 1.0 - 1e-4);
        }
    }

    fn maximize(&mut self) {
        self.lex.maximize();
        self.fertility.maximize();
        self.head_distortion.maximize();
        self.nonhead_distortion.maximize();
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
    fn test_cept_center_of_empty_is_none() {
        assert_eq!(Ibm4Model::cept_center(&[]), None);
    }

    #[test]
    fn test_cept_center_averages_positions() {
        assert_eq!(Ibm4Model::cept_center(&[2, 4]), Some(3));
    }

    #[test]
    fn test_cept_center_rounds_up_on_fractional_mean() {
        assert_eq!(Ibm4Model::cept_center(&[1, 2]), Some(2));
    }

    #[test]
    fn test_best_alignment_runs_to_completion() {
        let ibm3 = Ibm3Model::default();
        let classes = WordClassMap::new();
        let model = Ibm4Model::from_ibm3(&ibm3, &classes);
        let pair = SentencePair { src: vec![1, 2], trg: vec![9], count: 1.0 };
        let (alignment, _) = model.best_alignment(20, &pair);
        assert_eq!(alignment.len(), 1);
    }
}
