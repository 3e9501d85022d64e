use hashbrown::HashMap;

use crate::accum::{merge_nested_cell_map, Accumulator};
use crate::common::{NULL_WORD, SW_PROB_SMOOTH};
use crate::corpus::SentencePair;
use crate::errors::Result;
use crate::models::{create_writer, open_reader, table_path, AlignmentModel};
use crate::tables::{Cell, LexTable, ParamTable, SentenceLengthModel, TableFormat};
use crate::vocab::WordIndex;

/// IBM Model 1: alignment is uniform over `0..=slen` (spec.md §4.3). The
/// only learned parameters are the lexical table and the (unused for
/// scoring alignments, but trained alongside for downstream transfer) the
/// sentence-length model.
#[derive(Clone, Debug, Default)]
pub struct Ibm1Model {
    lex: LexTable,
    sentlen: SentenceLengthModel,
    iter: u64,
}

/// Sufficient statistics accumulated by one IBM1 E-step chunk.
#[derive(Clone, Default)]
pub struct Ibm1Accum {
    lex: HashMap<WordIndex, HashMap<WordIndex, Cell>>,
}

impl Accumulator for Ibm1Accum {
    fn merge(&mut self, other: Self) {
        merge_nested_cell_map(&mut self.lex, other.lex);
    }

    fn fold_incremental(&mut self, new: &Self, alpha: f32) {
        crate::accum::fold_nested_cell_map_incremental(&mut self.lex, &new.lex, alpha);
    }
}

impl Ibm1Model {
    /// Creates an untrained model with empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows the lexical table (used by [`super::Ibm2Model::from_ibm1`]
    /// and [`super::HmmModel::from_ibm1`] to deep-copy or move it).
    pub fn lex(&self) -> &LexTable {
        &self.lex
    }

    /// Takes ownership of the lexical table, leaving an empty one behind.
    pub fn take_lex(&mut self) -> LexTable {
        std::mem::take(&mut self.lex)
    }

    /// Borrows the sentence-length model.
    pub fn sentlen(&self) -> &SentenceLengthModel {
        &self.sentlen
    }

    fn extended_src(src: &[WordIndex]) -> Vec<WordIndex> {
        let mut v = Vec::with_capacity(src.len() + 1);
        v.push(NULL_WORD);
        v.extend_from_slice(src);
        v
    }

    /// Writes the `.lexnd` and `.slmodel` files at `<prefix>`.
    pub fn save(&self, prefix: &str, format: TableFormat) -> Result<()> {
        self.lex.print(create_writer(&table_path(prefix, "lexnd"))?, format)?;
        self.sentlen
            .print(create_writer(&table_path(prefix, "slmodel"))?, format)?;
        Ok(())
    }

    /// Loads a model previously saved with [`Self::save`].
    pub fn load(prefix: &str, format: TableFormat) -> Result<Self> {
        let lex = LexTable::load(open_reader(&table_path(prefix, "lexnd"))?, format)?;
        let sentlen = SentenceLengthModel::load(open_reader(&table_path(prefix, "slmodel"))?, format)?;
        Ok(Self { lex, sentlen, iter: 0 })
    }
}

impl AlignmentModel for Ibm1Model {
    type Accum = Ibm1Accum;

    fn name(&self) -> &'static str {
        "ibm1"
    }

    fn iter(&self) -> u64 {
        self.iter
    }

    fn accumulate_pair(&self, vocab_size: usize, pair: &SentencePair) -> Result<(Self::Accum, f32)> {
        let src = Self::extended_src(&pair.src);
        let mut acc = Ibm1Accum::default();
        let mut ll = 0.0f32;

        for &t in &pair.trg {
            let probs: Vec<f32> = src.iter().map(|&s| self.lex.prob(s, t, vocab_size)).collect();
            let z: f32 = probs.iter().sum();
            let z = if z > 0.0 { z } else { SW_PROB_SMOOTH };
            ll += z.ln() * pair.count;
            for (&s, &p) in src.iter().zip(probs.iter()) {
                let gamma = (p / z) * pair.count;
                let outer = acc.lex.entry(s).or_default();
                let cell = outer.entry(t).or_insert(Cell::ZERO);
                cell.num += gamma;
                cell.den += gamma;
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
    }

    fn maximize(&mut self) {
        self.lex.maximize();
    }

    fn bump_iter(&mut self) {
        self.iter += 1;
    }

    fn best_alignment(&self, vocab_size: usize, pair: &SentencePair) -> (Vec<usize>, f32) {
        let src = Self::extended_src(&pair.src);
        let mut alignment = Vec::with_capacity(pair.trg.len());
        let mut lg_prob = 0.0f32;
        for &t in &pair.trg {
            let (best_i, best_p) = src
                .iter()
                .enumerate()
                .map(|(i, &s)| (i, self.lex.prob(s, t, vocab_size)))
                .fold((0usize, f32::MIN), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
            alignment.push(best_i);
            lg_prob += best_p.max(SW_PROB_SMOOTH).ln();
        }
        lg_prob -= (pair.slen() as f32 + 1.0).ln() * pair.trg.len() as f32;
        (alignment, lg_prob)
    }

    fn score_alignment(&self, vocab_size: usize, pair: &SentencePair, alignment: &[usize]) -> f32 {
        let src = Self::extended_src(&pair.src);
        let uniform = 1.0 / (pair.slen() as f32 + 1.0);
        let mut lg_prob = 0.0f32;
        for (j, &t) in pair.trg.iter().enumerate() {
            let i = alignment[j];
            let s = src.get(i).copied().unwrap_or(NULL_WORD);
            lg_prob += uniform.ln() + self.lex.log_prob(s, t, vocab_size);
        }
        lg_prob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(src: &[u32], trg: &[u32]) -> SentencePair {
        SentencePair {
            src: src.to_vec(),
            trg: trg.to_vec(),
            count: 1.0,
        }
    }

    #[test]
    fn test_accumulate_then_maximize_keeps_rows_normalized() {
        let mut model = Ibm1Model::new();
        let p = pair(&[2, 3], &[5, 6]);
        for _ in 0..5 {
            let (acc, _) = model.accumulate_pair(10, &p).unwrap();
            model.merge_accum(acc);
            model.maximize();
            model.bump_iter();
        }
        assert_eq!(model.iter(), 5);
        let (num, _) = model.lex.get_num((NULL_WORD, 5));
        let (den, _) = model.lex.get_den((NULL_WORD, 5));
        assert!(den > 0.0);
        assert!(num <= den + 1e-4);
    }

    #[test]
    fn test_best_alignment_prefers_higher_lex_prob() {
        let mut model = Ibm1Model::new();
        model.lex.set_num_den((1, 9), 9.0, 10.0);
        model.lex.set_num_den((2, 9), 1.0, 10.0);
        let p = pair(&[1, 2], &[9]);
        let (alignment, _) = model.best_alignment(20, &p);
        assert_eq!(alignment, vec![1]);
    }
}
