use hashbrown::HashMap;

use crate::accum::{merge_nested_cell_map, Accumulator};
use crate::common::{NULL_WORD, SW_PROB_SMOOTH};
use crate::corpus::SentencePair;
use crate::errors::Result;
use crate::models::ibm1::Ibm1Model;
use crate::models::{create_writer, open_reader, table_path, AlignmentModel};
use crate::tables::{Cell, Ibm2AlignTable, Ibm2Key, LexTable, ParamTable, SentenceLengthModel, TableFormat};
use crate::vocab::WordIndex;

/// IBM Model 2: adds a position-dependent alignment table on top of IBM1's
/// lexical table (spec.md §4.1, §3).
#[derive(Clone, Debug, Default)]
pub struct Ibm2Model {
    lex: LexTable,
    align: Ibm2AlignTable,
    sentlen: SentenceLengthModel,
    iter: u64,
}

/// Sufficient statistics accumulated by one IBM2 E-step chunk.
#[derive(Clone, Default)]
pub struct Ibm2Accum {
    lex: HashMap<WordIndex, HashMap<WordIndex, Cell>>,
    align: HashMap<(u32, u32, u32), Vec<Cell>>,
}

impl Accumulator for Ibm2Accum {
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

impl Ibm2Model {
    /// Builds an IBM2 model from a converged IBM1 model, moving its
    /// lexical table and sentence-length model (spec.md §9's
    /// construction-as-transfer: the predecessor's tables are moved, not
    /// shared, so the two instances own disjoint state afterward).
    pub fn from_ibm1(mut ibm1: Ibm1Model) -> Self {
        Self {
            lex: ibm1.take_lex(),
            align: Ibm2AlignTable::new(),
            sentlen: ibm1.sentlen().clone(),
            iter: 0,
        }
    }

    fn extended_src(src: &[WordIndex]) -> Vec<WordIndex> {
        let mut v = Vec::with_capacity(src.len() + 1);
        v.push(NULL_WORD);
        v.extend_from_slice(src);
        v
    }

    /// Writes `.lexnd`, `.alignd`, and `.slmodel` at `<prefix>`.
    pub fn save(&self, prefix: &str, format: TableFormat) -> Result<()> {
        self.lex.print(create_writer(&table_path(prefix, "lexnd"))?, format)?;
        self.align
            .print(create_writer(&table_path(prefix, "alignd"))?, format)?;
        self.sentlen
            .print(create_writer(&table_path(prefix, "slmodel"))?, format)?;
        Ok(())
    }

    /// Loads a model previously saved with [`Self::save`].
    pub fn load(prefix: &str, format: TableFormat) -> Result<Self> {
        let lex = LexTable::load(open_reader(&table_path(prefix, "lexnd"))?, format)?;
        let align = Ibm2AlignTable::load(open_reader(&table_path(prefix, "alignd"))?, format)?;
        let sentlen = SentenceLengthModel::load(open_reader(&table_path(prefix, "slmodel"))?, format)?;
        Ok(Self {
            lex,
            align,
            sentlen,
            iter: 0,
        })
    }
}

impl AlignmentModel for Ibm2Model {
    type Accum = Ibm2Accum;

    fn name(&self) -> &'static str {
        "ibm2"
    }

    fn iter(&self) -> u64 {
        self.iter
    }

    fn accumulate_pair(&self, vocab_size: usize, pair: &SentencePair) -> Result<(Self::Accum, f32)> {
        let src = Self::extended_src(&pair.src);
        let slen = pair.slen() as u32;
        let tlen = pair.tlen() as u32;
        let mut acc = Ibm2Accum::default();
        let mut ll = 0.0f32;

        for (j, &t) in pair.trg.iter().enumerate() {
            let jx = j as u32;
            let probs: Vec<f32> = src
                .iter()
                .enumerate()
                .map(|(i, &s)| {
                    let key: Ibm2Key = (jx, slen, tlen, i as u32);
                    self.align.prob(key) * self.lex.prob(s, t, vocab_size)
                })
                .collect();
            let z: f32 = probs.iter().sum();
            let z = if z > 0.0 { z } else { SW_PROB_SMOOTH };
            ll += z.ln() * pair.count;

            let outer = (jx, slen, tlen);
            let row = acc.align.entry(outer).or_insert_with(|| vec![Cell::ZERO; src.len()]);
            for (i, &s) in src.iter().enumerate() {
                let gamma = (probs[i] / z) * pair.count;
                row[i].num += gamma;
                row[i].den += gamma;
                let lex_outer = acc.lex.entry(s).or_default();
                let cell = lex_outer.entry(t).or_insert(Cell::ZERO);
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
        for ((j, slen, tlen), row) in acc.align {
            for (i, cell) in row.into_iter().enumerate() {
                let key: Ibm2Key = (j, slen, tlen, i as u32);
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
        let src = Self::extended_src(&pair.src);
        let slen = pair.slen() as u32;
        let tlen = pair.tlen() as u32;
        let mut alignment = Vec::with_capacity(pair.trg.len());
        let mut lg_prob = 0.0f32;
        for (j, &t) in pair.trg.iter().enumerate() {
            let mut best_i = 0usize;
            let mut best_p = f32::MIN;
            for (i, &s) in src.iter().enumerate() {
                let key: Ibm2Key = (j as u32, slen, tlen, i as u32);
                let p = self.align.prob(key) * self.lex.prob(s, t, vocab_size);
                if p > best_p {
                    best_p = p;
                    best_i = i;
                }
            }
            alignment.push(best_i);
            lg_prob += best_p.max(SW_PROB_SMOOTH).ln();
        }
        (alignment, lg_prob)
    }

    fn score_alignment(&self, vocab_size: usize, pair: &SentencePair, alignment: &[usize]) -> f32 {
        let src = Self::extended_src(&pair.src);
        let slen = pair.slen() as u32;
        let tlen = pair.tlen() as u32;
        let mut lg_prob = 0.0f32;
        for (j, &t) in pair.trg.iter().enumerate() {
            let i = alignment[j];
            let s = src.get(i).copied().unwrap_or(NULL_WORD);
            let key: Ibm2Key = (j as u32, slen, tlen, i as u32);
            lg_prob += self.align.prob(key).max(SW_PROB_SMOOTH).ln() + self.lex.log_prob(s, t, vocab_size);
        }
        lg_prob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ibm1_moves_lex_table() {
        let mut ibm1 = Ibm1Model::new();
        let (acc, _) = ibm1.accumulate_pair(10, &SentencePair { src: vec![2], trg: vec![5], count: 1.0 }).unwrap();
        ibm1.merge_accum(acc);
        ibm1.maximize();
        let ibm2 = Ibm2Model::from_ibm1(ibm1);
        assert!(ibm2.lex.get_num((NULL_WORD, 5)).1 || ibm2.lex.get_num((2, 5)).1);
    }

    #[test]
    fn test_best_alignment_prefers_strong_position() {
        let mut model = Ibm2Model::default();
        model.lex.set_num_den((1, 9), 1.0, 1.0);
        model.lex.set_num_den((2, 9), 1.0, 1.0);
        model.align.set_num_den((0, 2, 1, 1), 9.0, 10.0);
        model.align.set_num_den((0, 2, 1, 2), 1.0, 10.0);
        let pair = SentencePair { src: vec![1, 2], trg: vec![9], count: 1.0 };
        let (alignment, _) = model.best_alignment(20, &pair);
        assert_eq!(alignment, vec![1]);
    }
}
