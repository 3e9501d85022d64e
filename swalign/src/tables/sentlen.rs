use std::io::{BufRead, BufReader, Read, Write};

use hashbrown::HashMap;

use crate::common::{bincode_config, SW_PROB_SMOOTH};
use crate::errors::{Result, SwAlignError};
use crate::tables::TableFormat;

/// Sentence-length model: `p(tlen | slen)` from per-`slen` empirical
/// normalized counts (spec.md §3).
///
/// `clear()` resets to an empty model. Per the Open Question resolution in
/// spec.md §9, once cleared `prob` returns the uniform smoothing floor
/// until the next training pass repopulates the counts — there is no
/// separate "rebuild" step.
#[derive(Clone, Debug, Default)]
pub struct SentenceLengthModel {
    // slen -> (tlen -> count)
    counts: HashMap<u32, HashMap<u32, f32>>,
}

impl SentenceLengthModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates one observation of `(slen, tlen)` weighted by `weight`.
    pub fn add_observation(&mut self, slen: u32, tlen: u32, weight: f32) {
        *self
            .counts
            .entry(slen)
            .or_default()
            .entry(tlen)
            .or_insert(0.0) += weight;
    }

    /// `p(tlen | slen)`: the observation's share of the per-`slen` total,
    /// or the uniform smoothing floor if `slen` has never been observed
    /// (spec.md §9's post-`clearSentLengthModel` contract).
    pub fn prob(&self, slen: u32, tlen: u32) -> f32 {
        match self.counts.get(&slen) {
            Some(row) => {
                let total: f32 = row.values().sum();
                if total <= 0.0 {
                    return SW_PROB_SMOOTH;
                }
                row.get(&tlen).copied().unwrap_or(0.0).max(SW_PROB_SMOOTH) / total.max(SW_PROB_SMOOTH)
            }
            None => SW_PROB_SMOOTH,
        }
    }

    /// `log p(tlen | slen)`.
    pub fn log_prob(&self, slen: u32, tlen: u32) -> f32 {
        self.prob(slen, tlen).max(f32::MIN_POSITIVE).ln()
    }

    /// Discards all observations, reverting to the uniform floor.
    pub fn clear(&mut self) {
        self.counts.clear();
    }

    /// Loads a model from a reader, replacing current contents. Records
    /// are `slen tlen count` in text mode.
    pub fn load<R: Read>(rdr: R, format: TableFormat) -> Result<Self> {
        let mut model = Self::new();
        match format {
            TableFormat::Text => model.load_text(rdr)?,
            TableFormat::Binary => model.load_binary(rdr)?,
        }
        Ok(model)
    }

    fn load_text<R: Read>(&mut self, rdr: R) -> Result<()> {
        for line in BufReader::new(rdr).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let cols: Vec<_> = line.split_whitespace().collect();
            if cols.len() != 3 {
                return Err(SwAlignError::invalid_format(
                    "slmodel",
                    "a record must be `slen tlen count`",
                ));
            }
            let slen: u32 = cols[0].parse()?;
            let tlen: u32 = cols[1].parse()?;
            let count: f32 = cols[2].parse()?;
            self.add_observation(slen, tlen, count);
        }
        Ok(())
    }

    fn load_binary<R: Read>(&mut self, mut rdr: R) -> Result<()> {
        let mut buf = Vec::new();
        rdr.read_to_end(&mut buf)?;
        let mut slice = buf.as_slice();
        while !slice.is_empty() {
            let ((slen, tlen, count), consumed): ((u32, u32, f32), usize) =
                bincode::decode_from_slice(slice, bincode_config())?;
            self.add_observation(slen, tlen, count);
            slice = &slice[consumed..];
        }
        Ok(())
    }

    /// Writes the model to a writer.
    pub fn print<W: Write>(&self, wtr: W, format: TableFormat) -> Result<()> {
        match format {
            TableFormat::Text => self.print_text(wtr),
            TableFormat::Binary => self.print_binary(wtr),
        }
    }

    fn sorted_rows(&self) -> Vec<(u32, Vec<(u32, f32)>)> {
        let mut slens: Vec<_> = self.counts.keys().copied().collect();
        slens.sort_unstable();
        slens
            .into_iter()
            .map(|slen| {
                let mut row: Vec<_> = self.counts[&slen].iter().map(|(&t, &c)| (t, c)).collect();
                row.sort_unstable_by_key(|&(t, _)| t);
                (slen, row)
            })
            .collect()
    }

    fn print_text<W: Write>(&self, mut wtr: W) -> Result<()> {
        for (slen, row) in self.sorted_rows() {
            for (tlen, count) in row {
                writeln!(wtr, "{slen} {tlen} {:.8}", count)?;
            }
        }
        Ok(())
    }

    fn print_binary<W: Write>(&self, mut wtr: W) -> Result<()> {
        for (slen, row) in self.sorted_rows() {
            for (tlen, count) in row {
                let record: (u32, u32, f32) = (slen, tlen, count);
                bincode::encode_into_std_write(record, &mut wtr, bincode_config())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_floor_before_training() {
        let model = SentenceLengthModel::new();
        assert!((model.prob(3, 4) - SW_PROB_SMOOTH).abs() < 1e-12);
    }

    #[test]
    fn test_prob_normalizes_per_slen() {
        let mut model = SentenceLengthModel::new();
        model.add_observation(3, 4, 3.0);
        model.add_observation(3, 5, 1.0);
        assert!((model.prob(3, 4) - 0.75).abs() < 1e-3);
        assert!((model.prob(3, 5) - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_clear_reverts_to_floor() {
        let mut model = SentenceLengthModel::new();
        model.add_observation(3, 4, 5.0);
        model.clear();
        assert!((model.prob(3, 4) - SW_PROB_SMOOTH).abs() < 1e-12);
    }
}
