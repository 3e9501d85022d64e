use std::io::{BufRead, BufReader, Read, Write};

use hashbrown::HashMap;

use crate::common::bincode_config;
use crate::errors::{Result, SwAlignError};
use crate::tables::{Cell, ParamTable, TableFormat};
use crate::vocab::WordIndex;

/// Full key: `(s, phi)`.
pub type FertilityKey = (WordIndex, u32);

/// Fertility table: `phi(s, phi) = num / den`, `phi in [0, MaxFertility]`
/// (spec.md §3, §4.5). The inner vector is dense, indexed by `phi`.
#[derive(Clone, Debug, Default)]
pub struct FertilityTable {
    inner: HashMap<WordIndex, Vec<Cell>>,
    max_fertility: u32,
}

impl FertilityTable {
    /// Creates an empty table with the given fertility cap.
    pub fn new(max_fertility: u32) -> Self {
        Self {
            inner: HashMap::new(),
            max_fertility,
        }
    }

    /// The configured fertility cap.
    pub fn max_fertility(&self) -> u32 {
        self.max_fertility
    }

    /// Smoothed probability `phi(s, phi)`.
    pub fn prob(&self, s: WordIndex, phi: u32) -> f32 {
        let (num, found) = self.get_num((s, phi));
        if !found {
            return crate::common::SW_PROB_SMOOTH;
        }
        let (den, _) = self.get_den((s, phi));
        if den > 0.0 {
            num / den
        } else {
            crate::common::SW_PROB_SMOOTH
        }
    }

    /// Normalizes every row so `sum_phi num == den`.
    pub fn maximize(&mut self) {
        for row in self.inner.values_mut() {
            let den: f32 = row.iter().map(|c| c.num).sum();
            for cell in row.iter_mut() {
                cell.den = den;
            }
        }
    }

    fn outer(key: FertilityKey) -> (WordIndex, usize) {
        (key.0, key.1 as usize)
    }

    /// Loads a table from a reader, replacing current contents.
    pub fn load<R: Read>(rdr: R, max_fertility: u32, format: TableFormat) -> Result<Self> {
        let mut table = Self::new(max_fertility);
        match format {
            TableFormat::Text => table.load_text(rdr)?,
            TableFormat::Binary => table.load_binary(rdr)?,
        }
        Ok(table)
    }

    fn load_text<R: Read>(&mut self, rdr: R) -> Result<()> {
        for line in BufReader::new(rdr).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let cols: Vec<_> = line.split_whitespace().collect();
            if cols.len() != 4 {
                return Err(SwAlignError::invalid_format(
                    "fertilnd",
                    "a record must be `s phi num den`",
                ));
            }
            let s: WordIndex = cols[0].parse()?;
            let phi: u32 = cols[1].parse()?;
            let num: f32 = cols[2].parse()?;
            let den: f32 = cols[3].parse()?;
            self.set_num_den((s, phi), num, den);
        }
        Ok(())
    }

    fn load_binary<R: Read>(&mut self, mut rdr: R) -> Result<()> {
        let mut buf = Vec::new();
        rdr.read_to_end(&mut buf)?;
        let mut slice = buf.as_slice();
        while !slice.is_empty() {
            let ((s, phi, num, den), consumed): ((u32, u32, f32, f32), usize) =
                bincode::decode_from_slice(slice, bincode_config())?;
            self.set_num_den((s, phi), num, den);
            slice = &slice[consumed..];
        }
        Ok(())
    }

    /// Writes the table to a writer.
    pub fn print<W: Write>(&self, wtr: W, format: TableFormat) -> Result<()> {
        match format {
            TableFormat::Text => self.print_text(wtr),
            TableFormat::Binary => self.print_binary(wtr),
        }
    }

    fn sorted_rows(&self) -> Vec<(WordIndex, &Vec<Cell>)> {
        let mut rows: Vec<_> = self.inner.iter().map(|(&k, v)| (k, v)).collect();
        rows.sort_unstable_by_key(|&(k, _)| k);
        rows
    }

    fn print_text<W: Write>(&self, mut wtr: W) -> Result<()> {
        for (s, row) in self.sorted_rows() {
            for (phi, cell) in row.iter().enumerate() {
                writeln!(wtr, "{s} {phi} {:.8} {:.8}", cell.num, cell.den)?;
            }
        }
        Ok(())
    }

    fn print_binary<W: Write>(&self, mut wtr: W) -> Result<()> {
        for (s, row) in self.sorted_rows() {
            for (phi, cell) in row.iter().enumerate() {
                let record: (u32, u32, f32, f32) = (s, phi as u32, cell.num, cell.den);
                bincode::encode_into_std_write(record, &mut wtr, bincode_config())?;
            }
        }
        Ok(())
    }
}

impl ParamTable for FertilityTable {
    type Key = FertilityKey;

    fn set_num(&mut self, key: Self::Key, v: f32) {
        let (s, phi) = Self::outer(key);
        let row = self.inner.entry(s).or_default();
        if row.len() <= phi {
            row.resize(phi + 1, Cell::ZERO);
        }
        row[phi].num = v;
    }

    fn set_den(&mut self, key: Self::Key, v: f32) {
        let (s, _phi) = Self::outer(key);
        let row = self.inner.entry(s).or_default();
        for cell in row.iter_mut() {
            cell.den = v;
        }
    }

    fn set_num_den(&mut self, key: Self::Key, num: f32, den: f32) {
        let (s, phi) = Self::outer(key);
        let row = self.inner.entry(s).or_default();
        if row.len() <= phi {
            row.resize(phi + 1, Cell::ZERO);
        }
        row[phi] = Cell { num, den };
    }

    fn get_num(&self, key: Self::Key) -> (f32, bool) {
        let (s, phi) = Self::outer(key);
        match self.inner.get(&s).and_then(|row| row.get(phi)) {
            Some(cell) => (cell.num, true),
            None => (0.0, false),
        }
    }

    fn get_den(&self, key: Self::Key) -> (f32, bool) {
        let (s, phi) = Self::outer(key);
        match self.inner.get(&s).and_then(|row| row.get(phi)) {
            Some(cell) => (cell.den, true),
            None => (0.0, false),
        }
    }

    fn reserve_space(&mut self, key: Self::Key) {
        let (s, phi) = Self::outer(key);
        let row = self.inner.entry(s).or_default();
        if row.len() <= phi {
            row.resize(phi + 1, Cell::ZERO);
        }
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let mut t = FertilityTable::new(10);
        t.set_num_den((5, 2), 3.0, 6.0);
        assert_eq!(t.get_num((5, 2)), (3.0, true));
        assert!((t.prob(5, 2) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_missing_entry_uses_floor() {
        let t = FertilityTable::new(10);
        assert!((t.prob(1, 1) - crate::common::SW_PROB_SMOOTH).abs() < 1e-12);
    }
}
