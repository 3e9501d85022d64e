use std::io::{BufRead, BufReader, Read, Write};

use hashbrown::HashMap;

use crate::common::bincode_config;
use crate::errors::{Result, SwAlignError};
use crate::tables::{Cell, ParamTable, TableFormat};

/// Outer conditioning key: `(prev_i, slen)`.
pub type HmmOuterKey = (u32, u32);
/// Full key: `(prev_i, slen, i)`.
pub type HmmKey = (u32, u32, u32);

/// HMM alignment transition table: `a(i | prev_i, slen) = num / den`
/// (spec.md §3, §4.4). States are source positions `0..=slen`, with `0`
/// the null state; the table itself only stores unconditional transition
/// mass; the "sticky" null return handled at the model layer supplies the
/// jump-distance reparameterization on top of this raw table.
#[derive(Clone, Debug, Default)]
pub struct HmmAlignTable {
    inner: HashMap<HmmOuterKey, Vec<Cell>>,
}

impl HmmAlignTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes every inner vector so `sum_i num == den`.
    pub fn maximize(&mut self) {
        for row in self.inner.values_mut() {
            let den: f32 = row.iter().map(|c| c.num).sum();
            for cell in row.iter_mut() {
                cell.den = den;
            }
        }
    }

    fn outer(key: HmmKey) -> (HmmOuterKey, usize) {
        let (prev_i, slen, i) = key;
        ((prev_i, slen), i as usize)
    }

    /// Loads a table from a reader, replacing current contents.
    pub fn load<R: Read>(rdr: R, format: TableFormat) -> Result<Self> {
        let mut table = Self::new();
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
            if cols.len() != 5 {
                return Err(SwAlignError::invalid_format(
                    "hmm_alignd",
                    "a record must be `prev_i slen i num den`",
                ));
            }
            let prev_i: u32 = cols[0].parse()?;
            let slen: u32 = cols[1].parse()?;
            let i: u32 = cols[2].parse()?;
            let num: f32 = cols[3].parse()?;
            let den: f32 = cols[4].parse()?;
            self.set_num_den((prev_i, slen, i), num, den);
        }
        Ok(())
    }

    fn load_binary<R: Read>(&mut self, mut rdr: R) -> Result<()> {
        let mut buf = Vec::new();
        rdr.read_to_end(&mut buf)?;
        let mut slice = buf.as_slice();
        while !slice.is_empty() {
            let ((prev_i, slen, i, num, den), consumed): (
                (u32, u32, u32, f32, f32),
                usize,
            ) = bincode::decode_from_slice(slice, bincode_config())?;
            self.set_num_den((prev_i, slen, i), num, den);
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

    fn sorted_rows(&self) -> Vec<(HmmOuterKey, &Vec<Cell>)> {
        let mut rows: Vec<_> = self.inner.iter().map(|(&k, v)| (k, v)).collect();
        rows.sort_unstable_by_key(|&(k, _)| k);
        rows
    }

    fn print_text<W: Write>(&self, mut wtr: W) -> Result<()> {
        for ((prev_i, slen), row) in self.sorted_rows() {
            for (i, cell) in row.iter().enumerate() {
                writeln!(wtr, "{prev_i} {slen} {i} {:.8} {:.8}", cell.num, cell.den)?;
            }
        }
        Ok(())
    }

    fn print_binary<W: Write>(&self, mut wtr: W) -> Result<()> {
        for ((prev_i, slen), row) in self.sorted_rows() {
            for (i, cell) in row.iter().enumerate() {
                let record: (u32, u32, u32, f32, f32) =
                    (prev_i, slen, i as u32, cell.num, cell.den);
                bincode::encode_into_std_write(record, &mut wtr, bincode_config())?;
            }
        }
        Ok(())
    }
}

impl ParamTable for HmmAlignTable {
    type Key = HmmKey;

    fn set_num(&mut self, key: Self::Key, v: f32) {
        let (outer, i) = Self::outer(key);
        let row = self.inner.entry(outer).or_default();
        if row.len() <= i {
            row.resize(i + 1, Cell::ZERO);
        }
        row[i].num = v;
    }

    fn set_den(&mut self, key: Self::Key, v: f32) {
        let (outer, _i) = Self::outer(key);
        let row = self.inner.entry(outer).or_default();
        for cell in row.iter_mut() {
            cell.den = v;
        }
    }

    fn set_num_den(&mut self, key: Self::Key, num: f32, den: f32) {
        let (outer, i) = Self::outer(key);
        let row = self.inner.entry(outer).or_default();
        if row.len() <= i {
            row.resize(i + 1, Cell::ZERO);
        }
        row[i] = Cell { num, den };
    }

    fn get_num(&self, key: Self::Key) -> (f32, bool) {
        let (outer, i) = Self::outer(key);
        match self.inner.get(&outer).and_then(|row| row.get(i)) {
            Some(cell) => (cell.num, true),
            None => (0.0, false),
        }
    }

    fn get_den(&self, key: Self::Key) -> (f32, bool) {
        let (outer, i) = Self::outer(key);
        match self.inner.get(&outer).and_then(|row| row.get(i)) {
            Some(cell) => (cell.den, true),
            None => (0.0, false),
        }
    }

    fn reserve_space(&mut self, key: Self::Key) {
        let (outer, i) = Self::outer(key);
        let row = self.inner.entry(outer).or_default();
        if row.len() <= i {
            row.resize(i + 1, Cell::ZERO);
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
    fn test_round_trip() {
        let mut t = HmmAlignTable::new();
        t.set_num_den((2, 6, 3), 4.0, 10.0);
        let mut buf = Vec::new();
        t.print(&mut buf, TableFormat::Binary).unwrap();
        let loaded = HmmAlignTable::load(buf.as_slice(), TableFormat::Binary).unwrap();
        assert_eq!(loaded.get_num((2, 6, 3)), t.get_num((2, 6, 3)));
    }

    #[test]
    fn test_maximize() {
        let mut t = HmmAlignTable::new();
        t.set_num((1, 4, 0), 1.0);
        t.set_num((1, 4, 1), 3.0);
        t.maximize();
        assert_eq!(t.get_den((1, 4, 0)), (4.0, true));
    }
}
