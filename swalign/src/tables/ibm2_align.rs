use std::io::{BufRead, BufReader, Read, Write};

use hashbrown::HashMap;

use crate::common::bincode_config;
use crate::errors::{Result, SwAlignError};
use crate::tables::{Cell, ParamTable, TableFormat};

/// Outer conditioning key for the IBM2 positional alignment table.
pub type Ibm2OuterKey = (u32, u32, u32); // (j, slen, tlen)
/// Full key for a single cell: `(j, slen, tlen, i)`.
pub type Ibm2Key = (u32, u32, u32, u32);

/// IBM2 positional alignment table: `a(i | j, slen, tlen) = num / den`
/// (spec.md §3). The inner structure is a dense vector of length
/// `slen + 1` indexed by `i` (position `0` is the null word); a lookup for
/// `i` beyond the stored vector length reports `found = false` rather than
/// growing the vector, per spec.md §4.1.
#[derive(Clone, Debug, Default)]
pub struct Ibm2AlignTable {
    inner: HashMap<Ibm2OuterKey, Vec<Cell>>,
}

impl Ibm2AlignTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derived probability `a(i | j, slen, tlen)`.
    pub fn prob(&self, key: Ibm2Key) -> f32 {
        let (v, found) = self.get_num(key);
        if !found {
            return crate::common::SW_PROB_SMOOTH;
        }
        let (den, _) = self.get_den(key);
        if den > 0.0 {
            v / den
        } else {
            crate::common::SW_PROB_SMOOTH
        }
    }

    /// Normalizes every inner vector so `sum_i num == den` (batch M-step).
    pub fn maximize(&mut self) {
        for row in self.inner.values_mut() {
            let den: f32 = row.iter().map(|c| c.num).sum();
            for cell in row.iter_mut() {
                cell.den = den;
            }
        }
    }

    fn outer(key: Ibm2Key) -> (Ibm2OuterKey, usize) {
        let (j, slen, tlen, i) = key;
        ((j, slen, tlen), i as usize)
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
            if cols.len() != 6 {
                return Err(SwAlignError::invalid_format(
                    "alignd",
                    "a record must be `j slen tlen i num den`",
                ));
            }
            let j: u32 = cols[0].parse()?;
            let slen: u32 = cols[1].parse()?;
            let tlen: u32 = cols[2].parse()?;
            let i: u32 = cols[3].parse()?;
            let num: f32 = cols[4].parse()?;
            let den: f32 = cols[5].parse()?;
            self.set_num_den((j, slen, tlen, i), num, den);
        }
        Ok(())
    }

    fn load_binary<R: Read>(&mut self, mut rdr: R) -> Result<()> {
        let mut buf = Vec::new();
        rdr.read_to_end(&mut buf)?;
        let mut slice = buf.as_slice();
        while !slice.is_empty() {
            let ((j, slen, tlen, i, num, den), consumed): (
                (u32, u32, u32, u32, f32, f32),
                usize,
            ) = bincode::decode_from_slice(slice, bincode_config())?;
            self.set_num_den((j, slen, tlen, i), num, den);
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

    fn sorted_rows(&self) -> Vec<(Ibm2OuterKey, &Vec<Cell>)> {
        let mut rows: Vec<_> = self.inner.iter().map(|(&k, v)| (k, v)).collect();
        rows.sort_unstable_by_key(|&(k, _)| k);
        rows
    }

    fn print_text<W: Write>(&self, mut wtr: W) -> Result<()> {
        for ((j, slen, tlen), row) in self.sorted_rows() {
            for (i, cell) in row.iter().enumerate() {
                writeln!(
                    wtr,
                    "{j} {slen} {tlen} {i} {:.8} {:.8}",
                    cell.num, cell.den
                )?;
            }
        }
        Ok(())
    }

    fn print_binary<W: Write>(&self, mut wtr: W) -> Result<()> {
        for ((j, slen, tlen), row) in self.sorted_rows() {
            for (i, cell) in row.iter().enumerate() {
                let record: (u32, u32, u32, u32, f32, f32) =
                    (j, slen, tlen, i as u32, cell.num, cell.den);
                bincode::encode_into_std_write(record, &mut wtr, bincode_config())?;
            }
        }
        Ok(())
    }
}

impl ParamTable for Ibm2AlignTable {
    type Key = Ibm2Key;

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
    fn test_out_of_range_lookup_reports_not_found() {
        let mut t = Ibm2AlignTable::new();
        t.set_num_den((0, 3, 4, 0), 1.0, 2.0);
        t.set_num_den((0, 3, 4, 1), 1.0, 2.0);
        assert_eq!(t.get_num((0, 3, 4, 9)), (0.0, false));
    }

    #[test]
    fn test_maximize_normalizes_row() {
        let mut t = Ibm2AlignTable::new();
        t.set_num((0, 3, 4, 0), 1.0);
        t.set_num((0, 3, 4, 1), 2.0);
        t.set_num((0, 3, 4, 2), 1.0);
        t.maximize();
        assert_eq!(t.get_den((0, 3, 4, 1)), (4.0, true));
    }

    #[test]
    fn test_text_round_trip() {
        let mut t = Ibm2AlignTable::new();
        t.set_num_den((1, 5, 6, 2), 3.0, 9.0);
        let mut buf = Vec::new();
        t.print(&mut buf, TableFormat::Text).unwrap();
        let loaded = Ibm2AlignTable::load(buf.as_slice(), TableFormat::Text).unwrap();
        assert_eq!(loaded.get_num((1, 5, 6, 2)), t.get_num((1, 5, 6, 2)));
    }
}
