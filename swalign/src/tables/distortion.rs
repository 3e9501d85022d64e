use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};

use hashbrown::HashMap;

use crate::common::bincode_config;
use crate::errors::{Result, SwAlignError};
use crate::tables::{Cell, ParamTable, TableFormat};
use crate::wordclass::WordClassIndex;

/// Conditioning key for the head-distortion table: `(srcClass, trgClass)`.
pub type HeadDistortionKey = (WordClassIndex, WordClassIndex);

/// Fixed width of the jump window the uniform smoothing term spreads
/// probability mass over, shared by head and nonhead distortion.
const DISTORTION_WINDOW: u32 = 5;

/// Head-distortion table (IBM4): `((srcClass, trgClass), dj) -> (num, den)`
/// where `dj = j - center_of_previous_cept` is a signed jump (spec.md §3,
/// §4.6). The inner map is ordered on `dj`, the idiomatic-Rust substitute
/// for `original_source`'s `OrderedVector<int, float>`
/// (`HeadDistortionTable.h`).
#[derive(Clone, Debug, Default)]
pub struct HeadDistortionTable {
    inner: HashMap<HeadDistortionKey, BTreeMap<i32, Cell>>,
}

impl HeadDistortionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Smoothed probability, linearly interpolated with a uniform
    /// distribution over a fixed-width jump window, per spec.md §4.6. At
    /// `smooth_factor == 0.0` the raw estimate is returned if the entry
    /// exists, else the `SW_PROB_SMOOTH` floor; with smoothing enabled, a
    /// missing entry contributes zero to the interpolation rather than
    /// falling back to the floor immediately.
    pub fn prob(&self, key: HeadDistortionKey, dj: i32, smooth_factor: f32) -> f32 {
        let raw = self
            .inner
            .get(&key)
            .and_then(|row| row.get(&dj))
            .and_then(Cell::prob)
            .unwrap_or(0.0);
        if smooth_factor <= 0.0 {
            if raw > 0.0 {
                raw
            } else {
                crate::common::SW_PROB_SMOOTH
            }
        } else {
            let uniform = 1.0 / DISTORTION_WINDOW as f32;
            ((1.0 - smooth_factor) * raw + smooth_factor * uniform).max(crate::common::SW_PROB_SMOOTH)
        }
    }

    /// Normalizes every inner map so `sum_dj num == den`.
    pub fn maximize(&mut self) {
        for row in self.inner.values_mut() {
            let den: f32 = row.values().map(|c| c.num).sum();
            for cell in row.values_mut() {
                cell.den = den;
            }
        }
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
                    "distnd",
                    "a record must be `srcClass trgClass dj num den`",
                ));
            }
            let src_class: u32 = cols[0].parse()?;
            let trg_class: u32 = cols[1].parse()?;
            let dj: i32 = cols[2].parse()?;
            let num: f32 = cols[3].parse()?;
            let den: f32 = cols[4].parse()?;
            self.set_num_den(((src_class, trg_class), dj), num, den);
        }
        Ok(())
    }

    fn load_binary<R: Read>(&mut self, mut rdr: R) -> Result<()> {
        let mut buf = Vec::new();
        rdr.read_to_end(&mut buf)?;
        let mut slice = buf.as_slice();
        while !slice.is_empty() {
            let ((src_class, trg_class, dj, num, den), consumed): (
                (u32, u32, i32, f32, f32),
                usize,
            ) = bincode::decode_from_slice(slice, bincode_config())?;
            self.set_num_den(((src_class, trg_class), dj), num, den);
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

    fn sorted_rows(&self) -> Vec<(HeadDistortionKey, &BTreeMap<i32, Cell>)> {
        let mut rows: Vec<_> = self.inner.iter().map(|(&k, v)| (k, v)).collect();
        rows.sort_unstable_by_key(|&(k, _)| k);
        rows
    }

    fn print_text<W: Write>(&self, mut wtr: W) -> Result<()> {
        for ((src_class, trg_class), row) in self.sorted_rows() {
            for (&dj, cell) in row {
                writeln!(
                    wtr,
                    "{src_class} {trg_class} {dj} {:.8} {:.8}",
                    cell.num, cell.den
                )?;
            }
        }
        Ok(())
    }

    fn print_binary<W: Write>(&self, mut wtr: W) -> Result<()> {
        for ((src_class, trg_class), row) in self.sorted_rows() {
            for (&dj, cell) in row {
                let record: (u32, u32, i32, f32, f32) =
                    (src_class, trg_class, dj, cell.num, cell.den);
                bincode::encode_into_std_write(record, &mut wtr, bincode_config())?;
            }
        }
        Ok(())
    }
}

impl ParamTable for HeadDistortionTable {
    type Key = (HeadDistortionKey, i32);

    fn set_num(&mut self, (key, dj): Self::Key, v: f32) {
        self.inner.entry(key).or_default().entry(dj).or_default().num = v;
    }

    fn set_den(&mut self, (key, _dj): Self::Key, v: f32) {
        for cell in self.inner.entry(key).or_default().values_mut() {
            cell.den = v;
        }
    }

    fn set_num_den(&mut self, (key, dj): Self::Key, num: f32, den: f32) {
        let cell = self.inner.entry(key).or_default().entry(dj).or_default();
        cell.num = num;
        cell.den = den;
    }

    fn get_num(&self, (key, dj): Self::Key) -> (f32, bool) {
        match self.inner.get(&key).and_then(|row| row.get(&dj)) {
            Some(cell) => (cell.num, true),
            None => (0.0, false),
        }
    }

    fn get_den(&self, (key, dj): Self::Key) -> (f32, bool) {
        match self.inner.get(&key).and_then(|row| row.get(&dj)) {
            Some(cell) => (cell.den, true),
            None => (0.0, false),
        }
    }

    fn reserve_space(&mut self, (key, dj): Self::Key) {
        self.inner.entry(key).or_default().entry(dj).or_insert(Cell::ZERO);
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Nonhead-distortion table (IBM4): `(trgClass, dj) -> (num, den)` with
/// `dj = j - j_prev_in_cept > 0` (spec.md §3, §4.6).
#[derive(Clone, Debug, Default)]
pub struct NonheadDistortionTable {
    inner: HashMap<WordClassIndex, BTreeMap<i32, Cell>>,
}

impl NonheadDistortionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Smoothed probability, same interpolation scheme as
    /// [`HeadDistortionTable::prob`].
    pub fn prob(&self, trg_class: WordClassIndex, dj: i32, smooth_factor: f32) -> f32 {
        let raw = self
            .inner
            .get(&trg_class)
            .and_then(|row| row.get(&dj))
            .and_then(Cell::prob)
            .unwrap_or(0.0);
        if smooth_factor <= 0.0 {
            if raw > 0.0 {
                raw
            } else {
                crate::common::SW_PROB_SMOOTH
            }
        } else {
            let uniform = 1.0 / DISTORTION_WINDOW as f32;
            ((1.0 - smooth_factor) * raw + smooth_factor * uniform).max(crate::common::SW_PROB_SMOOTH)
        }
    }

    /// Normalizes every inner map so `sum_dj num == den`.
    pub fn maximize(&mut self) {
        for row in self.inner.values_mut() {
            let den: f32 = row.values().map(|c| c.num).sum();
            for cell in row.values_mut() {
                cell.den = den;
            }
        }
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
            if cols.len() != 4 {
                return Err(SwAlignError::invalid_format(
                    "nonheaddistnd",
                    "a record must be `trgClass dj num den`",
                ));
            }
            let trg_class: u32 = cols[0].parse()?;
            let dj: i32 = cols[1].parse()?;
            let num: f32 = cols[2].parse()?;
            let den: f32 = cols[3].parse()?;
            self.set_num_den((trg_class, dj), num, den);
        }
        Ok(())
    }

    fn load_binary<R: Read>(&mut self, mut rdr: R) -> Result<()> {
        let mut buf = Vec::new();
        rdr.read_to_end(&mut buf)?;
        let mut slice = buf.as_slice();
        while !slice.is_empty() {
            let ((trg_class, dj, num, den), consumed): ((u32, i32, f32, f32), usize) =
                bincode::decode_from_slice(slice, bincode_config())?;
            self.set_num_den((trg_class, dj), num, den);
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

    fn sorted_rows(&self) -> Vec<(WordClassIndex, &BTreeMap<i32, Cell>)> {
        let mut rows: Vec<_> = self.inner.iter().map(|(&k, v)| (k, v)).collect();
        rows.sort_unstable_by_key(|&(k, _)| k);
        rows
    }

    fn print_text<W: Write>(&self, mut wtr: W) -> Result<()> {
        for (trg_class, row) in self.sorted_rows() {
            for (&dj, cell) in row {
                writeln!(wtr, "{trg_class} {dj} {:.8} {:.8}", cell.num, cell.den)?;
            }
        }
        Ok(())
    }

    fn print_binary<W: Write>(&self, mut wtr: W) -> Result<()> {
        for (trg_class, row) in self.sorted_rows() {
            for (&dj, cell) in row {
                let record: (u32, i32, f32, f32) = (trg_class, dj, cell.num, cell.den);
                bincode::encode_into_std_write(record, &mut wtr, bincode_config())?;
            }
        }
        Ok(())
    }
}

impl ParamTable for NonheadDistortionTable {
    type Key = (WordClassIndex, i32);

    fn set_num(&mut self, (trg_class, dj): Self::Key, v: f32) {
        self.inner
            .entry(trg_class)
            .or_default()
            .entry(dj)
            .or_default()
            .num = v;
    }

    fn set_den(&mut self, (trg_class, _dj): Self::Key, v: f32) {
        for cell in self.inner.entry(trg_class).or_default().values_mut() {
            cell.den = v;
        }
    }

    fn set_num_den(&mut self, (trg_class, dj): Self::Key, num: f32, den: f32) {
        let cell = self.inner.entry(trg_class).or_default().entry(dj).or_default();
        cell.num = num;
        cell.den = den;
    }

    fn get_num(&self, (trg_class, dj): Self::Key) -> (f32, bool) {
        match self.inner.get(&trg_class).and_then(|row| row.get(&dj)) {
            Some(cell) => (cell.num, true),
            None => (0.0, false),
        }
    }

    fn get_den(&self, (trg_class, dj): Self::Key) -> (f32, bool) {
        match self.inner.get(&trg_class).and_then(|row| row.get(&dj)) {
            Some(cell) => (cell.den, true),
            None => (0.0, false),
        }
    }

    fn reserve_space(&mut self, (trg_class, dj): Self::Key) {
        self.inner
            .entry(trg_class)
            .or_default()
            .entry(dj)
            .or_insert(Cell::ZERO);
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
    fn test_head_distortion_smoothing_interpolates() {
        let mut t = HeadDistortionTable::new();
        t.set_num_den(((3, 5), 3), 0.97, 1.0);
        let raw = t.prob((3, 5), 3, 0.0);
        assert!((raw - 0.97).abs() < 1e-6);
        let smoothed = t.prob((3, 5), 3, 0.2);
        let expected = 0.8 * raw + 0.2 * (1.0 / DISTORTION_WINDOW as f32);
        assert!((smoothed - expected).abs() < 1e-6, "{smoothed} != {expected}");
        assert!((smoothed - 0.8159).abs() < 2e-4, "{smoothed}");
    }

    #[test]
    fn test_nonhead_distortion_smoothing_interpolates() {
        let mut t = NonheadDistortionTable::new();
        t.set_num_den((1, 1), 0.96, 1.0);
        let raw = t.prob(1, 1, 0.0);
        assert!((raw - 0.96).abs() < 1e-6);
        let smoothed = t.prob(1, 1, 0.2);
        let expected = 0.8 * raw + 0.2 * (1.0 / DISTORTION_WINDOW as f32);
        assert!((smoothed - expected).abs() < 1e-6, "{smoothed} != {expected}");
        assert!((smoothed - 0.8079).abs() < 2e-4, "{smoothed}");
    }

    #[test]
    fn test_nonhead_distortion_missing_entry_smoothing_enabled() {
        let t = NonheadDistortionTable::new();
        let p = t.prob(1, 1, 0.1);
        let expected = 0.1 * (1.0 / DISTORTION_WINDOW as f32);
        assert!((p - expected).abs() < 1e-6);
    }

    #[test]
    fn test_nonhead_distortion_missing_entry_no_smoothing_floors() {
        let t = NonheadDistortionTable::new();
        let p = t.prob(1, 1, 0.0);
        assert!((p - crate::common::SW_PROB_SMOOTH).abs() < 1e-12);
    }

    #[test]
    fn test_round_trip_head() {
        let mut t = HeadDistortionTable::new();
        t.set_num_den(((2, 4), -1), 5.0, 10.0);
        let mut buf = Vec::new();
        t.print(&mut buf, TableFormat::Text).unwrap();
        let loaded = HeadDistortionTable::load(buf.as_slice(), TableFormat::Text).unwrap();
        assert_eq!(loaded.get_num(((2, 4), -1)), t.get_num(((2, 4), -1)));
    }
}
