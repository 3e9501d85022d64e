use std::io::{BufRead, BufReader, Read, Write};

use hashbrown::HashMap;

use crate::common::{bincode_config, SW_PROB_SMOOTH};
use crate::errors::{Result, SwAlignError};
use crate::tables::{Cell, ParamTable, TableFormat};
use crate::vocab::WordIndex;

/// Lexical translation table: `p(t|s) = num(s,t) / den(s)`, smoothed
/// against a uniform floor (spec.md §3, §4.2).
#[derive(Clone, Debug, Default)]
pub struct LexTable {
    inner: HashMap<WordIndex, HashMap<WordIndex, Cell>>,
}

impl LexTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Smoothed translation probability `p(t|s)`, per spec.md §4.2:
    /// `(num + eps) / (den + eps * |V_t|)`, falling back to the uniform
    /// floor when the source word has never been observed.
    pub fn prob(&self, s: WordIndex, t: WordIndex, vocab_size: usize) -> f32 {
        let eps = SW_PROB_SMOOTH;
        match self.inner.get(&s).and_then(|inner| inner.get(&t)) {
            Some(cell) if cell.den > 0.0 => {
                (cell.num + eps) / (cell.den + eps * vocab_size as f32)
            }
            _ => SW_PROB_SMOOTH,
        }
    }

    /// `log(p(t|s))`, computed directly in log-space for stability when
    /// `num`/`den` are small (spec.md §4.2).
    pub fn log_prob(&self, s: WordIndex, t: WordIndex, vocab_size: usize) -> f32 {
        self.prob(s, t, vocab_size).max(f32::MIN_POSITIVE).ln()
    }

    /// Iterates `(t, cell)` pairs for a given conditioning word `s`.
    pub fn row(&self, s: WordIndex) -> impl Iterator<Item = (WordIndex, Cell)> + '_ {
        self.inner
            .get(&s)
            .into_iter()
            .flat_map(|inner| inner.iter().map(|(&t, &c)| (t, c)))
    }

    /// All conditioning source words currently stored.
    pub fn sources(&self) -> impl Iterator<Item = WordIndex> + '_ {
        self.inner.keys().copied()
    }

    /// Normalizes every row so that `sum_t num(s,t) == den(s)` (the batch
    /// M-step for lexical counts, spec.md §4.7 step 3).
    pub fn maximize(&mut self) {
        for inner in self.inner.values_mut() {
            let den: f32 = inner.values().map(|c| c.num).sum();
            for cell in inner.values_mut() {
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
                    "lexnd",
                    "a record must be `s t num den`",
                ));
            }
            let s: WordIndex = cols[0].parse()?;
            let t: WordIndex = cols[1].parse()?;
            let num: f32 = cols[2].parse()?;
            let den: f32 = cols[3].parse()?;
            self.set_num_den((s, t), num, den);
        }
        Ok(())
    }

    fn load_binary<R: Read>(&mut self, mut rdr: R) -> Result<()> {
        let mut buf = Vec::new();
        rdr.read_to_end(&mut buf)?;
        let mut slice = buf.as_slice();
        while !slice.is_empty() {
            let ((s, t, num, den), consumed): ((u32, u32, f32, f32), usize) =
                bincode::decode_from_slice(slice, bincode_config())?;
            self.set_num_den((s, t), num, den);
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

    fn print_text<W: Write>(&self, mut wtr: W) -> Result<()> {
        let mut sources: Vec<_> = self.inner.keys().copied().collect();
        sources.sort_unstable();
        for s in sources {
            let inner = &self.inner[&s];
            let mut targets: Vec<_> = inner.keys().copied().collect();
            targets.sort_unstable();
            for t in targets {
                let cell = inner[&t];
                writeln!(wtr, "{s} {t} {:.8} {:.8}", cell.num, cell.den)?;
            }
        }
        Ok(())
    }

    fn print_binary<W: Write>(&self, mut wtr: W) -> Result<()> {
        let mut sources: Vec<_> = self.inner.keys().copied().collect();
        sources.sort_unstable();
        for s in sources {
            let inner = &self.inner[&s];
            let mut targets: Vec<_> = inner.keys().copied().collect();
            targets.sort_unstable();
            for t in targets {
                let cell = inner[&t];
                let record: (u32, u32, f32, f32) = (s, t, cell.num, cell.den);
                bincode::encode_into_std_write(record, &mut wtr, bincode_config())?;
            }
        }
        Ok(())
    }
}

impl ParamTable for LexTable {
    type Key = (WordIndex, WordIndex);

    fn set_num(&mut self, (s, t): Self::Key, v: f32) {
        self.inner.entry(s).or_default().entry(t).or_default().num = v;
    }

    fn set_den(&mut self, (s, _t): Self::Key, v: f32) {
        for cell in self.inner.entry(s).or_default().values_mut() {
            cell.den = v;
        }
        // Ensure the conditioning key exists even with no predicted entries yet.
        self.inner.entry(s).or_default();
    }

    fn set_num_den(&mut self, (s, t): Self::Key, num: f32, den: f32) {
        let cell = self.inner.entry(s).or_default().entry(t).or_default();
        cell.num = num;
        cell.den = den;
    }

    fn get_num(&self, (s, t): Self::Key) -> (f32, bool) {
        match self.inner.get(&s).and_then(|inner| inner.get(&t)) {
            Some(cell) => (cell.num, true),
            None => (0.0, false),
        }
    }

    fn get_den(&self, (s, t): Self::Key) -> (f32, bool) {
        match self.inner.get(&s).and_then(|inner| inner.get(&t)) {
            Some(cell) => (cell.den, true),
            None => (0.0, false),
        }
    }

    fn reserve_space(&mut self, (s, t): Self::Key) {
        self.inner.entry(s).or_default().entry(t).or_insert(Cell::ZERO);
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
    fn test_set_get_round_trip() {
        let mut t = LexTable::new();
        t.set_num_den((3, 7), 2.0, 5.0);
        assert_eq!(t.get_num((3, 7)), (2.0, true));
        assert_eq!(t.get_den((3, 7)), (5.0, true));
        assert_eq!(t.get_num((3, 8)), (0.0, false));
    }

    #[test]
    fn test_reserve_space_is_idempotent() {
        let mut t = LexTable::new();
        t.reserve_space((1, 2));
        t.reserve_space((1, 2));
        assert_eq!(t.get_num((1, 2)), (0.0, true));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_prob_uses_smoothing_floor_when_absent() {
        let t = LexTable::new();
        let p = t.prob(1, 2, 100);
        assert!(p > 0.0 && p <= 1.0);
        assert!((p - SW_PROB_SMOOTH).abs() < 1e-12);
    }

    #[test]
    fn test_maximize_normalizes_row() {
        let mut t = LexTable::new();
        t.set_num((1, 2), 3.0);
        t.set_num((1, 3), 1.0);
        t.maximize();
        let (num, _) = t.get_num((1, 2));
        let (den, _) = t.get_den((1, 2));
        assert_eq!(num, 3.0);
        assert_eq!(den, 4.0);
        let p = t.prob(1, 2, 10);
        assert!((p - 3.0 / 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_text_round_trip() {
        let mut t = LexTable::new();
        t.set_num_den((1, 2), 4.0, 8.0);
        t.set_num_den((2, 5), 1.5, 3.0);
        let mut buf = Vec::new();
        t.print(&mut buf, TableFormat::Text).unwrap();
        let loaded = LexTable::load(buf.as_slice(), TableFormat::Text).unwrap();
        assert_eq!(loaded.get_num((1, 2)), t.get_num((1, 2)));
        assert_eq!(loaded.get_den((2, 5)), t.get_den((2, 5)));
    }

    #[test]
    fn test_binary_round_trip_is_exact() {
        let mut t = LexTable::new();
        t.set_num_den((1, 2), 4.0, 8.0);
        t.set_num_den((9, 5), 0.333_333, 1.0);
        let mut buf = Vec::new();
        t.print(&mut buf, TableFormat::Binary).unwrap();
        let loaded = LexTable::load(buf.as_slice(), TableFormat::Binary).unwrap();
        assert_eq!(loaded.get_num((1, 2)), t.get_num((1, 2)));
        assert_eq!(loaded.get_num((9, 5)), t.get_num((9, 5)));
    }
}
