//! Word-class loading and lookup (spec.md).

use std::io::{BufRead, BufReader, Read};

use hashbrown::HashMap;

use crate::common::NULL_CLASS;
use crate::errors::{Result, SwAlignError};
use crate::vocab::WordIndex;

/// A word-class id, used by the IBM4 distortion tables to condition on
/// coarse source/target classes instead of individual words.
pub type WordClassIndex = u32;

/// `WordIndex -> WordClassIndex` map. Class `NULL_CLASS` (0) is reserved
/// for the null word and for any word with no assigned class; everything
/// else comes from a loaded two-column text file (spec.md §4.6).
#[derive(Clone, Debug, Default)]
pub struct WordClassMap {
    classes: HashMap<WordIndex, WordClassIndex>,
}

impl WordClassMap {
    /// Creates an empty map; every word defaults to `NULL_CLASS`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The class assigned to `word`, or `NULL_CLASS` if unassigned.
    pub fn class_of(&self, word: WordIndex) -> WordClassIndex {
        self.classes.get(&word).copied().unwrap_or(NULL_CLASS)
    }

    /// Assigns `word` to `class`.
    pub fn set_class(&mut self, word: WordIndex, class: WordClassIndex) {
        self.classes.insert(word, class);
    }

    /// Number of words with an explicit (non-default) class assignment.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no word has an explicit class assignment.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Loads a `word_index class_index` map, replacing current contents.
    pub fn load<R: Read>(rdr: R) -> Result<Self> {
        let mut map = Self::new();
        for line in BufReader::new(rdr).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let cols: Vec<_> = line.split_whitespace().collect();
            if cols.len() != 2 {
                return Err(SwAlignError::invalid_format(
                    "classes",
                    "a record must be `word_index class_index`",
                ));
            }
            let word: WordIndex = cols[0].parse()?;
            let class: WordClassIndex = cols[1].parse()?;
            map.set_class(word, class);
        }
        Ok(map)
    }

    /// Writes the map as `word_index class_index` lines, one per
    /// explicitly-assigned word, sorted by word index.
    pub fn print<W: std::io::Write>(&self, mut wtr: W) -> Result<()> {
        let mut rows: Vec<_> = self.classes.iter().map(|(&w, &c)| (w, c)).collect();
        rows.sort_unstable_by_key(|&(w, _)| w);
        for (word, class) in rows {
            writeln!(wtr, "{word} {class}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unassigned_word_is_null_class() {
        let map = WordClassMap::new();
        assert_eq!(map.class_of(42), NULL_CLASS);
    }

    #[test]
    fn test_set_and_get() {
        let mut map = WordClassMap::new();
        map.set_class(7, 3);
        assert_eq!(map.class_of(7), 3);
        assert_eq!(map.class_of(8), NULL_CLASS);
    }

    #[test]
    fn test_text_round_trip() {
        let mut map = WordClassMap::new();
        map.set_class(2, 5);
        map.set_class(9, 1);
        let mut buf = Vec::new();
        map.print(&mut buf).unwrap();
        let loaded = WordClassMap::load(buf.as_slice()).unwrap();
        assert_eq!(loaded.class_of(2), 5);
        assert_eq!(loaded.class_of(9), 1);
        assert_eq!(loaded.len(), 2);
    }
}
