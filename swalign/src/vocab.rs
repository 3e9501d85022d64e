//! Vocabulary service: maps surface tokens to integer word indices and
//! persists the mapping.
//!
//! This is the Rust-native adapter for the "vocabulary service" external
//! collaborator named in the alignment core's data flow: the core consumes
//! it by index lookup only and never mutates it during a training pass.

use std::io::{BufRead, BufReader, Read, Write};

use bincode::{Decode, Encode};
use hashbrown::HashMap;

use crate::common::{bincode_config, NULL_WORD_STR, UNK_WORD_STR};
use crate::errors::{Result, SwAlignError};
use crate::tables::TableFormat;

/// Word index. `0` is reserved for the null source word, `1` for unknown
/// words.
pub type WordIndex = u32;

/// Bidirectional mapping between surface word forms and [`WordIndex`]es.
///
/// Index `0` is always `<NULL>` and index `1` is always `<UNK>`; both are
/// inserted by [`Vocabulary::new`] and cannot be removed.
#[derive(Clone, Debug)]
pub struct Vocabulary {
    word_to_idx: HashMap<String, WordIndex>,
    idx_to_word: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    /// Creates a vocabulary containing only the two reserved entries.
    pub fn new() -> Self {
        let mut v = Self {
            word_to_idx: HashMap::new(),
            idx_to_word: Vec::new(),
        };
        v.idx_to_word.push(NULL_WORD_STR.to_string());
        v.word_to_idx.insert(NULL_WORD_STR.to_string(), 0);
        v.idx_to_word.push(UNK_WORD_STR.to_string());
        v.word_to_idx.insert(UNK_WORD_STR.to_string(), 1);
        v
    }

    /// Number of entries, including the two reserved ones.
    pub fn len(&self) -> usize {
        self.idx_to_word.len()
    }

    /// Whether the vocabulary holds only the reserved entries.
    pub fn is_empty(&self) -> bool {
        self.len() <= 2
    }

    /// Looks up `word`, returning its index if present.
    pub fn get(&self, word: &str) -> Option<WordIndex> {
        self.word_to_idx.get(word).copied()
    }

    /// Looks up `idx`, returning its surface form if present.
    pub fn word_for(&self, idx: WordIndex) -> Option<&str> {
        self.idx_to_word.get(idx as usize).map(String::as_str)
    }

    /// Returns the index for `word`, inserting a new entry if it is not
    /// already present. This is the only mutator: the vocabulary grows
    /// incrementally as a corpus is loaded, rather than being frozen ahead
    /// of time (spec.md's `original_source` shows the source-language
    /// toolkit doing the same during corpus ingestion).
    pub fn get_or_insert(&mut self, word: &str) -> WordIndex {
        if let Some(&idx) = self.word_to_idx.get(word) {
            return idx;
        }
        let idx = self.idx_to_word.len() as WordIndex;
        self.idx_to_word.push(word.to_string());
        self.word_to_idx.insert(word.to_string(), idx);
        idx
    }

    /// Loads a vocabulary from a reader, replacing the current contents.
    ///
    /// Text records are `word_index word_surface` per line; binary records
    /// are `(u32, String)` pairs packed with [`bincode_config`].
    pub fn load<R: Read>(rdr: R, format: TableFormat) -> Result<Self> {
        match format {
            TableFormat::Text => Self::load_text(rdr),
            TableFormat::Binary => Self::load_binary(rdr),
        }
    }

    fn load_text<R: Read>(rdr: R) -> Result<Self> {
        let mut vocab = Self::new();
        let reader = BufReader::new(rdr);
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let mut cols = line.splitn(2, ' ');
            let idx_str = cols
                .next()
                .ok_or_else(|| SwAlignError::invalid_format("vocab", "missing index field"))?;
            let word = cols
                .next()
                .ok_or_else(|| SwAlignError::invalid_format("vocab", "missing word field"))?;
            let idx: WordIndex = idx_str.parse()?;
            while vocab.idx_to_word.len() <= idx as usize {
                vocab.idx_to_word.push(String::new());
            }
            vocab.idx_to_word[idx as usize] = word.to_string();
            vocab.word_to_idx.insert(word.to_string(), idx);
        }
        Ok(vocab)
    }

    fn load_binary<R: Read>(mut rdr: R) -> Result<Self> {
        let mut vocab = Self::new();
        let mut buf = Vec::new();
        rdr.read_to_end(&mut buf)?;
        let mut slice = buf.as_slice();
        while !slice.is_empty() {
            let ((idx, word), consumed): ((u32, String), usize) =
                bincode::decode_from_slice(slice, bincode_config())?;
            while vocab.idx_to_word.len() <= idx as usize {
                vocab.idx_to_word.push(String::new());
            }
            vocab.idx_to_word[idx as usize] = word.clone();
            vocab.word_to_idx.insert(word, idx);
            slice = &slice[consumed..];
        }
        Ok(vocab)
    }

    /// Writes the vocabulary to a writer, one entry per line in text mode
    /// (`word_index word_surface`) or as packed `(u32, String)` records in
    /// binary mode.
    pub fn print<W: Write>(&self, wtr: W, format: TableFormat) -> Result<()> {
        match format {
            TableFormat::Text => self.print_text(wtr),
            TableFormat::Binary => self.print_binary(wtr),
        }
    }

    fn print_text<W: Write>(&self, mut wtr: W) -> Result<()> {
        for (idx, word) in self.idx_to_word.iter().enumerate() {
            writeln!(wtr, "{idx} {word}")?;
        }
        Ok(())
    }

    fn print_binary<W: Write>(&self, mut wtr: W) -> Result<()> {
        for (idx, word) in self.idx_to_word.iter().enumerate() {
            let record: (u32, String) = (idx as u32, word.clone());
            bincode::encode_into_std_write(record, &mut wtr, bincode_config())?;
        }
        Ok(())
    }
}

/// On-disk record kept only to document the binary layout; not used
/// directly since records are variable-length (the surface string).
#[derive(Decode, Encode)]
struct VocabRecord {
    idx: u32,
    word: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_entries() {
        let vocab = Vocabulary::new();
        assert_eq!(vocab.get(NULL_WORD_STR), Some(0));
        assert_eq!(vocab.get(UNK_WORD_STR), Some(1));
        assert_eq!(vocab.word_for(0), Some(NULL_WORD_STR));
        assert_eq!(vocab.word_for(1), Some(UNK_WORD_STR));
    }

    #[test]
    fn test_get_or_insert_is_stable() {
        let mut vocab = Vocabulary::new();
        let a = vocab.get_or_insert("casa");
        let b = vocab.get_or_insert("perro");
        let a2 = vocab.get_or_insert("casa");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(vocab.word_for(a), Some("casa"));
    }

    #[test]
    fn test_text_round_trip() {
        let mut vocab = Vocabulary::new();
        vocab.get_or_insert("ich");
        vocab.get_or_insert("esse");

        let mut buf = Vec::new();
        vocab.print(&mut buf, TableFormat::Text).unwrap();
        let loaded = Vocabulary::load(buf.as_slice(), TableFormat::Text).unwrap();

        assert_eq!(loaded.get("ich"), vocab.get("ich"));
        assert_eq!(loaded.get("esse"), vocab.get("esse"));
        assert_eq!(loaded.len(), vocab.len());
    }

    #[test]
    fn test_binary_round_trip() {
        let mut vocab = Vocabulary::new();
        vocab.get_or_insert("ich");
        vocab.get_or_insert("esse");

        let mut buf = Vec::new();
        vocab.print(&mut buf, TableFormat::Binary).unwrap();
        let loaded = Vocabulary::load(buf.as_slice(), TableFormat::Binary).unwrap();

        assert_eq!(loaded.get("ich"), vocab.get("ich"));
        assert_eq!(loaded.get("esse"), vocab.get("esse"));
    }
}
