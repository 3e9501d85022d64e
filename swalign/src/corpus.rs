//! Sentence-pair store: the "sentence-pair service" external collaborator.
//!
//! Loads three parallel, whitespace-tokenized files (source, target, and an
//! optional weights file defaulting to `1.0`) into an indexed, immutable
//! store a trainer can shard by range.

use std::io::{BufRead, BufReader, Read};

use crate::common::MAX_SENTENCE_LENGTH;
use crate::errors::{Result, SwAlignError};
use crate::vocab::{Vocabulary, WordIndex};

/// One bilingual sentence pair plus its training weight.
///
/// `src`/`trg` hold resolved [`WordIndex`]es (the null word is *not*
/// prefixed here; models prepend it at lookup time, as needed).
#[derive(Clone, Debug, PartialEq)]
pub struct SentencePair {
    /// Source sentence, one [`WordIndex`] per token.
    pub src: Vec<WordIndex>,
    /// Target sentence, one [`WordIndex`] per token.
    pub trg: Vec<WordIndex>,
    /// Real-valued training weight (fractional counts are legal).
    pub count: f32,
}

impl SentencePair {
    /// Source length, excluding the null word.
    pub fn slen(&self) -> usize {
        self.src.len()
    }

    /// Target length.
    pub fn tlen(&self) -> usize {
        self.trg.len()
    }
}

/// An indexed, immutable collection of [`SentencePair`]s.
///
/// Realizes the "lazy finite restartable sequence" of spec.md's design
/// notes concretely as an owned `Vec`: training shards `[lo, hi]` ranges
/// across worker threads and needs random access, which a pull-style
/// iterator alone cannot support. A pair failing `sentenceLengthIsOk`
/// (spec.md §4.10) is recorded with its `skip` flag set rather than
/// removed, so indices handed to `range` stay stable.
#[derive(Clone, Debug, Default)]
pub struct SentencePairStore {
    pairs: Vec<SentencePair>,
    skip: Vec<bool>,
    skipped_count: usize,
}

impl SentencePairStore {
    /// Loads a corpus from parallel readers. `weights` is optional; when
    /// absent every pair gets a weight of `1.0`. Tokens are resolved
    /// (inserting new surface forms) against `vocab`.
    pub fn load<S, T, Wt>(
        src_rdr: S,
        trg_rdr: T,
        weights_rdr: Option<Wt>,
        vocab: &mut Vocabulary,
    ) -> Result<Self>
    where
        S: Read,
        T: Read,
        Wt: Read,
    {
        let src_lines = BufReader::new(src_rdr).lines();
        let trg_lines = BufReader::new(trg_rdr).lines();
        let mut weight_lines = weights_rdr.map(|r| BufReader::new(r).lines());

        let mut store = Self::default();
        for (src_line, trg_line) in src_lines.zip(trg_lines) {
            let src_line = src_line?;
            let trg_line = trg_line?;
            let count = match weight_lines.as_mut() {
                Some(lines) => match lines.next() {
                    Some(line) => line?.trim().parse().map_err(SwAlignError::from)?,
                    None => {
                        return Err(SwAlignError::invalid_format(
                            "weights",
                            "fewer weight lines than sentence lines",
                        ))
                    }
                },
                None => 1.0,
            };

            let src: Vec<WordIndex> = src_line
                .split_whitespace()
                .map(|w| vocab.get_or_insert(w))
                .collect();
            let trg: Vec<WordIndex> = trg_line
                .split_whitespace()
                .map(|w| vocab.get_or_insert(w))
                .collect();

            let pair = SentencePair { src, trg, count };
            let skip = !sentence_length_is_ok(&pair);
            if skip {
                store.skipped_count += 1;
            }
            store.pairs.push(pair);
            store.skip.push(skip);
        }
        Ok(store)
    }

    /// Total number of pairs, including skipped ones.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the store holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Borrows the pair at `idx`, if in range.
    pub fn get(&self, idx: usize) -> Option<&SentencePair> {
        self.pairs.get(idx)
    }

    /// Whether the pair at `idx` was marked unusable by
    /// `sentenceLengthIsOk` filtering.
    pub fn is_skipped(&self, idx: usize) -> bool {
        self.skip.get(idx).copied().unwrap_or(true)
    }

    /// Number of pairs skipped so far by length filtering.
    pub fn skipped_count(&self) -> usize {
        self.skipped_count
    }

    /// Iterates `(index, pair)` for every non-skipped pair.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &SentencePair)> {
        self.pairs
            .iter()
            .enumerate()
            .filter(move |&(i, _)| !self.skip[i])
    }

    /// Iterates `(index, pair)` over `lo..hi`, skipping filtered pairs.
    pub fn range(&self, lo: usize, hi: usize) -> impl Iterator<Item = (usize, &SentencePair)> {
        let hi = hi.min(self.pairs.len());
        (lo..hi).filter_map(move |i| {
            if self.skip[i] {
                None
            } else {
                Some((i, &self.pairs[i]))
            }
        })
    }
}

/// `sentenceLengthIsOk` (spec.md §4.10): either side empty, or either side
/// exceeding [`MAX_SENTENCE_LENGTH`], fails the pair.
fn sentence_length_is_ok(pair: &SentencePair) -> bool {
    !pair.src.is_empty()
        && !pair.trg.is_empty()
        && pair.src.len() <= MAX_SENTENCE_LENGTH
        && pair.trg.len() <= MAX_SENTENCE_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_simple(src: &str, trg: &str) -> (SentencePairStore, Vocabulary) {
        let mut vocab = Vocabulary::new();
        let store = SentencePairStore::load::<_, _, &[u8]>(src.as_bytes(), trg.as_bytes(), None, &mut vocab)
            .unwrap();
        (store, vocab)
    }

    #[test]
    fn test_default_weight_is_one() {
        let (store, _vocab) = load_simple("a b\n", "x y\n");
        assert_eq!(store.get(0).unwrap().count, 1.0);
    }

    #[test]
    fn test_empty_side_is_skipped_not_removed() {
        let (store, _vocab) = load_simple("a b\n\n", "x y\nz\n");
        assert_eq!(store.len(), 2);
        assert!(store.is_skipped(1));
        assert_eq!(store.skipped_count(), 1);
        assert_eq!(store.iter().count(), 1);
    }

    #[test]
    fn test_weights_file_overrides_default() {
        let mut vocab = Vocabulary::new();
        let store = SentencePairStore::load(
            "a b\n".as_bytes(),
            "x y\n".as_bytes(),
            Some("2.5\n".as_bytes()),
            &mut vocab,
        )
        .unwrap();
        assert_eq!(store.get(0).unwrap().count, 2.5);
    }

    #[test]
    fn test_range_skips_filtered_pairs() {
        let (store, _vocab) = load_simple("a\n\nb\n", "x\ny\nz\n");
        let indices: Vec<_> = store.range(0, 3).map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2]);
    }
}
