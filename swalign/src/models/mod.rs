//! The alignment model family: IBM1, IBM2, HMM, IBM3, IBM4, plus the
//! incremental-HMM variant, behind one tagged enum and a shared capability
//! trait (spec.md §9's "tagged variants dispatching through a small
//! capability interface", replacing the source toolkit's virtual-method
//! class hierarchy).

mod ibm1;
mod ibm2;
mod ibm3;
mod ibm4;
pub mod incr_hmm;
mod hmm;

pub use hmm::HmmModel;
pub use ibm1::Ibm1Model;
pub use ibm2::Ibm2Model;
pub use ibm3::Ibm3Model;
pub use ibm4::Ibm4Model;
pub use incr_hmm::IncrHmmModel;

use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::accum::Accumulator;
use crate::corpus::SentencePair;
use crate::errors::{Result, SwAlignError};
use crate::tables::TableFormat;
use crate::wordclass::WordClassMap;

/// Shared capability every model variant implements (spec.md §9). The
/// batch and incremental trainers are generic over this trait rather than
/// over the `Model` enum directly, so each variant's accumulator type can
/// differ.
pub trait AlignmentModel {
    /// The per-pair sufficient-statistics accumulator this model's E-step
    /// writes into.
    type Accum: Accumulator + 'static;

    /// Human-readable model name, matching the CLI's `--model` values.
    fn name(&self) -> &'static str;

    /// Current EM iteration counter.
    fn iter(&self) -> u64;

    /// Computes one pair's E-step posteriors into `acc` and returns the
    /// pair's log-likelihood contribution (weighted by `pair.count`).
    /// Returns `SwAlignError::Numeric` (never panics) if a posterior
    /// evaluates to `NaN`; the trainer counts and skips such pairs rather
    /// than aborting (spec.md §4.11).
    fn accumulate_pair(&self, vocab_size: usize, pair: &SentencePair) -> Result<(Self::Accum, f32)>;

    /// Writes an accumulated total into this model's owned tables
    /// (spec.md §4.7 step 2's chunk-merge target, generalized to "the one
    /// merge call made after every chunk has been folded together").
    fn merge_accum(&mut self, acc: Self::Accum);

    /// The batch M-step (spec.md §4.7 step 3): normalizes every
    /// conditioning key's row so `sum num == den`, applying smoothing
    /// floors at lookup time rather than at write time.
    fn maximize(&mut self);

    /// Advances the iteration counter, invalidating iter-keyed caches.
    fn bump_iter(&mut self);

    /// The Viterbi/best alignment for one sentence pair, returning the
    /// per-target-position source index (`0` = null) and the alignment's
    /// joint log-probability (spec.md §4.9).
    fn best_alignment(&self, vocab_size: usize, pair: &SentencePair) -> (Vec<usize>, f32);

    /// `getAlignmentLgProb`: the joint log-probability of `pair` under a
    /// caller-supplied (not necessarily best) alignment.
    fn score_alignment(&self, vocab_size: usize, pair: &SentencePair, alignment: &[usize]) -> f32;
}

/// Tagged union over the five batch-trainable model variants (spec.md
/// §9). `IncrHmmModel` is deliberately not a variant here: it wraps an
/// owned `HmmModel` plus online-training scratch state and is constructed
/// and driven directly through [`IncrHmmModel`], mirroring how the
/// incremental trainer is a wrapper rather than a sixth parallel model
/// class in spec.md §4.8.
pub enum Model {
    /// IBM Model 1: uniform alignment distribution.
    Ibm1(Ibm1Model),
    /// IBM Model 2: position-dependent alignment table.
    Ibm2(Ibm2Model),
    /// The HMM alignment model.
    Hmm(HmmModel),
    /// IBM Model 3: adds fertility and positional distortion.
    Ibm3(Ibm3Model),
    /// IBM Model 4: class-conditioned head/nonhead distortion.
    Ibm4(Ibm4Model),
}

impl Model {
    /// The model's name, matching `--model` CLI values.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ibm1(m) => m.name(),
            Self::Ibm2(m) => m.name(),
            Self::Hmm(m) => m.name(),
            Self::Ibm3(m) => m.name(),
            Self::Ibm4(m) => m.name(),
        }
    }

    /// Current EM iteration counter.
    pub fn iter(&self) -> u64 {
        match self {
            Self::Ibm1(m) => m.iter(),
            Self::Ibm2(m) => m.iter(),
            Self::Hmm(m) => m.iter(),
            Self::Ibm3(m) => m.iter(),
            Self::Ibm4(m) => m.iter(),
        }
    }

    /// Best alignment for one pair, dispatching to the active variant.
    pub fn best_alignment(&self, vocab_size: usize, pair: &SentencePair) -> (Vec<usize>, f32) {
        match self {
            Self::Ibm1(m) => m.best_alignment(vocab_size, pair),
            Self::Ibm2(m) => m.best_alignment(vocab_size, pair),
            Self::Hmm(m) => m.best_alignment(vocab_size, pair),
            Self::Ibm3(m) => m.best_alignment(vocab_size, pair),
            Self::Ibm4(m) => m.best_alignment(vocab_size, pair),
        }
    }

    /// `getAlignmentLgProb`, dispatching to the active variant.
    pub fn score_alignment(&self, vocab_size: usize, pair: &SentencePair, alignment: &[usize]) -> f32 {
        match self {
            Self::Ibm1(m) => m.score_alignment(vocab_size, pair, alignment),
            Self::Ibm2(m) => m.score_alignment(vocab_size, pair, alignment),
            Self::Hmm(m) => m.score_alignment(vocab_size, pair, alignment),
            Self::Ibm3(m) => m.score_alignment(vocab_size, pair, alignment),
            Self::Ibm4(m) => m.score_alignment(vocab_size, pair, alignment),
        }
    }

    /// Writes every owned table to `<prefix>.<suffix>` files, in the given
    /// format (spec.md §6).
    pub fn save(&self, prefix: &str, format: TableFormat) -> Result<()> {
        match self {
            Self::Ibm1(m) => m.save(prefix, format),
            Self::Ibm2(m) => m.save(prefix, format),
            Self::Hmm(m) => m.save(prefix, format),
            Self::Ibm3(m) => m.save(prefix, format),
            Self::Ibm4(m) => m.save(prefix, format),
        }
    }

    /// Parses a `--model` CLI value into an empty (untrained) model,
    /// initialized from a predecessor per spec.md §9's transfer rule where
    /// applicable.
    pub fn new(name: &str, max_fertility: u32) -> Result<Self> {
        match name {
            "ibm1" => Ok(Self::Ibm1(Ibm1Model::new())),
            "ibm2" => Ok(Self::Ibm2(Ibm2Model::from_ibm1(Ibm1Model::new()))),
            "hmm" => Ok(Self::Hmm(HmmModel::from_ibm1(&Ibm1Model::new()))),
            "ibm3" => Ok(Self::Ibm3(Ibm3Model::from_hmm(&HmmModel::from_ibm1(&Ibm1Model::new()), max_fertility))),
            "ibm4" => Ok(Self::Ibm4(Ibm4Model::from_ibm3(
                &Ibm3Model::from_hmm(&HmmModel::from_ibm1(&Ibm1Model::new()), max_fertility),
                &WordClassMap::new(),
            ))),
            other => Err(SwAlignError::invalid_argument(
                "model",
                format!("unknown model name `{other}`"),
            )),
        }
    }
}

pub(crate) fn open_reader(path: &Path) -> Result<BufReader<std::fs::File>> {
    Ok(BufReader::new(std::fs::File::open(path)?))
}

pub(crate) fn create_writer(path: &Path) -> Result<BufWriter<std::fs::File>> {
    Ok(BufWriter::new(std::fs::File::create(path)?))
}

pub(crate) fn table_path(prefix: &str, suffix: &str) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("{prefix}.{suffix}"))
}
