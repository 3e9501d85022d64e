//! Word-alignment models (IBM1-4, HMM, incremental-HMM) and EM training for
//! statistical machine translation.
//!
//! The crate is organized around one shared capability trait,
//! [`models::AlignmentModel`], implemented by each model variant, plus a set
//! of sparse parameter tables ([`tables`]) that every variant composes from.
//! [`trainer`] drives the tables through batch and incremental EM; [`decode`]
//! computes Viterbi alignments and forward log-likelihoods.
#![deny(missing_docs)]

#[cfg(target_pointer_width = "16")]
compile_error!("`target_pointer_width` must be larger than or equal to 32");

pub mod accum;
pub mod common;
pub mod corpus;
pub mod decode;
pub mod errors;
pub mod models;
pub mod tables;
#[cfg(test)]
mod tests;
pub mod trainer;
pub mod vocab;
pub mod wordclass;

pub use accum::Accumulator;
pub use corpus::{SentencePair, SentencePairStore};
pub use errors::{Result, SwAlignError};
pub use models::{AlignmentModel, IncrHmmModel, Model};
pub use vocab::{Vocabulary, WordIndex};
pub use wordclass::WordClassMap;
