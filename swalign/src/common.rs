//! Common settings and constants shared across swalign.
use bincode::config::{self, Fixint, LittleEndian};

/// Gets the common bincode configuration used to serialize parameter tables
/// in binary form: little-endian, fixed-width integers, no record
/// terminator (EOF terminates the stream, per the parameter file format).
pub const fn bincode_config() -> config::Configuration<LittleEndian, Fixint> {
    config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

/// Reserved word index for the null source word.
pub const NULL_WORD: u32 = 0;
/// Reserved word index for unknown words.
pub const UNK_WORD: u32 = 1;
/// Surface form of the null source word.
pub const NULL_WORD_STR: &str = "<NULL>";
/// Surface form of the unknown-word token.
pub const UNK_WORD_STR: &str = "<UNK>";

/// Reserved class index for unclassified words.
pub const NULL_CLASS: u32 = 0;

/// Uniform smoothing floor applied whenever a lookup would otherwise divide
/// by zero or return an absent entry.
pub const SW_PROB_SMOOTH: f32 = 1e-7;

/// Default chunk size for sharding a sentence-pair range across worker
/// threads during the E-step.
pub const THREAD_BUFFER_SIZE: usize = 10_000;

/// Default maximum fertility considered by the fertility table.
pub const DEFAULT_MAX_FERTILITY: u32 = 10;

/// Default interpolation factor for the HMM's alignment-table smoothing.
pub const DEFAULT_ALIG_SMOOTH_INTERP_FACTOR: f32 = 0.3;
/// Default interpolation factor for the HMM's lexical smoothing.
pub const DEFAULT_LEX_SMOOTH_INTERP_FACTOR: f32 = 0.1;
/// Default interpolation factor for IBM4's distortion smoothing.
pub const DEFAULT_DISTORTION_SMOOTH_FACTOR: f32 = 0.2;

/// Lower clamp applied to log-domain expected values in the forward matrix
/// to guard against underflow.
pub const EXP_VAL_LOG_MIN: f32 = -9.0;
/// Upper clamp applied to log-domain expected values in the forward matrix
/// to guard against overflow.
pub const EXP_VAL_LOG_MAX: f32 = -0.01;

/// A conservative ceiling on sentence length accepted by
/// [`crate::corpus::SentencePairStore`]; pairs with a side exceeding this
/// are skipped by `sentenceLengthIsOk`.
pub const MAX_SENTENCE_LENGTH: usize = 1024;

/// `log(exp(a) + exp(b))`, stable for large negative inputs.
pub fn log_sum_exp(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// Clamps a log-domain value into `[EXP_VAL_LOG_MIN, EXP_VAL_LOG_MAX]`, per
/// spec.md §4.11's forward-matrix underflow/overflow guard.
pub fn clamp_log(x: f32) -> f32 {
    x.clamp(EXP_VAL_LOG_MIN, EXP_VAL_LOG_MAX)
}
