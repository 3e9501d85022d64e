//! Builder-style training configuration, grounded on the teacher's
//! `TrainerConfig`/`Trainer` builder methods (`vibrato::trainer::Trainer`):
//! `regularization_cost`/`max_iter`/`num_threads` chained setters on an
//! owned struct.

use crate::common::{
    DEFAULT_ALIG_SMOOTH_INTERP_FACTOR, DEFAULT_DISTORTION_SMOOTH_FACTOR, DEFAULT_LEX_SMOOTH_INTERP_FACTOR,
    DEFAULT_MAX_FERTILITY, THREAD_BUFFER_SIZE,
};

/// Training parameters shared by the batch and incremental trainers.
#[derive(Clone, Debug)]
pub struct TrainingConfig {
    num_threads: usize,
    max_iter: u64,
    thread_buffer_size: usize,
    alig_smooth_interp_factor: f32,
    lex_smooth_interp_factor: f32,
    distortion_smooth_factor: f32,
    max_fertility: u32,
    verbose: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            max_iter: 5,
            thread_buffer_size: THREAD_BUFFER_SIZE,
            alig_smooth_interp_factor: DEFAULT_ALIG_SMOOTH_INTERP_FACTOR,
            lex_smooth_interp_factor: DEFAULT_LEX_SMOOTH_INTERP_FACTOR,
            distortion_smooth_factor: DEFAULT_DISTORTION_SMOOTH_FACTOR,
            max_fertility: DEFAULT_MAX_FERTILITY,
            verbose: false,
        }
    }
}

impl TrainingConfig {
    /// Creates a config with the crate's defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of worker threads the batch trainer shards each chunk
    /// across. `1` runs the E-step on the calling thread only.
    pub fn num_threads(mut self, n: usize) -> Self {
        self.num_threads = n.max(1);
        self
    }

    /// Number of EM iterations to run.
    pub fn max_iter(mut self, n: u64) -> Self {
        self.max_iter = n;
        self
    }

    /// Sentence-pair count per chunk; cancellation is only checked at
    /// chunk boundaries (spec.md §5).
    pub fn thread_buffer_size(mut self, n: usize) -> Self {
        self.thread_buffer_size = n.max(1);
        self
    }

    /// HMM transition-table smoothing interpolation factor.
    pub fn alig_smooth_interp_factor(mut self, f: f32) -> Self {
        self.alig_smooth_interp_factor = f;
        self
    }

    /// Lexical-table smoothing interpolation factor.
    pub fn lex_smooth_interp_factor(mut self, f: f32) -> Self {
        self.lex_smooth_interp_factor = f;
        self
    }

    /// IBM4 distortion-table smoothing interpolation factor.
    pub fn distortion_smooth_factor(mut self, f: f32) -> Self {
        self.distortion_smooth_factor = f;
        self
    }

    /// Fertility cap passed to [`crate::tables::FertilityTable::new`].
    pub fn max_fertility(mut self, n: u32) -> Self {
        self.max_fertility = n;
        self
    }

    /// Enables verbosity-gated `stderr` diagnostics during training
    /// (spec.md §7).
    pub fn verbose(mut self, v: bool) -> Self {
        self.verbose = v;
        self
    }

    /// The configured worker-thread count.
    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    /// The configured iteration count.
    pub fn get_max_iter(&self) -> u64 {
        self.max_iter
    }

    /// The configured chunk size.
    pub fn get_thread_buffer_size(&self) -> usize {
        self.thread_buffer_size
    }

    /// The configured fertility cap.
    pub fn get_max_fertility(&self) -> u32 {
        self.max_fertility
    }

    /// The configured HMM transition-table smoothing interpolation factor.
    pub fn get_alig_smooth_interp_factor(&self) -> f32 {
        self.alig_smooth_interp_factor
    }

    /// The configured lexical-table smoothing interpolation factor.
    pub fn get_lex_smooth_interp_factor(&self) -> f32 {
        self.lex_smooth_interp_factor
    }

    /// The configured IBM4 distortion-table smoothing interpolation factor.
    pub fn get_distortion_smooth_factor(&self) -> f32 {
        self.distortion_smooth_factor
    }

    /// Whether verbosity-gated diagnostics are enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let cfg = TrainingConfig::new().num_threads(4).max_iter(10).verbose(true);
        assert_eq!(cfg.get_num_threads(), 4);
        assert_eq!(cfg.get_max_iter(), 10);
        assert!(cfg.is_verbose());
    }

    #[test]
    fn test_num_threads_clamps_to_one() {
        let cfg = TrainingConfig::new().num_threads(0);
        assert_eq!(cfg.get_num_threads(), 1);
    }
}
