//! Training drivers: a multi-threaded batch EM loop and a generic online
//! (incremental) wrapper, both generic over [`crate::models::AlignmentModel`]
//! (spec.md §4.7, §4.8, §5).

mod batch;
mod config;
mod incremental;

pub use batch::train_sent_pair_range;
pub use config::TrainingConfig;
pub use incremental::IncrementalTrainer;
