//! Crate-level integration tests for end-to-end alignment scenarios that
//! cut across more than one model or table (spec.md §8's concrete
//! scenarios and quantified invariants). Single-table/single-model
//! behavior is covered by each module's own `#[cfg(test)]` block; this
//! directory is reserved for properties that only show up once several
//! pieces are wired together.

mod em_monotonicity;
mod hmm_self_consistency;
mod pig_latin_pipeline;
