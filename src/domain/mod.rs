//! Domain layer types and invariants.

pub mod blocks;
pub mod error;
pub mod feed;
pub mod scoring;
