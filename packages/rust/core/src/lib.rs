//! Core build logic for clashbuilder.
//!
//! This crate ties together node partitioning, rule aggregation and document
//! composition into the end-to-end build (`pipeline::run`).

pub mod composer;
pub mod matcher;
pub mod partition;
pub mod pipeline;
pub mod rules;
