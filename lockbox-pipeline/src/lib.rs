//! # lockbox-pipeline
//!
//! Runs the configured stages of one cycle as external processes.
//!
//! Call [`PipelineExecutor::run_cycle`] with the ordered stage table and the
//! cycle log; the returned [`lockbox_core::CycleResult`] records one outcome
//! per stage that ran.

pub mod executor;

pub use executor::PipelineExecutor;
