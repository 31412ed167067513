//! CLI subcommand implementations for the job-harvest binary.

pub mod run_cmd;
pub mod store_cmd;
