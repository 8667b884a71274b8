//! CLI subcommand implementations.

pub mod ingest;
pub mod prune;
pub mod query;
pub mod status;
pub mod tracking;
pub mod util;
