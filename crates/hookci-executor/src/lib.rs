//! Build runners for the hookci build relay.
//!
//! Provides the local subprocess runner, which clones and builds a commit
//! in a throwaway workspace on the relay host.

pub mod process;

pub use hookci_core::runner::{BuildJob, BuildOutcome, BuildRunner};
pub use process::ProcessRunner;
