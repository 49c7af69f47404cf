//! HTTP front door for the hookci build relay.
//!
//! Accepts push webhooks, serves build and deploy logs, exposes project and
//! build records, and notifies outside endpoints when builds complete.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
