pub mod assess;
pub mod assistant;
pub mod batch;
pub mod blocker;
pub mod classify;
pub mod config;
pub mod divergence;
pub mod errors;
pub mod exit_codes;
pub mod hosting;
pub mod inspector;
pub mod logging;
pub mod model;
pub mod notes;
pub mod notify;
pub mod operator;
pub mod orchestrator;
pub mod phase;
pub mod poll;
pub mod review;
pub mod snapshot;
pub mod steward_config;
pub mod vcs;

#[cfg(test)]
pub mod testing;
