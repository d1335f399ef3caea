//! agentgate — action mediation gateway for AI coding agents.
//!
//! This library exposes the core components for integration testing and
//! programmatic use. The binary entrypoint is in `main.rs`.

pub mod approval;
pub mod audit;
pub mod config;
pub mod gateway;
pub mod policy;
pub mod utils;
