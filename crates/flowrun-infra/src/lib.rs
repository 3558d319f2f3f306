//! Infrastructure layer for flowrun.
//!
//! Contains the adapters `flowrun-core` stays free of: the `config.toml`
//! loader, data directory resolution, and agents that reach over the
//! network (`HttpAgent`), plus wiring configured agents into a registry.

pub mod agent;
pub mod config;
pub mod filesystem;
