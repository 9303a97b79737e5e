//! Jailkeeper Library
//!
//! This library provides the core functionality of jailkeeper: converging
//! the chroot jails of a multi-tenant hosting server with the tenants'
//! jail settings, plus its configuration, logging and metrics.

pub mod config;
pub mod jail;
pub mod logging;
pub mod metrics;
