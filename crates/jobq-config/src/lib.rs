//! # Jobq Config
//!
//! Configuration for the jobq store and queue.
//! Supports layered configuration from TOML files, `.env` files and
//! `JOBQ__`-prefixed environment variables, with runtime reload.

mod app_config;
mod loader;

pub use app_config::*;
pub use loader::*;
