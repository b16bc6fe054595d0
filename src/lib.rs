//! Ambassador dashboard client with a persistent, request-coalescing cache.

pub mod api;
pub mod cache;
pub mod commands;
pub mod config;
pub mod logging;
pub mod query;
