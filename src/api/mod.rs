//! Ambassador backend access: REST client, payload types and cache keys.

pub mod cached_client;
pub mod client;
pub mod keys;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use cached_client::CachedClient;
pub use client::ApiClient;
