//! Cache keys for backend resources.
//!
//! Keys follow `family:scope[:id]`. Collection and detail keys of one family
//! share the family prefix, so a whole family can be dropped with a single
//! prefix invalidation after a create or delete.

use crate::cache::CacheKey;

use super::types::{Ambassador, Package, Shipment, Teenager};

/// Resource families, each owning one key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFamily {
  Session,
  Me,
  Teenagers,
  Packages,
  Shipments,
}

impl ResourceFamily {
  /// Families holding data that belongs to the logged-in ambassador.
  pub const USER_SCOPED: [ResourceFamily; 4] = [
    ResourceFamily::Me,
    ResourceFamily::Teenagers,
    ResourceFamily::Packages,
    ResourceFamily::Shipments,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Self::Session => "session",
      Self::Me => "me",
      Self::Teenagers => "teenagers",
      Self::Packages => "packages",
      Self::Shipments => "shipments",
    }
  }

  /// Prefix shared by every key of this family, e.g. `teenagers:`.
  pub fn prefix(self) -> String {
    format!("{}:", self.name())
  }

  fn key(self, scope: &str, id: Option<u64>) -> String {
    match id {
      Some(id) => format!("{}:{}:{}", self.name(), scope, id),
      None => format!("{}:{}", self.name(), scope),
    }
  }
}

/// Bearer token of the current session
#[derive(Debug, Clone, Copy)]
pub struct SessionTokenKey;

impl CacheKey for SessionTokenKey {
  type Value = String;

  fn cache_key(&self) -> String {
    ResourceFamily::Session.key("token", None)
  }

  fn description(&self) -> String {
    "session token".to_string()
  }
}

/// Profile of the logged-in ambassador
#[derive(Debug, Clone, Copy)]
pub struct MeKey;

impl CacheKey for MeKey {
  type Value = Ambassador;

  fn cache_key(&self) -> String {
    ResourceFamily::Me.key("ambassador", None)
  }

  fn description(&self) -> String {
    "ambassador profile".to_string()
  }
}

#[derive(Debug, Clone, Copy)]
pub struct TeenagersKey;

impl CacheKey for TeenagersKey {
  type Value = Vec<Teenager>;

  fn cache_key(&self) -> String {
    ResourceFamily::Teenagers.key("list", None)
  }

  fn description(&self) -> String {
    "registered teenagers".to_string()
  }
}

#[derive(Debug, Clone, Copy)]
pub struct TeenagerKey {
  pub id: u64,
}

impl CacheKey for TeenagerKey {
  type Value = Teenager;

  fn cache_key(&self) -> String {
    ResourceFamily::Teenagers.key("detail", Some(self.id))
  }

  fn description(&self) -> String {
    format!("teenager {}", self.id)
  }
}

#[derive(Debug, Clone, Copy)]
pub struct PackagesKey;

impl CacheKey for PackagesKey {
  type Value = Vec<Package>;

  fn cache_key(&self) -> String {
    ResourceFamily::Packages.key("list", None)
  }

  fn description(&self) -> String {
    "packages".to_string()
  }
}

#[derive(Debug, Clone, Copy)]
pub struct PackageKey {
  pub id: u64,
}

impl CacheKey for PackageKey {
  type Value = Package;

  fn cache_key(&self) -> String {
    ResourceFamily::Packages.key("detail", Some(self.id))
  }

  fn description(&self) -> String {
    format!("package {}", self.id)
  }
}

#[derive(Debug, Clone, Copy)]
pub struct ShipmentKey {
  pub package_id: u64,
}

impl CacheKey for ShipmentKey {
  type Value = Shipment;

  fn cache_key(&self) -> String {
    ResourceFamily::Shipments.key("tracking", Some(self.package_id))
  }

  fn description(&self) -> String {
    format!("shipment tracking for package {}", self.package_id)
  }
}
