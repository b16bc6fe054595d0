//! Payloads exchanged with the ambassador backend.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The logged-in ambassador's profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ambassador {
  pub id: u64,
  pub full_name: String,
  pub email: String,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub city: Option<String>,
}

/// Partial profile update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub full_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub city: Option<String>,
}

/// A teenager registered by an ambassador
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teenager {
  pub id: u64,
  pub full_name: String,
  #[serde(default)]
  pub birth_date: Option<NaiveDate>,
  #[serde(default)]
  pub school: Option<String>,
  /// Package the teenager has been assigned to, if any
  #[serde(default)]
  pub package_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTeenager {
  pub full_name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub birth_date: Option<NaiveDate>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub school: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
  Pending,
  Preparing,
  Shipped,
  Delivered,
}

impl std::fmt::Display for PackageStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      PackageStatus::Pending => "pending",
      PackageStatus::Preparing => "preparing",
      PackageStatus::Shipped => "shipped",
      PackageStatus::Delivered => "delivered",
    };
    f.write_str(label)
  }
}

/// A laptop package grouping several teenagers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
  pub id: u64,
  pub status: PackageStatus,
  #[serde(default)]
  pub teenager_ids: Vec<u64>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPackage {
  pub teenager_ids: Vec<u64>,
}

/// Carrier tracking for a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
  pub package_id: u64,
  #[serde(default)]
  pub carrier: Option<String>,
  #[serde(default)]
  pub tracking_number: Option<String>,
  pub status: String,
  #[serde(default)]
  pub events: Vec<ShipmentEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentEvent {
  pub at: DateTime<Utc>,
  #[serde(default)]
  pub location: Option<String>,
  pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
  pub email: &'a str,
  pub password: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
  pub token: String,
  pub ambassador: Ambassador,
}
