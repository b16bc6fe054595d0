//! Command-line commands and their execution.

use chrono::NaiveDate;
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::api::keys::{MeKey, PackageKey, PackagesKey, ShipmentKey, TeenagerKey, TeenagersKey};
use crate::api::types::{NewPackage, NewTeenager, Package, ProfileUpdate, Teenager};
use crate::api::CachedClient;
use crate::cache::{CacheKey, CacheStorage};
use crate::config::Config;
use crate::query::{CachedQuery, QueryState};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Log in and cache the session
  Login {
    /// Account email (defaults to api.email from the config)
    #[arg(short, long)]
    email: Option<String>,
  },
  /// Forget the session and all cached account data
  Logout,
  /// Show the ambassador profile
  Me,
  /// Update profile fields
  UpdateProfile {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    city: Option<String>,
  },
  /// List registered teenagers
  Teenagers,
  /// Show one teenager
  Teenager { id: u64 },
  /// Register a new teenager
  RegisterTeenager {
    #[arg(long)]
    name: String,
    /// Birth date as YYYY-MM-DD
    #[arg(long)]
    birth_date: Option<NaiveDate>,
    #[arg(long)]
    school: Option<String>,
  },
  /// Remove a registered teenager
  DeleteTeenager { id: u64 },
  /// List packages
  Packages,
  /// Show one package
  Package { id: u64 },
  /// Create a package for the given teenagers
  CreatePackage {
    #[arg(long = "teenager", required = true)]
    teenagers: Vec<u64>,
  },
  /// Show shipment tracking for a package
  Track { package_id: u64 },
  /// Load profile, teenagers and packages together
  Dashboard,
  /// Inspect or modify the local cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// List cached keys
  List,
  /// Print the cached document for a key
  Get { key: String },
  /// Drop a key, or every key starting with it when --prefix is given
  Invalidate {
    key: String,
    #[arg(long)]
    prefix: bool,
  },
  /// Drop everything
  Clear,
}

/// Options shared by all commands
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  /// Invalidate before reading so data comes from the backend
  pub refresh: bool,
  /// Email from the config file
  pub default_email: Option<String>,
}

/// Execute `command`, printing results to stdout.
pub async fn run<S: CacheStorage + 'static>(
  command: Command,
  client: &CachedClient<S>,
  options: &RunOptions,
) -> Result<()> {
  match command {
    Command::Login { email } => {
      let email = email
        .or_else(|| options.default_email.clone())
        .ok_or_else(|| eyre!("No email given. Pass --email or set api.email in the config."))?;
      let password = Config::get_password()?;
      let me = client.login(&email, &password).await?;
      println!("Logged in as {} <{}>", me.full_name, me.email);
    }
    Command::Logout => {
      client.logout()?;
      println!("Logged out");
    }
    Command::Me => {
      refresh_key(client, options, &MeKey)?;
      print_json(&client.me().await?)?;
    }
    Command::UpdateProfile { name, phone, city } => {
      let update = ProfileUpdate {
        full_name: name,
        phone,
        city,
      };
      if update == ProfileUpdate::default() {
        return Err(eyre!("Nothing to update. Pass --name, --phone or --city."));
      }
      print_json(&client.update_me(&update).await?)?;
    }
    Command::Teenagers => {
      refresh_key(client, options, &TeenagersKey)?;
      print_teenagers(&client.teenagers().await?);
    }
    Command::Teenager { id } => {
      refresh_key(client, options, &TeenagerKey { id })?;
      print_json(&client.teenager(id).await?)?;
    }
    Command::RegisterTeenager {
      name,
      birth_date,
      school,
    } => {
      let created = client
        .register_teenager(&NewTeenager {
          full_name: name,
          birth_date,
          school,
        })
        .await?;
      println!("Registered teenager {} ({})", created.id, created.full_name);
    }
    Command::DeleteTeenager { id } => {
      client.delete_teenager(id).await?;
      println!("Deleted teenager {}", id);
    }
    Command::Packages => {
      refresh_key(client, options, &PackagesKey)?;
      print_packages(&client.packages().await?);
    }
    Command::Package { id } => {
      refresh_key(client, options, &PackageKey { id })?;
      print_json(&client.package(id).await?)?;
    }
    Command::CreatePackage { teenagers } => {
      let created = client
        .create_package(&NewPackage {
          teenager_ids: teenagers,
        })
        .await?;
      println!("Created package {} ({})", created.id, created.status);
    }
    Command::Track { package_id } => {
      refresh_key(client, options, &ShipmentKey { package_id })?;
      let shipment = client.shipment(package_id).await?;
      println!(
        "Package {}: {} via {} ({})",
        shipment.package_id,
        shipment.status,
        shipment.carrier.as_deref().unwrap_or("unknown carrier"),
        shipment.tracking_number.as_deref().unwrap_or("no tracking number"),
      );
      for event in &shipment.events {
        println!(
          "  {}  {:<16} {}",
          event.at.format("%Y-%m-%d %H:%M"),
          truncate(event.location.as_deref().unwrap_or("-"), 16),
          event.description
        );
      }
    }
    Command::Dashboard => dashboard(client, options.refresh).await?,
    Command::Cache(cache_command) => run_cache_command(cache_command, client)?,
  }
  Ok(())
}

fn refresh_key<S: CacheStorage + 'static, K: CacheKey>(
  client: &CachedClient<S>,
  options: &RunOptions,
  key: &K,
) -> Result<()> {
  if options.refresh {
    info!(resource = %key.description(), "refreshing");
    client.invalidate(key)?;
  }
  Ok(())
}

fn run_cache_command<S: CacheStorage + 'static>(
  command: CacheCommand,
  client: &CachedClient<S>,
) -> Result<()> {
  let store = client.cache().store();
  match command {
    CacheCommand::List => {
      let entries = store.entries()?;
      if entries.is_empty() {
        println!("Cache is empty.");
      }
      for entry in entries {
        println!(
          "{:<32} {:>8} B  {}",
          entry.key,
          entry.size,
          entry.cached_at.format("%Y-%m-%d %H:%M:%S")
        );
      }
    }
    CacheCommand::Get { key } => match store.read::<Value>(&key) {
      Some(value) => print_json(&value)?,
      None => println!("{} is not cached", key),
    },
    CacheCommand::Invalidate { key, prefix } => {
      if prefix {
        let removed = store.invalidate_by_prefix(&key)?;
        println!("Removed {} entries under {}", removed, key);
      } else {
        store.invalidate(&key)?;
        println!("Invalidated {}", key);
      }
    }
    CacheCommand::Clear => {
      store.clear()?;
      println!("Cache cleared");
    }
  }
  Ok(())
}

/// Load the three dashboard panels concurrently through cache-backed queries.
///
/// Panels with a cached value are shown without a request; the rest are polled
/// on a fixed tick until they settle.
async fn dashboard<S: CacheStorage + 'static>(
  client: &CachedClient<S>,
  refresh: bool,
) -> Result<()> {
  let cache = client.cache().clone();

  let api = client.raw().clone();
  let mut me = CachedQuery::new(cache.clone(), MeKey, move || {
    let api = api.clone();
    async move { api.me().await }
  });
  let api = client.raw().clone();
  let mut teenagers = CachedQuery::new(cache.clone(), TeenagersKey, move || {
    let api = api.clone();
    async move { api.teenagers().await }
  });
  let api = client.raw().clone();
  let mut packages = CachedQuery::new(cache, PackagesKey, move || {
    let api = api.clone();
    async move { api.packages().await }
  });

  if refresh {
    me.refetch();
    teenagers.refetch();
    packages.refetch();
  } else {
    me.fetch();
    teenagers.fetch();
    packages.fetch();
  }

  let mut tick = tokio::time::interval(Duration::from_millis(250));
  while me.is_loading() || teenagers.is_loading() || packages.is_loading() {
    tick.tick().await;
    me.poll();
    teenagers.poll();
    packages.poll();
  }

  match me.state() {
    QueryState::Ready(me) => println!("{} <{}>", me.full_name, me.email),
    state => print_panel_problem("Profile", state),
  }
  println!();

  match teenagers.state() {
    QueryState::Ready(list) => {
      println!("Teenagers ({})", list.len());
      print_teenagers(list);
    }
    state => print_panel_problem("Teenagers", state),
  }
  println!();

  match packages.state() {
    QueryState::Ready(list) => {
      println!("Packages ({})", list.len());
      print_packages(list);
    }
    state => print_panel_problem("Packages", state),
  }

  Ok(())
}

fn print_panel_problem<T>(panel: &str, state: &QueryState<T>) {
  match state {
    QueryState::Error(e) => println!("{}: error: {}", panel, e),
    _ => println!("{}: not loaded", panel),
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", text);
  Ok(())
}

fn print_teenagers(teenagers: &[Teenager]) {
  if teenagers.is_empty() {
    println!("No teenagers registered.");
    return;
  }
  for teenager in teenagers {
    let package = teenager
      .package_id
      .map(|id| format!("package {}", id))
      .unwrap_or_else(|| "unassigned".to_string());
    println!(
      "{:<6} {:<30} {:<24} {}",
      teenager.id,
      truncate(&teenager.full_name, 30),
      truncate(teenager.school.as_deref().unwrap_or("-"), 24),
      package
    );
  }
}

fn print_packages(packages: &[Package]) {
  if packages.is_empty() {
    println!("No packages.");
    return;
  }
  for package in packages {
    println!(
      "{:<6} {:<10} {} teenagers",
      package.id,
      package.status,
      package.teenager_ids.len()
    );
  }
}

fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}
