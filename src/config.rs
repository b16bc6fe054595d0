use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the backend, e.g. https://api.example.org/v1
  pub url: String,
  /// Login email; can be overridden on the command line
  pub email: Option<String>,
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Set to false to run without a persistent cache
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  /// Database location (defaults to the platform data directory)
  pub path: Option<PathBuf>,
}

fn default_enabled() -> bool {
  true
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ambassador.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ambassador/config.yaml
  /// 4. ~/.config/ambassador/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/ambassador/config.yaml\n\
                 with at least:\n\n  api:\n    url: https://your-backend/api"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    Self::config_candidates(dirs::config_dir(), dirs::home_dir())
      .into_iter()
      .find(|p| p.exists())
  }

  /// Candidate locations in lookup order, without duplicates.
  fn config_candidates(config_dir: Option<PathBuf>, home_dir: Option<PathBuf>) -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from("ambassador.yaml")];

    let roots = [config_dir, home_dir.map(|h| h.join(".config"))];
    for dir in roots.into_iter().flatten() {
      let path = dir.join("ambassador").join("config.yaml");
      if !candidates.contains(&path) {
        candidates.push(path);
      }
    }

    candidates
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the login password from environment variables.
  ///
  /// Checks AMBASSADOR_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("AMBASSADOR_PASSWORD").map_err(|_| {
      eyre!("Password not found. Set AMBASSADOR_PASSWORD environment variable.")
    })
  }
}
