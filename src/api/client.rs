//! HTTP client for the ambassador backend REST API.

use crate::api::types::{
  Ambassador, LoginRequest, LoginResponse, NewPackage, NewTeenager, Package, ProfileUpdate,
  Shipment, Teenager,
};
use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// REST client for the ambassador backend
///
/// Clones share the HTTP connection pool and the session token.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
  token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_base_url(&config.api.url, Duration::from_secs(config.api.timeout_secs))
  }

  pub fn with_base_url(url: &str, timeout: Duration) -> Result<Self> {
    // Trailing slash so relative joins keep the base path
    let normalized = format!("{}/", url.trim_end_matches('/'));
    let base = Url::parse(&normalized).map_err(|e| eyre!("Invalid API url {}: {}", url, e))?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      token: Arc::new(RwLock::new(None)),
    })
  }

  pub fn set_token(&self, token: Option<String>) {
    if let Ok(mut guard) = self.token.write() {
      *guard = token;
    }
  }

  pub fn has_token(&self) -> bool {
    self.token.read().map(|t| t.is_some()).unwrap_or(false)
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
    let url = self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid request path {}: {}", path, e))?;

    let mut builder = self.http.request(method, url);
    if let Some(token) = self.token.read().ok().and_then(|t| t.clone()) {
      builder = builder.bearer_auth(token);
    }
    Ok(builder)
  }

  async fn send<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    builder: RequestBuilder,
  ) -> Result<T> {
    debug!(%method, path, "api request");

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", method, path, e))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(eyre!("{} {} returned {}: {}", method, path, status, body.trim()));
    }

    response
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse response of {} {}: {}", method, path, e))
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let builder = self.request(Method::GET, path)?;
    self.send(Method::GET, path, builder).await
  }

  async fn send_json<B: Serialize, T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: &B,
  ) -> Result<T> {
    let builder = self.request(method.clone(), path)?.json(body);
    self.send(method, path, builder).await
  }

  async fn delete(&self, path: &str) -> Result<()> {
    let response = self
      .request(Method::DELETE, path)?
      .send()
      .await
      .map_err(|e| eyre!("DELETE {} failed: {}", path, e))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(eyre!("DELETE {} returned {}: {}", path, status, body.trim()));
    }
    Ok(())
  }

  /// Exchange credentials for a session token
  pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
    self
      .send_json(Method::POST, "auth/login", &LoginRequest { email, password })
      .await
  }

  /// Get the logged-in ambassador's profile
  pub async fn me(&self) -> Result<Ambassador> {
    self.get("ambassadors/me").await
  }

  /// Update the profile, returning the stored result
  pub async fn update_me(&self, update: &ProfileUpdate) -> Result<Ambassador> {
    self
      .send_json(Method::PATCH, "ambassadors/me", update)
      .await
  }

  /// List teenagers registered by the ambassador
  pub async fn teenagers(&self) -> Result<Vec<Teenager>> {
    self.get("teenagers").await
  }

  pub async fn teenager(&self, id: u64) -> Result<Teenager> {
    self.get(&format!("teenagers/{}", id)).await
  }

  pub async fn register_teenager(&self, teenager: &NewTeenager) -> Result<Teenager> {
    self.send_json(Method::POST, "teenagers", teenager).await
  }

  pub async fn delete_teenager(&self, id: u64) -> Result<()> {
    self.delete(&format!("teenagers/{}", id)).await
  }

  pub async fn packages(&self) -> Result<Vec<Package>> {
    self.get("packages").await
  }

  pub async fn package(&self, id: u64) -> Result<Package> {
    self.get(&format!("packages/{}", id)).await
  }

  pub async fn create_package(&self, package: &NewPackage) -> Result<Package> {
    self.send_json(Method::POST, "packages", package).await
  }

  /// Get carrier tracking for a package
  pub async fn shipment(&self, package_id: u64) -> Result<Shipment> {
    self
      .get(&format!("packages/{}/shipment", package_id))
      .await
  }
}
