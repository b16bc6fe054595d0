//! Cached API client that keeps reads consistent with mutations.

use color_eyre::Result;
use tracing::info;

use crate::cache::{CacheKey, CacheStorage, FetchCache};

use super::client::ApiClient;
use super::keys::{
  MeKey, PackageKey, PackagesKey, ResourceFamily, SessionTokenKey, ShipmentKey, TeenagerKey,
  TeenagersKey,
};
use super::types::{
  Ambassador, NewPackage, NewTeenager, Package, ProfileUpdate, Shipment, Teenager,
};

/// API client with transparent caching support.
///
/// Reads go through [`FetchCache::ensure_cached`], so concurrent reads of one
/// resource share a single request and later reads are served from disk.
/// Mutations push their effects into the cache: they write back fresh values
/// where the response carries them and invalidate the affected families
/// otherwise. The cache has no other way of learning about changes.
pub struct CachedClient<S: CacheStorage> {
  inner: ApiClient,
  cache: FetchCache<S>,
}

impl<S: CacheStorage + 'static> CachedClient<S> {
  /// Wrap `inner`, restoring a previously cached session token.
  pub fn new(inner: ApiClient, cache: FetchCache<S>) -> Self {
    if let Some(token) = cache.store().get(&SessionTokenKey) {
      inner.set_token(Some(token));
    }
    Self { inner, cache }
  }

  pub fn cache(&self) -> &FetchCache<S> {
    &self.cache
  }

  /// The uncached client, for use inside producers.
  pub fn raw(&self) -> &ApiClient {
    &self.inner
  }

  pub fn is_logged_in(&self) -> bool {
    self.inner.has_token()
  }

  /// Drop the cached value for `key` so the next read fetches it.
  pub fn invalidate<K: CacheKey>(&self, key: &K) -> Result<()> {
    self.cache.store().invalidate(&key.cache_key())
  }

  /// Log in and seed the session entries without an extra profile fetch.
  pub async fn login(&self, email: &str, password: &str) -> Result<Ambassador> {
    let session = self.inner.login(email, password).await?;
    self.inner.set_token(Some(session.token.clone()));

    // A different account may have used this cache before
    self.invalidate_user_data()?;
    self.cache.store().put(&SessionTokenKey, &session.token)?;
    self.cache.store().put(&MeKey, &session.ambassador)?;

    info!(ambassador = session.ambassador.id, "logged in");
    Ok(session.ambassador)
  }

  /// Forget the session and everything cached for it.
  pub fn logout(&self) -> Result<()> {
    self.inner.set_token(None);
    self.cache.store().remove(&SessionTokenKey.cache_key())?;
    self.invalidate_user_data()?;
    info!("logged out");
    Ok(())
  }

  fn invalidate_user_data(&self) -> Result<()> {
    for family in ResourceFamily::USER_SCOPED {
      self.cache.store().invalidate_by_prefix(&family.prefix())?;
    }
    Ok(())
  }

  pub async fn me(&self) -> Result<Ambassador> {
    self
      .cache
      .ensure_cached(&MeKey, || {
        let inner = self.inner.clone();
        async move { inner.me().await }
      })
      .await
  }

  /// Update the profile and store the server's response as the cached profile.
  pub async fn update_me(&self, update: &ProfileUpdate) -> Result<Ambassador> {
    let updated = self.inner.update_me(update).await?;
    self.cache.store().put(&MeKey, &updated)?;
    Ok(updated)
  }

  pub async fn teenagers(&self) -> Result<Vec<Teenager>> {
    self
      .cache
      .ensure_cached(&TeenagersKey, || {
        let inner = self.inner.clone();
        async move { inner.teenagers().await }
      })
      .await
  }

  pub async fn teenager(&self, id: u64) -> Result<Teenager> {
    self
      .cache
      .ensure_cached(&TeenagerKey { id }, || {
        let inner = self.inner.clone();
        async move { inner.teenager(id).await }
      })
      .await
  }

  /// Register a teenager, then refresh the cached list.
  pub async fn register_teenager(&self, teenager: &NewTeenager) -> Result<Teenager> {
    let created = self.inner.register_teenager(teenager).await?;
    self.after_teenagers_changed().await?;
    self
      .cache
      .store()
      .put(&TeenagerKey { id: created.id }, &created)?;
    Ok(created)
  }

  pub async fn delete_teenager(&self, id: u64) -> Result<()> {
    self.inner.delete_teenager(id).await?;
    self.after_teenagers_changed().await
  }

  async fn after_teenagers_changed(&self) -> Result<()> {
    self
      .cache
      .store()
      .invalidate_by_prefix(&ResourceFamily::Teenagers.prefix())?;
    self.teenagers().await?;
    Ok(())
  }

  pub async fn packages(&self) -> Result<Vec<Package>> {
    self
      .cache
      .ensure_cached(&PackagesKey, || {
        let inner = self.inner.clone();
        async move { inner.packages().await }
      })
      .await
  }

  pub async fn package(&self, id: u64) -> Result<Package> {
    self
      .cache
      .ensure_cached(&PackageKey { id }, || {
        let inner = self.inner.clone();
        async move { inner.package(id).await }
      })
      .await
  }

  /// Create a package. Its teenagers get a package assignment, so both
  /// families are invalidated.
  pub async fn create_package(&self, package: &NewPackage) -> Result<Package> {
    let created = self.inner.create_package(package).await?;
    let store = self.cache.store();
    store.invalidate_by_prefix(&ResourceFamily::Packages.prefix())?;
    store.invalidate_by_prefix(&ResourceFamily::Teenagers.prefix())?;
    store.put(&PackageKey { id: created.id }, &created)?;
    Ok(created)
  }

  /// Carrier tracking for a package.
  pub async fn shipment(&self, package_id: u64) -> Result<Shipment> {
    self
      .cache
      .ensure_cached(&ShipmentKey { package_id }, || {
        let inner = self.inner.clone();
        async move { inner.shipment(package_id).await }
      })
      .await
  }
}

impl<S: CacheStorage> Clone for CachedClient<S> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
      cache: self.cache.clone(),
    }
  }
}
