//! In-process fake backend for API tests.

use crate::api::client::ApiClient;
use crate::api::types::{
  Ambassador, LoginResponse, NewPackage, NewTeenager, Package, PackageStatus, ProfileUpdate,
  Shipment, Teenager,
};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct MockState {
  calls: Mutex<HashMap<String, u32>>,
  me: Mutex<Option<Ambassador>>,
  teenagers: Mutex<Vec<Teenager>>,
  packages: Mutex<Vec<Package>>,
  me_delay: Mutex<Duration>,
  pub fail_reads: AtomicBool,
}

impl MockState {
  fn hit(&self, route: &str) {
    *self.calls.lock().unwrap().entry(route.to_string()).or_default() += 1;
  }

  /// Number of requests served for `route`
  pub fn calls(&self, route: &str) -> u32 {
    self.calls.lock().unwrap().get(route).copied().unwrap_or(0)
  }

  pub fn set_me_delay(&self, delay: Duration) {
    *self.me_delay.lock().unwrap() = delay;
  }

  pub fn rename_me(&self, full_name: &str) {
    if let Some(me) = self.me.lock().unwrap().as_mut() {
      me.full_name = full_name.to_string();
    }
  }
}

pub struct MockBackend {
  addr: SocketAddr,
  pub state: Arc<MockState>,
}

impl MockBackend {
  pub const TOKEN: &'static str = "test-token";

  pub async fn start() -> Self {
    let state = Arc::new(MockState::default());
    *state.me.lock().unwrap() = Some(Ambassador {
      id: 7,
      full_name: "Sara".to_string(),
      email: "sara@example.org".to_string(),
      phone: None,
      city: Some("Rabat".to_string()),
    });
    *state.teenagers.lock().unwrap() = vec![teenager(1, "Omar"), teenager(2, "Lina")];
    state.packages.lock().unwrap().push(Package {
      id: 3,
      status: PackageStatus::Shipped,
      teenager_ids: vec![1],
      created_at: None,
    });

    let routes = Router::new()
      .route("/auth/login", post(login))
      .route("/ambassadors/me", get(me).patch(update_me))
      .route("/teenagers", get(list_teenagers).post(create_teenager))
      .route("/teenagers/:id", get(get_teenager).delete(delete_teenager))
      .route("/packages", get(list_packages).post(create_package))
      .route("/packages/:id", get(get_package))
      .route("/packages/:id/shipment", get(get_shipment))
      .with_state(Arc::clone(&state));
    let app = Router::new().nest("/api", routes);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });

    Self { addr, state }
  }

  pub fn url(&self) -> String {
    format!("http://{}/api", self.addr)
  }

  pub fn client(&self) -> ApiClient {
    ApiClient::with_base_url(&self.url(), Duration::from_secs(5)).unwrap()
  }

  pub fn authenticated_client(&self) -> ApiClient {
    let client = self.client();
    client.set_token(Some(Self::TOKEN.to_string()));
    client
  }
}

fn teenager(id: u64, name: &str) -> Teenager {
  Teenager {
    id,
    full_name: name.to_string(),
    birth_date: None,
    school: None,
    package_id: None,
  }
}

fn authorize(state: &MockState, headers: &HeaderMap) -> Result<(), StatusCode> {
  if state.fail_reads.load(Ordering::SeqCst) {
    return Err(StatusCode::SERVICE_UNAVAILABLE);
  }
  let expected = format!("Bearer {}", MockBackend::TOKEN);
  match headers.get("authorization").and_then(|v| v.to_str().ok()) {
    Some(value) if value == expected => Ok(()),
    _ => Err(StatusCode::UNAUTHORIZED),
  }
}

async fn login(
  State(state): State<Arc<MockState>>,
  Json(body): Json<Value>,
) -> Result<Json<LoginResponse>, StatusCode> {
  state.hit("login");
  if body["password"] != "secret" {
    return Err(StatusCode::UNAUTHORIZED);
  }
  let ambassador = state
    .me
    .lock()
    .unwrap()
    .clone()
    .ok_or(StatusCode::NOT_FOUND)?;
  Ok(Json(LoginResponse {
    token: MockBackend::TOKEN.to_string(),
    ambassador,
  }))
}

async fn me(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
) -> Result<Json<Ambassador>, StatusCode> {
  authorize(&state, &headers)?;
  state.hit("me");
  let delay = *state.me_delay.lock().unwrap();
  tokio::time::sleep(delay).await;
  let me = state.me.lock().unwrap().clone();
  me.map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn update_me(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Json(update): Json<ProfileUpdate>,
) -> Result<Json<Ambassador>, StatusCode> {
  authorize(&state, &headers)?;
  state.hit("update_me");
  let mut guard = state.me.lock().unwrap();
  let me = guard.as_mut().ok_or(StatusCode::NOT_FOUND)?;
  if let Some(name) = update.full_name {
    me.full_name = name;
  }
  if let Some(phone) = update.phone {
    me.phone = Some(phone);
  }
  if let Some(city) = update.city {
    me.city = Some(city);
  }
  Ok(Json(me.clone()))
}

async fn list_teenagers(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
) -> Result<Json<Vec<Teenager>>, StatusCode> {
  authorize(&state, &headers)?;
  state.hit("teenagers");
  Ok(Json(state.teenagers.lock().unwrap().clone()))
}

async fn create_teenager(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Json(new): Json<NewTeenager>,
) -> Result<(StatusCode, Json<Teenager>), StatusCode> {
  authorize(&state, &headers)?;
  state.hit("create_teenager");
  let mut teenagers = state.teenagers.lock().unwrap();
  let id = teenagers.iter().map(|t| t.id).max().unwrap_or(0) + 1;
  let created = Teenager {
    id,
    full_name: new.full_name,
    birth_date: new.birth_date,
    school: new.school,
    package_id: None,
  };
  teenagers.push(created.clone());
  Ok((StatusCode::CREATED, Json(created)))
}

async fn get_teenager(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
) -> Result<Json<Teenager>, StatusCode> {
  authorize(&state, &headers)?;
  state.hit("teenager");
  let teenagers = state.teenagers.lock().unwrap();
  teenagers
    .iter()
    .find(|t| t.id == id)
    .cloned()
    .map(Json)
    .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_teenager(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
) -> Result<StatusCode, StatusCode> {
  authorize(&state, &headers)?;
  state.hit("delete_teenager");
  let mut teenagers = state.teenagers.lock().unwrap();
  let before = teenagers.len();
  teenagers.retain(|t| t.id != id);
  if teenagers.len() == before {
    return Err(StatusCode::NOT_FOUND);
  }
  Ok(StatusCode::NO_CONTENT)
}

async fn list_packages(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
) -> Result<Json<Vec<Package>>, StatusCode> {
  authorize(&state, &headers)?;
  state.hit("packages");
  Ok(Json(state.packages.lock().unwrap().clone()))
}

async fn create_package(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Json(new): Json<NewPackage>,
) -> Result<(StatusCode, Json<Package>), StatusCode> {
  authorize(&state, &headers)?;
  state.hit("create_package");
  let mut packages = state.packages.lock().unwrap();
  let id = packages.iter().map(|p| p.id).max().unwrap_or(0) + 1;
  let created = Package {
    id,
    status: PackageStatus::Pending,
    teenager_ids: new.teenager_ids.clone(),
    created_at: None,
  };
  packages.push(created.clone());

  for teenager in state.teenagers.lock().unwrap().iter_mut() {
    if new.teenager_ids.contains(&teenager.id) {
      teenager.package_id = Some(id);
    }
  }
  Ok((StatusCode::CREATED, Json(created)))
}

async fn get_package(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
) -> Result<Json<Package>, StatusCode> {
  authorize(&state, &headers)?;
  state.hit("package");
  let packages = state.packages.lock().unwrap();
  packages
    .iter()
    .find(|p| p.id == id)
    .cloned()
    .map(Json)
    .ok_or(StatusCode::NOT_FOUND)
}

async fn get_shipment(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
) -> Result<Json<Shipment>, StatusCode> {
  authorize(&state, &headers)?;
  state.hit("shipment");
  let packages = state.packages.lock().unwrap();
  let package = packages
    .iter()
    .find(|p| p.id == id)
    .ok_or(StatusCode::NOT_FOUND)?;
  Ok(Json(Shipment {
    package_id: package.id,
    carrier: Some("Amana".to_string()),
    tracking_number: Some(format!("AM{:06}", package.id)),
    status: package.status.to_string(),
    events: Vec::new(),
  }))
}
