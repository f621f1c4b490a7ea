use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Header the client attaches its token to (`bearer <token>`).
pub const ACCESS_TOKEN_HEADER: &str = "accesstoken";

/// Every response body has this shape, whatever the HTTP status.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub status_code: i64,
    pub message: String,
    pub data: Value,
    pub current_date_time: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: u32,
    pub name: String,
    pub price: u32,
}

#[derive(Deserialize)]
pub struct Login {
    pub user: String,
    pub pass: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refresh {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct ItemQuery {
    pub q: Option<String>,
    #[serde(default)]
    pub page: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: String,
}

struct Grant {
    player: String,
    expires_at: DateTime<Utc>,
}

pub struct Backend {
    access: HashMap<String, Grant>,
    refresh: HashMap<String, String>,
    items: Vec<Item>,
    token_ttl: TimeDelta,
}

pub type Db = Arc<RwLock<Backend>>;

pub const PAGE_SIZE: usize = 2;

impl Backend {
    pub fn new(token_ttl: TimeDelta) -> Self {
        let items = ["sword", "shield", "potion", "bow", "arrow"]
            .iter()
            .zip(1..)
            .map(|(name, id)| Item {
                id,
                name: name.to_string(),
                price: id * 10,
            })
            .collect();
        Self {
            access: HashMap::new(),
            refresh: HashMap::new(),
            items,
            token_ttl,
        }
    }

    fn issue(&mut self, player: &str) -> Tokens {
        let expires_at = Utc::now() + self.token_ttl;
        let access_token = jwt(player, expires_at);
        let refresh_token = Uuid::new_v4().to_string();
        self.access.insert(
            access_token.clone(),
            Grant {
                player: player.to_string(),
                expires_at,
            },
        );
        self.refresh.insert(refresh_token.clone(), player.to_string());
        Tokens {
            access_token,
            refresh_token,
            expires_at: expires_at.to_rfc3339(),
        }
    }
}

/// Unsigned JWT-shaped token carrying `sub`, `exp` and a unique `jti`.
fn jwt(player: &str, expires_at: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let claims = json!({"sub": player, "exp": expires_at.timestamp(), "jti": Uuid::new_v4()});
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.mock")
}

fn envelope(code: StatusCode, message: &str, data: Value) -> (StatusCode, Json<Envelope>) {
    (
        code,
        Json(Envelope {
            status_code: i64::from(code.as_u16()),
            message: message.to_string(),
            data,
            current_date_time: Utc::now().to_rfc3339(),
        }),
    )
}

/// Failure reported in the body only; the HTTP status stays 200.
fn soft_failure(code: i64, message: &str) -> (StatusCode, Json<Envelope>) {
    let (status, Json(mut body)) = envelope(StatusCode::OK, message, Value::Null);
    body.status_code = code;
    (status, Json(body))
}

pub fn app() -> Router {
    app_with_ttl(TimeDelta::minutes(30))
}

pub fn app_with_ttl(token_ttl: TimeDelta) -> Router {
    let db: Db = Arc::new(RwLock::new(Backend::new(token_ttl)));
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/profile", get(profile))
        .route("/items", get(list_items))
        .route("/admin/expire", post(expire_all))
        .route("/health", get(health))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn login(State(db): State<Db>, Json(input): Json<Login>) -> (StatusCode, Json<Envelope>) {
    if input.user.is_empty() || input.pass != "secret" {
        tracing::info!(user = %input.user, "rejected login");
        return soft_failure(401, "invalid credentials");
    }
    let tokens = db.write().await.issue(&input.user);
    tracing::info!(user = %input.user, "issued tokens");
    envelope(StatusCode::OK, "", json!(tokens))
}

async fn refresh(State(db): State<Db>, Json(input): Json<Refresh>) -> (StatusCode, Json<Envelope>) {
    let mut backend = db.write().await;
    let Some(player) = backend.refresh.remove(&input.refresh_token) else {
        return soft_failure(401, "unknown refresh token");
    };
    let tokens = backend.issue(&player);
    tracing::info!(%player, "refreshed tokens");
    envelope(StatusCode::OK, "", json!(tokens))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(ACCESS_TOKEN_HEADER)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token)
}

async fn profile(State(db): State<Db>, headers: HeaderMap) -> (StatusCode, Json<Envelope>) {
    let backend = db.read().await;
    let grant = bearer(&headers).and_then(|token| backend.access.get(token));
    match grant {
        Some(grant) if grant.expires_at > Utc::now() => {
            envelope(StatusCode::OK, "", json!({"player": grant.player}))
        }
        Some(_) => envelope(StatusCode::UNAUTHORIZED, "access token expired", Value::Null),
        None => envelope(StatusCode::UNAUTHORIZED, "missing access token", Value::Null),
    }
}

async fn list_items(State(db): State<Db>, Query(query): Query<ItemQuery>) -> (StatusCode, Json<Envelope>) {
    let backend = db.read().await;
    let items: Vec<&Item> = backend
        .items
        .iter()
        .filter(|item| query.q.as_deref().map_or(true, |q| item.name.contains(q)))
        .skip(query.page * PAGE_SIZE)
        .take(PAGE_SIZE)
        .collect();
    envelope(StatusCode::OK, "", json!(items))
}

/// Expire every access token (refresh tokens stay valid).
async fn expire_all(State(db): State<Db>) -> (StatusCode, Json<Envelope>) {
    let mut backend = db.write().await;
    let now = Utc::now();
    for grant in backend.access.values_mut() {
        grant.expires_at = now;
    }
    envelope(StatusCode::OK, "", json!({"expired": backend.access.len()}))
}

/// Empty 204, for clients that must cope with body-less responses.
async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
