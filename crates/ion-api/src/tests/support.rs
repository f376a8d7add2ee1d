use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use ion_auth::TokenService;
use ion_db::Database;
use ion_gateway::{Dispatcher, DispatcherConfig, SqliteStore};

use crate::state::{AppState, AppStateInner};

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Response {
    /// Value of the `token` cookie set by this response, if any.
    pub fn token_cookie(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| v.split(';').next()?.strip_prefix("token=").map(str::to_string))
    }
}

impl TestApp {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(
            Arc::new(SqliteStore::new(db.clone())),
            DispatcherConfig::default(),
        );
        let state: AppState = Arc::new(AppStateInner {
            db,
            tokens: TokenService::new("test-secret", chrono::Duration::days(7)),
            dispatcher,
            cookie_secure: false,
        });
        let router = crate::router(state.clone());
        Self { state, router }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("token={token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let res = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        Response { status, headers, body }
    }

    /// Signs up `username` and returns its id and session token.
    pub async fn signup(&self, username: &str) -> (Uuid, String) {
        let res = self
            .request(
                Method::POST,
                "/auth/signup",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "hunter2hunter2",
                })),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "{:?}", res.body);
        let token = res.token_cookie().unwrap();
        let user_id = res.body["userId"].as_str().unwrap().parse().unwrap();
        (user_id, token)
    }

    pub async fn create_server(&self, token: &str, name: &str) -> Value {
        let res = self
            .request(Method::POST, "/servers", Some(token), Some(json!({ "name": name })))
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "{:?}", res.body);
        res.body
    }

    /// Joins `server` through its invite code.
    pub async fn join(&self, token: &str, server: &Value) {
        let uri = format!("/servers/join/{}", server["inviteCode"].as_str().unwrap());
        let res = self.request(Method::POST, &uri, Some(token), None).await;
        assert_eq!(res.status, StatusCode::OK, "{:?}", res.body);
    }
}
