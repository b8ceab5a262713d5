//! Authenticated HTTP access to the school backend.
//!
//! [`ClientContext`] is the single owner of the bearer credentials. It is
//! created explicitly, handed to whoever needs the backend, and torn down with
//! [`ClientContext::clear_credentials`]; a 401 on any request does the same and
//! announces that the user has to sign in again.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{AttendanceId, LOGIN_ROUTE},
    error::ApiErrorBody,
    protocol::{
        ActiveSessionRecord, AttendanceRecord, GenerateSessionRequest, GenerateSessionResponse,
        LoginRequest, LoginResponse, ManualAttendanceRequest, RosterQuery, RosterRow,
        UpdateAttendanceRequest, UserProfile,
    },
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AttendanceError, AttendanceResult};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { route: &'static str },
    LoginRequired { route: &'static str },
}

#[derive(Clone)]
struct Credentials {
    token: String,
    user: Option<UserProfile>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: UserProfile,
    pub route: &'static str,
}

pub struct ClientContext {
    http: Client,
    base_url: Url,
    credentials: RwLock<Option<Credentials>>,
    auth_events: broadcast::Sender<AuthEvent>,
}

impl ClientContext {
    pub fn new(base_url: &str) -> AttendanceResult<Self> {
        Self::with_timeout(base_url, DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> AttendanceResult<Self> {
        let base_url = parse_base_url(base_url)?;
        let http = Client::builder().timeout(timeout).build()?;
        let (auth_events, _) = broadcast::channel(16);
        Ok(Self {
            http,
            base_url,
            credentials: RwLock::new(None),
            auth_events,
        })
    }

    pub async fn set_token(&self, token: impl Into<String>) -> AttendanceResult<()> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AttendanceError::validation("bearer token must not be empty"));
        }
        *self.credentials.write().await = Some(Credentials { token, user: None });
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.credentials.read().await.is_some()
    }

    pub async fn current_user(&self) -> Option<UserProfile> {
        self.credentials
            .read()
            .await
            .as_ref()
            .and_then(|credentials| credentials.user.clone())
    }

    pub async fn clear_credentials(&self) {
        let had_credentials = self.credentials.write().await.take().is_some();
        if had_credentials {
            info!("auth: credentials cleared");
        }
    }

    pub fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }

    pub async fn login(&self, email: &str, password: &str) -> AttendanceResult<LoginOutcome> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AttendanceError::validation(
                "email and password are required",
            ));
        }

        let request = self
            .request(Method::POST, &["auth", "login"])
            .await?
            .json(&LoginRequest {
                email: email.trim().to_string(),
                password: password.to_string(),
            });
        let response: LoginResponse = self.execute(request).await?;
        if response.token.trim().is_empty() {
            return Err(AttendanceError::contract("login response carried an empty token"));
        }

        let route = response.user.role.home_route();
        *self.credentials.write().await = Some(Credentials {
            token: response.token,
            user: Some(response.user.clone()),
        });
        info!(
            "auth: signed in user={} role={:?} route={route}",
            response.user.id, response.user.role
        );
        let _ = self.auth_events.send(AuthEvent::SignedIn { route });

        Ok(LoginOutcome {
            user: response.user,
            route,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> AttendanceResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AttendanceError::validation("backend url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, segments: &[&str]) -> AttendanceResult<RequestBuilder> {
        let url = self.endpoint(segments)?;
        debug!("http: {method} {url}");
        let builder = self.http.request(method, url);
        let guard = self.credentials.read().await;
        Ok(match guard.as_ref() {
            Some(credentials) => builder.bearer_auth(&credentials.token),
            None => builder,
        })
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> AttendanceResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|err| {
                AttendanceError::contract(format!("malformed response body: {err}"))
            });
        }

        let message = serde_json::from_slice::<ApiErrorBody>(&body)
            .ok()
            .and_then(|parsed| parsed.text().map(str::to_string))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unexpected response")
                    .to_string()
            });

        match status {
            StatusCode::UNAUTHORIZED => {
                warn!("auth: backend rejected credentials, redirecting to {LOGIN_ROUTE}");
                self.clear_credentials().await;
                let _ = self.auth_events.send(AuthEvent::LoginRequired {
                    route: LOGIN_ROUTE,
                });
                Err(AttendanceError::Unauthorized)
            }
            StatusCode::CONFLICT => Err(AttendanceError::Conflict { message }),
            _ => Err(AttendanceError::Status { status, message }),
        }
    }
}

fn parse_base_url(raw: &str) -> AttendanceResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|err| AttendanceError::validation(format!("invalid backend url '{raw}': {err}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(AttendanceError::validation(format!(
            "backend url must be http(s): '{raw}'"
        )));
    }
    Ok(url)
}

/// The backend operations the attendance workflow depends on.
#[async_trait]
pub trait AttendanceApi: Send + Sync {
    async fn generate_session(
        &self,
        request: &GenerateSessionRequest,
    ) -> AttendanceResult<GenerateSessionResponse>;
    async fn active_sessions(&self) -> AttendanceResult<Vec<ActiveSessionRecord>>;
    async fn session_roster(&self, query: &RosterQuery) -> AttendanceResult<Vec<RosterRow>>;
    async fn update_attendance(
        &self,
        attendance_id: &AttendanceId,
        request: &UpdateAttendanceRequest,
    ) -> AttendanceResult<AttendanceRecord>;
    async fn create_manual_attendance(
        &self,
        request: &ManualAttendanceRequest,
    ) -> AttendanceResult<AttendanceRecord>;
}

#[async_trait]
impl AttendanceApi for ClientContext {
    async fn generate_session(
        &self,
        request: &GenerateSessionRequest,
    ) -> AttendanceResult<GenerateSessionResponse> {
        let builder = self
            .request(Method::POST, &["qr", "generate"])
            .await?
            .json(request);
        self.execute(builder).await
    }

    async fn active_sessions(&self) -> AttendanceResult<Vec<ActiveSessionRecord>> {
        let builder = self.request(Method::GET, &["qr", "check-active"]).await?;
        self.execute(builder).await
    }

    async fn session_roster(&self, query: &RosterQuery) -> AttendanceResult<Vec<RosterRow>> {
        let builder = self
            .request(Method::GET, &["guru", "absensi", "sesi"])
            .await?
            .query(query);
        self.execute(builder).await
    }

    async fn update_attendance(
        &self,
        attendance_id: &AttendanceId,
        request: &UpdateAttendanceRequest,
    ) -> AttendanceResult<AttendanceRecord> {
        let builder = self
            .request(Method::PUT, &["absensi", attendance_id.as_str()])
            .await?
            .json(request);
        self.execute(builder).await
    }

    async fn create_manual_attendance(
        &self,
        request: &ManualAttendanceRequest,
    ) -> AttendanceResult<AttendanceRecord> {
        let builder = self
            .request(Method::POST, &["absensi", "manual"])
            .await?
            .json(request);
        self.execute(builder).await
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
