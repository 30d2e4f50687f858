//! OAuth authentication state machine.
//!
//! # Data Flow
//! ```text
//!            no state in session
//!  NoSession ───────────────────────▶ cache {callback}, stamp state, 307 provider
//!                                          │
//!                                          ▼
//!  PendingProviderAuth  (cache entry, no user yet) ──▶ 307 provider again
//!                                          │ callback endpoint calls resolve()
//!                                          ▼
//!  PendingCallback (cache entry has user) ──▶ write user into session, 307 callback URL
//!                                          │
//!                                          ▼
//!  Authenticated ──▶ inject Authorization / X-Auth-User, forward
//!
//!  Expired (state in session, cache entry gone) ──▶ clear cookie, 307 original URL
//! ```
//!
//! # Design Decisions
//! - `state` is derived from client ip, full URL and user agent, so a restart
//!   of the same request lands on the same cache entry
//! - The cache entry and the session's state marker are consumed on promotion
//! - A misconfigured provider surfaces as a 500 whose body is the error text

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use crate::auth::provider::{OAuthError, OAuthProvider};
use crate::auth::session::{clear_cookie, unix_now, SessionCodec, SessionData, STATE_SESSION_SECS};
use crate::data::Application;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::security::sha256_hex;
use crate::store::{ExpiringMap, MAX_TTL};
use crate::waf::decision::temporary_redirect;

pub const X_AUTH_USER: HeaderName = HeaderName::from_static("x-auth-user");

/// Login progress of one state token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub callback_url: String,
    pub user_id: Option<String>,
    pub access_token: Option<String>,
}

/// Pending logins keyed by state, shared with the provider callback endpoint.
#[derive(Clone)]
pub struct OAuthStateCache {
    states: ExpiringMap<String, OAuthState>,
    ttl: Duration,
}

impl OAuthStateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            states: ExpiringMap::new(),
            ttl,
        }
    }

    /// Remember where to send the browser once the login completes.
    pub fn begin(&self, state: &str, callback_url: &str) {
        self.states.insert(
            state.to_string(),
            OAuthState {
                callback_url: callback_url.to_string(),
                user_id: None,
                access_token: None,
            },
            self.ttl,
        );
    }

    pub fn get(&self, state: &str) -> Option<OAuthState> {
        self.states.get(&state.to_string())
    }

    /// Record a completed provider login. Returns false when the state is
    /// unknown or expired.
    pub fn resolve(&self, state: &str, user_id: &str, access_token: &str) -> bool {
        self.states.update(&state.to_string(), |entry| {
            entry.user_id = Some(user_id.to_string());
            entry.access_token = Some(access_token.to_string());
        })
    }

    pub fn consume(&self, state: &str) -> Option<OAuthState> {
        self.states.take(&state.to_string())
    }

    pub fn spawn_sweeper(&self, interval: Duration, shutdown: &Shutdown) {
        self.states.spawn_sweeper("oauth", interval, shutdown);
    }
}

/// Where a request stands in the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoSession,
    PendingProviderAuth,
    PendingCallback,
    Authenticated,
    Expired,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::NoSession => "no_session",
            AuthState::PendingProviderAuth => "pending_provider_auth",
            AuthState::PendingCallback => "pending_callback",
            AuthState::Authenticated => "authenticated",
            AuthState::Expired => "expired",
        }
    }
}

/// Outcome of the authentication check.
#[derive(Debug)]
pub enum AuthOutcome {
    /// Forward the request as this user.
    Proceed { user_id: String, access_token: String },
    Respond(Response),
}

/// Request attributes the flow needs.
#[derive(Debug, Clone)]
pub struct AuthRequest<'a> {
    pub client_ip: &'a str,
    /// `<scheme>://<host><path>[?query]`
    pub full_url: &'a str,
    pub user_agent: &'a str,
    pub headers: &'a HeaderMap,
}

/// Authentication gate in front of OAuth-protected applications.
#[derive(Clone)]
pub struct OAuthGate {
    enabled: bool,
    provider: Result<Arc<dyn OAuthProvider>, OAuthError>,
    cache: OAuthStateCache,
    codec: SessionCodec,
}

impl OAuthGate {
    pub fn new(
        enabled: bool,
        provider: Result<Arc<dyn OAuthProvider>, OAuthError>,
        cache: OAuthStateCache,
        codec: SessionCodec,
    ) -> Self {
        if let Err(e) = &provider {
            if enabled {
                tracing::error!(error = %e, "OAuth is enabled with an unusable provider");
            }
        }
        Self {
            enabled,
            provider,
            cache,
            codec,
        }
    }

    pub fn cache(&self) -> &OAuthStateCache {
        &self.cache
    }

    /// Whether requests to `app` go through the login flow.
    pub fn applies_to(&self, app: &Application) -> bool {
        self.enabled && app.oauth_required
    }

    /// Run one step of the login flow.
    pub fn check(&self, req: &AuthRequest<'_>, app: &Application) -> AuthOutcome {
        let now = unix_now();
        let session = match self.codec.from_headers(req.headers, now) {
            Ok(session) => session,
            Err(rejection) => {
                tracing::debug!(reason = ?rejection, "Session cookie rejected");
                None
            }
        };

        if let Some(SessionData {
            user_id: Some(user_id),
            access_token,
            ..
        }) = &session
        {
            metrics::record_oauth_transition(AuthState::Authenticated.as_str());
            return AuthOutcome::Proceed {
                user_id: user_id.clone(),
                access_token: access_token.clone().unwrap_or_default(),
            };
        }

        let state = sha256_hex(&format!("{}{}{}", req.client_ip, req.full_url, req.user_agent));
        let stamped = session
            .as_ref()
            .and_then(|s| s.states.get(&state))
            .cloned();

        let Some(state) = stamped else {
            metrics::record_oauth_transition(AuthState::NoSession.as_str());
            return self.start(&state, req.full_url, session.unwrap_or_default(), now);
        };

        let Some(pending) = self.cache.get(&state) else {
            metrics::record_oauth_transition(AuthState::Expired.as_str());
            tracing::debug!(url = %req.full_url, "OAuth state expired, restarting login");
            let mut response = temporary_redirect(req.full_url);
            if let Some(cookie) = clear_cookie() {
                response.headers_mut().append(header::SET_COOKIE, cookie);
            }
            return AuthOutcome::Respond(response);
        };

        let Some(user_id) = pending.user_id else {
            metrics::record_oauth_transition(AuthState::PendingProviderAuth.as_str());
            return match self.entrance(&state) {
                Ok(url) => AuthOutcome::Respond(temporary_redirect(&url)),
                Err(response) => AuthOutcome::Respond(response),
            };
        };

        metrics::record_oauth_transition(AuthState::PendingCallback.as_str());
        self.cache.consume(&state);

        let ttl = app.session_seconds.min(MAX_TTL.as_secs());
        let authenticated = SessionData {
            states: Default::default(),
            user_id: Some(user_id.clone()),
            access_token: pending.access_token,
            expires_at: now.saturating_add(ttl),
        };
        tracing::info!(user = %user_id, app_id = app.id, "OAuth login completed");

        let mut response = temporary_redirect(&pending.callback_url);
        if let Some(cookie) = self.codec.set_cookie(&authenticated, ttl) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        AuthOutcome::Respond(response)
    }

    fn start(&self, state: &str, full_url: &str, mut session: SessionData, now: u64) -> AuthOutcome {
        let entrance = match self.entrance(state) {
            Ok(url) => url,
            Err(response) => return AuthOutcome::Respond(response),
        };

        self.cache.begin(state, full_url);
        session.states.insert(state.to_string(), state.to_string());
        session.expires_at = now.saturating_add(STATE_SESSION_SECS);

        let mut response = temporary_redirect(&entrance);
        if let Some(cookie) = self.codec.set_cookie(&session, STATE_SESSION_SECS) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        AuthOutcome::Respond(response)
    }

    fn entrance(&self, state: &str) -> Result<String, Response> {
        match &self.provider {
            Ok(provider) => Ok(provider.entrance_url(state)),
            Err(e) => {
                let mut response = Response::new(Body::from(e.to_string()));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                Err(response)
            }
        }
    }
}

/// Add the authenticated identity to a request bound for the backend.
pub fn inject_identity(headers: &mut HeaderMap, user_id: &str, access_token: &str) {
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", access_token)) {
        headers.insert(header::AUTHORIZATION, value);
    }
    if let Ok(value) = HeaderValue::from_str(user_id) {
        headers.insert(X_AUTH_USER, value);
    }
}

/// Expire the session cookie and send the browser home.
pub fn logout_response() -> Response {
    let mut response = temporary_redirect("/");
    if let Some(cookie) = clear_cookie() {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}
