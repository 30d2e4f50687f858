//! OAuth authentication for protected applications.
//!
//! # Data Flow
//! ```text
//! dispatcher ──▶ flow.rs (OAuthGate::check)
//!                  ├──▶ session.rs  (signed janusec-token cookie)
//!                  ├──▶ OAuthStateCache (pending logins, TTL-bound)
//!                  └──▶ provider.rs (entrance URL per provider)
//! ```

pub mod flow;
pub mod provider;
pub mod session;

pub use flow::{inject_identity, logout_response, AuthOutcome, AuthRequest, AuthState, OAuthGate, OAuthStateCache};
pub use provider::{build_provider, OAuthError, OAuthProvider};
pub use session::{SessionCodec, SessionData};
