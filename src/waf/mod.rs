//! Web application firewall.
//!
//! # Data Flow
//! ```text
//! dispatcher ──▶ decision.rs (WafGuard::evaluate)
//!                   ├──▶ engine.rs   (CC counters, static detection, content matcher)
//!                   ├──▶ challenge.rs (CAPTCHA store, client ids)
//!                   └──▶ block_page.rs (403 page)
//! ```

pub mod block_page;
pub mod challenge;
pub mod decision;
pub mod engine;
pub mod model;

pub use block_page::block_page;
pub use challenge::ChallengeStore;
pub use decision::{Decision, Verdict, WafGuard};
pub use engine::{LocalWafEngine, NoopMatcher, PolicyMatcher, RequestInfo, WafEngine};
pub use model::{CcPolicy, HitInfo, Policy, PolicyAction, VulnType};
