//! Orchestration of login and credential lifecycle operations.
//!
//! The flows are the engine's public surface. Each one composes the lower
//! components, enforces capability gates and emits one audit record per
//! significant event.

mod authentication;
mod credentials;

pub use authentication::{AuthenticationFlow, Challenge, LoginStage};
pub use credentials::CredentialLifecycleFlow;
