//! Authentication: persisted credentials, token provider and the exclusive
//! gate guarding restore/verify.

mod credentials;
mod gate;
mod provider;
mod session;

pub use credentials::{CredentialStore, Credentials};
pub use gate::{AuthGate, AuthGateGuard};
pub use provider::{AuthError, StaticTokenProvider, TokenProvider};
pub use session::{AuthEvent, AuthSession, AuthState, RejectionHook};
