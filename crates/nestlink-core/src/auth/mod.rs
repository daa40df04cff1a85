//! Token lifecycle: expiry checks, coordinated refresh and request decoration

pub mod decorator;
pub mod expiry;
pub mod refresh;

pub use decorator::{bearer, AuthLink, ComplianceHeaders};
pub use expiry::{is_expiring_soon, is_expiring_soon_at, token_expiry};
pub use refresh::{
    GraphQlRefreshTransport, RefreshController, RefreshOutcome, RefreshPayload, RefreshPolicy,
    RefreshTransport,
};
