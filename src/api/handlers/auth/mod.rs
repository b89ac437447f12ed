//! Authentication endpoints.
//!
//! Login, MFA, refresh and logout are public and drive the admission
//! components directly. `verify` and `consent` sit behind the admission
//! middleware and read the [`crate::tenant::AuthContext`] it attaches.

pub mod login;
pub mod mfa;
pub mod oauth;
pub mod refresh;
pub mod session;
pub mod types;
pub mod utils;
pub mod version;
