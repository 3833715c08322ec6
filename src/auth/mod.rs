// Authentication module
// Manages the OAuth credential lifecycle: acquire, persist, expire, refresh

mod manager;
pub mod refresh;
pub mod store;
pub mod types;

pub use manager::{AccessToken, AuthManager};
pub use refresh::OAuthConfig;
pub use store::TokenStore;
pub use types::{is_expired, Credential, DEFAULT_EXPIRY_BUFFER_SECS};
