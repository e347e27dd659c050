mod credentials;
mod error;
mod keychain;
mod oauth;
mod token_store;

pub use credentials::{Credential, CredentialResolution, CredentialStore};
pub use error::SecurityError;
pub use keychain::{SecretKey, SecretStore};
pub use oauth::{AuthFlow, OAuthTokenEndpoint, TokenEndpoint, TokenGrant};
pub use token_store::{FileTokenStore, MemoryTokenStore, StoredToken, TokenStore};
