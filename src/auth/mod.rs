//! Authentication: credentials, session tokens, cookies and request identity.

pub mod cookies;
pub mod credentials;
pub mod gate;
pub mod identity;
pub mod state;
pub mod token;

pub use credentials::{Argon2Hasher, CredentialHasher};
pub use gate::Gate;
pub use identity::{current_subject_or_none, resolve_identity, Identity, MaybeIdentity, Subject};
pub use state::{AuthConfig, AuthState};
pub use token::{TokenConfig, TokenError, TokenKind, TokenPair, TokenService, TokenStatus};
