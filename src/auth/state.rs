//! Shared auth state handed to handlers and gates through an `Extension`.

use std::sync::Arc;

use super::{credentials::CredentialHasher, token::TokenService};
use crate::rbac::{store::Store, Authorizer, DEFAULT_ROLE};

#[derive(Clone, Debug)]
pub struct AuthConfig {
    production: bool,
    default_role: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            production: false,
            default_role: DEFAULT_ROLE.to_string(),
        }
    }

    /// Production adds `Secure` to every session cookie.
    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    #[must_use]
    pub fn with_default_role(mut self, role: String) -> Self {
        self.default_role = role;
        self
    }

    #[must_use]
    pub fn production(&self) -> bool {
        self.production
    }

    #[must_use]
    pub fn default_role(&self) -> &str {
        &self.default_role
    }
}

pub struct AuthState {
    config: AuthConfig,
    tokens: TokenService,
    hasher: Arc<dyn CredentialHasher>,
    store: Arc<dyn Store>,
    authorizer: Authorizer,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        tokens: TokenService,
        hasher: Arc<dyn CredentialHasher>,
        store: Arc<dyn Store>,
    ) -> Self {
        let authorizer = Authorizer::new(store.clone());
        Self {
            config,
            tokens,
            hasher,
            store,
            authorizer,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn hasher(&self) -> &dyn CredentialHasher {
        self.hasher.as_ref()
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[must_use]
    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }
}
