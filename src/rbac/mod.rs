//! Role-based authorization.
//!
//! An account holds roles through `account_roles`, roles hold permissions
//! through `role_permissions`, and every decision is resolved live through that
//! two-hop join. There is no cache and nothing about grants is embedded in
//! session tokens, so a revoke takes effect on the next request.

pub mod models;
pub mod seed;
pub mod store;

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use models::{AccountRole, NewPermission, NewRole, Permission, Role, RolePermission};
use store::{Grant, Insert, Store};

pub const ADMIN_ROLE: &str = "admin";
pub const DEFAULT_ROLE: &str = "user";

#[derive(Clone)]
pub struct Authorizer {
    store: Arc<dyn Store>,
}

impl Authorizer {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Roles granted to `subject`, ordered by name. Unknown subjects have none.
    ///
    /// # Errors
    /// Returns an error if the store query fails.
    pub async fn roles_of(&self, subject: Uuid) -> Result<Vec<Role>> {
        self.store.roles_of(subject).await
    }

    /// Distinct permissions reachable through any of `subject`'s roles.
    ///
    /// # Errors
    /// Returns an error if the store query fails.
    pub async fn permissions_of(&self, subject: Uuid) -> Result<Vec<Permission>> {
        self.store.permissions_of(subject).await
    }

    /// Exact, case-sensitive match on `(resource, action)`.
    ///
    /// # Errors
    /// Returns an error if the store query fails; callers deny on error.
    #[instrument(skip(self))]
    pub async fn has_permission(&self, subject: Uuid, resource: &str, action: &str) -> Result<bool> {
        let allowed = self.store.has_permission(subject, resource, action).await?;
        debug!(allowed, "permission check");
        Ok(allowed)
    }

    /// # Errors
    /// Returns an error if the store query fails.
    pub async fn has_role(&self, subject: Uuid, role_name: &str) -> Result<bool> {
        self.store.has_role(subject, role_name).await
    }

    /// # Errors
    /// Returns an error if the store query fails.
    pub async fn is_admin(&self, subject: Uuid) -> Result<bool> {
        self.has_role(subject, ADMIN_ROLE).await
    }

    /// # Errors
    /// Returns an error if the store query fails.
    pub async fn role(&self, id: Uuid) -> Result<Option<Role>> {
        self.store.role_by_id(id).await
    }

    /// # Errors
    /// Returns an error if the store query fails.
    pub async fn roles(&self) -> Result<Vec<Role>> {
        self.store.roles().await
    }

    /// # Errors
    /// Returns an error if the store query fails.
    pub async fn permission(&self, id: Uuid) -> Result<Option<Permission>> {
        self.store.permission_by_id(id).await
    }

    /// # Errors
    /// Returns an error if the store query fails.
    pub async fn permissions(&self) -> Result<Vec<Permission>> {
        self.store.permissions().await
    }

    /// # Errors
    /// Returns an error if the store insert fails for a reason other than a taken name.
    pub async fn create_role(&self, role: NewRole) -> Result<Insert<Role>> {
        let outcome = self.store.insert_role(role).await?;
        if let Insert::Created(role) = &outcome {
            info!(role = %role.name, "role created");
        }
        Ok(outcome)
    }

    /// # Errors
    /// Returns an error if the store insert fails for a reason other than a taken name.
    pub async fn create_permission(&self, permission: NewPermission) -> Result<Insert<Permission>> {
        let outcome = self.store.insert_permission(permission).await?;
        if let Insert::Created(permission) = &outcome {
            info!(permission = %permission.name, "permission created");
        }
        Ok(outcome)
    }

    /// Only the description of a role is mutable. `None` means the role does not exist.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn update_role_description(
        &self,
        id: Uuid,
        description: Option<String>,
    ) -> Result<Option<Role>> {
        self.store.set_role_description(id, description).await
    }

    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn update_permission_description(
        &self,
        id: Uuid,
        description: Option<String>,
    ) -> Result<Option<Permission>> {
        self.store.set_permission_description(id, description).await
    }

    /// Grant `role_id` to `account_id`. A second grant of the same pair is
    /// `AlreadyGranted`, never a second row.
    ///
    /// # Errors
    /// Returns an error if the store insert fails.
    #[instrument(skip(self))]
    pub async fn grant_role(&self, account_id: Uuid, role_id: Uuid) -> Result<Grant<AccountRole>> {
        let outcome = self.store.insert_account_role(account_id, role_id).await?;
        if matches!(outcome, Grant::Granted(_)) {
            info!("role granted");
        }
        Ok(outcome)
    }

    /// # Errors
    /// Returns an error if the store insert fails.
    #[instrument(skip(self))]
    pub async fn grant_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<Grant<RolePermission>> {
        let outcome = self
            .store
            .insert_role_permission(role_id, permission_id)
            .await?;
        if matches!(outcome, Grant::Granted(_)) {
            info!("permission granted");
        }
        Ok(outcome)
    }

    /// Remove an account-role grant by its id. Returns `false` if it did not exist.
    ///
    /// # Errors
    /// Returns an error if the store delete fails.
    #[instrument(skip(self))]
    pub async fn revoke_role(&self, grant_id: Uuid) -> Result<bool> {
        let removed = self.store.delete_account_role(grant_id).await?;
        if removed {
            info!("role revoked");
        }
        Ok(removed)
    }

    /// # Errors
    /// Returns an error if the store delete fails.
    #[instrument(skip(self))]
    pub async fn revoke_permission(&self, grant_id: Uuid) -> Result<bool> {
        let removed = self.store.delete_role_permission(grant_id).await?;
        if removed {
            info!("permission revoked");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::models::NewAccount;
    use crate::rbac::store::MemoryStore;
    use anyhow::bail;

    struct Fixture {
        authorizer: Authorizer,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        Fixture {
            authorizer: Authorizer::new(store.clone()),
            store,
        }
    }

    async fn account(store: &MemoryStore, email: &str) -> Result<Uuid> {
        let outcome = store
            .insert_account(
                NewAccount {
                    first_name: "Carol".to_string(),
                    last_name: "White".to_string(),
                    middle_name: None,
                    email: email.to_string(),
                    password_hash: "digest".to_string(),
                },
                None,
            )
            .await?;
        match outcome {
            Insert::Created(account) => Ok(account.id),
            Insert::Conflict => bail!("email already taken"),
        }
    }

    async fn role(authorizer: &Authorizer, name: &str) -> Result<Role> {
        match authorizer
            .create_role(NewRole {
                name: name.to_string(),
                description: None,
            })
            .await?
        {
            Insert::Created(role) => Ok(role),
            Insert::Conflict => bail!("role already exists"),
        }
    }

    async fn permission(authorizer: &Authorizer, resource: &str, action: &str) -> Result<Permission> {
        match authorizer
            .create_permission(NewPermission {
                name: format!("{resource}_{action}"),
                resource: resource.to_string(),
                action: action.to_string(),
                description: None,
            })
            .await?
        {
            Insert::Created(permission) => Ok(permission),
            Insert::Conflict => bail!("permission already exists"),
        }
    }

    #[tokio::test]
    async fn account_without_roles_has_nothing() -> Result<()> {
        let Fixture { authorizer, store } = fixture();
        let subject = account(&store, "none@example.com").await?;
        role(&authorizer, ADMIN_ROLE).await?;

        assert!(authorizer.permissions_of(subject).await?.is_empty());
        assert!(authorizer.roles_of(subject).await?.is_empty());
        assert!(!authorizer.is_admin(subject).await?);
        assert!(!authorizer.has_permission(subject, "admin", "access").await?);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_subject_is_denied_without_error() -> Result<()> {
        let Fixture { authorizer, .. } = fixture();
        let subject = Uuid::new_v4();
        assert!(authorizer.permissions_of(subject).await?.is_empty());
        assert!(!authorizer.has_role(subject, DEFAULT_ROLE).await?);
        assert!(!authorizer.has_permission(subject, "users", "read").await?);
        Ok(())
    }

    #[tokio::test]
    async fn admin_grant_and_revoke_flip_permission() -> Result<()> {
        let Fixture { authorizer, store } = fixture();
        let subject = account(&store, "u@example.com").await?;
        let admin = role(&authorizer, ADMIN_ROLE).await?;
        let access = permission(&authorizer, "admin", "access").await?;
        assert!(matches!(
            authorizer.grant_permission(admin.id, access.id).await?,
            Grant::Granted(_)
        ));

        let Grant::Granted(grant) = authorizer.grant_role(subject, admin.id).await? else {
            bail!("role was not granted");
        };
        assert!(authorizer.has_permission(subject, "admin", "access").await?);
        assert!(authorizer.has_role(subject, ADMIN_ROLE).await?);
        assert!(authorizer.is_admin(subject).await?);

        assert!(authorizer.revoke_role(grant.id).await?);
        assert!(!authorizer.has_permission(subject, "admin", "access").await?);
        assert!(!authorizer.has_role(subject, ADMIN_ROLE).await?);
        assert!(!authorizer.revoke_role(grant.id).await?);

        // The role and its permission grant are untouched by the revoke.
        assert_eq!(authorizer.role(admin.id).await?, Some(admin));
        assert_eq!(
            authorizer.permissions().await?.len(),
            1,
            "permission rows persist"
        );
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_pairs_are_denied() -> Result<()> {
        let Fixture { authorizer, store } = fixture();
        let subject = account(&store, "reader@example.com").await?;
        let reader = role(&authorizer, "reader").await?;
        let read = permission(&authorizer, "products", "read").await?;
        let write = permission(&authorizer, "products", "write").await?;
        authorizer.grant_permission(reader.id, read.id).await?;
        authorizer.grant_role(subject, reader.id).await?;

        assert!(authorizer.has_permission(subject, "products", "read").await?);
        for (resource, action) in [
            ("products", "write"),
            ("Products", "read"),
            ("products", "READ"),
            ("orders", "read"),
            ("products", "*"),
        ] {
            assert!(
                !authorizer.has_permission(subject, resource, action).await?,
                "{resource}:{action} must not be reachable"
            );
        }

        // Granted to no role at all.
        assert!(!authorizer.permissions_of(subject).await?.contains(&write));
        Ok(())
    }

    #[tokio::test]
    async fn permissions_are_deduplicated_across_roles() -> Result<()> {
        let Fixture { authorizer, store } = fixture();
        let subject = account(&store, "both@example.com").await?;
        let first = role(&authorizer, "first").await?;
        let second = role(&authorizer, "second").await?;
        let read = permission(&authorizer, "orders", "read").await?;
        authorizer.grant_permission(first.id, read.id).await?;
        authorizer.grant_permission(second.id, read.id).await?;
        authorizer.grant_role(subject, first.id).await?;
        authorizer.grant_role(subject, second.id).await?;

        assert_eq!(authorizer.permissions_of(subject).await?, vec![read]);
        let names: Vec<String> = authorizer
            .roles_of(subject)
            .await?
            .into_iter()
            .map(|role| role.name)
            .collect();
        assert_eq!(names, vec!["first", "second"]);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_grant_is_reported_not_stored() -> Result<()> {
        let Fixture { authorizer, store } = fixture();
        let subject = account(&store, "dup@example.com").await?;
        let user = role(&authorizer, DEFAULT_ROLE).await?;

        assert!(matches!(
            authorizer.grant_role(subject, user.id).await?,
            Grant::Granted(_)
        ));
        assert_eq!(
            authorizer.grant_role(subject, user.id).await?,
            Grant::AlreadyGranted
        );
        assert_eq!(authorizer.roles_of(subject).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_duplicate_grants_store_one_row() -> Result<()> {
        let Fixture { authorizer, store } = fixture();
        let subject = account(&store, "race@example.com").await?;
        let role_id = role(&authorizer, DEFAULT_ROLE).await?.id;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let authorizer = authorizer.clone();
                tokio::spawn(async move { authorizer.grant_role(subject, role_id).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if matches!(handle.await??, Grant::Granted(_)) {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(authorizer.roles_of(subject).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn role_names_are_unique() -> Result<()> {
        let Fixture { authorizer, .. } = fixture();
        role(&authorizer, "manager").await?;
        let again = authorizer
            .create_role(NewRole {
                name: "manager".to_string(),
                description: Some("again".to_string()),
            })
            .await?;
        assert_eq!(again, Insert::Conflict);
        Ok(())
    }

    #[tokio::test]
    async fn description_update_leaves_name() -> Result<()> {
        let Fixture { authorizer, .. } = fixture();
        let manager = role(&authorizer, "manager").await?;
        let updated = authorizer
            .update_role_description(manager.id, Some("runs the shop".to_string()))
            .await?;
        let Some(updated) = updated else {
            bail!("role vanished");
        };
        assert_eq!(updated.name, "manager");
        assert_eq!(updated.description.as_deref(), Some("runs the shop"));

        let missing = authorizer
            .update_permission_description(Uuid::new_v4(), None)
            .await?;
        assert!(missing.is_none());
        Ok(())
    }
}
