//! Default roles and permissions.
//!
//! `ensure_defaults` is idempotent: existing rows are looked up by name and
//! duplicate grants come back as `AlreadyGranted`.

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use super::models::{NewPermission, NewRole, Permission, Role};
use super::store::{Grant, Insert, Store};
use super::{Authorizer, ADMIN_ROLE, DEFAULT_ROLE};

pub const MANAGER_ROLE: &str = "manager";

const ROLES: &[(&str, &str)] = &[
    (ADMIN_ROLE, "Full access"),
    (MANAGER_ROLE, "Manages products and orders"),
    (DEFAULT_ROLE, "Reads products and places orders"),
];

const PERMISSIONS: &[(&str, &str, &str)] = &[
    ("users", "read", "Read accounts"),
    ("users", "write", "Create and update accounts"),
    ("users", "delete", "Delete accounts"),
    ("products", "read", "Read products"),
    ("products", "write", "Create and update products"),
    ("products", "delete", "Delete products"),
    ("orders", "read", "Read orders"),
    ("orders", "write", "Create and update orders"),
    ("orders", "delete", "Delete orders"),
    ("admin", "access", "Access the admin surface"),
];

/// Which `(resource, action)` pairs each default role holds.
fn role_grants(role: &str, resource: &str, action: &str) -> bool {
    match role {
        ADMIN_ROLE => true,
        MANAGER_ROLE => matches!(resource, "products" | "orders"),
        DEFAULT_ROLE => matches!(
            (resource, action),
            ("products", "read") | ("orders", "read") | ("orders", "write")
        ),
        _ => false,
    }
}

#[must_use]
pub fn permission_name(resource: &str, action: &str) -> String {
    format!("{resource}_{action}")
}

async fn ensure_role(
    store: &dyn Store,
    authorizer: &Authorizer,
    name: &str,
    description: &str,
) -> Result<Role> {
    let outcome = authorizer
        .create_role(NewRole {
            name: name.to_string(),
            description: Some(description.to_string()),
        })
        .await?;
    match outcome {
        Insert::Created(role) => Ok(role),
        Insert::Conflict => store
            .role_by_name(name)
            .await?
            .ok_or_else(|| anyhow!("role {name} vanished after conflict")),
    }
}

async fn ensure_permission(
    store: &dyn Store,
    authorizer: &Authorizer,
    resource: &str,
    action: &str,
    description: &str,
) -> Result<Permission> {
    let name = permission_name(resource, action);
    let outcome = authorizer
        .create_permission(NewPermission {
            name: name.clone(),
            resource: resource.to_string(),
            action: action.to_string(),
            description: Some(description.to_string()),
        })
        .await?;
    match outcome {
        Insert::Created(permission) => Ok(permission),
        Insert::Conflict => store
            .permission_by_name(&name)
            .await?
            .ok_or_else(|| anyhow!("permission {name} vanished after conflict")),
    }
}

/// Create the `admin`, `manager` and `user` roles with their permission sets.
///
/// # Errors
/// Returns an error if any store operation fails.
pub async fn ensure_defaults(store: &dyn Store, authorizer: &Authorizer) -> Result<()> {
    let mut roles = Vec::with_capacity(ROLES.len());
    for (name, description) in ROLES {
        roles.push(ensure_role(store, authorizer, name, description).await?);
    }

    let mut permissions = Vec::with_capacity(PERMISSIONS.len());
    for (resource, action, description) in PERMISSIONS {
        permissions.push(ensure_permission(store, authorizer, resource, action, description).await?);
    }

    let mut granted = 0_usize;
    for role in &roles {
        for permission in &permissions {
            if !role_grants(&role.name, &permission.resource, &permission.action) {
                continue;
            }
            match authorizer.grant_permission(role.id, permission.id).await? {
                Grant::Granted(_) => granted += 1,
                Grant::AlreadyGranted => {}
                Grant::MissingReference(reference) => {
                    return Err(anyhow!(
                        "{} missing while seeding {}",
                        reference.as_str(),
                        role.name
                    ));
                }
            }
        }
    }

    info!(
        roles = roles.len(),
        permissions = permissions.len(),
        granted,
        "default roles ensured"
    );
    Ok(())
}

/// Grant `admin` to the account registered under `email`.
///
/// # Errors
/// Returns an error if the account or the admin role does not exist, or a store call fails.
pub async fn bootstrap_admin(store: &dyn Store, authorizer: &Authorizer, email: &str) -> Result<()> {
    let email = email.trim().to_lowercase();
    let account = store
        .account_by_email(&email)
        .await?
        .with_context(|| format!("no account registered as {email}"))?;
    let role = store
        .role_by_name(ADMIN_ROLE)
        .await?
        .context("admin role missing, run with --seed-defaults")?;

    match authorizer.grant_role(account.id, role.id).await? {
        Grant::Granted(_) => info!(%email, "admin role granted"),
        Grant::AlreadyGranted => info!(%email, "account already holds admin role"),
        Grant::MissingReference(reference) => {
            warn!(%email, reference = reference.as_str(), "bootstrap admin skipped");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::models::NewAccount;
    use crate::rbac::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn defaults_are_idempotent() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let authorizer = Authorizer::new(store.clone());

        ensure_defaults(store.as_ref(), &authorizer).await?;
        ensure_defaults(store.as_ref(), &authorizer).await?;

        assert_eq!(store.roles().await?.len(), ROLES.len());
        assert_eq!(store.permissions().await?.len(), PERMISSIONS.len());
        Ok(())
    }

    #[tokio::test]
    async fn default_matrix_matches_roles() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let authorizer = Authorizer::new(store.clone());
        ensure_defaults(store.as_ref(), &authorizer).await?;

        let mut ids = Vec::new();
        for (role, email) in [
            (ADMIN_ROLE, "admin@example.com"),
            (MANAGER_ROLE, "manager@example.com"),
            (DEFAULT_ROLE, "user@example.com"),
        ] {
            let Insert::Created(account) = store
                .insert_account(
                    NewAccount {
                        first_name: "Dana".to_string(),
                        last_name: "Green".to_string(),
                        middle_name: None,
                        email: email.to_string(),
                        password_hash: "digest".to_string(),
                    },
                    Some(role),
                )
                .await?
            else {
                anyhow::bail!("email already taken");
            };
            ids.push(account.id);
        }
        let (admin, manager, user) = (ids[0], ids[1], ids[2]);

        assert!(authorizer.has_permission(admin, "admin", "access").await?);
        assert!(authorizer.has_permission(admin, "users", "delete").await?);
        assert_eq!(authorizer.permissions_of(admin).await?.len(), PERMISSIONS.len());

        assert!(authorizer.has_permission(manager, "orders", "delete").await?);
        assert!(!authorizer.has_permission(manager, "users", "read").await?);
        assert!(!authorizer.is_admin(manager).await?);

        assert!(authorizer.has_permission(user, "orders", "write").await?);
        assert!(!authorizer.has_permission(user, "products", "write").await?);
        assert_eq!(authorizer.permissions_of(user).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn bootstrap_admin_requires_account() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let authorizer = Authorizer::new(store.clone());
        ensure_defaults(store.as_ref(), &authorizer).await?;

        assert!(bootstrap_admin(store.as_ref(), &authorizer, "nobody@example.com")
            .await
            .is_err());

        let Insert::Created(account) = store
            .insert_account(
                NewAccount {
                    first_name: "Erin".to_string(),
                    last_name: "Black".to_string(),
                    middle_name: None,
                    email: "erin@example.com".to_string(),
                    password_hash: "digest".to_string(),
                },
                None,
            )
            .await?
        else {
            anyhow::bail!("email already taken");
        };
        bootstrap_admin(store.as_ref(), &authorizer, " Erin@Example.com ").await?;
        assert!(authorizer.is_admin(account.id).await?);
        Ok(())
    }
}
