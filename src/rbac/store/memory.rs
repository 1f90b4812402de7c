//! In-process store with the same uniqueness rules as the Postgres schema.
//!
//! Used by tests and by `--dsn memory://` for local runs. All tables live
//! behind one `RwLock`, so every method is a single atomic step.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Grant, Insert, Reference, Store, Update};
use crate::rbac::models::{
    Account, AccountChanges, AccountRole, AccountStatus, NewAccount, NewPermission, NewRole,
    Permission, Role, RolePermission,
};

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<Uuid, Account>,
    roles: BTreeMap<Uuid, Role>,
    permissions: BTreeMap<Uuid, Permission>,
    account_roles: BTreeMap<Uuid, AccountRole>,
    role_permissions: BTreeMap<Uuid, RolePermission>,
}

impl Tables {
    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.accounts
            .values()
            .any(|account| account.email == email && Some(account.id) != except)
    }

    fn role_ids_of(&self, account_id: Uuid) -> HashSet<Uuid> {
        self.account_roles
            .values()
            .filter(|grant| grant.account_id == account_id)
            .map(|grant| grant.role_id)
            .collect()
    }

    fn permissions_of(&self, account_id: Uuid) -> Vec<Permission> {
        let role_ids = self.role_ids_of(account_id);
        let permission_ids: HashSet<Uuid> = self
            .role_permissions
            .values()
            .filter(|grant| role_ids.contains(&grant.role_id))
            .map(|grant| grant.permission_id)
            .collect();
        let mut permissions: Vec<Permission> = self
            .permissions
            .values()
            .filter(|permission| permission_ids.contains(&permission.id))
            .cloned()
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        permissions
    }

    fn roles_of(&self, account_id: Uuid) -> Vec<Role> {
        let role_ids = self.role_ids_of(account_id);
        let mut roles: Vec<Role> = self
            .roles
            .values()
            .filter(|role| role_ids.contains(&role.id))
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_account(
        &self,
        account: NewAccount,
        default_role: Option<&str>,
    ) -> Result<Insert<Account>> {
        let mut tables = self.tables.write().await;
        if tables.email_taken(&account.email, None) {
            return Ok(Insert::Conflict);
        }

        let created = Account {
            id: Uuid::new_v4(),
            first_name: account.first_name,
            last_name: account.last_name,
            middle_name: account.middle_name,
            email: account.email,
            password_hash: account.password_hash,
            status: AccountStatus::Active,
        };
        tables.accounts.insert(created.id, created.clone());

        let role_id = default_role.and_then(|name| {
            tables
                .roles
                .values()
                .find(|role| role.name == name)
                .map(|role| role.id)
        });
        if let Some(role_id) = role_id {
            let grant = AccountRole {
                id: Uuid::new_v4(),
                account_id: created.id,
                role_id,
            };
            tables.account_roles.insert(grant.id, grant);
        }

        Ok(Insert::Created(created))
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn update_account(&self, id: Uuid, changes: AccountChanges) -> Result<Update<Account>> {
        let mut tables = self.tables.write().await;
        if let Some(email) = &changes.email {
            if tables.email_taken(email, Some(id)) {
                return Ok(Update::Conflict);
            }
        }
        let Some(account) = tables.accounts.get_mut(&id) else {
            return Ok(Update::NotFound);
        };
        if let Some(first_name) = changes.first_name {
            account.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            account.last_name = last_name;
        }
        if let Some(middle_name) = changes.middle_name {
            account.middle_name = Some(middle_name);
        }
        if let Some(email) = changes.email {
            account.email = email;
        }
        if let Some(password_hash) = changes.password_hash {
            account.password_hash = password_hash;
        }
        Ok(Update::Updated(account.clone()))
    }

    async fn set_account_status(&self, id: Uuid, status: AccountStatus) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.accounts.get_mut(&id).map_or(false, |account| {
            account.status = status;
            true
        }))
    }

    async fn accounts_by_status(&self, status: AccountStatus) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|account| account.status == status)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(accounts)
    }

    async fn insert_role(&self, role: NewRole) -> Result<Insert<Role>> {
        let mut tables = self.tables.write().await;
        if tables.roles.values().any(|existing| existing.name == role.name) {
            return Ok(Insert::Conflict);
        }
        let created = Role {
            id: Uuid::new_v4(),
            name: role.name,
            description: role.description,
        };
        tables.roles.insert(created.id, created.clone());
        Ok(Insert::Created(created))
    }

    async fn role_by_id(&self, id: Uuid) -> Result<Option<Role>> {
        Ok(self.tables.read().await.roles.get(&id).cloned())
    }

    async fn role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.roles.values().find(|role| role.name == name).cloned())
    }

    async fn roles(&self) -> Result<Vec<Role>> {
        let tables = self.tables.read().await;
        let mut roles: Vec<Role> = tables.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn set_role_description(
        &self,
        id: Uuid,
        description: Option<String>,
    ) -> Result<Option<Role>> {
        let mut tables = self.tables.write().await;
        Ok(tables.roles.get_mut(&id).map(|role| {
            role.description = description;
            role.clone()
        }))
    }

    async fn insert_permission(&self, permission: NewPermission) -> Result<Insert<Permission>> {
        let mut tables = self.tables.write().await;
        if tables
            .permissions
            .values()
            .any(|existing| existing.name == permission.name)
        {
            return Ok(Insert::Conflict);
        }
        let created = Permission {
            id: Uuid::new_v4(),
            name: permission.name,
            resource: permission.resource,
            action: permission.action,
            description: permission.description,
        };
        tables.permissions.insert(created.id, created.clone());
        Ok(Insert::Created(created))
    }

    async fn permission_by_id(&self, id: Uuid) -> Result<Option<Permission>> {
        Ok(self.tables.read().await.permissions.get(&id).cloned())
    }

    async fn permission_by_name(&self, name: &str) -> Result<Option<Permission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .permissions
            .values()
            .find(|permission| permission.name == name)
            .cloned())
    }

    async fn permissions(&self) -> Result<Vec<Permission>> {
        let tables = self.tables.read().await;
        let mut permissions: Vec<Permission> = tables.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn set_permission_description(
        &self,
        id: Uuid,
        description: Option<String>,
    ) -> Result<Option<Permission>> {
        let mut tables = self.tables.write().await;
        Ok(tables.permissions.get_mut(&id).map(|permission| {
            permission.description = description;
            permission.clone()
        }))
    }

    async fn insert_account_role(
        &self,
        account_id: Uuid,
        role_id: Uuid,
    ) -> Result<Grant<AccountRole>> {
        let mut tables = self.tables.write().await;
        if !tables.accounts.contains_key(&account_id) {
            return Ok(Grant::MissingReference(Reference::Account));
        }
        if !tables.roles.contains_key(&role_id) {
            return Ok(Grant::MissingReference(Reference::Role));
        }
        if tables
            .account_roles
            .values()
            .any(|grant| grant.account_id == account_id && grant.role_id == role_id)
        {
            return Ok(Grant::AlreadyGranted);
        }
        let grant = AccountRole {
            id: Uuid::new_v4(),
            account_id,
            role_id,
        };
        tables.account_roles.insert(grant.id, grant.clone());
        Ok(Grant::Granted(grant))
    }

    async fn delete_account_role(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().await.account_roles.remove(&id).is_some())
    }

    async fn insert_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<Grant<RolePermission>> {
        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Ok(Grant::MissingReference(Reference::Role));
        }
        if !tables.permissions.contains_key(&permission_id) {
            return Ok(Grant::MissingReference(Reference::Permission));
        }
        if tables
            .role_permissions
            .values()
            .any(|grant| grant.role_id == role_id && grant.permission_id == permission_id)
        {
            return Ok(Grant::AlreadyGranted);
        }
        let grant = RolePermission {
            id: Uuid::new_v4(),
            role_id,
            permission_id,
        };
        tables.role_permissions.insert(grant.id, grant.clone());
        Ok(Grant::Granted(grant))
    }

    async fn delete_role_permission(&self, id: Uuid) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .await
            .role_permissions
            .remove(&id)
            .is_some())
    }

    async fn roles_of(&self, account_id: Uuid) -> Result<Vec<Role>> {
        Ok(self.tables.read().await.roles_of(account_id))
    }

    async fn permissions_of(&self, account_id: Uuid) -> Result<Vec<Permission>> {
        Ok(self.tables.read().await.permissions_of(account_id))
    }

    async fn has_permission(&self, account_id: Uuid, resource: &str, action: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .permissions_of(account_id)
            .iter()
            .any(|permission| permission.resource == resource && permission.action == action))
    }

    async fn has_role(&self, account_id: Uuid, role_name: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .roles_of(account_id)
            .iter()
            .any(|role| role.name == role_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            first_name: "Alice".to_string(),
            last_name: "Smith".to_string(),
            middle_name: None,
            email: email.to_string(),
            password_hash: "digest".to_string(),
        }
    }

    fn new_role(name: &str) -> NewRole {
        NewRole {
            name: name.to_string(),
            description: None,
        }
    }

    fn created<T>(insert: Result<Insert<T>>) -> Result<T> {
        match insert? {
            Insert::Created(row) => Ok(row),
            Insert::Conflict => bail!("unexpected conflict"),
        }
    }

    #[tokio::test]
    async fn email_is_unique_even_after_soft_delete() -> Result<()> {
        let store = MemoryStore::new();
        let account = created(store.insert_account(new_account("a@example.com"), None).await)?;
        assert!(
            store
                .set_account_status(account.id, AccountStatus::Deleted)
                .await?
        );

        let again = store
            .insert_account(new_account("a@example.com"), None)
            .await?;
        assert_eq!(again, Insert::Conflict);
        Ok(())
    }

    #[tokio::test]
    async fn insert_account_grants_default_role_when_present() -> Result<()> {
        let store = MemoryStore::new();
        created(store.insert_role(new_role("user")).await)?;

        let account = created(
            store
                .insert_account(new_account("b@example.com"), Some("user"))
                .await,
        )?;
        assert!(store.has_role(account.id, "user").await?);

        let orphan = created(
            store
                .insert_account(new_account("c@example.com"), Some("missing"))
                .await,
        )?;
        assert!(store.roles_of(orphan.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn update_account_rejects_taken_email() -> Result<()> {
        let store = MemoryStore::new();
        created(store.insert_account(new_account("a@example.com"), None).await)?;
        let other = created(store.insert_account(new_account("b@example.com"), None).await)?;

        let changes = AccountChanges {
            email: Some("a@example.com".to_string()),
            ..AccountChanges::default()
        };
        assert_eq!(
            store.update_account(other.id, changes).await?,
            Update::Conflict
        );

        let missing = store
            .update_account(Uuid::new_v4(), AccountChanges::default())
            .await?;
        assert_eq!(missing, Update::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn grants_check_references_and_duplicates() -> Result<()> {
        let store = MemoryStore::new();
        let account = created(store.insert_account(new_account("a@example.com"), None).await)?;
        let role = created(store.insert_role(new_role("manager")).await)?;

        assert_eq!(
            store.insert_account_role(Uuid::new_v4(), role.id).await?,
            Grant::MissingReference(Reference::Account)
        );
        assert_eq!(
            store.insert_account_role(account.id, Uuid::new_v4()).await?,
            Grant::MissingReference(Reference::Role)
        );

        let first = store.insert_account_role(account.id, role.id).await?;
        assert!(matches!(first, Grant::Granted(_)));
        assert_eq!(
            store.insert_account_role(account.id, role.id).await?,
            Grant::AlreadyGranted
        );
        assert_eq!(store.roles_of(account.id).await?.len(), 1);
        Ok(())
    }
}
