//! Persistence seam for accounts, roles, permissions and their grants.
//!
//! The store is the source of truth for uniqueness: email, role name,
//! permission name, and both join-table pairs are unique constraints, and
//! duplicate inserts surface as outcomes rather than errors. Backend failures
//! are `anyhow` errors and callers treat them as a denial.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::models::{
    Account, AccountChanges, AccountRole, AccountStatus, NewAccount, NewPermission, NewRole,
    Permission, Role, RolePermission,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub(crate) use postgres::db_span;

/// Outcome of inserting a row with a unique name or email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert<T> {
    Created(T),
    Conflict,
}

/// Outcome of updating a row that may collide with a unique column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update<T> {
    Updated(T),
    NotFound,
    Conflict,
}

/// Which side of a grant did not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Account,
    Role,
    Permission,
}

impl Reference {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Role => "role",
            Self::Permission => "permission",
        }
    }
}

/// Outcome of inserting a join row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant<T> {
    Granted(T),
    AlreadyGranted,
    MissingReference(Reference),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert an account and, in the same operation, grant it `default_role`
    /// when a role with that name exists.
    async fn insert_account(
        &self,
        account: NewAccount,
        default_role: Option<&str>,
    ) -> Result<Insert<Account>>;
    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>>;
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>>;
    async fn update_account(&self, id: Uuid, changes: AccountChanges) -> Result<Update<Account>>;
    async fn set_account_status(&self, id: Uuid, status: AccountStatus) -> Result<bool>;
    async fn accounts_by_status(&self, status: AccountStatus) -> Result<Vec<Account>>;

    async fn insert_role(&self, role: NewRole) -> Result<Insert<Role>>;
    async fn role_by_id(&self, id: Uuid) -> Result<Option<Role>>;
    async fn role_by_name(&self, name: &str) -> Result<Option<Role>>;
    async fn roles(&self) -> Result<Vec<Role>>;
    async fn set_role_description(
        &self,
        id: Uuid,
        description: Option<String>,
    ) -> Result<Option<Role>>;

    async fn insert_permission(&self, permission: NewPermission) -> Result<Insert<Permission>>;
    async fn permission_by_id(&self, id: Uuid) -> Result<Option<Permission>>;
    async fn permission_by_name(&self, name: &str) -> Result<Option<Permission>>;
    async fn permissions(&self) -> Result<Vec<Permission>>;
    async fn set_permission_description(
        &self,
        id: Uuid,
        description: Option<String>,
    ) -> Result<Option<Permission>>;

    async fn insert_account_role(&self, account_id: Uuid, role_id: Uuid)
    -> Result<Grant<AccountRole>>;
    async fn delete_account_role(&self, id: Uuid) -> Result<bool>;
    async fn insert_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<Grant<RolePermission>>;
    async fn delete_role_permission(&self, id: Uuid) -> Result<bool>;

    /// AccountRole -> Role, ordered by role name.
    async fn roles_of(&self, account_id: Uuid) -> Result<Vec<Role>>;
    /// AccountRole -> Role -> RolePermission -> Permission, distinct, ordered by name.
    async fn permissions_of(&self, account_id: Uuid) -> Result<Vec<Permission>>;
    async fn has_permission(&self, account_id: Uuid, resource: &str, action: &str) -> Result<bool>;
    async fn has_role(&self, account_id: Uuid, role_name: &str) -> Result<bool>;
}
