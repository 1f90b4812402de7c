//! Postgres-backed store. Schema lives in `sql/schema.sql`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use tracing::{info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::{Grant, Insert, Reference, Store, Update};
use crate::rbac::models::{
    Account, AccountChanges, AccountRole, AccountStatus, NewAccount, NewPermission, NewRole,
    Permission, Role, RolePermission,
};

const SCHEMA: &str = include_str!("../../../sql/schema.sql");

const ACCOUNT_COLUMNS: &str =
    "id, first_name, last_name, middle_name, email, password_hash, status";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply `sql/schema.sql`. Every statement is idempotent.
    ///
    /// # Errors
    /// Returns an error if any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(db_span("DDL", "sql/schema.sql"))
            .await
            .context("failed to apply schema")?;
        Ok(())
    }

    async fn exists(&self, query: &'static str, id: Uuid) -> Result<bool> {
        let found: bool = sqlx::query_scalar(query)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to check reference")?;
        Ok(found)
    }
}

pub(crate) fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let status: String = row.get("status");
    Ok(Account {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        middle_name: row.get("middle_name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        status: status.parse().map_err(anyhow::Error::msg)?,
    })
}

fn role_from_row(row: &PgRow) -> Role {
    Role {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
    }
}

fn permission_from_row(row: &PgRow) -> Permission {
    Permission {
        id: row.get("id"),
        name: row.get("name"),
        resource: row.get("resource"),
        action: row.get("action"),
        description: row.get("description"),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_account(
        &self,
        account: NewAccount,
        default_role: Option<&str>,
    ) -> Result<Insert<Account>> {
        // Account row and its default grant commit together.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin register transaction")?;

        let query = format!(
            "INSERT INTO accounts (first_name, last_name, middle_name, email, password_hash) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&account.first_name)
            .bind(&account.last_name)
            .bind(&account.middle_name)
            .bind(&account.email)
            .bind(&account.password_hash)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", &query))
            .await;

        let created = match row {
            Ok(row) => account_from_row(&row)?,
            Err(err) => {
                if is_unique_violation(&err) {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!("Failed to roll back register transaction: {rollback_err}");
                    }
                    return Ok(Insert::Conflict);
                }
                return Err(err).context("failed to insert account");
            }
        };

        if let Some(role) = default_role {
            let query = r"
                INSERT INTO account_roles (account_id, role_id)
                SELECT $1, id FROM roles WHERE name = $2
                ON CONFLICT (account_id, role_id) DO NOTHING
            ";
            sqlx::query(query)
                .bind(created.id)
                .bind(role)
                .execute(&mut *tx)
                .instrument(db_span("INSERT", query))
                .await
                .context("failed to grant default role")?;
        }

        tx.commit().await.context("commit register transaction")?;

        Ok(Insert::Created(created))
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup account by id")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup account by email")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn update_account(&self, id: Uuid, changes: AccountChanges) -> Result<Update<Account>> {
        let query = format!(
            "UPDATE accounts SET \
                first_name = COALESCE($2, first_name), \
                last_name = COALESCE($3, last_name), \
                middle_name = COALESCE($4, middle_name), \
                email = COALESCE($5, email), \
                password_hash = COALESCE($6, password_hash) \
             WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(changes.first_name)
            .bind(changes.last_name)
            .bind(changes.middle_name)
            .bind(changes.email)
            .bind(changes.password_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await;

        match row {
            Ok(Some(row)) => Ok(Update::Updated(account_from_row(&row)?)),
            Ok(None) => Ok(Update::NotFound),
            Err(err) if is_unique_violation(&err) => Ok(Update::Conflict),
            Err(err) => Err(err).context("failed to update account"),
        }
    }

    async fn set_account_status(&self, id: Uuid, status: AccountStatus) -> Result<bool> {
        let query = "UPDATE accounts SET status = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update account status")?;
        Ok(result.rows_affected() == 1)
    }

    async fn accounts_by_status(&self, status: AccountStatus) -> Result<Vec<Account>> {
        let query =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE status = $1 ORDER BY email");
        let rows = sqlx::query(&query)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list accounts")?;
        rows.iter().map(account_from_row).collect()
    }

    async fn insert_role(&self, role: NewRole) -> Result<Insert<Role>> {
        let query =
            "INSERT INTO roles (name, description) VALUES ($1, $2) RETURNING id, name, description";
        let row = sqlx::query(query)
            .bind(&role.name)
            .bind(&role.description)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match row {
            Ok(row) => Ok(Insert::Created(role_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(Insert::Conflict),
            Err(err) => Err(err).context("failed to insert role"),
        }
    }

    async fn role_by_id(&self, id: Uuid) -> Result<Option<Role>> {
        let query = "SELECT id, name, description FROM roles WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup role by id")?;
        Ok(row.as_ref().map(role_from_row))
    }

    async fn role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let query = "SELECT id, name, description FROM roles WHERE name = $1";
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup role by name")?;
        Ok(row.as_ref().map(role_from_row))
    }

    async fn roles(&self) -> Result<Vec<Role>> {
        let query = "SELECT id, name, description FROM roles ORDER BY name";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list roles")?;
        Ok(rows.iter().map(role_from_row).collect())
    }

    async fn set_role_description(
        &self,
        id: Uuid,
        description: Option<String>,
    ) -> Result<Option<Role>> {
        let query =
            "UPDATE roles SET description = $2 WHERE id = $1 RETURNING id, name, description";
        let row = sqlx::query(query)
            .bind(id)
            .bind(description)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update role")?;
        Ok(row.as_ref().map(role_from_row))
    }

    async fn insert_permission(&self, permission: NewPermission) -> Result<Insert<Permission>> {
        let query = r"
            INSERT INTO permissions (name, resource, action, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, resource, action, description
        ";
        let row = sqlx::query(query)
            .bind(&permission.name)
            .bind(&permission.resource)
            .bind(&permission.action)
            .bind(&permission.description)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match row {
            Ok(row) => Ok(Insert::Created(permission_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(Insert::Conflict),
            Err(err) => Err(err).context("failed to insert permission"),
        }
    }

    async fn permission_by_id(&self, id: Uuid) -> Result<Option<Permission>> {
        let query = "SELECT id, name, resource, action, description FROM permissions WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup permission by id")?;
        Ok(row.as_ref().map(permission_from_row))
    }

    async fn permission_by_name(&self, name: &str) -> Result<Option<Permission>> {
        let query =
            "SELECT id, name, resource, action, description FROM permissions WHERE name = $1";
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup permission by name")?;
        Ok(row.as_ref().map(permission_from_row))
    }

    async fn permissions(&self) -> Result<Vec<Permission>> {
        let query = "SELECT id, name, resource, action, description FROM permissions ORDER BY name";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list permissions")?;
        Ok(rows.iter().map(permission_from_row).collect())
    }

    async fn set_permission_description(
        &self,
        id: Uuid,
        description: Option<String>,
    ) -> Result<Option<Permission>> {
        let query = r"
            UPDATE permissions SET description = $2 WHERE id = $1
            RETURNING id, name, resource, action, description
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(description)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update permission")?;
        Ok(row.as_ref().map(permission_from_row))
    }

    async fn insert_account_role(
        &self,
        account_id: Uuid,
        role_id: Uuid,
    ) -> Result<Grant<AccountRole>> {
        // Referenced rows are never hard-deleted, so checking first is stable.
        if !self
            .exists("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = $1)", account_id)
            .await?
        {
            return Ok(Grant::MissingReference(Reference::Account));
        }
        if !self
            .exists("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)", role_id)
            .await?
        {
            return Ok(Grant::MissingReference(Reference::Role));
        }

        let query = r"
            INSERT INTO account_roles (account_id, role_id) VALUES ($1, $2)
            ON CONFLICT (account_id, role_id) DO NOTHING
            RETURNING id
        ";
        let id: Option<Uuid> = sqlx::query_scalar(query)
            .bind(account_id)
            .bind(role_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert account role")?;

        Ok(id.map_or(Grant::AlreadyGranted, |id| {
            Grant::Granted(AccountRole {
                id,
                account_id,
                role_id,
            })
        }))
    }

    async fn delete_account_role(&self, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM account_roles WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete account role")?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<Grant<RolePermission>> {
        if !self
            .exists("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)", role_id)
            .await?
        {
            return Ok(Grant::MissingReference(Reference::Role));
        }
        if !self
            .exists(
                "SELECT EXISTS(SELECT 1 FROM permissions WHERE id = $1)",
                permission_id,
            )
            .await?
        {
            return Ok(Grant::MissingReference(Reference::Permission));
        }

        let query = r"
            INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            RETURNING id
        ";
        let id: Option<Uuid> = sqlx::query_scalar(query)
            .bind(role_id)
            .bind(permission_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert role permission")?;

        Ok(id.map_or(Grant::AlreadyGranted, |id| {
            Grant::Granted(RolePermission {
                id,
                role_id,
                permission_id,
            })
        }))
    }

    async fn delete_role_permission(&self, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM role_permissions WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete role permission")?;
        Ok(result.rows_affected() == 1)
    }

    async fn roles_of(&self, account_id: Uuid) -> Result<Vec<Role>> {
        let query = r"
            SELECT r.id, r.name, r.description
            FROM roles r
            JOIN account_roles ar ON ar.role_id = r.id
            WHERE ar.account_id = $1
            ORDER BY r.name
        ";
        let rows = sqlx::query(query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load account roles")?;
        Ok(rows.iter().map(role_from_row).collect())
    }

    async fn permissions_of(&self, account_id: Uuid) -> Result<Vec<Permission>> {
        let query = r"
            SELECT DISTINCT p.id, p.name, p.resource, p.action, p.description
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            JOIN account_roles ar ON ar.role_id = rp.role_id
            WHERE ar.account_id = $1
            ORDER BY p.name
        ";
        let rows = sqlx::query(query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load account permissions")?;
        Ok(rows.iter().map(permission_from_row).collect())
    }

    async fn has_permission(&self, account_id: Uuid, resource: &str, action: &str) -> Result<bool> {
        let query = r"
            SELECT EXISTS(
                SELECT 1
                FROM permissions p
                JOIN role_permissions rp ON rp.permission_id = p.id
                JOIN account_roles ar ON ar.role_id = rp.role_id
                WHERE ar.account_id = $1 AND p.resource = $2 AND p.action = $3
            )
        ";
        let found: bool = sqlx::query_scalar(query)
            .bind(account_id)
            .bind(resource)
            .bind(action)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to check permission")?;
        Ok(found)
    }

    async fn has_role(&self, account_id: Uuid, role_name: &str) -> Result<bool> {
        let query = r"
            SELECT EXISTS(
                SELECT 1
                FROM roles r
                JOIN account_roles ar ON ar.role_id = r.id
                WHERE ar.account_id = $1 AND r.name = $2
            )
        ";
        let found: bool = sqlx::query_scalar(query)
            .bind(account_id)
            .bind(role_name)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to check role")?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    async fn test_store() -> Option<PgStore> {
        let Ok(dsn) = std::env::var("CUSTODIAN_TEST_DSN") else {
            eprintln!("Skipping integration test: CUSTODIAN_TEST_DSN not set");
            return None;
        };
        let store = match PgStore::connect(&dsn, 2).await {
            Ok(store) => store,
            Err(err) => {
                eprintln!("Skipping integration test: {err}");
                return None;
            }
        };
        if let Err(err) = store.ensure_schema().await {
            eprintln!("Skipping integration test: {err}");
            return None;
        }
        Some(store)
    }

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            first_name: "Bob".to_string(),
            last_name: "Jones".to_string(),
            middle_name: None,
            email: email.to_string(),
            password_hash: "digest".to_string(),
        }
    }

    #[test]
    fn unique_violation_ignores_other_errors() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }

    #[tokio::test]
    async fn register_grants_role_and_rejects_duplicate_email() -> Result<()> {
        let Some(store) = test_store().await else {
            return Ok(());
        };
        let suffix = Uuid::new_v4().simple().to_string();
        let role_name = format!("role-{suffix}");
        let email = format!("{suffix}@example.com");

        let Insert::Created(role) = store
            .insert_role(NewRole {
                name: role_name.clone(),
                description: None,
            })
            .await?
        else {
            bail!("role already existed");
        };

        let Insert::Created(account) = store
            .insert_account(new_account(&email), Some(&role_name))
            .await?
        else {
            bail!("account already existed");
        };
        assert_eq!(account.status, AccountStatus::Active);
        assert!(store.has_role(account.id, &role_name).await?);
        assert_eq!(store.roles_of(account.id).await?, vec![role]);

        let again = store.insert_account(new_account(&email), None).await?;
        assert_eq!(again, Insert::Conflict);
        Ok(())
    }

    #[tokio::test]
    async fn permission_grants_resolve_through_roles() -> Result<()> {
        let Some(store) = test_store().await else {
            return Ok(());
        };
        let suffix = Uuid::new_v4().simple().to_string();

        let Insert::Created(account) = store
            .insert_account(new_account(&format!("{suffix}@example.com")), None)
            .await?
        else {
            bail!("account already existed");
        };
        let Insert::Created(role) = store
            .insert_role(NewRole {
                name: format!("role-{suffix}"),
                description: None,
            })
            .await?
        else {
            bail!("role already existed");
        };
        let Insert::Created(permission) = store
            .insert_permission(NewPermission {
                name: format!("reports-{suffix}:read"),
                resource: format!("reports-{suffix}"),
                action: "read".to_string(),
                description: None,
            })
            .await?
        else {
            bail!("permission already existed");
        };

        assert!(matches!(
            store.insert_role_permission(role.id, permission.id).await?,
            Grant::Granted(_)
        ));
        assert_eq!(
            store.insert_role_permission(role.id, permission.id).await?,
            Grant::AlreadyGranted
        );
        assert!(
            !store
                .has_permission(account.id, &permission.resource, "read")
                .await?
        );

        let Grant::Granted(grant) = store.insert_account_role(account.id, role.id).await? else {
            bail!("grant was not created");
        };
        assert!(
            store
                .has_permission(account.id, &permission.resource, "read")
                .await?
        );
        assert_eq!(store.permissions_of(account.id).await?, vec![permission]);

        assert!(store.delete_account_role(grant.id).await?);
        assert!(store.permissions_of(account.id).await?.is_empty());
        Ok(())
    }
}
