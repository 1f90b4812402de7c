use crate::api::{
    error::ErrorBody,
    handlers::{admin, auth, health, orders, products, users},
};
use crate::auth::Identity;
use crate::catalog::{Order, OrderStatus, Product};
use crate::rbac::models::{AccountRole, AccountStatus, Permission, Role, RolePermission};
use utoipa::openapi::{Contact, Info, InfoBuilder, License};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::register,
        auth::login,
        auth::refresh,
        auth::logout,
        users::me,
        users::update_me,
        users::delete_me,
        users::my_access,
        users::user_by_id,
        admin::create_role,
        admin::list_roles,
        admin::get_role,
        admin::update_role,
        admin::create_permission,
        admin::list_permissions,
        admin::get_permission,
        admin::update_permission,
        admin::grant_role,
        admin::revoke_role,
        admin::grant_permission,
        admin::revoke_permission,
        admin::list_users,
        admin::create_user,
        admin::edit_user,
        admin::delete_user,
        admin::restore_user,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        orders::list_orders,
        orders::my_orders,
        orders::get_order,
        orders::create_order,
        orders::update_order,
        orders::delete_order,
    ),
    components(schemas(
        ErrorBody,
        Identity,
        AccountStatus,
        Role,
        Permission,
        AccountRole,
        RolePermission,
        health::Health,
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::LoginResponse,
        auth::MessageResponse,
        users::UpdateAccountRequest,
        users::AccessResponse,
        admin::CreateRoleRequest,
        admin::CreatePermissionRequest,
        admin::UpdateDescriptionRequest,
        admin::GrantRoleRequest,
        admin::GrantPermissionRequest,
        admin::AccountWithRoles,
        admin::CreateAccountRequest,
        admin::EditAccountRequest,
        Product,
        Order,
        OrderStatus,
        products::ProductRequest,
        orders::CreateOrderRequest,
        orders::UpdateOrderRequest,
    )),
    tags(
        (name = "health", description = "Liveness and build information"),
        (name = "auth", description = "Registration and cookie sessions"),
        (name = "users", description = "Own profile and account lookup"),
        (name = "admin", description = "Accounts, roles, permissions and grants"),
        (name = "catalog", description = "Products and orders behind permission gates"),
    )
)]
struct ApiDoc;

/// The `OpenAPI` document for every route the server exposes.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info = cargo_info();
    doc
}

fn cargo_info() -> Info {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(non_empty(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = first_author(env!("CARGO_PKG_AUTHORS")).map(|(name, email)| {
        let mut contact = Contact::new();
        contact.name = name.map(str::to_string);
        contact.email = email.map(str::to_string);
        contact
    });
    info.license = non_empty(env!("CARGO_PKG_LICENSE")).map(|spdx| {
        let mut license = License::new(spdx);
        license.identifier = Some(spdx.to_string());
        license
    });
    info
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Split the first Cargo author (`;` separated) into name and `<email>`.
fn first_author(authors: &str) -> Option<(Option<&str>, Option<&str>)> {
    let primary = non_empty(authors.split(';').next()?)?;
    let parsed = match primary.split_once('<') {
        Some((name, rest)) => (non_empty(name), non_empty(rest.trim_end_matches('>'))),
        None => (Some(primary), None),
    };
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_comes_from_cargo_metadata() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            doc.info.license.map(|license| license.name),
            Some(env!("CARGO_PKG_LICENSE").to_string())
        );
    }

    #[test]
    fn every_route_is_documented() {
        let doc = openapi();
        for path in [
            "/health",
            "/v1/auth/register",
            "/v1/auth/login",
            "/v1/auth/refresh",
            "/v1/auth/logout",
            "/v1/users/me",
            "/v1/users/me/access",
            "/v1/users/{id}",
            "/v1/admin/roles",
            "/v1/admin/roles/{id}",
            "/v1/admin/permissions",
            "/v1/admin/permissions/{id}",
            "/v1/admin/account-roles",
            "/v1/admin/account-roles/{id}",
            "/v1/admin/role-permissions",
            "/v1/admin/role-permissions/{id}",
            "/v1/admin/users",
            "/v1/admin/users/{id}",
            "/v1/admin/users/{id}/restore",
            "/v1/products",
            "/v1/products/{id}",
            "/v1/orders",
            "/v1/orders/mine",
            "/v1/orders/{id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }

    #[test]
    fn author_parsing() {
        assert_eq!(
            first_author("Team Custodian <team@custodian.dev>"),
            Some((Some("Team Custodian"), Some("team@custodian.dev")))
        );
        assert_eq!(first_author("Solo; Other"), Some((Some("Solo"), None)));
        assert_eq!(first_author("  "), None);
        assert_eq!(first_author("<only@mail.dev>"), Some((None, Some("only@mail.dev"))));
    }
}
