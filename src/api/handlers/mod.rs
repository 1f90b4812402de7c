pub mod admin;
pub mod auth;
pub mod health;
pub mod orders;
pub mod products;
pub mod users;

// common functions for the handlers
use regex::Regex;

use crate::api::error::ApiError;
use crate::auth::Identity;
use crate::rbac::models::{AccountChanges, AccountStatus};

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 25;
const EMAIL_MAX: usize = 100;
const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 100;

#[must_use]
pub fn valid_email(email: &str) -> bool {
    email.len() <= EMAIL_MAX
        && Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}

/// Trim and lower-case so uniqueness is case-insensitive.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Letters only, first upper-case and the rest lower-case, 2 to 25 characters.
#[must_use]
pub fn valid_name(name: &str) -> bool {
    let count = name.chars().count();
    if !(NAME_MIN..=NAME_MAX).contains(&count) {
        return false;
    }
    let mut chars = name.chars();
    chars.next().is_some_and(char::is_uppercase)
        && chars.all(char::is_lowercase)
        && name.chars().all(char::is_alphabetic)
}

/// 8 to 100 characters with at least one ASCII letter and one digit.
#[must_use]
pub fn valid_password(password: &str) -> bool {
    let count = password.chars().count();
    (PASSWORD_MIN..=PASSWORD_MAX).contains(&count)
        && password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
}

pub(crate) fn require_name(field: &str, value: &str) -> Result<(), ApiError> {
    if valid_name(value) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "{field} must be {NAME_MIN}-{NAME_MAX} letters, starting with a capital"
        )))
    }
}

pub(crate) fn require_email(email: &str) -> Result<String, ApiError> {
    let email = normalize_email(email);
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(ApiError::Validation("Invalid email".to_string()))
    }
}

pub(crate) fn require_password(password: &str) -> Result<(), ApiError> {
    if valid_password(password) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "Password must be {PASSWORD_MIN}-{PASSWORD_MAX} characters with a letter and a digit"
        )))
    }
}

/// Empty optional names are treated as absent.
pub(crate) fn optional_name(field: &str, value: Option<String>) -> Result<Option<String>, ApiError> {
    match value {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => {
            require_name(field, &value)?;
            Ok(Some(value))
        }
    }
}

/// Deleted accounts keep their session until it expires but create nothing.
pub(crate) fn require_active(identity: &Identity) -> Result<(), ApiError> {
    match identity.status {
        AccountStatus::Active => Ok(()),
        AccountStatus::Deleted => Err(ApiError::Inactive),
    }
}

/// Validate the profile fields present in an update.
pub(crate) fn profile_changes(
    first_name: Option<String>,
    last_name: Option<String>,
    middle_name: Option<String>,
    email: Option<String>,
) -> Result<AccountChanges, ApiError> {
    let mut changes = AccountChanges::default();
    if let Some(first_name) = first_name {
        require_name("first_name", &first_name)?;
        changes.first_name = Some(first_name);
    }
    if let Some(last_name) = last_name {
        require_name("last_name", &last_name)?;
        changes.last_name = Some(last_name);
    }
    changes.middle_name = optional_name("middle_name", middle_name)?;
    if let Some(email) = email {
        changes.email = Some(require_email(&email)?);
    }
    Ok(changes)
}
