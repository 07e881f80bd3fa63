//! Local input checks run before any request leaves the client.

use crate::error::{AuthError, Result};
use crate::types::{LoginRequest, RegisterRequest};

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(AuthError::Validation("email must contain '@'".to_string()));
    };

    let domain_ok = domain
        .split_once('.')
        .map(|(host, tld)| !host.is_empty() && !tld.is_empty())
        .unwrap_or(false);

    if local.is_empty() || !domain_ok || domain.contains('@') || email.contains(char::is_whitespace)
    {
        return Err(AuthError::Validation(format!(
            "'{email}' is not a valid email address"
        )));
    }
    Ok(())
}

/// At least eight characters with one letter and one digit.
pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if !password.chars().any(char::is_alphabetic) || !password.chars().any(|c| c.is_ascii_digit())
    {
        return Err(AuthError::Validation(
            "password must contain a letter and a digit".to_string(),
        ));
    }
    Ok(())
}

pub fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AuthError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Login only checks presence: existing accounts may predate the password rules.
pub fn validate_login(request: &LoginRequest) -> Result<()> {
    validate_email(&request.email)?;
    if request.password.is_empty() {
        return Err(AuthError::Validation("password must not be empty".to_string()));
    }
    Ok(())
}

pub fn validate_registration(request: &RegisterRequest) -> Result<()> {
    require_non_empty("name", &request.name)?;
    validate_email(&request.email)?;
    validate_password(&request.password)
}
