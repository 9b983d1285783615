//! Input validation for account endpoints.
//!
//! Each check pushes a [`FieldError`] instead of returning early so a single
//! response lists every rejected field.

use super::error::{ApiError, FieldError};

const MAX_EMAIL_LEN: usize = 254;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_NAME_LEN: usize = 50;

/// Collects field errors for one request.
#[derive(Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and normalize an email address (trimmed, lower-cased).
    pub fn email(&mut self, field: &str, value: &str) -> String {
        let email = value.trim().to_lowercase();
        if let Err(message) = check_email(&email) {
            self.errors.push(FieldError::new(field, message));
        }
        email
    }

    pub fn password(&mut self, field: &str, value: &str) {
        if let Err(message) = check_password(value) {
            self.errors.push(FieldError::new(field, message));
        }
    }

    /// Validate a required name and return it trimmed.
    pub fn name(&mut self, field: &str, value: &str) -> String {
        let name = value.trim();
        if let Err(message) = check_name(name) {
            self.errors.push(FieldError::new(field, message));
        }
        name.to_string()
    }

    /// Require a non-empty value (tokens, current password).
    pub fn required(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.errors
                .push(FieldError::new(field, format!("{} is required", field)));
        }
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.errors))
        }
    }
}

fn check_email(email: &str) -> Result<(), &'static str> {
    if email.is_empty() {
        return Err("Email is required");
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err("Email is too long");
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Please provide a valid email address");
    };
    let domain_ok = !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..");
    if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
        return Err("Please provide a valid email address");
    }
    Ok(())
}

fn check_password(password: &str) -> Result<(), &'static str> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err("Password must be at least 8 characters long");
    }
    if len > MAX_PASSWORD_LEN {
        return Err("Password must not exceed 128 characters");
    }
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(
            "Password must contain at least one lowercase letter, one uppercase letter, and one number",
        );
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), &'static str> {
    let len = name.chars().count();
    if len == 0 {
        return Err("Name is required");
    }
    if len > MAX_NAME_LEN {
        return Err("Name must not exceed 50 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_alphabetic() || c == ' ' || c == '\'' || c == '-')
    {
        return Err("Name can only contain letters, spaces, hyphens, and apostrophes");
    }
    Ok(())
}
