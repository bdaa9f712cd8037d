//! Input rules shared by the auth and user services.
//!
//! Each check returns the message shown to the client on failure.

pub const MIN_PASSWORD_LEN: usize = 5;
pub const MIN_FULL_NAME_LEN: usize = 3;
pub const MAX_FULL_NAME_LEN: usize = 100;

/// Trim and lower-case an email so lookups are case-insensitive
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
                && domain
                    .split_once('.')
                    .map(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
                    .unwrap_or(false)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err("Invalid email format".to_string())
    }
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    Ok(())
}

pub fn validate_full_name(full_name: &str) -> Result<(), String> {
    let len = full_name.trim().chars().count();
    if len < MIN_FULL_NAME_LEN {
        return Err(format!(
            "Full name must be at least {} characters",
            MIN_FULL_NAME_LEN
        ));
    }
    if len > MAX_FULL_NAME_LEN {
        return Err(format!(
            "Full name must be at most {} characters",
            MAX_FULL_NAME_LEN
        ));
    }
    Ok(())
}

pub fn validate_avatar_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(rest) if !rest.is_empty() && !url.chars().any(char::is_whitespace) => Ok(()),
        _ => Err("Invalid avatar URL".to_string()),
    }
}
