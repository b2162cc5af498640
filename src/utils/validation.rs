// Form validation helpers

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9\s\-()]+$").unwrap());

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(String),

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Invalid phone number")]
    InvalidPhone,

    #[error("Invalid card number")]
    InvalidCardNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email.trim())
}

/// 7 to 15 digits, optionally with a leading `+`, spaces, dashes and parentheses
pub fn is_valid_phone(phone: &str) -> bool {
    let phone = phone.trim();
    if !PHONE_PATTERN.is_match(phone) {
        return false;
    }

    let digits = phone.chars().filter(char::is_ascii_digit).count();
    (7..=15).contains(&digits)
}

/// Luhn checksum over 13-19 digits; spaces and dashes are ignored
pub fn is_valid_card_number(number: &str) -> bool {
    let cleaned: String = number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    if !(13..=19).contains(&cleaned.len()) || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    luhn_sum(&cleaned) % 10 == 0
}

fn luhn_sum(digits: &str) -> u32 {
    digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum()
}

/// Rate a password by length and character classes
///
/// Under 8 characters is always weak. Otherwise: lowercase, uppercase,
/// digits and symbols each count once; 4 classes is strong, 3 is medium.
pub fn password_strength(password: &str) -> PasswordStrength {
    if password.chars().count() < 8 {
        return PasswordStrength::Weak;
    }

    let classes = [
        password.chars().any(|c| c.is_lowercase()),
        password.chars().any(|c| c.is_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_alphanumeric()),
    ]
    .iter()
    .filter(|present| **present)
    .count();

    match classes {
        4 => PasswordStrength::Strong,
        3 => PasswordStrength::Medium,
        _ => PasswordStrength::Weak,
    }
}

pub fn validate_required(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required(field.to_string()));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    validate_required("Email", email)?;
    if !is_valid_email(email) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    validate_required("Phone", phone)?;
    if !is_valid_phone(phone) {
        return Err(ValidationError::InvalidPhone);
    }
    Ok(())
}

pub fn validate_card_number(number: &str) -> Result<(), ValidationError> {
    validate_required("Card number", number)?;
    if !is_valid_card_number(number) {
        return Err(ValidationError::InvalidCardNumber);
    }
    Ok(())
}
