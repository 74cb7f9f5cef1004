use sqlx::types::BigDecimal;
use std::fmt;

use crate::error::AppError;

pub const ORDER_NUMBER_MAX_LEN: usize = 64;

/// Decimal places of every stored amount (`NUMERIC(20, 2)`).
pub const AMOUNT_SCALE: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

pub type ValidationResult = Result<(), ValidationError>;

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

/// Order numbers are non-empty digit strings of bounded length.
pub fn validate_order_number(number: &str) -> ValidationResult {
    validate_required("order_number", number)?;

    if number.len() > ORDER_NUMBER_MAX_LEN {
        return Err(ValidationError::new(
            "order_number",
            format!("must be at most {} characters", ORDER_NUMBER_MAX_LEN),
        ));
    }

    if !number.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ValidationError::new("order_number", "must contain only digits"));
    }

    Ok(())
}

/// Order number plus a Luhn checksum, as required for withdrawals.
pub fn validate_luhn(number: &str) -> ValidationResult {
    validate_order_number(number)?;

    let sum: u32 = number
        .bytes()
        .rev()
        .map(|b| u32::from(b - b'0'))
        .enumerate()
        .map(|(i, digit)| {
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
        .sum();

    if sum % 10 != 0 {
        return Err(ValidationError::new("order_number", "failed Luhn checksum"));
    }

    Ok(())
}

/// Rounds an amount to the precision it is stored with, so checks on it
/// agree with what the database will hold.
pub fn round_amount(amount: &BigDecimal) -> BigDecimal {
    amount.round(AMOUNT_SCALE).with_scale(AMOUNT_SCALE)
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_non_negative_amount(amount: &BigDecimal) -> ValidationResult {
    if amount < &BigDecimal::from(0) {
        return Err(ValidationError::new("accrual", "can't be negative"));
    }

    Ok(())
}
