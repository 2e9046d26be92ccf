//! Validation utilities

use crate::types::*;

/// Upload ceiling for statement files: 10 MiB
pub const MAX_STATEMENT_BYTES: usize = 10 * 1024 * 1024;

/// Maximum length of a reopen reason
pub const MAX_REASON_CHARS: usize = 1000;

/// Validate an uploaded statement file size against the ceiling
pub fn validate_statement_size(bytes: usize) -> ReconcileResult<()> {
    if bytes > MAX_STATEMENT_BYTES {
        Err(ReconcileError::FileTooLarge(bytes, MAX_STATEMENT_BYTES))
    } else {
        Ok(())
    }
}

/// Validate an ISO 4217 currency code (three ASCII letters)
pub fn validate_currency_code(currency: &str) -> ReconcileResult<()> {
    let trimmed = currency.trim();
    if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ReconcileError::Validation(format!(
            "Invalid currency code: {currency:?}"
        )));
    }
    Ok(())
}

/// Validate an adjustment or match description
pub fn validate_description(description: &str) -> ReconcileResult<()> {
    if description.trim().is_empty() {
        return Err(ReconcileError::Validation(
            "Description cannot be empty".to_string(),
        ));
    }
    if description.len() > 500 {
        return Err(ReconcileError::Validation(
            "Description cannot exceed 500 characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate a reopen reason: required, bounded length
pub fn validate_reopen_reason(reason: &str) -> ReconcileResult<()> {
    if reason.trim().is_empty() {
        return Err(ReconcileError::ReasonRequired);
    }
    if reason.chars().count() > MAX_REASON_CHARS {
        return Err(ReconcileError::ReasonTooLong(MAX_REASON_CHARS));
    }
    Ok(())
}
