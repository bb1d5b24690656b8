use super::enums::UserRole;
use crate::error::{AppError, Result};

pub const LABORATORY: &str = "laboratory";
pub const PHARMACY: &str = "pharmacy";
pub const BILLING: &str = "billing";
pub const DEFAULT_CLINICAL: &str = "general";

const MAX_LEN: usize = 64;

/// Canonical department key: trimmed, lowercase, inner whitespace as `-`.
pub fn normalize_department(raw: &str) -> Result<String> {
    let key = raw
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();

    if key.is_empty() {
        return Err(AppError::BadRequest("department must not be empty".to_string()));
    }
    if key.len() > MAX_LEN {
        return Err(AppError::BadRequest(format!(
            "department must be at most {} characters",
            MAX_LEN
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::BadRequest(format!(
            "department contains invalid characters: {}",
            raw
        )));
    }

    Ok(key)
}

/// Roles that staff a department and therefore follow its queue.
pub fn audience_roles(department: &str) -> &'static [UserRole] {
    match department {
        LABORATORY => &[UserRole::LabTechnician],
        PHARMACY => &[UserRole::Pharmacist],
        BILLING => &[UserRole::Billing],
        _ => &[UserRole::Doctor, UserRole::Nurse],
    }
}

/// Service departments are reached through the pipeline, never chosen at check-in.
pub fn is_service_department(department: &str) -> bool {
    matches!(department, LABORATORY | PHARMACY | BILLING)
}
