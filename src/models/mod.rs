pub mod session;
pub mod stop;
pub mod trip;
pub mod user;

use crate::error::AppError;

pub const MAX_NAME_LEN: usize = 255;

/// Trims a user supplied name and rejects it when blank or too long.
pub fn normalize_name(field: &str, raw: Option<&str>) -> Result<String, AppError> {
    let name = raw.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::validation(format!(
            "{field} must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}
