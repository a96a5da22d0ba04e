//! Input validation applied before any store access

use thiserror::Error;

/// Longest accepted function unit name
pub const MAX_UNIT_NAME_LEN: usize = 100;

/// Rejected caller input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("function unit name must not be empty")]
    EmptyName,

    #[error("function unit name is {len} characters, maximum is {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("function unit name {0:?} may only contain letters, digits, '_' and '-'")]
    InvalidNameCharacters(String),

    #[error("definition must not be empty")]
    EmptyDefinition,

    #[error("definition does not look like XML")]
    DefinitionNotXml,

    #[error("start user id must not be empty")]
    EmptyUserId,
}

/// Check a function unit name: non-empty, bounded, `[A-Za-z0-9_-]` only
pub fn validate_unit_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let len = name.chars().count();
    if len > MAX_UNIT_NAME_LEN {
        return Err(ValidationError::NameTooLong {
            len,
            max: MAX_UNIT_NAME_LEN,
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::InvalidNameCharacters(name.to_string()));
    }
    Ok(())
}

/// Check a raw workflow definition: non-empty and starting with `<`
pub fn validate_definition(raw: &str) -> Result<(), ValidationError> {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyDefinition);
    }
    if !trimmed.starts_with('<') {
        return Err(ValidationError::DefinitionNotXml);
    }
    Ok(())
}

pub fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    if user_id.trim().is_empty() {
        return Err(ValidationError::EmptyUserId);
    }
    Ok(())
}
