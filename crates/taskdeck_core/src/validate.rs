//! crates/taskdeck_core/src/validate.rs
//!
//! Local input validation. These checks run before any network call and are
//! the only source of [`ValidationError`]; the ports never produce one.

pub const TITLE_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;
pub const PASSWORD_MIN_CHARS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Title is required")]
    EmptyTitle,
    #[error("Title must be {TITLE_MAX_CHARS} characters or less")]
    TitleTooLong,
    #[error("Description must be {DESCRIPTION_MAX_CHARS} characters or less")]
    DescriptionTooLong,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Password must be at least {PASSWORD_MIN_CHARS} characters")]
    PasswordTooShort,
    #[error("Passwords do not match")]
    PasswordMismatch,
}

/// Checks the client-settable task fields against the column limits.
pub fn check_task_fields(title: &str, description: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(ValidationError::TitleTooLong);
    }
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(ValidationError::DescriptionTooLong);
    }
    Ok(())
}

/// Checks a new password and its confirmation field.
pub fn check_new_password(password: &str, confirmation: &str) -> Result<(), ValidationError> {
    if password.is_empty() || confirmation.is_empty() {
        return Err(ValidationError::MissingField("Password"));
    }
    if password != confirmation {
        return Err(ValidationError::PasswordMismatch);
    }
    if password.chars().count() < PASSWORD_MIN_CHARS {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}

/// Checks that every signup field was filled in.
pub fn check_signup_fields(email: &str, password: &str, username: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() {
        return Err(ValidationError::MissingField("Email"));
    }
    if password.is_empty() {
        return Err(ValidationError::MissingField("Password"));
    }
    if username.trim().is_empty() {
        return Err(ValidationError::MissingField("Username"));
    }
    Ok(())
}
