//! User lookup by email or id.

use directory::{DirectoryApi, DirectoryError, User};

use crate::error::LifecycleError;

/// Find a user by a caller-supplied reference: an email address (contains
/// `@`) or a directory id. Returns `None` when no such user exists.
///
/// # Errors
/// Returns an error for any directory failure other than a missing user.
pub async fn find_user(
    directory: &dyn DirectoryApi,
    user_ref: &str,
) -> Result<Option<User>, LifecycleError> {
    if user_ref.contains('@') {
        Ok(directory.get_user_by_email(user_ref).await?)
    } else {
        match directory.get_user_by_id(user_ref).await {
            Ok(user) => Ok(Some(user)),
            Err(DirectoryError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
