use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::Role;

/// Create the admin account unless a user with this email already exists.
/// Returns the id of the account created, if any.
pub async fn bootstrap_admin(
    engine: &Engine,
    email: &str,
    password: &str,
) -> Result<Option<Ulid>, EngineError> {
    let normalized = email.trim().to_lowercase();
    if engine.store().user_id_by_email(&normalized).is_some() {
        info!("admin seed skipped: {normalized} already registered");
        return Ok(None);
    }
    match engine
        .insert_user(&normalized, "Administrator", Role::Admin, password)
        .await
    {
        Ok(id) => {
            info!("seeded admin account {normalized}");
            Ok(Some(id))
        }
        // Lost a race with a concurrent registration of the same address.
        Err(EngineError::AlreadyExists(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
