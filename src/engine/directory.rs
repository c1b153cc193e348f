use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::credentials::CredentialService;
use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::policy::may_manage_categories;
use super::{Engine, EngineError};

fn normalize_email(email: &str) -> Result<String, EngineError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(EngineError::InvalidRequest("a valid email is required"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    Ok(email)
}

fn required_text(
    text: &str,
    max: usize,
    missing: &'static str,
    too_long: &'static str,
) -> Result<String, EngineError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(EngineError::InvalidRequest(missing));
    }
    if text.len() > max {
        return Err(EngineError::LimitExceeded(too_long));
    }
    Ok(text.to_string())
}

pub(super) fn optional_text(text: Option<&str>, too_long: &'static str) -> Result<Option<String>, EngineError> {
    match text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) if t.len() > MAX_TEXT_LEN => Err(EngineError::LimitExceeded(too_long)),
        other => Ok(other.map(str::to_string)),
    }
}

fn check_password(password: &str) -> Result<(), EngineError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(EngineError::InvalidRequest("password must be at least 6 characters"));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(EngineError::LimitExceeded("password too long"));
    }
    Ok(())
}

impl Engine {
    // Argon2 is deliberately slow; keep it off the async workers.
    async fn hash_password(&self, password: &str) -> Result<String, EngineError> {
        let credentials: Arc<dyn CredentialService> = self.credentials.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || credentials.hash_password(&password))
            .await
            .map_err(|e| EngineError::StorageError(e.to_string()))?
            .map_err(EngineError::from)
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, EngineError> {
        let credentials: Arc<dyn CredentialService> = self.credentials.clone();
        let (password, hash) = (password.to_string(), hash.to_string());
        tokio::task::spawn_blocking(move || credentials.verify_password(&password, &hash))
            .await
            .map_err(|e| EngineError::StorageError(e.to_string()))?
            .map_err(EngineError::from)
    }

    // ── Accounts ─────────────────────────────────────────────

    /// Self-service sign-up. Admin accounts come only from the seed step.
    pub async fn register_user(
        &self,
        email: &str,
        name: &str,
        role: Role,
        password: &str,
    ) -> Result<Ulid, EngineError> {
        if role == Role::Admin {
            return Err(EngineError::InvalidRequest("account type must be INDIVIDUAL or COMPANY"));
        }
        self.insert_user(email, name, role, password).await
    }

    pub(crate) async fn insert_user(
        &self,
        email: &str,
        name: &str,
        role: Role,
        password: &str,
    ) -> Result<Ulid, EngineError> {
        let email = normalize_email(email)?;
        let name = required_text(name, MAX_NAME_LEN, "name is required", "name too long")?;
        check_password(password)?;
        let password_hash = self.hash_password(password).await?;

        let _gate = self.directory_gate.write().await;
        if self.store.user_id_by_email(&email).is_some() {
            return Err(EngineError::AlreadyExists(email));
        }
        let user = UserRecord {
            id: Ulid::new(),
            email,
            name,
            role,
            password_hash,
            created_at: now_ms(),
        };
        let id = user.id;
        self.persist_directory(&Event::UserRegistered { user }).await?;
        info!("registered user {id} as {}", role.as_str());
        Ok(id)
    }

    /// Returns a fresh access token and the account it belongs to.
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, UserInfo), EngineError> {
        let email = email.trim().to_lowercase();
        let user = self
            .store
            .user_id_by_email(&email)
            .and_then(|id| self.store.user(&id))
            .ok_or(EngineError::Unauthorized)?;
        if !self.verify_password(password, &user.password_hash).await? {
            return Err(EngineError::Unauthorized);
        }
        let token = self.credentials.issue_token(user.id, user.role)?;
        Ok((token, UserInfo::from(&user)))
    }

    /// Identity behind a token. The account must still exist; its current
    /// role wins over the one baked into the token.
    pub fn resolve_token(&self, token: &str) -> Result<(Ulid, Role), EngineError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(EngineError::Unauthorized);
        }
        let identity = self.credentials.parse_token(token.trim())?;
        let user = self
            .store
            .user(&identity.user_id)
            .ok_or(EngineError::Unauthorized)?;
        Ok((user.id, user.role))
    }

    pub fn get_user(&self, id: Ulid) -> Result<UserInfo, EngineError> {
        self.store
            .user(&id)
            .map(|u| UserInfo::from(&u))
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn update_profile(&self, id: Ulid, email: &str, name: &str) -> Result<(), EngineError> {
        let email = normalize_email(email)?;
        let name = required_text(name, MAX_NAME_LEN, "name is required", "name too long")?;

        let _gate = self.directory_gate.write().await;
        if !self.store.contains_user(&id) {
            return Err(EngineError::NotFound(id));
        }
        if self.store.user_id_by_email(&email).is_some_and(|owner| owner != id) {
            return Err(EngineError::AlreadyExists(email));
        }
        self.persist_directory(&Event::ProfileUpdated { id, email, name })
            .await
    }

    pub async fn change_password(
        &self,
        id: Ulid,
        current: &str,
        new_password: &str,
    ) -> Result<(), EngineError> {
        check_password(new_password)?;
        let user = self.store.user(&id).ok_or(EngineError::NotFound(id))?;
        if !self.verify_password(current, &user.password_hash).await? {
            return Err(EngineError::Unauthorized);
        }
        let password_hash = self.hash_password(new_password).await?;

        let _gate = self.directory_gate.write().await;
        if !self.store.contains_user(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_directory(&Event::PasswordChanged { id, password_hash })
            .await
    }

    // ── Categories ───────────────────────────────────────────

    fn require_category_admin(&self, actor: Ulid) -> Result<(), EngineError> {
        match self.store.user(&actor) {
            Some(user) if may_manage_categories(user.role) => Ok(()),
            _ => Err(EngineError::Forbidden),
        }
    }

    pub async fn create_category(&self, actor: Ulid, name: &str) -> Result<Ulid, EngineError> {
        self.require_category_admin(actor)?;
        let name = required_text(name, MAX_NAME_LEN, "name is required", "name too long")?;

        let _gate = self.directory_gate.write().await;
        let category = Category {
            id: Ulid::new(),
            name,
            created_at: now_ms(),
        };
        let id = category.id;
        self.persist_directory(&Event::CategoryCreated { category }).await?;
        Ok(id)
    }

    pub async fn rename_category(&self, actor: Ulid, id: Ulid, name: &str) -> Result<(), EngineError> {
        self.require_category_admin(actor)?;
        let name = required_text(name, MAX_NAME_LEN, "name is required", "name too long")?;

        let _gate = self.directory_gate.write().await;
        if self.store.category(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        self.persist_directory(&Event::CategoryRenamed { id, name }).await
    }

    pub async fn delete_category(&self, actor: Ulid, id: Ulid) -> Result<(), EngineError> {
        self.require_category_admin(actor)?;

        let _gate = self.directory_gate.write().await;
        if self.store.category(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        if self.store.category_in_use(&id) {
            return Err(EngineError::InvalidRequest("category still has resources"));
        }
        self.persist_directory(&Event::CategoryDeleted { id }).await
    }

    // ── Resources ────────────────────────────────────────────

    pub async fn create_resource(
        &self,
        owner: Ulid,
        category: Ulid,
        title: &str,
        description: Option<&str>,
        location: Option<&str>,
        price_per_hour: i64,
    ) -> Result<Ulid, EngineError> {
        if category.is_nil() {
            return Err(EngineError::InvalidRequest("category is required"));
        }
        let title = required_text(title, MAX_TITLE_LEN, "title is required", "title too long")?;
        if price_per_hour < 0 {
            return Err(EngineError::InvalidRequest("price per hour must be >= 0"));
        }
        let description = optional_text(description, "description too long")?;
        let location = optional_text(location, "location too long")?;

        let _gate = self.directory_gate.write().await;
        if !self.store.contains_user(&owner) {
            return Err(EngineError::NotFound(owner));
        }
        if self.store.category(&category).is_none() {
            return Err(EngineError::NotFound(category));
        }
        let resource = ResourceInfo {
            id: Ulid::new(),
            owner_id: owner,
            category_id: category,
            title,
            description,
            location,
            price_per_hour,
            is_active: true,
            created_at: now_ms(),
        };
        let id = resource.id;
        self.persist_directory(&Event::ResourceCreated { resource }).await?;
        info!("resource {id} created by {owner}");
        Ok(id)
    }
}
