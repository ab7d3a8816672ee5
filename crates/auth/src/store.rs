use std::path::{Path, PathBuf};

use anyhow::Context;
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng as SaltRng,
    },
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{OnceCell, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("User {0} already exists")]
    UserExists(String),
    #[error("User {0} not found")]
    UserNotFound(String),
    #[error("You cannot delete your own account")]
    CannotDeleteSelf,
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("Password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password_hash: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Default, Serialize, Deserialize)]
struct UsersFile {
    users: Vec<UserAccount>,
}

/// Flat file of user accounts.
pub struct UserStore {
    path: PathBuf,
    users: RwLock<Vec<UserAccount>>,
    params: Params,
    /// Verified against for unknown usernames so lookups cost the same either way.
    dummy_hash: OnceCell<String>,
}

pub const MIN_PASSWORD_LEN: usize = 8;

fn validate_username(username: &str) -> Result<(), AuthError> {
    if username.is_empty() || username.len() > 64 {
        return Err(AuthError::InvalidInput("Username must be 1 to 64 characters"));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
        return Err(AuthError::InvalidInput(
            "Username may only contain letters, digits, '-', '_' and '.'",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput("Password must be at least 8 characters"));
    }
    Ok(())
}

/// Random 16 character URL-safe password.
pub fn generate_password() -> anyhow::Result<String> {
    let mut bytes = [0u8; 12];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

async fn hash_password(params: Params, password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut SaltRng);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::Hash(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::Hash(e.to_string()))?
}

/// Hashes carried over from bcrypt based deployments.
fn is_bcrypt_hash(hash: &str) -> bool {
    ["$2a$", "$2b$", "$2y$"].iter().any(|prefix| hash.starts_with(prefix))
}

async fn verify_password(hash: String, password: String) -> bool {
    let result = tokio::task::spawn_blocking(move || {
        if is_bcrypt_hash(&hash) {
            return bcrypt::verify(password.as_bytes(), &hash).map_err(|e| e.to_string());
        }
        let parsed = PasswordHash::new(&hash).map_err(|e| e.to_string())?;
        Ok::<_, String>(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
    })
    .await;
    match result {
        Ok(Ok(valid)) => valid,
        Ok(Err(e)) => {
            tracing::error!("Stored password hash is invalid: {}", e);
            false
        }
        Err(e) => {
            tracing::error!("Password verification task failed: {}", e);
            false
        }
    }
}

impl UserStore {
    /// Load the store. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let users = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                serde_json::from_str::<UsersFile>(&contents)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
                    .users
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        tracing::debug!("Loaded {} users from {}", users.len(), path.display());
        Ok(Self {
            path,
            users: RwLock::new(users),
            params: Params::default(),
            dummy_hash: OnceCell::new(),
        })
    }

    /// Override the Argon2 cost parameters for new hashes.
    pub fn with_hash_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn path(&self) -> &Path { &self.path }

    async fn save(&self, users: &[UserAccount]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(&UsersFile { users: users.to_vec() })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    pub async fn list_users(&self) -> Vec<UserAccount> {
        let mut users = self.users.read().await.clone();
        users.sort_by_key(|u| u.username.to_ascii_lowercase());
        users
    }

    pub async fn get_user(&self, username: &str) -> Option<UserAccount> {
        self.users.read().await.iter().find(|u| u.username.eq_ignore_ascii_case(username)).cloned()
    }

    pub async fn is_empty(&self) -> bool { self.users.read().await.is_empty() }

    /// Unknown users and wrong passwords both yield `None`. A bcrypt hash is replaced with an
    /// Argon2id one once its password checks out.
    pub async fn authenticate(&self, username: &str, password: &str) -> Option<UserAccount> {
        let Some(user) = self.get_user(username).await else {
            if let Some(hash) = self.dummy_hash().await {
                verify_password(hash, password.to_string()).await;
            }
            return None;
        };
        if !verify_password(user.password_hash.clone(), password.to_string()).await {
            return None;
        }
        if is_bcrypt_hash(&user.password_hash) {
            return Some(self.upgrade_hash(user, password).await);
        }
        Some(user)
    }

    async fn dummy_hash(&self) -> Option<String> {
        let result = self
            .dummy_hash
            .get_or_try_init(|| async {
                match generate_password() {
                    Ok(password) => hash_password(self.params.clone(), password).await,
                    Err(e) => Err(AuthError::Internal(e)),
                }
            })
            .await;
        match result {
            Ok(hash) => Some(hash.clone()),
            Err(e) => {
                tracing::error!("Failed to create dummy password hash: {}", e);
                None
            }
        }
    }

    async fn upgrade_hash(&self, user: UserAccount, password: &str) -> UserAccount {
        let result = match hash_password(self.params.clone(), password.to_string()).await {
            Ok(password_hash) => {
                self.modify(&user.username, |u| u.password_hash = password_hash).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(upgraded) => {
                tracing::info!("Upgraded password hash for {}", upgraded.username);
                upgraded
            }
            Err(e) => {
                tracing::warn!("Failed to upgrade password hash for {}: {}", user.username, e);
                user
            }
        }
    }

    pub async fn add_user(
        &self,
        username: &str,
        email: Option<String>,
        password: &str,
        is_admin: bool,
    ) -> Result<UserAccount, AuthError> {
        validate_username(username)?;
        validate_password(password)?;
        if self.get_user(username).await.is_some() {
            return Err(AuthError::UserExists(username.to_string()));
        }
        let password_hash = hash_password(self.params.clone(), password.to_string()).await?;
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.username.eq_ignore_ascii_case(username)) {
            return Err(AuthError::UserExists(username.to_string()));
        }
        let user = UserAccount {
            username: username.to_string(),
            email: email.filter(|e| !e.is_empty()),
            password_hash,
            is_admin,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut updated = users.clone();
        updated.push(user.clone());
        self.save(&updated).await?;
        *users = updated;
        tracing::info!("Added user {} (admin: {})", username, is_admin);
        Ok(user)
    }

    async fn modify(
        &self,
        username: &str,
        f: impl FnOnce(&mut UserAccount),
    ) -> Result<UserAccount, AuthError> {
        let mut users = self.users.write().await;
        let mut updated = users.clone();
        let user = updated
            .iter_mut()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;
        f(user);
        let user = user.clone();
        self.save(&updated).await?;
        *users = updated;
        Ok(user)
    }

    pub async fn update_user(
        &self,
        username: &str,
        email: Option<String>,
        is_admin: bool,
    ) -> Result<UserAccount, AuthError> {
        let user = self
            .modify(username, |u| {
                u.email = email.filter(|e| !e.is_empty());
                u.is_admin = is_admin;
            })
            .await?;
        tracing::info!("Updated user {} (admin: {})", user.username, user.is_admin);
        Ok(user)
    }

    pub async fn set_password(&self, username: &str, password: &str) -> Result<(), AuthError> {
        validate_password(password)?;
        if self.get_user(username).await.is_none() {
            return Err(AuthError::UserNotFound(username.to_string()));
        }
        let password_hash = hash_password(self.params.clone(), password.to_string()).await?;
        self.modify(username, |u| u.password_hash = password_hash).await?;
        tracing::info!("Password set for {}", username);
        Ok(())
    }

    /// Replace the password after checking the current one.
    pub async fn change_password(
        &self,
        username: &str,
        current: &str,
        new: &str,
    ) -> Result<(), AuthError> {
        if self.authenticate(username, current).await.is_none() {
            return Err(AuthError::InvalidCredentials);
        }
        self.set_password(username, new).await
    }

    /// Delete an account. `acting_user` may not delete itself.
    pub async fn delete_user(
        &self,
        username: &str,
        acting_user: Option<&str>,
    ) -> Result<(), AuthError> {
        if acting_user.is_some_and(|a| a.eq_ignore_ascii_case(username)) {
            return Err(AuthError::CannotDeleteSelf);
        }
        let mut users = self.users.write().await;
        let mut updated = users.clone();
        let before = updated.len();
        updated.retain(|u| !u.username.eq_ignore_ascii_case(username));
        if updated.len() == before {
            return Err(AuthError::UserNotFound(username.to_string()));
        }
        self.save(&updated).await?;
        *users = updated;
        tracing::info!("Deleted user {}", username);
        Ok(())
    }

    /// Create the initial admin when the store is empty. Returns the generated password, if
    /// one had to be generated.
    pub async fn ensure_admin(
        &self,
        username: &str,
        password: Option<&str>,
    ) -> Result<Option<String>, AuthError> {
        if !self.is_empty().await {
            return Ok(None);
        }
        let generated = match password {
            Some(_) => None,
            None => Some(generate_password()?),
        };
        let password = password.or(generated.as_deref()).unwrap_or_default();
        self.add_user(username, None, password, true).await?;
        if let Some(generated) = &generated {
            tracing::warn!(
                "Created admin user '{}' with generated password: {} (change it after logging in)",
                username,
                generated
            );
        } else {
            tracing::info!("Created admin user '{}'", username);
        }
        Ok(generated)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn open_store(path: &Path) -> UserStore {
        UserStore::open(path)
            .await
            .unwrap()
            .with_hash_params(Params::new(1024, 1, 1, None).unwrap())
    }

    #[tokio::test]
    async fn test_add_and_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("users.json")).await;
        let email = Some("a@example.com".to_string());
        store.add_user("Alice", email, "correct horse", false).await.unwrap();

        assert!(store.authenticate("alice", "correct horse").await.is_some());
        assert!(store.authenticate("alice", "wrong password").await.is_none());
        assert!(store.authenticate("nobody", "correct horse").await.is_none());
        assert!(matches!(
            store.add_user("ALICE", None, "another pass", false).await,
            Err(AuthError::UserExists(_))
        ));
        assert!(matches!(
            store.add_user("bob", None, "short", false).await,
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            store.add_user("bad name", None, "long enough", false).await,
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_persisted_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/users.json");
        let store = open_store(&path).await;
        store.add_user("alice", None, "password one", true).await.unwrap();
        store.add_user("bob", Some("bob@example.com".into()), "password two", false).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = open_store(&path).await;
        assert_eq!(reopened.list_users().await, store.list_users().await);
        assert!(reopened.authenticate("bob", "password two").await.is_some());
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["users"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_change_password() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("users.json")).await;
        store.add_user("alice", None, "old password", false).await.unwrap();

        assert!(matches!(
            store.change_password("alice", "not it", "new password").await,
            Err(AuthError::InvalidCredentials)
        ));
        store.change_password("alice", "old password", "new password").await.unwrap();
        assert!(store.authenticate("alice", "old password").await.is_none());
        assert!(store.authenticate("alice", "new password").await.is_some());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("users.json")).await;
        store.add_user("admin", None, "admin password", true).await.unwrap();
        store.add_user("bob", None, "bob password", false).await.unwrap();

        let bob = store.update_user("bob", Some("bob@example.com".into()), true).await.unwrap();
        assert!(bob.is_admin);
        assert_eq!(bob.email.as_deref(), Some("bob@example.com"));

        assert!(matches!(
            store.delete_user("admin", Some("admin")).await,
            Err(AuthError::CannotDeleteSelf)
        ));
        store.delete_user("bob", Some("admin")).await.unwrap();
        assert!(store.get_user("bob").await.is_none());
        assert!(matches!(store.delete_user("bob", None).await, Err(AuthError::UserNotFound(_))));
        assert!(matches!(
            store.update_user("bob", None, false).await,
            Err(AuthError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_admin() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("users.json")).await;
        let generated = store.ensure_admin("admin", None).await.unwrap().unwrap();
        assert_eq!(generated.len(), 16);
        let admin = store.authenticate("admin", &generated).await.unwrap();
        assert!(admin.is_admin);
        assert_eq!(store.ensure_admin("admin", None).await.unwrap(), None);
        assert_eq!(store.list_users().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_checks_dummy_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("users.json")).await;
        assert!(store.dummy_hash.get().is_none());
        assert!(store.authenticate("nobody", "any password").await.is_none());
        let dummy = store.dummy_hash.get().cloned().unwrap();
        assert!(dummy.starts_with("$argon2id$"));
        assert!(store.authenticate("nobody", "any password").await.is_none());
        assert_eq!(store.dummy_hash.get(), Some(&dummy));
    }

    #[tokio::test]
    async fn test_bcrypt_hash_upgraded_on_login() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let legacy = bcrypt::hash("legacy password", 4).unwrap();
        assert!(legacy.starts_with("$2b$"));
        let users = serde_json::json!({
            "users": [{
                "username": "carol",
                "password_hash": legacy,
                "is_admin": false,
                "created_at": "2024-01-02T03:04:05Z",
            }]
        });
        std::fs::write(&path, users.to_string()).unwrap();

        let store = open_store(&path).await;
        assert!(store.authenticate("carol", "wrong password").await.is_none());
        assert_eq!(store.get_user("carol").await.unwrap().password_hash, legacy);

        let carol = store.authenticate("carol", "legacy password").await.unwrap();
        assert!(carol.password_hash.starts_with("$argon2id$"));
        let reopened = open_store(&path).await;
        let stored = reopened.get_user("carol").await.unwrap();
        assert!(stored.password_hash.starts_with("$argon2id$"));
        assert!(reopened.authenticate("carol", "legacy password").await.is_some());
    }

    #[test]
    fn test_generate_password() {
        let a = generate_password().unwrap();
        let b = generate_password().unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
