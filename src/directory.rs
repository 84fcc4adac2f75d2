// src/directory.rs

use async_trait::async_trait;
use std::collections::HashMap;

/// Local user identifier, opaque to the bridge.
pub type UserId = u64;

/// Profile fields applied during reconciliation. `None` means "leave alone";
/// empty claim values never reach this struct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none() && self.last_name.is_none() && self.display_name.is_none()
    }
}

/// A point-in-time snapshot of a local user, carried by outbound sync events
/// so the sync path never reads the directory itself.
#[derive(Debug, Clone, Default)]
pub struct UserSnapshot {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub phone: String,
    pub address: AddressSnapshot,
    /// Ordered roles; the first entry is the primary role.
    pub roles: Vec<String>,
}

impl UserSnapshot {
    pub fn primary_role(&self) -> Option<&str> {
        self.roles.first().map(String::as_str).filter(|r| !r.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddressSnapshot {
    pub street_address: String,
    pub extended_address: String,
    pub locality: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

/// The local user directory, the system of record for [`UserSnapshot`]s.
/// The bridge only ever mutates it through this seam.
#[async_trait]
pub trait LocalDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserId>, DirectoryError>;
    async fn username_exists(&self, username: &str) -> Result<bool, DirectoryError>;
    async fn create_user(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<UserId, DirectoryError>;
    async fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
    ) -> Result<(), DirectoryError>;
    async fn set_role(&self, user_id: UserId, role: &str) -> Result<(), DirectoryError>;
    async fn primary_role(&self, user_id: UserId) -> Result<Option<String>, DirectoryError>;
}

/// Session establishment, invoked exactly once per successful login.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn establish_session(&self, user_id: UserId) -> Result<(), DirectoryError>;
}

/// Error surface of both directory collaborators. `NotFound` is load-bearing
/// for the outbound upsert; everything else is opaque detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    NotFound,
    Other(String),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::NotFound => write!(f, "subject not found"),
            DirectoryError::Other(detail) => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// One attribute pushed to the remote identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryAttribute {
    pub name: String,
    pub value: String,
}

impl DirectoryAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The remote directory-service client (Cognito-style admin API). The bridge
/// depends only on this three-call contract, never on a concrete SDK.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn update_user_attributes(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &[DirectoryAttribute],
    ) -> Result<(), DirectoryError>;

    async fn create_user(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &[DirectoryAttribute],
    ) -> Result<(), DirectoryError>;

    async fn set_password(
        &self,
        pool_id: &str,
        username: &str,
        password: &str,
        permanent: bool,
    ) -> Result<(), DirectoryError>;
}

/// In-memory [`LocalDirectory`] for tests and examples.
#[derive(Default)]
pub struct InMemoryDirectory {
    inner: std::sync::Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    next_id: UserId,
    users: HashMap<UserId, StoredUser>,
}

#[derive(Clone)]
struct StoredUser {
    username: String,
    email: String,
    profile: ProfileUpdate,
    role: Option<String>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user and returns its id.
    pub fn seed(&self, username: &str, email: &str, role: Option<&str>) -> UserId {
        let mut state = self.inner.lock().expect("directory lock");
        state.next_id += 1;
        let id = state.next_id;
        state.users.insert(
            id,
            StoredUser {
                username: username.to_string(),
                email: email.to_string(),
                profile: ProfileUpdate::default(),
                role: role.map(str::to_string),
            },
        );
        id
    }

    pub fn username_of(&self, user_id: UserId) -> Option<String> {
        let state = self.inner.lock().expect("directory lock");
        state.users.get(&user_id).map(|u| u.username.clone())
    }

    pub fn profile_of(&self, user_id: UserId) -> Option<ProfileUpdate> {
        let state = self.inner.lock().expect("directory lock");
        state.users.get(&user_id).map(|u| u.profile.clone())
    }

    pub fn role_of(&self, user_id: UserId) -> Option<String> {
        let state = self.inner.lock().expect("directory lock");
        state.users.get(&user_id).and_then(|u| u.role.clone())
    }
}

#[async_trait]
impl LocalDirectory for InMemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserId>, DirectoryError> {
        let state = self.inner.lock().expect("directory lock");
        Ok(state
            .users
            .iter()
            .find(|(_, u)| u.email.eq_ignore_ascii_case(email))
            .map(|(id, _)| *id))
    }

    async fn username_exists(&self, username: &str) -> Result<bool, DirectoryError> {
        let state = self.inner.lock().expect("directory lock");
        Ok(state.users.values().any(|u| u.username == username))
    }

    async fn create_user(
        &self,
        username: &str,
        _password: &str,
        email: &str,
    ) -> Result<UserId, DirectoryError> {
        let mut state = self.inner.lock().expect("directory lock");
        state.next_id += 1;
        let id = state.next_id;
        state.users.insert(
            id,
            StoredUser {
                username: username.to_string(),
                email: email.to_string(),
                profile: ProfileUpdate::default(),
                role: None,
            },
        );
        Ok(id)
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
    ) -> Result<(), DirectoryError> {
        let mut state = self.inner.lock().expect("directory lock");
        let user = state.users.get_mut(&user_id).ok_or(DirectoryError::NotFound)?;
        if let Some(first) = update.first_name {
            user.profile.first_name = Some(first);
        }
        if let Some(last) = update.last_name {
            user.profile.last_name = Some(last);
        }
        if let Some(display) = update.display_name {
            user.profile.display_name = Some(display);
        }
        Ok(())
    }

    async fn set_role(&self, user_id: UserId, role: &str) -> Result<(), DirectoryError> {
        let mut state = self.inner.lock().expect("directory lock");
        let user = state.users.get_mut(&user_id).ok_or(DirectoryError::NotFound)?;
        user.role = Some(role.to_string());
        Ok(())
    }

    async fn primary_role(&self, user_id: UserId) -> Result<Option<String>, DirectoryError> {
        let state = self.inner.lock().expect("directory lock");
        Ok(state.users.get(&user_id).and_then(|u| u.role.clone()))
    }
}
