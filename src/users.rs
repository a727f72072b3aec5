//! User accounts: roles, statuses and the JSON-backed user store.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use crate::error::{AppError, Result};
use crate::login::hash_password;
use crate::storage;

const USERS_FILE: &str = "users.json";
const MIN_PASSWORD_LEN: usize = 6;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Role of a user; decides which pages and endpoints they reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Employee,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Manager, Role::Employee];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Employee => "employee",
        }
    }

    /// Landing page after login
    pub fn home_path(&self) -> &'static str {
        match self {
            Role::Admin => "/admin",
            Role::Manager => "/manager",
            Role::Employee => "/employee",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Manager => "Manager",
            Role::Employee => "Employee",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "employee" => Ok(Role::Employee),
            other => Err(AppError::bad_request(format!("Invalid role: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

impl UserStatus {
    /// Status after a toggle click: active goes inactive, anything else comes back active.
    pub fn toggled(self) -> Self {
        match self {
            UserStatus::Active => UserStatus::Inactive,
            UserStatus::Inactive | UserStatus::Suspended => UserStatus::Active,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            "suspended" => Ok(UserStatus::Suspended),
            other => Err(AppError::bad_request(format!("Invalid status: {}", other))),
        }
    }
}

/// Stored user record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub full_name: String,
    pub email: String,
    /// Argon2 hash of the user's password
    pub password_hash: String,
    pub role: Role,
    pub team: Option<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn in_team(&self, team: &str) -> bool {
        self.team
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(team))
    }
}

/// User as exposed to clients (no password hash)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserView {
    pub id: u32,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub team: Option<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            role: user.role,
            team: user.team.clone(),
            status: user.status,
            created_at: user.created_at,
        }
    }
}

/// Registration form / request body
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    #[serde(alias = "fullName")]
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

struct ValidUser {
    full_name: String,
    email: String,
    role: Role,
    team: Option<String>,
    status: UserStatus,
}

impl NewUser {
    fn validate(&self) -> Result<ValidUser> {
        let full_name = self.full_name.trim();
        if full_name.is_empty() {
            return Err(AppError::bad_request("Full name is required"));
        }

        let email = self.email.trim().to_ascii_lowercase();
        if !EMAIL_RE.is_match(&email) {
            return Err(AppError::bad_request("A valid email address is required"));
        }

        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::bad_request(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let role: Role = self.role.parse()?;
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => UserStatus::Active,
            Some(s) => s.parse()?,
        };

        let team = self
            .team
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        if team.is_none() && role != Role::Admin {
            return Err(AppError::bad_request(
                "Team is required for managers and employees",
            ));
        }

        Ok(ValidUser {
            full_name: full_name.to_string(),
            email,
            role,
            team,
            status,
        })
    }
}

/// User table backed by `users.json`
pub struct UserStore {
    path: PathBuf,
    users: RwLock<Vec<User>>,
}

impl UserStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(USERS_FILE);
        storage::init_table(&path)?;
        let users = storage::load_records(&path)?;
        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<User>>> {
        self.users
            .read()
            .map_err(|_| AppError::internal("user store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<User>>> {
        self.users
            .write()
            .map_err(|_| AppError::internal("user store lock poisoned"))
    }

    /// Register a new user
    ///
    /// # Arguments
    /// * `new_user` - Registration details; the password is hashed before storage
    ///
    /// # Returns
    /// * `Result<User>` - The stored user with its new id
    ///
    /// # Errors
    /// * `BadRequest` for a blank name, malformed email, short password,
    ///   unknown role or status, or a missing team for non-admins
    /// * `Conflict` if the email is already registered
    pub fn register(&self, new_user: &NewUser) -> Result<User> {
        let valid = new_user.validate()?;
        let password_hash = hash_password(&new_user.password)?;

        let mut users = self.write()?;
        if users.iter().any(|u| u.email.eq_ignore_ascii_case(&valid.email)) {
            return Err(AppError::conflict("Email address is already registered"));
        }

        let user = User {
            id: storage::next_id(users.iter().map(|u| u.id)),
            full_name: valid.full_name,
            email: valid.email,
            password_hash,
            role: valid.role,
            team: valid.team,
            status: valid.status,
            created_at: Utc::now(),
        };
        users.push(user.clone());
        storage::save_records(&self.path, &users)?;

        log::info!("registered {} {} ({})", user.role, user.id, user.email);
        Ok(user)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    pub fn all(&self) -> Result<Vec<User>> {
        Ok(self.read()?.clone())
    }

    pub fn get(&self, id: u32) -> Result<User> {
        self.read()?
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("User {} not found", id)))
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim();
        Ok(self
            .read()?
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    /// Look a user up by full name, ignoring case and surrounding spaces.
    pub fn find_by_name(&self, full_name: &str) -> Result<Option<User>> {
        let wanted = full_name.trim().to_lowercase();
        Ok(self
            .read()?
            .iter()
            .find(|u| u.full_name.to_lowercase() == wanted)
            .cloned())
    }

    pub fn set_status(&self, id: u32, status: UserStatus) -> Result<User> {
        self.update_status(id, |_| status)
    }

    /// Flip a user's status (see [`UserStatus::toggled`]).
    pub fn toggle_status(&self, id: u32) -> Result<User> {
        self.update_status(id, UserStatus::toggled)
    }

    fn update_status(&self, id: u32, next: impl FnOnce(UserStatus) -> UserStatus) -> Result<User> {
        let mut users = self.write()?;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AppError::not_found(format!("User {} not found", id)))?;
        user.status = next(user.status);
        let updated = user.clone();
        storage::save_records(&self.path, &users)?;

        log::info!("user {} status -> {}", id, updated.status);
        Ok(updated)
    }

    /// Employees belonging to `team`, ordered by name.
    pub fn team_members(&self, team: &str) -> Result<Vec<User>> {
        let mut members: Vec<User> = self
            .read()?
            .iter()
            .filter(|u| u.role == Role::Employee && u.in_team(team))
            .cloned()
            .collect();
        members.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(members)
    }

    pub fn count_by_role(&self) -> Result<BTreeMap<Role, usize>> {
        let mut counts = BTreeMap::new();
        for user in self.read()?.iter() {
            *counts.entry(user.role).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn count_by_status(&self) -> Result<BTreeMap<UserStatus, usize>> {
        let mut counts = BTreeMap::new();
        for user in self.read()?.iter() {
            *counts.entry(user.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
