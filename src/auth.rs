//! Authentication module.

use crate::db::{Database, User, now_timestamp};
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono_tz::Tz;

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Check a username: 1-64 characters of letters, digits, `_` and `-`.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > 64 {
        return Err(AppError::Validation(
            "Username must be 1-64 characters".to_string(),
        ));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::Validation(
            "Username can only contain letters, numbers, _ and -".to_string(),
        ));
    }

    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < 4 {
        return Err(AppError::Validation(
            "Password must be at least 4 characters".to_string(),
        ));
    }
    Ok(())
}

/// Check an IANA timezone name.
pub fn validate_timezone(timezone: &str) -> Result<()> {
    timezone
        .parse::<Tz>()
        .map(|_| ())
        .map_err(|_| AppError::Validation(format!("Unknown timezone '{}'", timezone)))
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    registration_enabled: bool,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(db: Database, registration_enabled: bool) -> Self {
        Self {
            db,
            registration_enabled,
        }
    }

    /// Register a new regular user from a device.
    pub fn register(&self, username: &str, password: &str) -> Result<User> {
        if !self.registration_enabled {
            return Err(AppError::Forbidden("Registration is disabled".to_string()));
        }

        self.create_user(username, password, false)
    }

    /// Create a new user (admin function).
    pub fn create_user(&self, username: &str, password: &str, admin: bool) -> Result<User> {
        validate_username(username)?;
        validate_password(password)?;

        let user = User {
            id: username.to_string(),
            password_hash: hash_password(password)?,
            admin,
            timezone: "UTC".to_string(),
            created_at: now_timestamp(),
        };

        self.db.create_user(&user)?;
        tracing::info!(user = %user.id, admin, "Created user");
        Ok(user)
    }

    /// Check device credentials and return the user.
    pub fn authenticate(&self, username: &str, key: &str) -> Result<User> {
        let invalid = || AppError::Unauthorized("Invalid username or key".to_string());

        let user = self.db.get_user(username)?.ok_or_else(invalid)?;
        if !verify_password(key, &user.password_hash)? {
            return Err(invalid());
        }

        Ok(user)
    }

    /// Change user password.
    pub fn change_password(&self, username: &str, new_password: &str) -> Result<bool> {
        validate_password(new_password)?;

        let password_hash = hash_password(new_password)?;
        self.db.update_user_password(username, &password_hash)
    }

    /// Update a user's timezone.
    ///
    /// Returns true when cached streaks were computed in a different zone and
    /// the statistics cache should be refreshed.
    pub fn set_timezone(&self, username: &str, timezone: &str) -> Result<bool> {
        validate_timezone(timezone)?;

        if !self.db.update_user_timezone(username, timezone)? {
            return Err(AppError::NotFound(format!("User '{}' not found", username)));
        }

        let stale = self
            .db
            .streak_timezone(username)?
            .is_some_and(|cached| cached != timezone);

        tracing::info!(user = username, timezone, stale, "Updated timezone");
        Ok(stale)
    }

    /// Delete a user.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        self.db.delete_user(username)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }

    /// Fail unless the user is an administrator.
    pub fn require_admin(&self, user: &User) -> Result<()> {
        if user.admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("Administrator required".to_string()))
        }
    }
}
