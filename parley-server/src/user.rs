//! User management for Parley.
//!
//! Provides user storage, password hashing, and registration/login support.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// User record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID
    pub id: String,
    /// Username for login
    pub username: String,
    /// Argon2 password hash (never exposed in API responses)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last login timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Request to register a new user.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
}

/// User store backed by SQLite.
#[derive(Clone)]
pub struct UserStore {
    conn: Arc<Mutex<Connection>>,
}

impl UserStore {
    /// Create a new user store at the given database path.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        // The history store opens its own connection to the same file.
        conn.busy_timeout(Duration::from_secs(5))?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id            TEXT PRIMARY KEY,
                username      TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                last_login_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
            ",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Register a new user.
    pub fn create(&self, request: &CreateUserRequest) -> Result<User> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;

        // Validate username
        if request.username.is_empty() {
            anyhow::bail!("Username cannot be empty");
        }
        if request.username.len() > 64 {
            anyhow::bail!("Username too long (max 64 characters)");
        }

        // Validate password
        if request.password.len() < 8 {
            anyhow::bail!("Password must be at least 8 characters");
        }

        let password_hash = hash_password(&request.password)?;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        conn.execute(
            r"
            INSERT INTO users (id, username, password_hash, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![id, request.username, password_hash, now.to_rfc3339()],
        )
        .with_context(|| format!("Failed to create user '{}'", request.username))?;

        Ok(User {
            id,
            username: request.username.clone(),
            password_hash,
            created_at: now,
            last_login_at: None,
        })
    }

    /// Get a user by ID.
    pub fn get(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        self.get_internal(&conn, "id", id)
    }

    /// Get a user by username.
    pub fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        self.get_internal(&conn, "username", username)
    }

    fn get_internal(&self, conn: &Connection, field: &str, value: &str) -> Result<Option<User>> {
        let query = format!(
            "SELECT id, username, password_hash, created_at, last_login_at
             FROM users WHERE {} = ?1",
            field
        );

        conn.query_row(&query, params![value], |row| {
            let created_at: String = row.get(3)?;
            let last_login_at: Option<String> = row.get(4)?;

            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                password_hash: row.get(2)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                last_login_at: last_login_at.and_then(|s| {
                    DateTime::parse_from_rfc3339(&s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .ok()
                }),
            })
        })
        .optional()
        .with_context(|| format!("Failed to get user by {} = {}", field, value))
    }

    /// Count total users.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Verify a user's password and update last login time.
    pub fn verify_password(&self, username: &str, password: &str) -> Result<Option<User>> {
        let user = self.get_by_username(username)?;

        let Some(user) = user else {
            return Ok(None);
        };

        if !verify_password(password, &user.password_hash)? {
            return Ok(None);
        }

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
            params![now, user.id],
        )?;

        drop(conn);
        self.get(&user.id)
    }
}

/// Hash a password using Argon2.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Invalid password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_store() -> (UserStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("users.db");
        let store = UserStore::new(&db_path).unwrap();
        (store, dir)
    }

    #[test]
    fn test_create_user() {
        let (store, _dir) = create_test_store();

        let user = store
            .create(&CreateUserRequest {
                username: "testuser".to_string(),
                password: "password123".to_string(),
            })
            .unwrap();

        assert_eq!(user.username, "testuser");
        assert!(user.last_login_at.is_none());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_get_user() {
        let (store, _dir) = create_test_store();

        let created = store
            .create(&CreateUserRequest {
                username: "findme".to_string(),
                password: "password123".to_string(),
            })
            .unwrap();

        let found = store.get(&created.id).unwrap().unwrap();
        assert_eq!(found.username, "findme");

        let by_name = store.get_by_username("findme").unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
    }

    #[test]
    fn test_get_missing_user() {
        let (store, _dir) = create_test_store();
        assert!(store.get("no-such-id").unwrap().is_none());
        assert!(store.get_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn test_verify_password() {
        let (store, _dir) = create_test_store();

        store
            .create(&CreateUserRequest {
                username: "authtest".to_string(),
                password: "correctpassword".to_string(),
            })
            .unwrap();

        // Correct password
        let user = store
            .verify_password("authtest", "correctpassword")
            .unwrap();
        assert!(user.is_some());
        assert!(user.unwrap().last_login_at.is_some());

        // Wrong password
        let user = store.verify_password("authtest", "wrongpassword").unwrap();
        assert!(user.is_none());

        // Wrong username
        let user = store.verify_password("nonexistent", "password").unwrap();
        assert!(user.is_none());
    }

    #[test]
    fn test_password_validation() {
        let (store, _dir) = create_test_store();

        let result = store.create(&CreateUserRequest {
            username: "shortpw".to_string(),
            password: "short".to_string(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_username_validation() {
        let (store, _dir) = create_test_store();

        let result = store.create(&CreateUserRequest {
            username: "".to_string(),
            password: "password123".to_string(),
        });
        assert!(result.is_err());

        let result = store.create(&CreateUserRequest {
            username: "x".repeat(65),
            password: "password123".to_string(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_username_fails() {
        let (store, _dir) = create_test_store();

        store
            .create(&CreateUserRequest {
                username: "duplicate".to_string(),
                password: "password123".to_string(),
            })
            .unwrap();

        let result = store.create(&CreateUserRequest {
            username: "duplicate".to_string(),
            password: "password456".to_string(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_password_hashing() {
        let password = "testpassword123";
        let hash = hash_password(password).unwrap();

        // Hash should not contain the original password
        assert!(!hash.contains(password));

        // Should verify correctly
        assert!(verify_password(password, &hash).unwrap());

        // Wrong password should not verify
        assert!(!verify_password("wrongpassword", &hash).unwrap());
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("users.db");

        {
            let store = UserStore::new(&db_path).unwrap();
            store
                .create(&CreateUserRequest {
                    username: "persistent".to_string(),
                    password: "password123".to_string(),
                })
                .unwrap();
        }

        {
            let store = UserStore::new(&db_path).unwrap();
            let user = store.get_by_username("persistent").unwrap().unwrap();
            assert_eq!(user.username, "persistent");
        }
    }
}
