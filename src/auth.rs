use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const HASH_SCHEME: &str = "sha256";

pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}${}", HASH_SCHEME, salt, digest_hex(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let actual = digest_hex(salt, password);
    // Compare every byte regardless of where the first mismatch is.
    actual.len() == expected.len()
        && actual
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn digest_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: String,
    pub username: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub student_id: Option<String>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.is_staff || self.is_superuser
    }

    pub fn role(&self) -> &'static str {
        if self.is_admin() {
            "staff"
        } else {
            "student"
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

pub fn create_user(conn: &Connection, user: &NewUser) -> rusqlite::Result<String> {
    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, first_name, last_name, email, password_hash,
                           is_staff, is_superuser, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &user_id,
            &user.username,
            &user.first_name,
            &user.last_name,
            &user.email,
            hash_password(&user.password),
            user.is_staff as i64,
            user.is_superuser as i64,
            crate::db::now_stamp(),
        ),
    )?;
    Ok(user_id)
}

pub fn set_password(conn: &Connection, user_id: &str, password: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE users SET password_hash = ? WHERE id = ?",
        (hash_password(password), user_id),
    )
}

fn principal_for_user(conn: &Connection, user_id: &str) -> anyhow::Result<Option<Principal>> {
    let p = conn
        .query_row(
            "SELECT u.id, u.username, u.is_staff, u.is_superuser, s.id
             FROM users u
             LEFT JOIN students s ON s.user_id = u.id
             WHERE u.id = ? AND u.is_active = 1",
            [user_id],
            |r| {
                Ok(Principal {
                    user_id: r.get(0)?,
                    username: r.get(1)?,
                    is_staff: r.get::<_, i64>(2)? != 0,
                    is_superuser: r.get::<_, i64>(3)? != 0,
                    student_id: r.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(p)
}

/// Checks credentials of an active account.
pub fn authenticate(
    conn: &Connection,
    username: &str,
    password: &str,
) -> anyhow::Result<Option<Principal>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE username = ? AND is_active = 1",
            [username],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((user_id, stored)) = row else {
        return Ok(None);
    };
    if !verify_password(password, &stored) {
        return Ok(None);
    }
    principal_for_user(conn, &user_id)
}

pub fn create_session(conn: &Connection, user_id: &str) -> anyhow::Result<String> {
    let token = Uuid::new_v4().simple().to_string();
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at) VALUES(?, ?, ?)",
        (&token, user_id, crate::db::now_stamp()),
    )?;
    Ok(token)
}

pub fn delete_session(conn: &Connection, token: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(n > 0)
}

/// Resolves a session token to its user. Expired sessions are removed.
pub fn resolve_session(
    conn: &Connection,
    token: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<Option<Principal>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT user_id, created_at FROM sessions WHERE token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((user_id, created_at)) = row else {
        return Ok(None);
    };
    let expired = match chrono::DateTime::parse_from_rfc3339(&created_at) {
        Ok(t) => chrono::Utc::now().signed_duration_since(t) > ttl,
        Err(_) => true,
    };
    if expired {
        tracing::debug!(user_id = %user_id, "session expired");
        delete_session(conn, token)?;
        return Ok(None);
    }
    principal_for_user(conn, &user_id)
}
