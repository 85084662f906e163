//! UserService: CRUD over the `users` table.

use crate::{
    db::is_unique_violation,
    models::user::{NewUser, User, UserPatch},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[cfg(not(test))]
const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PASSWORD_HASH_COST: u32 = 4;

const USER_COLUMNS: &str = "id, username, password_hash, gender, email, phone, nickname, \
                            introduce, description, created_at, updated_at, deleted_at";

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user with this {0} already exists")]
    AlreadyExists(&'static str),
    #[error("user `{0}` not found")]
    NotFound(i64),
    #[error("{0}")]
    Validation(String),
    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(#[from] sqlx::Error),
}

pub type UserResult<T> = Result<T, UserError>;

#[derive(Clone)]
pub struct UserService {
    db: Arc<SqlitePool>,
}

impl UserService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn create(&self, new_user: NewUser) -> UserResult<User> {
        let username = new_user.username.trim().to_string();
        if username.is_empty() {
            return Err(UserError::Validation("username is required".into()));
        }
        if new_user.password.is_empty() {
            return Err(UserError::Validation("password is required".into()));
        }
        let password_hash = bcrypt::hash(&new_user.password, PASSWORD_HASH_COST)?;

        let now = Utc::now();
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, password_hash, gender, email, phone, nickname,
                                introduce, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&username)
        .bind(&password_hash)
        .bind(&new_user.gender)
        .bind(non_empty(new_user.email))
        .bind(non_empty(new_user.phone))
        .bind(&new_user.nickname)
        .bind(&new_user.introduce)
        .bind(&new_user.description)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
        .map_err(map_write_error)?;

        info!("Created user {} ({})", user.id, user.username);
        Ok(user)
    }

    pub async fn get(&self, id: i64) -> UserResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = ? AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(UserError::NotFound(id))
    }

    /// Merge the provided fields into the stored user.
    pub async fn update(&self, id: i64, patch: UserPatch) -> UserResult<User> {
        let current = self.get(id).await?;

        let username = match patch.username {
            Some(username) if username.trim().is_empty() => {
                return Err(UserError::Validation("username must not be empty".into()));
            }
            Some(username) => username.trim().to_string(),
            None => current.username,
        };
        let password_hash = match patch.password {
            Some(password) if password.is_empty() => {
                return Err(UserError::Validation("password must not be empty".into()));
            }
            Some(password) => bcrypt::hash(&password, PASSWORD_HASH_COST)?,
            None => current.password_hash,
        };
        let email = match patch.email {
            Some(email) => non_empty(Some(email)),
            None => current.email,
        };
        let phone = match patch.phone {
            Some(phone) => non_empty(Some(phone)),
            None => current.phone,
        };

        sqlx::query_as::<_, User>(&format!(
            "UPDATE users
             SET username = ?, password_hash = ?, gender = ?, email = ?, phone = ?,
                 nickname = ?, introduce = ?, description = ?, updated_at = ?
             WHERE id = ? AND deleted_at IS NULL
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&username)
        .bind(&password_hash)
        .bind(patch.gender.unwrap_or(current.gender))
        .bind(email)
        .bind(phone)
        .bind(patch.nickname.unwrap_or(current.nickname))
        .bind(patch.introduce.unwrap_or(current.introduce))
        .bind(patch.description.unwrap_or(current.description))
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&*self.db)
        .await
        .map_err(map_write_error)?
        .ok_or(UserError::NotFound(id))
    }

    pub async fn delete(&self, id: i64) -> UserResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE users SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserError::NotFound(id));
        }
        info!("Deleted user {}", id);
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Translate unique-index violations into the conflicting field.
fn map_write_error(err: sqlx::Error) -> UserError {
    if !is_unique_violation(&err) {
        return UserError::DatabaseUnavailable(err);
    }
    let message = match &err {
        sqlx::Error::Database(db_err) => db_err.message().to_string(),
        _ => String::new(),
    };
    let field = ["username", "email", "phone"]
        .into_iter()
        .find(|field| message.contains(&format!("users.{}", field)))
        .unwrap_or("identity");
    UserError::AlreadyExists(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn alice() -> NewUser {
        NewUser {
            username: "alice".into(),
            password: "s3cret".into(),
            gender: "female".into(),
            email: Some("alice@example.com".into()),
            phone: Some("555-0100".into()),
            nickname: "Al".into(),
            introduce: "hi".into(),
            description: "first user".into(),
        }
    }

    async fn service(dir: &tempfile::TempDir) -> UserService {
        UserService::new(Arc::new(test_pool(dir).await))
    }

    #[tokio::test]
    async fn create_and_get_hashes_password() {
        let dir = tempfile::tempdir().unwrap();
        let users = service(&dir).await;

        let created = users.create(alice()).await.unwrap();
        assert_ne!(created.password_hash, "s3cret");
        assert!(bcrypt::verify("s3cret", &created.password_hash).unwrap());

        let fetched = users.get(created.id).await.unwrap();
        assert_eq!(fetched.username, "alice");
        assert_eq!(fetched.email.as_deref(), Some("alice@example.com"));

        let json = serde_json::to_value(&fetched).unwrap();
        assert!(json.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn duplicates_are_rejected_per_field() {
        let dir = tempfile::tempdir().unwrap();
        let users = service(&dir).await;
        users.create(alice()).await.unwrap();

        let same_username = NewUser {
            email: Some("alice2@example.com".into()),
            phone: Some("555-0199".into()),
            ..alice()
        };
        let err = users.create(same_username).await.unwrap_err();
        assert!(matches!(err, UserError::AlreadyExists("username")));

        let same_email = NewUser {
            username: "bob".into(),
            phone: None,
            ..alice()
        };
        let err = users.create(same_email).await.unwrap_err();
        assert!(matches!(err, UserError::AlreadyExists("email")));

        let same_phone = NewUser {
            username: "carol".into(),
            email: None,
            ..alice()
        };
        let err = users.create(same_phone).await.unwrap_err();
        assert!(matches!(err, UserError::AlreadyExists("phone")));
    }

    #[tokio::test]
    async fn users_without_contact_details_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let users = service(&dir).await;
        for name in ["dave", "erin"] {
            users
                .create(NewUser {
                    username: name.into(),
                    password: "pw".into(),
                    email: Some("".into()),
                    ..NewUser::default()
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn create_requires_username_and_password() {
        let dir = tempfile::tempdir().unwrap();
        let users = service(&dir).await;

        let err = users
            .create(NewUser {
                username: "  ".into(),
                password: "pw".into(),
                ..NewUser::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Validation(_)));

        let err = users
            .create(NewUser {
                username: "frank".into(),
                ..NewUser::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Validation(_)));
    }

    #[tokio::test]
    async fn update_merges_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let users = service(&dir).await;
        let created = users.create(alice()).await.unwrap();

        let updated = users
            .update(
                created.id,
                UserPatch {
                    nickname: Some("Ally".into()),
                    password: Some("n3w".into()),
                    ..UserPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.nickname, "Ally");
        assert_eq!(updated.username, "alice");
        assert_eq!(updated.description, "first user");
        assert!(bcrypt::verify("n3w", &updated.password_hash).unwrap());
    }

    #[tokio::test]
    async fn update_into_taken_username_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let users = service(&dir).await;
        users.create(alice()).await.unwrap();
        let bob = users
            .create(NewUser {
                username: "bob".into(),
                password: "pw".into(),
                ..NewUser::default()
            })
            .await
            .unwrap();

        let err = users
            .update(
                bob.id,
                UserPatch {
                    username: Some("alice".into()),
                    ..UserPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::AlreadyExists("username")));
    }

    #[tokio::test]
    async fn missing_users_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let users = service(&dir).await;

        assert!(matches!(users.get(42).await, Err(UserError::NotFound(42))));
        assert!(matches!(
            users.update(42, UserPatch::default()).await,
            Err(UserError::NotFound(42))
        ));
        assert!(matches!(users.delete(42).await, Err(UserError::NotFound(42))));
    }

    #[tokio::test]
    async fn delete_hides_user_and_frees_username() {
        let dir = tempfile::tempdir().unwrap();
        let users = service(&dir).await;
        let created = users.create(alice()).await.unwrap();

        users.delete(created.id).await.unwrap();
        assert!(matches!(
            users.get(created.id).await,
            Err(UserError::NotFound(_))
        ));
        assert!(matches!(
            users.delete(created.id).await,
            Err(UserError::NotFound(_))
        ));

        users.create(alice()).await.unwrap();
    }
}
