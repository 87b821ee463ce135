//! Demo credential check standing in for a real sign-in backend.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Why a sign-in attempt was refused.
#[derive(Debug, thiserror::Error)]
pub enum SignInError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Credential check failed: {0}")]
    Internal(String),
}

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub email: String,
    pub id: uuid::Uuid,
}

/// Verifies credentials against a single demo account.
///
/// The password is hashed once at startup and only the PHC hash string is
/// kept; sign-in only ever verifies.
pub struct Authenticator {
    email: String,
    password_hash: Arc<str>,
}

impl Authenticator {
    pub fn new(email: impl Into<String>, password: &str) -> Result<Self, SignInError> {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| SignInError::Internal(e.to_string()))?
            .to_string();

        Ok(Self {
            email: normalize(&email.into()),
            password_hash: password_hash.into(),
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Check the submitted credentials.
    ///
    /// Argon2 verification runs on the blocking pool.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, SignInError> {
        let email = normalize(email);
        let hash = Arc::clone(&self.password_hash);
        let password = password.to_string();

        let matches = tokio::task::spawn_blocking(move || verify(&password, &hash))
            .await
            .map_err(|e| SignInError::Internal(e.to_string()))??;

        if !matches || email != self.email {
            tracing::debug!("Rejected credentials");
            return Err(SignInError::InvalidCredentials);
        }

        Ok(Session {
            email,
            id: uuid::Uuid::new_v4(),
        })
    }
}

fn verify(password: &str, hash: &str) -> Result<bool, SignInError> {
    let parsed = PasswordHash::new(hash).map_err(|e| SignInError::Internal(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> Authenticator {
        Authenticator::new("Demo@Cherut.app", "hunter22").unwrap()
    }

    #[test]
    fn test_only_the_hash_is_kept() {
        let auth = authenticator();
        assert_eq!(auth.email(), "demo@cherut.app");
        assert!(auth.password_hash.starts_with("$argon2"));
        assert!(!auth.password_hash.contains("hunter22"));
    }

    #[tokio::test]
    async fn test_sign_in_accepts_demo_account() {
        let auth = authenticator();
        let session = auth.sign_in(" demo@cherut.app", "hunter22").await.unwrap();
        assert_eq!(session.email, "demo@cherut.app");
    }

    #[tokio::test]
    async fn test_sign_in_rejects_wrong_password() {
        let auth = authenticator();
        assert!(matches!(
            auth.sign_in("demo@cherut.app", "hunter23").await,
            Err(SignInError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_sign_in_rejects_unknown_email() {
        let auth = authenticator();
        assert!(matches!(
            auth.sign_in("someone@cherut.app", "hunter22").await,
            Err(SignInError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_malformed_hash_is_an_internal_error() {
        let auth = Authenticator {
            email: "demo@cherut.app".to_string(),
            password_hash: Arc::from("plaintext-not-a-hash"),
        };
        assert!(matches!(
            auth.sign_in("demo@cherut.app", "hunter22").await,
            Err(SignInError::Internal(_))
        ));
    }
}
