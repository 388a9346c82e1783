//! Password gate for the dashboard.
//!
//! A single shared password protects the whole dashboard. Failed attempts
//! are counted; once the limit is reached the gate locks for a fixed
//! period, after which the counter starts over. Successful logins hand out
//! opaque session tokens that stay valid until logout or a password change.
//!
//! Time is passed in explicitly (`*_at` methods) so lockout behaviour can be
//! tested without sleeping.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::AuthSettings;
use crate::error::{AuthError, Error, Result};

/// Password used until the owner changes it.
pub const DEFAULT_PASSWORD: &str = "2681815";

/// Hash a password as a lowercase SHA-256 hex digest.
#[must_use]
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Check a password against a stored digest.
#[must_use]
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    hash_password(password).eq_ignore_ascii_case(password_hash)
}

/// Snapshot of the gate for the login page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStatus {
    /// Failed attempts since the last reset.
    pub failed_attempts: u32,
    /// Attempts left before lockout.
    pub remaining_attempts: u32,
    /// Whether the gate is currently locked.
    pub locked: bool,
    /// Seconds until the lockout ends (0 when unlocked).
    pub lockout_remaining_secs: u64,
}

/// Password gate with attempt counting, lockout and sessions.
#[derive(Debug)]
pub struct PasswordGate {
    password_hash: String,
    max_attempts: u32,
    lockout: Duration,
    min_password_len: usize,
    failed_attempts: u32,
    locked_at: Option<Instant>,
    sessions: HashSet<String>,
}

impl PasswordGate {
    /// Build a gate from the auth settings.
    #[must_use]
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            password_hash: settings.password_hash.clone(),
            max_attempts: settings.max_attempts.max(1),
            lockout: Duration::from_secs(settings.lockout_secs),
            min_password_len: settings.min_password_len,
            failed_attempts: 0,
            locked_at: None,
            sessions: HashSet::new(),
        }
    }

    /// Current password digest.
    #[must_use]
    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    /// Attempt a login now.
    ///
    /// # Errors
    ///
    /// See [`Self::login_at`].
    pub fn login(&mut self, password: &str) -> Result<String> {
        self.login_at(password, Instant::now())
    }

    /// Attempt a login at `now`, returning a new session token on success.
    ///
    /// # Errors
    ///
    /// - [`AuthError::LockedOut`] while a lockout is running
    /// - [`AuthError::MissingPassword`] for empty input (not counted)
    /// - [`AuthError::WrongPassword`] for a wrong password
    pub fn login_at(&mut self, password: &str, now: Instant) -> Result<String> {
        if let Some(remaining_secs) = self.lockout_remaining(now) {
            return Err(Error::Auth(AuthError::LockedOut { remaining_secs }));
        }

        if password.is_empty() {
            return Err(Error::Auth(AuthError::MissingPassword));
        }

        if verify_password(password, &self.password_hash) {
            self.failed_attempts = 0;
            let token = uuid::Uuid::new_v4().simple().to_string();
            self.sessions.insert(token.clone());
            info!("Dashboard login succeeded");
            return Ok(token);
        }

        self.failed_attempts += 1;
        warn!(
            "Dashboard login failed ({}/{})",
            self.failed_attempts, self.max_attempts
        );

        if self.failed_attempts >= self.max_attempts {
            self.locked_at = Some(now);
            warn!("Too many failed logins, locking for {:?}", self.lockout);
            return Err(Error::Auth(AuthError::LockedOut {
                remaining_secs: self.lockout.as_secs(),
            }));
        }

        Err(Error::Auth(AuthError::WrongPassword {
            remaining_attempts: self.max_attempts - self.failed_attempts,
        }))
    }

    /// Whether `token` belongs to a live session.
    #[must_use]
    pub fn is_authenticated(&self, token: &str) -> bool {
        self.sessions.contains(token)
    }

    /// Require a live session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] if the token is missing or unknown.
    pub fn require(&self, token: Option<&str>) -> Result<()> {
        match token {
            Some(token) if self.is_authenticated(token) => Ok(()),
            _ => Err(Error::Auth(AuthError::Unauthenticated)),
        }
    }

    /// End a session. Unknown tokens are ignored.
    pub fn logout(&mut self, token: &str) {
        if self.sessions.remove(token) {
            info!("Dashboard session ended");
        }
    }

    /// Clear the failed-attempt counter and any lockout.
    pub fn reset_attempts(&mut self) {
        self.failed_attempts = 0;
        self.locked_at = None;
    }

    /// Change the password.
    ///
    /// On success every session is invalidated and the new digest is returned
    /// so the caller can persist it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPasswordChange`] describing the first rule
    /// the request breaks.
    pub fn change_password(&mut self, current: &str, new: &str, confirm: &str) -> Result<String> {
        let reject = |msg: &str| Err(Error::Auth(AuthError::InvalidPasswordChange(msg.to_string())));

        if current.is_empty() || new.is_empty() || confirm.is_empty() {
            return reject("all fields are required");
        }
        if !verify_password(current, &self.password_hash) {
            return reject("current password is incorrect");
        }
        if new != confirm {
            return reject("new passwords do not match");
        }
        if new.chars().count() < self.min_password_len {
            return reject(&format!(
                "password must be at least {} characters",
                self.min_password_len
            ));
        }

        self.password_hash = hash_password(new);
        self.sessions.clear();
        self.reset_attempts();
        info!("Dashboard password changed, all sessions logged out");
        Ok(self.password_hash.clone())
    }

    /// Gate status now.
    #[must_use]
    pub fn status(&mut self) -> GateStatus {
        self.status_at(Instant::now())
    }

    /// Gate status at `now`. Expired lockouts are cleared.
    #[must_use]
    pub fn status_at(&mut self, now: Instant) -> GateStatus {
        let remaining = self.lockout_remaining(now);
        GateStatus {
            failed_attempts: self.failed_attempts,
            remaining_attempts: self.max_attempts.saturating_sub(self.failed_attempts),
            locked: remaining.is_some(),
            lockout_remaining_secs: remaining.unwrap_or(0),
        }
    }

    /// Seconds left in the current lockout, clearing it once expired.
    fn lockout_remaining(&mut self, now: Instant) -> Option<u64> {
        let locked_at = self.locked_at?;
        let elapsed = now.saturating_duration_since(locked_at);
        if elapsed < self.lockout {
            let left = self.lockout - elapsed;
            // Round up so "0 seconds" is never shown while still locked.
            Some(left.as_secs() + u64::from(left.subsec_nanos() > 0))
        } else {
            info!("Login lockout expired");
            self.locked_at = None;
            self.failed_attempts = 0;
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn gate() -> PasswordGate {
        PasswordGate::new(&AuthSettings::default())
    }

    #[test]
    fn test_hash_password_is_sha256_hex() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(verify_password("abc", &hash_password("abc").to_uppercase()));
        assert!(!verify_password("abd", &hash_password("abc")));
    }

    #[test]
    fn test_hash_of_empty_password() {
        assert_eq!(
            hash_password(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_login_with_default_password() {
        let mut gate = gate();
        let token = gate.login(DEFAULT_PASSWORD).expect("login");
        assert!(gate.is_authenticated(&token));
        assert!(gate.require(Some(&token)).is_ok());
        assert!(gate.require(None).is_err());
    }

    #[test]
    fn test_empty_password_not_counted() {
        let mut gate = gate();
        let err = gate.login("").unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::MissingPassword)));
        assert_eq!(gate.status().failed_attempts, 0);
    }

    #[test]
    fn test_wrong_password_reports_remaining() {
        let mut gate = gate();
        let err = gate.login("nope").unwrap_err();
        assert!(matches!(
            err,
            Error::Auth(AuthError::WrongPassword {
                remaining_attempts: 4
            })
        ));
    }

    #[test]
    fn test_lockout_after_max_attempts_and_expiry() {
        let mut gate = gate();
        let start = Instant::now();

        for _ in 0..4 {
            assert!(gate.login_at("bad", start).is_err());
        }
        let err = gate.login_at("bad", start).unwrap_err();
        assert!(matches!(
            err,
            Error::Auth(AuthError::LockedOut {
                remaining_secs: 300
            })
        ));

        // Even the right password is refused while locked.
        let later = start + Duration::from_secs(100);
        let err = gate.login_at(DEFAULT_PASSWORD, later).unwrap_err();
        assert!(matches!(
            err,
            Error::Auth(AuthError::LockedOut {
                remaining_secs: 200
            })
        ));
        assert!(gate.status_at(later).locked);

        let expired = start + Duration::from_secs(301);
        let status = gate.status_at(expired);
        assert!(!status.locked);
        assert_eq!(status.failed_attempts, 0);
        assert!(gate.login_at(DEFAULT_PASSWORD, expired).is_ok());
    }

    #[test]
    fn test_success_resets_failed_attempts() {
        let mut gate = gate();
        let _ = gate.login("bad");
        let _ = gate.login("bad");
        gate.login(DEFAULT_PASSWORD).expect("login");
        assert_eq!(gate.status().failed_attempts, 0);
    }

    #[test]
    fn test_reset_attempts_clears_lockout() {
        let mut gate = gate();
        for _ in 0..5 {
            let _ = gate.login("bad");
        }
        assert!(gate.status().locked);
        gate.reset_attempts();
        assert!(!gate.status().locked);
        assert!(gate.login(DEFAULT_PASSWORD).is_ok());
    }

    #[test]
    fn test_logout() {
        let mut gate = gate();
        let token = gate.login(DEFAULT_PASSWORD).expect("login");
        gate.logout(&token);
        assert!(!gate.is_authenticated(&token));
        gate.logout("unknown");
    }

    #[test]
    fn test_change_password_rules() {
        let mut gate = gate();
        let cases = [
            ("", "abcdef", "abcdef", "required"),
            ("wrong", "abcdef", "abcdef", "incorrect"),
            (DEFAULT_PASSWORD, "abcdef", "abcdeg", "do not match"),
            (DEFAULT_PASSWORD, "abc", "abc", "at least 6"),
        ];
        for (current, new, confirm, expected) in cases {
            let err = gate.change_password(current, new, confirm).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{err} should mention {expected}"
            );
        }
    }

    #[test]
    fn test_change_password_logs_everyone_out() {
        let mut gate = gate();
        let token = gate.login(DEFAULT_PASSWORD).expect("login");

        let new_hash = gate
            .change_password(DEFAULT_PASSWORD, "s3cret!", "s3cret!")
            .expect("change");
        assert_eq!(new_hash, hash_password("s3cret!"));
        assert!(!gate.is_authenticated(&token));
        assert!(gate.login(DEFAULT_PASSWORD).is_err());
        assert!(gate.login("s3cret!").is_ok());
    }
}
