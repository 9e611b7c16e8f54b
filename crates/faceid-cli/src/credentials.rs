//! Single-account credentials file.
//!
//! Stored as a JSON object with exactly one key: the username, mapped to the
//! base64 encoding of the password.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const MIN_LEN: usize = 12;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Invalid username! Use at least {MIN_LEN} letters or digits, no spaces or symbols.")]
    InvalidUsername,
    #[error("Invalid password! Use at least {MIN_LEN} characters with a digit, a capital letter and a symbol, no spaces.")]
    InvalidPassword,
    #[error("Invalid username or password!")]
    Mismatch,
    #[error("no account exists yet; run `faceid signup` first")]
    NoAccount,
    #[error("credentials file: {0}")]
    Storage(String),
}

pub fn validate_username(username: &str) -> Result<(), CredentialError> {
    let ok = username.chars().count() >= MIN_LEN
        && username.chars().all(|c| c.is_alphanumeric());
    if ok {
        Ok(())
    } else {
        Err(CredentialError::InvalidUsername)
    }
}

pub fn validate_password(password: &str) -> Result<(), CredentialError> {
    let ok = password.chars().count() >= MIN_LEN
        && !password.chars().any(char::is_whitespace)
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| !c.is_alphanumeric());
    if ok {
        Ok(())
    } else {
        Err(CredentialError::InvalidPassword)
    }
}

fn encode(password: &str) -> String {
    STANDARD.encode(password.as_bytes())
}

/// Validate and store the account, replacing any previous one.
pub fn sign_up(path: &Path, username: &str, password: &str) -> Result<(), CredentialError> {
    validate_username(username)?;
    validate_password(password)?;

    let mut record = BTreeMap::new();
    record.insert(username.to_string(), encode(password));
    let json = serde_json::to_string(&record).map_err(|e| CredentialError::Storage(e.to_string()))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CredentialError::Storage(e.to_string()))?;
    }
    std::fs::write(path, json).map_err(|e| CredentialError::Storage(e.to_string()))
}

/// Whether an account has been created.
pub fn has_account(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Check a login attempt against the stored account.
pub fn login(path: &Path, username: &str, password: &str) -> Result<(), CredentialError> {
    if !has_account(path) {
        return Err(CredentialError::NoAccount);
    }
    let raw = std::fs::read_to_string(path).map_err(|e| CredentialError::Storage(e.to_string()))?;
    let record: BTreeMap<String, String> =
        serde_json::from_str(&raw).map_err(|e| CredentialError::Storage(e.to_string()))?;

    let (saved_user, saved_pwd) = record.iter().next().ok_or(CredentialError::NoAccount)?;
    if saved_user != username || *saved_pwd != encode(password) {
        return Err(CredentialError::Mismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "alexanderhamilton1";
    const PASS: &str = "Correct-horse-42";

    #[test]
    fn test_username_rules() {
        assert!(validate_username(USER).is_ok());
        assert!(validate_username("short").is_err());
        assert!(validate_username("has space in it").is_err());
        assert!(validate_username("symbols_are_bad").is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password(PASS).is_ok());
        assert!(validate_password("Short-1").is_err());
        assert!(validate_password("nocapitals-123").is_err());
        assert!(validate_password("NoDigitsHere-!").is_err());
        assert!(validate_password("NoSymbols12345").is_err());
        assert!(validate_password("Has Space-1234").is_err());
    }

    #[test]
    fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        sign_up(&path, USER, PASS).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj[USER], "Q29ycmVjdC1ob3JzZS00Mg==");
    }

    #[test]
    fn test_login() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        assert_eq!(login(&path, USER, PASS), Err(CredentialError::NoAccount));

        sign_up(&path, USER, PASS).unwrap();
        assert!(login(&path, USER, PASS).is_ok());
        assert_eq!(login(&path, USER, "Wrong-pass-123"), Err(CredentialError::Mismatch));
        assert_eq!(login(&path, "someoneelse12", PASS), Err(CredentialError::Mismatch));
    }

    #[test]
    fn test_empty_file_means_no_account() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "").unwrap();
        assert!(!has_account(&path));
    }

    #[test]
    fn test_invalid_signup_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        assert_eq!(sign_up(&path, "bad", PASS), Err(CredentialError::InvalidUsername));
        assert!(!path.exists());
    }
}
