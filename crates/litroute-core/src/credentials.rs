//! API key storage using the system keyring.
//!
//! Keys are looked up in the environment first, then in the platform's
//! native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager

use std::fmt;

use keyring::Entry;
use tracing::{debug, warn};

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "litroute";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// No key in the environment or the keyring.
    #[error("No {0} API key; set {var} or run `litroute credentials set {0}`", var = .0.env_vars()[0])]
    Missing(Secret),

    /// Unknown secret name.
    #[error("Unknown credential {0:?} (expected zotero or llm)")]
    UnknownSecret(String),
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// A stored API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Secret {
    /// Zotero Web API key.
    Zotero,
    /// Chat-completion API key.
    Llm,
}

impl Secret {
    /// Parses `zotero` or `llm`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::UnknownSecret`] for anything else.
    pub fn parse(s: &str) -> CredentialResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zotero" => Ok(Self::Zotero),
            "llm" => Ok(Self::Llm),
            _ => Err(CredentialError::UnknownSecret(s.to_string())),
        }
    }

    /// Name used on the command line and as keyring entry suffix.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Zotero => "zotero",
            Self::Llm => "llm",
        }
    }

    /// Environment variables checked before the keyring, in order.
    #[must_use]
    pub const fn env_vars(&self) -> &'static [&'static str] {
        match self {
            Self::Zotero => &["ZOTERO_API_KEY"],
            Self::Llm => &["LITROUTE_LLM_API_KEY", "DEEPSEEK_API_KEY"],
        }
    }

    fn entry(self) -> CredentialResult<Entry> {
        let key = format!("{SERVICE_NAME}_{}_api_key", self.as_str());
        Ok(Entry::new(SERVICE_NAME, &key)?)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stores a key in the system keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn store(secret: Secret, value: &str) -> CredentialResult<()> {
    secret.entry()?.set_password(value)?;
    debug!(%secret, "Stored API key");
    Ok(())
}

/// Reads a key from the system keyring only.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn get_stored(secret: Secret) -> CredentialResult<Option<String>> {
    match secret.entry()?.get_password() {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => {
            debug!(%secret, "No API key in keyring");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Removes a key from the system keyring. Returns whether one existed.
///
/// # Errors
///
/// Returns an error if the keyring operation fails (except for missing entries).
pub fn delete(secret: Secret) -> CredentialResult<bool> {
    match secret.entry()?.delete_credential() {
        Ok(()) => {
            debug!(%secret, "Deleted API key");
            Ok(true)
        }
        Err(keyring::Error::NoEntry) => Ok(false),
        Err(e) => {
            warn!("Failed to delete {secret} API key: {e}");
            Err(e.into())
        }
    }
}

/// Looks a key up in `env`, then through `stored`.
///
/// Empty values count as unset.
///
/// # Errors
///
/// Returns [`CredentialError::Missing`] when neither source has the key, or
/// the error of `stored`.
pub fn resolve_with<E, S>(secret: Secret, env: E, stored: S) -> CredentialResult<String>
where
    E: Fn(&str) -> Option<String>,
    S: FnOnce(Secret) -> CredentialResult<Option<String>>,
{
    let from_env = secret
        .env_vars()
        .iter()
        .filter_map(|var| env(var))
        .find(|v| !v.trim().is_empty());
    if let Some(value) = from_env {
        return Ok(value.trim().to_string());
    }
    stored(secret)?
        .filter(|v| !v.trim().is_empty())
        .ok_or(CredentialError::Missing(secret))
}

/// Looks a key up in the process environment, then in the keyring.
///
/// # Errors
///
/// See [`resolve_with`].
pub fn resolve(secret: Secret) -> CredentialResult<String> {
    resolve_with(secret, |var| std::env::var(var).ok(), get_stored)
}
