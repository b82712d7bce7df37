//! Credentials for the management channel.
//!
//! A transport only asks for credentials when the endpoint requests
//! authentication, so an interactive source never prompts against an
//! unsecured server.

use crate::error::{Error, Result};
use dialoguer::{Input, Password};
use is_terminal::IsTerminal;
use std::fmt;
use std::sync::Mutex;

/// Supplies a username and password on demand.
pub trait CredentialSource: Send + Sync {
    fn username(&self) -> Result<String>;
    fn password(&self) -> Result<String>;
}

/// Credentials resolved up front from configuration.
#[derive(Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of logs.
impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl CredentialSource for StaticCredentials {
    fn username(&self) -> Result<String> {
        Ok(self.username.clone())
    }

    fn password(&self) -> Result<String> {
        Ok(self.password.clone())
    }
}

/// Prompts on the console for whatever was not configured, once.
///
/// Values given at construction are never prompted for. A prompted value is
/// cached, so repeated authentication challenges on the same connection (or
/// on reconnects) do not ask again.
pub struct PromptingCredentials {
    username: Mutex<Option<String>>,
    password: Mutex<Option<String>>,
}

impl PromptingCredentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self {
            username: Mutex::new(username),
            password: Mutex::new(password),
        }
    }

    fn check_console() -> Result<()> {
        if std::io::stdin().is_terminal() {
            Ok(())
        } else {
            Err(Error::Unauthorized(
                "The environment does not have a usable console. Cannot prompt for user name and password"
                    .to_string(),
            ))
        }
    }

    fn cached_or(
        slot: &Mutex<Option<String>>,
        prompt: impl FnOnce() -> Result<String>,
    ) -> Result<String> {
        let mut slot = slot
            .lock()
            .map_err(|_| Error::Other("Failed to lock credential cache".to_string()))?;
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }
        let value = prompt()?;
        *slot = Some(value.clone());
        Ok(value)
    }
}

impl CredentialSource for PromptingCredentials {
    fn username(&self) -> Result<String> {
        Self::cached_or(&self.username, || {
            Self::check_console()?;
            Input::<String>::new()
                .with_prompt("Username")
                .interact_text()
                .map_err(|e| Error::Unauthorized(format!("Failed to read username: {}", e)))
        })
    }

    fn password(&self) -> Result<String> {
        Self::cached_or(&self.password, || {
            Self::check_console()?;
            Password::new()
                .with_prompt("Password")
                .interact()
                .map_err(|e| Error::Unauthorized(format!("Failed to read password: {}", e)))
        })
    }
}
