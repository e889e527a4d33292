//! Credential tokens injected into outgoing requests.
//!
//! Backends disagree on which header carries an anti-forgery token, so a
//! token is sent under several alias headers. Providers may fail; the
//! client treats a failure as "no tokens" and carries on.
//!
//! ## Usage
//!
//! ```ignore
//! let tokens = EnvTokens::new("DROVER_CSRF_TOKEN");
//! let client = ResilientClient::new(http, config).with_tokens(Arc::new(tokens));
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use thiserror::Error;

/// Header names a token is sent under when no aliases are configured.
pub const DEFAULT_TOKEN_HEADERS: &[&str] = &["x-csrf-token", "x-xsrf-token", "csrf-token"];

/// Errors from token collection.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token source unavailable: {0}")]
    Unavailable(String),
}

/// A credential value destined for a request header.
///
/// The value is redacted in `Debug` and `Display`.
pub struct HeaderToken {
    value: SecretString,
}

impl HeaderToken {
    /// Wrap a token value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
        }
    }

    /// Expose the token for writing into a header.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Whether the token is empty.
    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }
}

impl fmt::Debug for HeaderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderToken")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for HeaderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Supplies zero or more tokens for the next request.
///
/// Called once per logical request, before the first attempt.
pub trait TokenProvider: Send + Sync {
    /// Collect the current tokens, highest priority first.
    fn tokens(&self) -> Result<Vec<HeaderToken>, TokenError>;
}

/// Provider that never supplies a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTokens;

impl TokenProvider for NoTokens {
    fn tokens(&self) -> Result<Vec<HeaderToken>, TokenError> {
        Ok(Vec::new())
    }
}

/// Provider returning a fixed set of tokens.
pub struct StaticTokens {
    values: Vec<SecretString>,
}

impl StaticTokens {
    /// Create from token values.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|v| SecretString::from(v.into()))
                .collect(),
        }
    }
}

impl fmt::Debug for StaticTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokens")
            .field("count", &self.values.len())
            .finish()
    }
}

impl TokenProvider for StaticTokens {
    fn tokens(&self) -> Result<Vec<HeaderToken>, TokenError> {
        Ok(self
            .values
            .iter()
            .map(|v| HeaderToken::new(v.expose_secret()))
            .collect())
    }
}

/// Provider reading a token from an environment variable on every request.
#[derive(Debug, Clone)]
pub struct EnvTokens {
    var: String,
}

impl EnvTokens {
    /// Read tokens from `var`.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenProvider for EnvTokens {
    fn tokens(&self) -> Result<Vec<HeaderToken>, TokenError> {
        match std::env::var(&self.var) {
            Ok(value) if !value.is_empty() => Ok(vec![HeaderToken::new(value)]),
            Ok(_) => Ok(Vec::new()),
            Err(_) => Err(TokenError::Unavailable(format!(
                "environment variable '{}' not set",
                self.var
            ))),
        }
    }
}
