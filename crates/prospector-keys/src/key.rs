//! API key wrapper that zeroes its memory on drop.

use zeroize::Zeroizing;

/// A single credential for an external service.
///
/// The secret is never printed by `Debug` and is wiped from memory when the
/// last clone is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(Zeroizing<String>);

impl ApiKey {
    /// Wrap a secret value.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// An empty key for services that need no credential.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(String::new())
    }

    /// Whether this is the empty key used by free services.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the raw secret for building a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Masked form safe for logs, e.g. `sk-1…9f`.
    #[must_use]
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "****".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{head}…{tail}")
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiKey").field(&self.masked()).finish()
    }
}

impl From<&str> for ApiKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ApiKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
