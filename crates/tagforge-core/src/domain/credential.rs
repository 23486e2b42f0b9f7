use std::fmt;

pub const DEFAULT_REGISTRY: &str = "docker.io";

/// A registry secret. Never printed by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read a secret from the named environment variable, if it is set and non-empty.
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|value| !value.is_empty())
            .map(Self)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Credentials for one container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredential {
    pub address: String,
    pub username: String,
    pub secret: Secret,
}

impl RegistryCredential {
    /// An empty `address` falls back to [`DEFAULT_REGISTRY`].
    pub fn new(address: impl Into<String>, username: impl Into<String>, secret: Secret) -> Self {
        let address = address.into();
        Self {
            address: if address.trim().is_empty() {
                DEFAULT_REGISTRY.to_string()
            } else {
                address.trim().trim_end_matches('/').to_string()
            },
            username: username.into(),
            secret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(****)");
        assert_eq!(secret.to_string(), "****");
        assert_eq!(secret.expose(), "hunter2");

        let cred = RegistryCredential::new("ghcr.io", "bot", secret);
        assert!(!format!("{cred:?}").contains("hunter2"));
    }

    #[test]
    fn test_empty_address_defaults_to_docker_hub() {
        let cred = RegistryCredential::new("", "bot", Secret::new("x"));
        assert_eq!(cred.address, DEFAULT_REGISTRY);
    }

    #[test]
    fn test_address_trailing_slash_trimmed() {
        let cred = RegistryCredential::new("registry.example.com/", "bot", Secret::new("x"));
        assert_eq!(cred.address, "registry.example.com");
    }
}
