//! Pluggable authentication
//!
//! The session drives a plugin through the handshake: the server's challenge
//! goes into [`AuthPlugin::step`], whatever comes back is written as auth
//! packets, and the loop ends when the server sends OK or ERR. An auth switch
//! request replaces the active plugin with a fresh one from the
//! [`PluginRegistry`] (or keeps the current instance when it is reusable and
//! the name matches).

mod caching_sha2;
mod clear;
mod native;

pub use caching_sha2::{scramble_sha256, CachingSha2Password};
pub use clear::{ClearPassword, Sha256Password};
pub use native::{scramble_native, NativePassword};

use crate::protocol::constants::plugin;
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Credentials and channel properties visible to a plugin
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    /// User name
    pub user: &'a str,
    /// Password, if any
    pub password: Option<&'a str>,
    /// TLS or Unix socket in use
    pub confidential: bool,
}

impl AuthContext<'_> {
    /// Password bytes, empty when unset
    pub fn password_bytes(&self) -> &[u8] {
        self.password.map(str::as_bytes).unwrap_or_default()
    }
}

/// One authentication mechanism
pub trait AuthPlugin: Send + fmt::Debug {
    /// Plugin name as used on the wire
    fn name(&self) -> &str;

    /// Plugin sends secrets in clear and must only run over TLS or a Unix socket
    fn requires_confidentiality(&self) -> bool {
        false
    }

    /// Whether one instance may serve several authentication attempts
    fn reusable(&self) -> bool {
        true
    }

    /// Consume one server challenge and produce zero or more response packets
    fn step(&mut self, challenge: &[u8], ctx: &AuthContext<'_>) -> Result<Vec<Bytes>>;
}

type PluginFactory = Arc<dyn Fn() -> Box<dyn AuthPlugin> + Send + Sync>;

/// Name → plugin factory map with an optional allow-list
#[derive(Clone)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
    allowed: Option<Vec<String>>,
}

impl PluginRegistry {
    /// Registry with the built-in plugins
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            allowed: None,
        };
        registry.register(plugin::MYSQL_NATIVE_PASSWORD, || Box::new(NativePassword));
        registry.register(plugin::CACHING_SHA2_PASSWORD, || {
            Box::new(CachingSha2Password::default())
        });
        registry.register(plugin::SHA256_PASSWORD, || Box::new(Sha256Password));
        registry.register(plugin::MYSQL_CLEAR_PASSWORD, || Box::new(ClearPassword));
        registry
    }

    /// Add or replace a plugin
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn AuthPlugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Only allow the named plugins (`restrictedAuth`)
    pub fn restrict<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|s| {
                let s: String = s.into();
                s.trim().to_string()
            })
            .filter(|s| !s.is_empty())
            .collect();
        self.allowed = if names.is_empty() { None } else { Some(names) };
    }

    /// Whether `name` passes the allow-list
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|a| a == name))
    }

    /// Create a fresh plugin instance for `name`
    pub fn negotiate(&self, name: &str) -> Result<Box<dyn AuthPlugin>> {
        if !self.is_allowed(name) {
            return Err(Error::Authentication(format!(
                "authentication plugin '{}' is not in restrictedAuth",
                name
            )));
        }
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::Authentication(format!("unsupported authentication plugin '{}'", name))
        })?;
        Ok(factory())
    }

    /// Plugin for the initial handshake response
    ///
    /// Unknown or disallowed server defaults fall back to the first allowed
    /// built-in; the server answers with an auth switch if it disagrees.
    pub fn initial(&self, server_default: &str) -> Result<Box<dyn AuthPlugin>> {
        if !server_default.is_empty() {
            if let Ok(plugin) = self.negotiate(server_default) {
                return Ok(plugin);
            }
        }
        [
            plugin::MYSQL_NATIVE_PASSWORD,
            plugin::CACHING_SHA2_PASSWORD,
            plugin::SHA256_PASSWORD,
            plugin::MYSQL_CLEAR_PASSWORD,
        ]
        .iter()
        .find_map(|name| self.negotiate(name).ok())
        .ok_or_else(|| Error::Authentication("no usable authentication plugin".into()))
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("PluginRegistry")
            .field("plugins", &names)
            .field("allowed", &self.allowed)
            .finish()
    }
}

/// Seed without the trailing NUL some servers append
pub(crate) fn trim_seed(seed: &[u8]) -> &[u8] {
    seed.strip_suffix(&[0]).unwrap_or(seed)
}

/// `password` followed by a NUL terminator
pub(crate) fn null_terminated_password(ctx: &AuthContext<'_>) -> Bytes {
    let mut out = Vec::with_capacity(ctx.password_bytes().len() + 1);
    out.extend_from_slice(ctx.password_bytes());
    out.push(0);
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_builtins() {
        let registry = PluginRegistry::new();
        for name in [
            plugin::MYSQL_NATIVE_PASSWORD,
            plugin::CACHING_SHA2_PASSWORD,
            plugin::SHA256_PASSWORD,
            plugin::MYSQL_CLEAR_PASSWORD,
        ] {
            assert_eq!(registry.negotiate(name).unwrap().name(), name);
        }
        assert!(registry.negotiate("auth_gssapi_client").is_err());
    }

    #[test]
    fn test_restricted_auth() {
        let mut registry = PluginRegistry::new();
        registry.restrict("mysql_native_password, caching_sha2_password".split(','));
        assert!(registry.is_allowed("caching_sha2_password"));
        assert!(!registry.is_allowed("mysql_clear_password"));
        assert!(matches!(
            registry.negotiate("mysql_clear_password"),
            Err(Error::Authentication(_))
        ));
    }

    #[test]
    fn test_initial_falls_back_when_default_disallowed() {
        let mut registry = PluginRegistry::new();
        registry.restrict(["caching_sha2_password"]);
        let plugin = registry.initial("mysql_native_password").unwrap();
        assert_eq!(plugin.name(), "caching_sha2_password");

        let plugin = PluginRegistry::new().initial("").unwrap();
        assert_eq!(plugin.name(), "mysql_native_password");
    }

    #[test]
    fn test_custom_plugin_registration() {
        #[derive(Debug)]
        struct Fixed;
        impl AuthPlugin for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            fn step(&mut self, _: &[u8], _: &AuthContext<'_>) -> Result<Vec<Bytes>> {
                Ok(vec![Bytes::from_static(b"x")])
            }
        }
        let mut registry = PluginRegistry::new();
        registry.register("fixed", || Box::new(Fixed));
        let ctx = AuthContext {
            user: "u",
            password: None,
            confidential: false,
        };
        let mut plugin = registry.negotiate("fixed").unwrap();
        assert_eq!(plugin.step(b"", &ctx).unwrap(), vec![Bytes::from_static(b"x")]);
    }
}
