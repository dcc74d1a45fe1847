//! Plugins that send the password itself

use super::{null_terminated_password, AuthContext, AuthPlugin};
use crate::protocol::constants::plugin;
use crate::{Error, Result};
use bytes::Bytes;

/// mysql_clear_password
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearPassword;

impl AuthPlugin for ClearPassword {
    fn name(&self) -> &str {
        plugin::MYSQL_CLEAR_PASSWORD
    }

    fn requires_confidentiality(&self) -> bool {
        true
    }

    fn step(&mut self, _challenge: &[u8], ctx: &AuthContext<'_>) -> Result<Vec<Bytes>> {
        Ok(vec![null_terminated_password(ctx)])
    }
}

/// sha256_password, restricted to the cleartext exchange
///
/// Without a secure channel the plugin would need the server's RSA key, which
/// is not supported.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Password;

impl AuthPlugin for Sha256Password {
    fn name(&self) -> &str {
        plugin::SHA256_PASSWORD
    }

    fn requires_confidentiality(&self) -> bool {
        true
    }

    fn step(&mut self, _challenge: &[u8], ctx: &AuthContext<'_>) -> Result<Vec<Bytes>> {
        if !ctx.confidential {
            return Err(Error::Authentication(
                "sha256_password requires TLS or a Unix socket".into(),
            ));
        }
        if ctx.password_bytes().is_empty() {
            return Ok(vec![Bytes::from_static(&[0])]);
        }
        Ok(vec![null_terminated_password(ctx)])
    }
}
