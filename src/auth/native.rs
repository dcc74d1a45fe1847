//! mysql_native_password

use super::{trim_seed, AuthContext, AuthPlugin};
use crate::protocol::constants::plugin;
use crate::Result;
use bytes::Bytes;
use sha1::{Digest, Sha1};

/// `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`
///
/// An empty password produces an empty response.
pub fn scramble_native(password: &[u8], seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let mask = hasher.finalize();

    stage1.iter().zip(mask.iter()).map(|(a, b)| a ^ b).collect()
}

/// Stateless SHA-1 challenge/response
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePassword;

impl AuthPlugin for NativePassword {
    fn name(&self) -> &str {
        plugin::MYSQL_NATIVE_PASSWORD
    }

    fn step(&mut self, challenge: &[u8], ctx: &AuthContext<'_>) -> Result<Vec<Bytes>> {
        let seed = trim_seed(challenge);
        Ok(vec![Bytes::from(scramble_native(ctx.password_bytes(), seed))])
    }
}
