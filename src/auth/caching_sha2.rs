//! caching_sha2_password
//!
//! First round sends the SHA-256 scramble. The server then answers with an
//! auth-more-data packet: `0x03` means the scramble matched its cache and an OK
//! follows, `0x04` asks for full authentication. Full authentication is only
//! done by sending the password in clear over a confidential channel; the RSA
//! key exchange is not implemented.

use super::{null_terminated_password, trim_seed, AuthContext, AuthPlugin};
use crate::protocol::constants::plugin;
use crate::{Error, Result};
use bytes::Bytes;
use sha2::{Digest, Sha256};

const FAST_AUTH_SUCCESS: u8 = 0x03;
const PERFORM_FULL_AUTHENTICATION: u8 = 0x04;

/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) + seed)`
pub fn scramble_sha256(password: &[u8], seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = Sha256::digest(password);
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(seed);
    let mask = hasher.finalize();

    stage1.iter().zip(mask.iter()).map(|(a, b)| a ^ b).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Stage {
    #[default]
    Scramble,
    AwaitingResult,
    Done,
}

/// Two-stage SHA-256 plugin; one instance per authentication attempt
#[derive(Debug, Default)]
pub struct CachingSha2Password {
    stage: Stage,
}

impl AuthPlugin for CachingSha2Password {
    fn name(&self) -> &str {
        plugin::CACHING_SHA2_PASSWORD
    }

    fn reusable(&self) -> bool {
        false
    }

    fn step(&mut self, challenge: &[u8], ctx: &AuthContext<'_>) -> Result<Vec<Bytes>> {
        match self.stage {
            Stage::Scramble => {
                self.stage = Stage::AwaitingResult;
                let seed = trim_seed(challenge);
                Ok(vec![Bytes::from(scramble_sha256(ctx.password_bytes(), seed))])
            }
            Stage::AwaitingResult => match challenge.first() {
                Some(&FAST_AUTH_SUCCESS) => {
                    self.stage = Stage::Done;
                    Ok(Vec::new())
                }
                Some(&PERFORM_FULL_AUTHENTICATION) => {
                    self.stage = Stage::Done;
                    if !ctx.confidential {
                        return Err(Error::Authentication(
                            "caching_sha2_password full authentication requires TLS or a Unix socket"
                                .into(),
                        ));
                    }
                    Ok(vec![null_terminated_password(ctx)])
                }
                other => Err(Error::Protocol(format!(
                    "unexpected caching_sha2_password status {:?}",
                    other
                ))),
            },
            Stage::Done => Err(Error::Protocol(
                "caching_sha2_password received data after completion".into(),
            )),
        }
    }
}
