//! HMAC request signing and verification with rotating shared secrets.
//!
//! The signature covers the exact byte sequence `path + ":" + body` and is
//! rendered as `rpc0:<lowercase hex>`. The first configured secret signs;
//! every configured secret verifies, so a demoted secret keeps validating
//! in-flight traffic during rotation.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

use silorpc_protocol::SIGNATURE_VERSION;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable shared secret. Verification must fail closed, so this is a
    /// hard startup error rather than a silent bypass.
    #[error("cannot sign or verify rpc requests without at least one shared secret")]
    NoSecretsConfigured,
}

pub struct RequestSigner {
    secrets: Vec<String>,
}

// Never derive Debug here; secret material must not reach logs.
impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

fn signing_input(path: &str, body: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(path.len() + 1 + body.len());
    input.extend_from_slice(path.as_bytes());
    input.push(b':');
    input.extend_from_slice(body);
    input
}

fn digest(secret: &str, input: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(input);
    mac
}

impl RequestSigner {
    /// Build a signer from the configured secret list, rotation order
    /// preserved: index 0 signs, all indices verify. Blank entries are
    /// dropped; an effectively empty list is a configuration error.
    pub fn new(secrets: Vec<String>) -> Result<RequestSigner, AuthError> {
        let secrets: Vec<String> = secrets
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if secrets.is_empty() {
            return Err(AuthError::NoSecretsConfigured);
        }
        Ok(RequestSigner { secrets })
    }

    /// Sign `path + ":" + body` with the current signer secret.
    pub fn sign(&self, path: &str, body: &[u8]) -> String {
        let mac = digest(&self.secrets[0], &signing_input(path, body));
        format!(
            "{}:{}",
            SIGNATURE_VERSION,
            hex::encode(mac.finalize().into_bytes())
        )
    }

    /// Verify a tag against every configured secret in order, accepting on
    /// the first constant-time match. Tags with an unknown version token are
    /// rejected outright.
    pub fn verify(&self, path: &str, body: &[u8], tag: &str) -> bool {
        let hex_digest = match tag.strip_prefix(SIGNATURE_VERSION).and_then(|rest| {
            rest.strip_prefix(':')
        }) {
            Some(rest) => rest,
            None => return false,
        };
        let expected = match hex::decode(hex_digest) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let input = signing_input(path, body);
        self.secrets
            .iter()
            .any(|secret| digest(secret, &input).verify_slice(&expected).is_ok())
    }
}
