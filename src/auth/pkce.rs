// PKCE helpers for the wallet authorization handshake
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// 32 random bytes encode to a 43 character verifier, the RFC 7636 minimum.
const CODE_VERIFIER_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeMethod {
    S256,
    Plain,
}

impl ChallengeMethod {
    /// The exact token the wallet expects in `code_challenge_method`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeMethod::S256 => "S256",
            ChallengeMethod::Plain => "plain",
        }
    }
}

impl fmt::Display for ChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CodeChallenge {
    pub value: String,
    pub method: ChallengeMethod,
}

pub fn generate_code_verifier() -> String {
    let mut random = [0u8; CODE_VERIFIER_BYTES];
    rand::thread_rng().fill_bytes(&mut random);
    general_purpose::URL_SAFE_NO_PAD.encode(random)
}

pub fn code_challenge_s256(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// Derive the challenge to send for a verifier. On a secure transport this
/// is the S256 digest; otherwise the verifier itself is sent with the
/// "plain" method, which callers must opt into explicitly.
pub fn generate_code_challenge(verifier: &str, secure_transport: bool) -> CodeChallenge {
    if secure_transport {
        CodeChallenge {
            value: code_challenge_s256(verifier),
            method: ChallengeMethod::S256,
        }
    } else {
        CodeChallenge {
            value: verifier.to_string(),
            method: ChallengeMethod::Plain,
        }
    }
}

/// Random UUID v4, used as the `state` correlation value. Collision
/// avoidance only; the verifier carries the secrecy.
pub fn generate_correlation_token() -> String {
    let mut random = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut random);
    uuid::Builder::from_random_bytes(random)
        .into_uuid()
        .to_string()
}

/// Whether the wallet URL counts as a secure transport for PKCE purposes:
/// https anywhere, or plain http on a loopback host.
pub fn is_secure_transport(url: &Url) -> bool {
    match url.scheme() {
        "https" => true,
        "http" => is_loopback_host(url),
        _ => false,
    }
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
