//! Coarse identity fingerprinting.
//!
//! Visitors are anonymous, so moderation needs *some* handle on "the same
//! person came back" without authenticated accounts. The fingerprint is a
//! best-effort key derived from connection metadata: the remote address
//! plus a truncated client signature (typically the User-Agent header).
//! Collisions between distinct real users are accepted, as is the same
//! real user fingerprinting differently from a new address.

/// Maximum number of characters of the client signature kept in the
/// fingerprint. Bounds memory use and prevents trivially unbounded keys.
pub const MAX_CLIENT_SIG: usize = 160;

/// Resolves connection metadata into a moderation identity string.
///
/// Pluggable so a stronger scheme (e.g. verified accounts) can replace
/// fingerprinting without touching the pairing or moderation logic.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, addr: &str, client_sig: &str) -> String;
}

/// The default resolver: `"{addr}::{truncated client signature}"`.
///
/// Deterministic for identical inputs.
#[derive(Debug, Default, Clone)]
pub struct Fingerprinter;

impl IdentityResolver for Fingerprinter {
    fn resolve(&self, addr: &str, client_sig: &str) -> String {
        let sig: String = client_sig.chars().take(MAX_CLIENT_SIG).collect();
        format!("{addr}::{sig}")
    }
}
