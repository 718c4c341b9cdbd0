use sha2::{Digest, Sha256};

use crate::config::FingerprintMode;
use crate::models::request::RequestContext;

/// Derives the visitor fingerprint used as detection cache key and as the
/// identity for per-visitor behavioral state.
///
/// Basic mode hashes the client address and User-Agent. Detailed mode also
/// folds in method, path and the Accept family of headers, which produces
/// finer-grained cache entries. Collisions are tolerable: this is a cache
/// key, not an authentication token.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintGenerator {
    mode: FingerprintMode,
}

impl FingerprintGenerator {
    pub fn new(mode: FingerprintMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> FingerprintMode {
        self.mode
    }

    pub fn generate(&self, ctx: &RequestContext) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(7);
        let ip = ctx.client_ip.to_string();
        parts.push(&ip);
        parts.push(ctx.user_agent());

        if self.mode == FingerprintMode::Detailed {
            parts.push(ctx.header("accept").unwrap_or(""));
            parts.push(ctx.header("accept-language").unwrap_or(""));
            parts.push(ctx.header("accept-encoding").unwrap_or(""));
            parts.push(&ctx.method);
            parts.push(&ctx.path);
        }

        hash_parts(&parts)
    }
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new(FingerprintMode::Basic)
    }
}

/// Hex SHA-256 over `|`-joined parts.
pub fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
