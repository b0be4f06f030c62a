//! Deployment Configuration
//!
//! Base URL resolution for the quitus verification link. The fallback chain
//! must be preserved: a wrong base URL still produces a scannable QR code,
//! but one that points nowhere useful.

/// Development default when no environment candidate resolves.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Resolve the public base URL from the environment.
///
/// Ordered candidates: `ACGE_BASE_URL`, `APP_BASE_URL`, then `VERCEL_URL`
/// (host only, scheme-prefixed), defaulting to the local development
/// origin. Empty values are skipped.
pub fn resolve_base_url() -> String {
    for key in ["ACGE_BASE_URL", "APP_BASE_URL"] {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.trim_end_matches('/').to_string();
            }
        }
    }
    if let Ok(host) = std::env::var("VERCEL_URL") {
        let trimmed = host.trim();
        if !trimmed.is_empty() {
            return format!("https://{}", trimmed.trim_end_matches('/'));
        }
    }
    DEFAULT_BASE_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-global, so the fallback chain is covered
    // by one sequential test.
    #[test]
    fn test_fallback_chain() {
        std::env::remove_var("ACGE_BASE_URL");
        std::env::remove_var("APP_BASE_URL");
        std::env::remove_var("VERCEL_URL");
        assert_eq!(resolve_base_url(), DEFAULT_BASE_URL);

        std::env::set_var("VERCEL_URL", "acge.vercel.app");
        assert_eq!(resolve_base_url(), "https://acge.vercel.app");

        std::env::set_var("ACGE_BASE_URL", "https://acge.example/");
        assert_eq!(resolve_base_url(), "https://acge.example");

        std::env::remove_var("ACGE_BASE_URL");
        std::env::remove_var("VERCEL_URL");
    }
}
