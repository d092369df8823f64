//! Process-wide secret cache
//!
//! Secrets are read once and held in memory for the life of the process:
//! explicit init on first read, no teardown. The environment is the fallback
//! source, so `.env`-driven setups (see the demos) keep working.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

static CACHE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<String, String>> {
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Look up a secret by name, consulting the cache first and the environment
/// on a miss. Hits are cached for the life of the process.
pub fn secret(name: &str) -> Option<String> {
    if let Ok(cache) = cache().lock() {
        if let Some(value) = cache.get(name) {
            return Some(value.clone());
        }
    }

    let value = std::env::var(name).ok()?;
    if let Ok(mut cache) = cache().lock() {
        cache.insert(name.to_string(), value.clone());
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_secret_is_none() {
        assert!(secret("KAIWA_TEST_SECRET_MISSING").is_none());
    }

    #[test]
    fn env_value_is_cached_on_first_read() {
        std::env::set_var("KAIWA_TEST_SECRET_CACHED", "first");
        assert_eq!(secret("KAIWA_TEST_SECRET_CACHED").as_deref(), Some("first"));

        // The cache serves subsequent reads even after the env changes.
        std::env::set_var("KAIWA_TEST_SECRET_CACHED", "second");
        assert_eq!(secret("KAIWA_TEST_SECRET_CACHED").as_deref(), Some("first"));
    }
}
