use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;

pub const TRIAL: &str = "Trial";
pub const REFERRAL: &str = "Referral";
pub const PROMO_CODES: &str = "PromoCodes";
pub const CRYPTO_PAY: &str = "CryptoPay";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct FeatureToggles {
    #[serde(flatten)]
    pub flags: HashMap<String, bool>,
}

impl FeatureToggles {
    // Load from a provided path or env var FEATURE_TOGGLES_PATH, defaulting to ./feature-toggles.json
    pub fn from_path(path: Option<String>) -> Self {
        let default_path = std::env::var("FEATURE_TOGGLES_PATH")
            .unwrap_or_else(|_| "feature-toggles.json".to_string());
        let path = path.unwrap_or(default_path);

        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path, error = %e, "Malformed feature toggles file, using defaults");
                FeatureToggles::default()
            }),
            Err(_) => FeatureToggles::default(),
        }
    }

    pub fn from_env_path() -> Self {
        Self::from_path(None)
    }

    pub fn with_flag(mut self, name: &str, enabled: bool) -> Self {
        self.flags.insert(name.to_string(), enabled);
        self
    }

    pub fn is_enabled_or(&self, name: &str, default: bool) -> bool {
        self.flags.get(name).copied().unwrap_or(default)
    }

    pub fn trial_enabled(&self) -> bool {
        self.is_enabled_or(TRIAL, true)
    }

    pub fn referral_enabled(&self) -> bool {
        self.is_enabled_or(REFERRAL, true)
    }

    pub fn promo_codes_enabled(&self) -> bool {
        self.is_enabled_or(PROMO_CODES, true)
    }

    /// Payment methods are keyed by their display name; CryptoPay is opt-in
    pub fn payment_method_enabled(&self, method: &str) -> bool {
        self.is_enabled_or(method, method != CRYPTO_PAY)
    }

    pub fn enabled_features(&self) -> Vec<String> {
        self.flags
            .iter()
            .filter(|(_, &enabled)| enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Toggles shared across request handlers, replaceable at runtime
#[derive(Clone, Debug, Default)]
pub struct ToggleHandle {
    inner: Arc<RwLock<FeatureToggles>>,
}

impl ToggleHandle {
    pub fn new(toggles: FeatureToggles) -> Self {
        Self {
            inner: Arc::new(RwLock::new(toggles)),
        }
    }

    pub fn current(&self) -> FeatureToggles {
        self.inner.read().clone()
    }

    pub fn replace(&self, toggles: FeatureToggles) {
        *self.inner.write() = toggles;
    }

    // Reload toggles from file
    pub fn reload(&self) -> FeatureToggles {
        let toggles = FeatureToggles::from_env_path();
        self.replace(toggles.clone());
        toggles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_flags_fall_back_to_defaults() {
        let toggles = FeatureToggles::default();
        assert!(toggles.trial_enabled());
        assert!(toggles.payment_method_enabled("Stars"));
        assert!(!toggles.payment_method_enabled(CRYPTO_PAY));
    }

    #[test]
    fn test_loads_flags_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Trial": false, "CryptoPay": true}}"#).unwrap();

        let toggles = FeatureToggles::from_path(Some(file.path().to_string_lossy().to_string()));
        assert!(!toggles.trial_enabled());
        assert!(toggles.payment_method_enabled(CRYPTO_PAY));
        assert!(toggles.referral_enabled());
    }

    #[test]
    fn test_handle_replace_is_visible_to_clones() {
        let handle = ToggleHandle::default();
        let other = handle.clone();
        handle.replace(FeatureToggles::default().with_flag(PROMO_CODES, false));
        assert!(!other.current().promo_codes_enabled());
    }
}
