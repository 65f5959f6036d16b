use super::EnforcementConfig;
use std::sync::{Arc, RwLock};

/// Read-only view of the current configuration. Re-read by the loop every iteration.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> EnforcementConfig;
}

/// Configuration shared between the loop and whatever edits it.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<EnforcementConfig>>,
}

impl SharedConfig {
    pub fn new(config: EnforcementConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn update<F>(&self, edit: F)
    where
        F: FnOnce(&mut EnforcementConfig),
    {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        edit(&mut guard);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.update(|config| config.enabled = enabled);
    }
}

impl ConfigSource for SharedConfig {
    fn snapshot(&self) -> EnforcementConfig {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ConfigSource for EnforcementConfig {
    fn snapshot(&self) -> EnforcementConfig {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_config_sees_updates() {
        let shared = SharedConfig::new(EnforcementConfig::default());
        let reader = shared.clone();
        shared.set_enabled(false);
        assert!(!reader.snapshot().enabled);
    }
}
