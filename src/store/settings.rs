//! Per-provider credentials, the active provider and the connection flag.

use crate::config::{ProviderConfig, ProviderConfigUpdate, ProviderKind};
use crate::error::Result;
use crate::store::{document, lock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsDocument {
    #[serde(default)]
    configs: BTreeMap<ProviderKind, ProviderConfig>,
    #[serde(default = "default_provider")]
    active_provider: ProviderKind,
    #[serde(default)]
    connected: bool,
    #[serde(default)]
    total_spent: f64,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Fal
}

impl Default for SettingsDocument {
    fn default() -> Self {
        Self {
            configs: ProviderKind::ALL
                .into_iter()
                .map(|kind| (kind, ProviderConfig::defaults(kind)))
                .collect(),
            active_provider: default_provider(),
            connected: false,
            total_spent: 0.0,
        }
    }
}

impl SettingsDocument {
    /// Fills in missing providers and drops a stale connection flag.
    fn normalize(mut self) -> Self {
        for kind in ProviderKind::ALL {
            let config = self
                .configs
                .entry(kind)
                .or_insert_with(|| ProviderConfig::defaults(kind));
            config.provider = kind;
        }
        if self.connected && !self.configs[&self.active_provider].has_api_key() {
            self.connected = false;
        }
        self
    }
}

/// Provider settings, persisted as one JSON document.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    state: Mutex<SettingsDocument>,
}

impl SettingsStore {
    /// Opens the settings at `path`. A missing or corrupt file yields defaults.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = document::load::<SettingsDocument>(&path)
            .unwrap_or_default()
            .normalize();
        tracing::debug!(
            path = %path.display(),
            provider = %doc.active_provider,
            has_api_key = doc.configs[&doc.active_provider].has_api_key(),
            connected = doc.connected,
            "loaded provider settings"
        );
        Self {
            path,
            state: Mutex::new(doc),
        }
    }

    /// Opens the settings under the data root.
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(crate::paths::settings_path()?))
    }

    /// Location of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, doc: &SettingsDocument) -> Result<()> {
        document::save(&self.path, doc)
    }

    /// Provider new generations go to.
    pub fn active_provider(&self) -> ProviderKind {
        lock(&self.state).active_provider
    }

    /// Switches the active provider.
    pub fn set_active_provider(&self, kind: ProviderKind) -> Result<()> {
        let mut doc = lock(&self.state);
        doc.active_provider = kind;
        self.persist(&doc)
    }

    /// Stored config for `kind`, exactly as persisted.
    pub fn config(&self, kind: ProviderKind) -> ProviderConfig {
        lock(&self.state).configs[&kind].clone()
    }

    /// Stored config of the active provider.
    pub fn current_config(&self) -> ProviderConfig {
        let doc = lock(&self.state);
        doc.configs[&doc.active_provider].clone()
    }

    /// Config for `kind` with the key filled from the environment when blank.
    pub fn resolved_config(&self, kind: ProviderKind) -> ProviderConfig {
        self.config(kind).with_env_fallback()
    }

    /// Applies a partial update to one provider's config.
    pub fn update_config(&self, kind: ProviderKind, update: ProviderConfigUpdate) -> Result<()> {
        let mut doc = lock(&self.state);
        if let Some(config) = doc.configs.get_mut(&kind) {
            config.merge(update);
        }
        self.persist(&doc)
    }

    /// Stores an API key.
    pub fn set_api_key(&self, kind: ProviderKind, api_key: impl Into<String>) -> Result<()> {
        self.update_config(
            kind,
            ProviderConfigUpdate {
                api_key: Some(api_key.into()),
                ..Default::default()
            },
        )
    }

    /// Stores a proxy URL; a blank value clears it.
    pub fn set_proxy(&self, kind: ProviderKind, proxy: impl Into<String>) -> Result<()> {
        let proxy = proxy.into();
        let proxy = (!proxy.trim().is_empty()).then(|| proxy.trim().to_string());
        self.update_config(
            kind,
            ProviderConfigUpdate {
                proxy: Some(proxy),
                ..Default::default()
            },
        )
    }

    /// Returns true if the active provider has a stored key.
    pub fn has_api_key(&self) -> bool {
        let doc = lock(&self.state);
        doc.configs[&doc.active_provider].has_api_key()
    }

    /// Records the outcome of the last connection test.
    pub fn set_connected(&self, connected: bool) -> Result<()> {
        let mut doc = lock(&self.state);
        doc.connected = connected;
        self.persist(&doc)
    }

    /// Whether the last connection test succeeded.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Adds a provider-reported cost to the running total.
    pub fn add_spent(&self, amount: f64) -> Result<()> {
        if !amount.is_finite() || amount <= 0.0 {
            return Ok(());
        }
        let mut doc = lock(&self.state);
        doc.total_spent += amount;
        self.persist(&doc)
    }

    /// Total provider-reported cost so far.
    pub fn total_spent(&self) -> f64 {
        lock(&self.state).total_spent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_TIMEOUT_MS, FAL_DEFAULT_BASE_URL, GOOGLE_DEFAULT_BASE_URL};

    fn store() -> (tempfile::TempDir, SettingsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json"));
        (dir, store)
    }

    #[test]
    fn test_defaults() {
        let (_dir, store) = store();
        assert_eq!(store.active_provider(), ProviderKind::Fal);
        assert!(!store.has_api_key());
        assert!(!store.is_connected());

        let fal = store.config(ProviderKind::Fal);
        assert_eq!(fal.base_url.as_deref(), Some(FAL_DEFAULT_BASE_URL));
        assert_eq!(fal.timeout_ms, Some(DEFAULT_TIMEOUT_MS));
        assert_eq!(
            store.config(ProviderKind::Google).base_url.as_deref(),
            Some(GOOGLE_DEFAULT_BASE_URL)
        );
        assert_eq!(store.config(ProviderKind::Custom).base_url, None);
    }

    #[test]
    fn test_persist_and_reopen() {
        let (dir, store) = store();
        store.set_api_key(ProviderKind::Google, "g-key").unwrap();
        store.set_active_provider(ProviderKind::Google).unwrap();
        store.set_proxy(ProviderKind::Google, "http://127.0.0.1:7890").unwrap();
        store.set_connected(true).unwrap();

        let reopened = SettingsStore::open(dir.path().join("settings.json"));
        assert_eq!(reopened.active_provider(), ProviderKind::Google);
        assert!(reopened.has_api_key());
        assert!(reopened.is_connected());
        assert_eq!(
            reopened.current_config().proxy.as_deref(),
            Some("http://127.0.0.1:7890")
        );
    }

    #[test]
    fn test_connected_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"activeProvider": "google", "connected": true, "configs": {"fal": {"provider": "fal", "apiKey": "k"}}}"#,
        )
        .unwrap();

        let store = SettingsStore::open(&path);
        assert_eq!(store.active_provider(), ProviderKind::Google);
        assert!(!store.is_connected());
        assert_eq!(store.config(ProviderKind::Fal).api_key, "k");
        assert_eq!(
            store.config(ProviderKind::Google).base_url.as_deref(),
            Some(GOOGLE_DEFAULT_BASE_URL)
        );
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{\"configs\": 12").unwrap();
        let store = SettingsStore::open(&path);
        assert_eq!(store.active_provider(), ProviderKind::Fal);
    }

    #[test]
    fn test_update_config_and_clear_proxy() {
        let (_dir, store) = store();
        store
            .update_config(
                ProviderKind::Custom,
                ProviderConfigUpdate {
                    api_key: Some("c".into()),
                    base_url: Some(Some("http://localhost:9000".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        store.set_proxy(ProviderKind::Custom, "http://p:1").unwrap();
        store.set_proxy(ProviderKind::Custom, "  ").unwrap();

        let custom = store.config(ProviderKind::Custom);
        assert_eq!(custom.api_key, "c");
        assert_eq!(custom.base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(custom.proxy, None);
    }

    #[test]
    fn test_add_spent() {
        let (_dir, store) = store();
        store.add_spent(0.04).unwrap();
        store.add_spent(-1.0).unwrap();
        store.add_spent(0.02).unwrap();
        assert!((store.total_spent() - 0.06).abs() < 1e-9);
    }
}
