//! Static extension table.
//!
//! Extensions are compiled in and listed in an [`ExtensionTable`]. Which of
//! them run is decided by configuration; each one declares the API version it
//! was written against and is refused if that does not match
//! [`CURRENT_API_VERSION`].

use crate::registry::HookRegistry;
use crate::ExtensionError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use tracing::{debug, info, warn};

/// Version of the extension interface this build provides.
pub const CURRENT_API_VERSION: &str = "1.1";

/// Entry point of an extension: register hooks, read options, inspect the
/// sandbox. Must not block.
pub type ExtensionInit<S> = fn(
    &mut HookRegistry<S>,
    &serde_json::Value,
    &mut S,
) -> Result<(), Box<dyn Error + Send + Sync>>;

/// A compiled-in extension.
pub struct ExtensionDescriptor<S> {
    pub name: &'static str,
    /// Compatibility marker. `None` means the extension never declared one.
    pub requires_api_version: Option<&'static str>,
    pub init: ExtensionInit<S>,
}

impl<S> Clone for ExtensionDescriptor<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for ExtensionDescriptor<S> {}

impl<S> std::fmt::Debug for ExtensionDescriptor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("name", &self.name)
            .field("requires_api_version", &self.requires_api_version)
            .finish_non_exhaustive()
    }
}

impl<S> ExtensionDescriptor<S> {
    /// Refuse extensions without a marker or written for another version.
    pub fn check_compatible(&self) -> Result<(), ExtensionError> {
        match self.requires_api_version {
            None => Err(ExtensionError::MissingApiVersion(self.name.to_string())),
            Some(requested) if requested != CURRENT_API_VERSION => {
                Err(ExtensionError::VersionMismatch {
                    name: self.name.to_string(),
                    requested: requested.to_string(),
                    current: CURRENT_API_VERSION,
                })
            }
            Some(_) => Ok(()),
        }
    }
}

/// One entry of the configured extension list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    pub name: String,
    #[serde(default = "default_enable")]
    pub enable: bool,
    #[serde(default)]
    pub options: serde_json::Value,
}

fn default_enable() -> bool {
    true
}

impl ExtensionConfig {
    pub fn enabled(name: &str, options: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            enable: true,
            options,
        }
    }
}

/// The extensions this program knows about.
pub struct ExtensionTable<S> {
    descriptors: Vec<ExtensionDescriptor<S>>,
    loaded: bool,
}

impl<S> ExtensionTable<S> {
    pub fn new(descriptors: Vec<ExtensionDescriptor<S>>) -> Self {
        Self {
            descriptors,
            loaded: false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ExtensionDescriptor<S>> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.iter().map(|d| d.name)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Initialize every enabled extension in `configured`, in order.
    ///
    /// Runs once; later calls do nothing. Extensions that are enabled but not
    /// in the table are skipped with a warning. Returns the names that were
    /// initialized.
    ///
    /// A failed load leaves the table unloaded. Hooks registered before the
    /// failure stay in `registry`, so retry with a fresh one.
    pub fn load(
        &mut self,
        configured: &[ExtensionConfig],
        registry: &mut HookRegistry<S>,
        state: &mut S,
    ) -> Result<Vec<&'static str>, ExtensionError> {
        if self.loaded {
            debug!("extensions already loaded");
            return Ok(Vec::new());
        }

        let mut initialized = Vec::new();
        for entry in configured.iter().filter(|e| e.enable) {
            let Some(descriptor) = self.get(&entry.name).copied() else {
                warn!(
                    extension = %entry.name,
                    "extension is enabled in configuration but is not available"
                );
                continue;
            };
            descriptor.check_compatible()?;
            (descriptor.init)(registry, &entry.options, state).map_err(|source| {
                ExtensionError::Init {
                    name: descriptor.name.to_string(),
                    source,
                }
            })?;
            info!(extension = descriptor.name, "extension initialized");
            initialized.push(descriptor.name);
        }
        self.loaded = true;
        Ok(initialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counting(
        reg: &mut HookRegistry<Vec<String>>,
        opts: &serde_json::Value,
        state: &mut Vec<String>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if opts["fail"].as_bool() == Some(true) {
            return Err("refusing to start".into());
        }
        state.push(format!("init {}", opts["tag"].as_str().unwrap_or("-")));
        reg.add_fn("postinit", |s| {
            s.push("postinit".into());
            Ok(())
        });
        Ok(())
    }

    fn table(marker: Option<&'static str>) -> ExtensionTable<Vec<String>> {
        ExtensionTable::new(vec![ExtensionDescriptor {
            name: "counting",
            requires_api_version: marker,
            init: counting,
        }])
    }

    #[test]
    fn test_load_runs_init_once() {
        let mut table = table(Some(CURRENT_API_VERSION));
        let mut reg = HookRegistry::new();
        let mut state = Vec::new();
        let conf = vec![ExtensionConfig::enabled("counting", json!({"tag": "a"}))];

        assert_eq!(table.load(&conf, &mut reg, &mut state).unwrap(), vec!["counting"]);
        assert!(table.load(&conf, &mut reg, &mut state).unwrap().is_empty());
        assert_eq!(state, vec!["init a"]);
        assert_eq!(reg.hook_count("postinit"), 1);
    }

    #[test]
    fn test_failed_init_can_be_retried() {
        let mut table = table(Some(CURRENT_API_VERSION));
        let mut state = Vec::new();
        let broken = vec![ExtensionConfig::enabled("counting", json!({"fail": true}))];
        let err = table
            .load(&broken, &mut HookRegistry::new(), &mut state)
            .unwrap_err();
        assert!(matches!(err, ExtensionError::Init { .. }));
        assert!(!table.is_loaded());

        let mut reg = HookRegistry::new();
        let conf = vec![ExtensionConfig::enabled("counting", json!({"tag": "b"}))];
        assert_eq!(table.load(&conf, &mut reg, &mut state).unwrap(), vec!["counting"]);
        assert!(table.is_loaded());
        assert_eq!(state, vec!["init b"]);
        assert_eq!(reg.hook_count("postinit"), 1);
    }

    #[test]
    fn test_missing_marker_is_fatal() {
        let mut table = table(None);
        let conf = vec![ExtensionConfig::enabled("counting", json!({}))];
        let err = table
            .load(&conf, &mut HookRegistry::new(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, ExtensionError::MissingApiVersion(_)));
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let mut table = table(Some("1.0"));
        let conf = vec![ExtensionConfig::enabled("counting", json!({}))];
        let err = table
            .load(&conf, &mut HookRegistry::new(), &mut Vec::new())
            .unwrap_err();
        assert!(err.to_string().contains("requested = 1.0"));
    }

    #[test]
    fn test_unknown_and_disabled_skipped() {
        let mut table = table(Some(CURRENT_API_VERSION));
        let conf: Vec<ExtensionConfig> = serde_json::from_value(json!([
            {"name": "nonexistent"},
            {"name": "counting", "enable": false}
        ]))
        .unwrap();
        let mut state = Vec::new();
        let loaded = table.load(&conf, &mut HookRegistry::new(), &mut state).unwrap();
        assert!(loaded.is_empty());
        assert!(state.is_empty());
    }
}
