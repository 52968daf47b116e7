use serde::{Deserialize, Serialize};

/// Field that carries the model name inside instance records and snapshots.
pub const DEFAULT_MODEL_KEY: &str = "__model";

/// When cached views are recomputed after a patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewPolicy {
    /// Mark views dirty; recompute on the next read.
    #[default]
    Lazy,
    /// Recompute dirty views right after the patch, before subscribers run.
    Eager,
}

/// Store-wide settings.
///
/// ```
/// use arbor::{StoreConfig, ViewPolicy};
///
/// let config: StoreConfig = serde_json::from_str(r#"{"view_policy": "eager"}"#).unwrap();
/// assert_eq!(config.model_key, "__model");
/// assert_eq!(config.view_policy, ViewPolicy::Eager);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub model_key: String,
    pub view_policy: ViewPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            model_key: DEFAULT_MODEL_KEY.to_string(),
            view_policy: ViewPolicy::Lazy,
        }
    }
}

impl StoreConfig {
    pub fn with_model_key(mut self, key: impl Into<String>) -> Self {
        self.model_key = key.into();
        self
    }

    pub fn with_view_policy(mut self, policy: ViewPolicy) -> Self {
        self.view_policy = policy;
        self
    }
}
