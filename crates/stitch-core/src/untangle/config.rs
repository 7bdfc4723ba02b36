use crate::error::{Result, StitchError};
use crate::keys::StitchKey;
use serde::{Deserialize, Serialize};

/// Configuration for the untangler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UntangleConfig {
    /// Key holding a node's canonical identity. Default: I_UNII.
    pub root_key: StitchKey,

    /// Directed relations pointing from a node to its canonical parent.
    /// Default: [R_activeMoiety].
    pub terminal_keys: Vec<StitchKey>,

    /// High-priority keys whose single values are merged outright.
    /// Default: [I_UNII].
    pub exact_keys: Vec<StitchKey>,

    /// Keys searched for disjoint cliques, most trusted first.
    pub clique_keys: Vec<StitchKey>,

    /// Keys searched for a best clique when resolving leftovers.
    /// Default: [H_LyChI_L3, N_Name, T_Keyword].
    pub secondary_keys: Vec<StitchKey>,

    /// Key followed transitively when resolving leftovers. Default: H_LyChI_L4.
    pub closure_key: StitchKey,

    /// Keys on which singletons poll their neighbors. Default: [N_Name, I_CAS, I_CODE].
    pub salvage_keys: Vec<StitchKey>,

    /// Cliques defined only by a weak key are dropped unless a member lacks
    /// the strong key.
    pub stereo_rules: Vec<StereoRule>,

    /// DataSource that owns materialized stitches. Default: "stitch_v1".
    pub source_key: String,

    /// Display name used when that DataSource is first registered.
    pub source_name: String,
}

/// Weak/strong key pair for the stereo-evidence clique filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StereoRule {
    pub weak: StitchKey,
    pub strong: StitchKey,
}

impl Default for UntangleConfig {
    fn default() -> Self {
        Self {
            root_key: StitchKey::Unii,
            terminal_keys: vec![StitchKey::ActiveMoiety],
            exact_keys: vec![StitchKey::Unii],
            clique_keys: vec![
                StitchKey::InChIKey,
                StitchKey::LyChIL5,
                StitchKey::LyChIL4,
                StitchKey::Cas,
                StitchKey::ChEMBL,
                StitchKey::Cid,
                StitchKey::Code,
                StitchKey::LyChIL3,
                StitchKey::Name,
            ],
            secondary_keys: vec![StitchKey::LyChIL3, StitchKey::Name, StitchKey::Keyword],
            closure_key: StitchKey::LyChIL4,
            salvage_keys: vec![StitchKey::Name, StitchKey::Cas, StitchKey::Code],
            stereo_rules: vec![StereoRule {
                weak: StitchKey::LyChIL3,
                strong: StitchKey::LyChIL4,
            }],
            source_key: "stitch_v1".to_string(),
            source_name: "Stitch v1".to_string(),
        }
    }
}

impl UntangleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_root_key(mut self, key: StitchKey) -> Self {
        self.root_key = key;
        self
    }

    pub fn with_terminal_keys(mut self, keys: Vec<StitchKey>) -> Self {
        self.terminal_keys = keys;
        self
    }

    pub fn with_exact_keys(mut self, keys: Vec<StitchKey>) -> Self {
        self.exact_keys = keys;
        self
    }

    pub fn with_clique_keys(mut self, keys: Vec<StitchKey>) -> Self {
        self.clique_keys = keys;
        self
    }

    pub fn with_secondary_keys(mut self, keys: Vec<StitchKey>) -> Self {
        self.secondary_keys = keys;
        self
    }

    pub fn with_closure_key(mut self, key: StitchKey) -> Self {
        self.closure_key = key;
        self
    }

    pub fn with_salvage_keys(mut self, keys: Vec<StitchKey>) -> Self {
        self.salvage_keys = keys;
        self
    }

    pub fn with_stereo_rules(mut self, rules: Vec<StereoRule>) -> Self {
        self.stereo_rules = rules;
        self
    }

    pub fn with_source(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.source_key = key.into();
        self.source_name = name.into();
        self
    }

    pub fn is_terminal(&self, key: StitchKey) -> bool {
        self.terminal_keys.contains(&key)
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_key.is_directed() {
            return Err(StitchError::Validation(format!(
                "root_key {} must not be a directed key",
                self.root_key
            )));
        }

        if let Some(key) = self.terminal_keys.iter().find(|k| !k.is_directed()) {
            return Err(StitchError::Validation(format!(
                "terminal key {} must be directed",
                key
            )));
        }

        if self.clique_keys.is_empty() {
            return Err(StitchError::Validation("clique_keys must not be empty".into()));
        }

        if self.is_terminal(self.closure_key) {
            return Err(StitchError::Validation(format!(
                "closure_key {} must not be a terminal key",
                self.closure_key
            )));
        }

        if let Some(rule) = self.stereo_rules.iter().find(|r| r.weak == r.strong) {
            return Err(StitchError::Validation(format!(
                "stereo rule uses {} as both weak and strong key",
                rule.weak
            )));
        }

        if self.source_key.is_empty() {
            return Err(StitchError::Validation("source_key must not be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(UntangleConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_validation() {
        let bad = UntangleConfig::new().with_root_key(StitchKey::ActiveMoiety);
        assert!(bad.validate().is_err());

        let bad = UntangleConfig::new().with_terminal_keys(vec![StitchKey::Name]);
        assert!(bad.validate().is_err());

        let bad = UntangleConfig::new().with_clique_keys(vec![]);
        assert!(bad.validate().is_err());

        let bad = UntangleConfig::new().with_stereo_rules(vec![StereoRule {
            weak: StitchKey::Name,
            strong: StitchKey::Name,
        }]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_from_toml_with_defaults() {
        let config = UntangleConfig::from_toml_str(
            r#"
            exact_keys = ["I_UNII", "H_InChIKey"]
            closure_key = "H_LyChI_L5"
            source_key = "stitch_v2"

            [[stereo_rules]]
            weak = "H_LyChI_L3"
            strong = "H_LyChI_L5"
            "#,
        )
        .unwrap();

        assert_eq!(config.exact_keys, vec![StitchKey::Unii, StitchKey::InChIKey]);
        assert_eq!(config.closure_key, StitchKey::LyChIL5);
        assert_eq!(config.root_key, StitchKey::Unii);
        assert_eq!(config.stereo_rules[0].strong, StitchKey::LyChIL5);
        assert_eq!(config.source_key, "stitch_v2");
    }

    #[test]
    fn test_from_toml_rejects_unknown_key() {
        assert!(UntangleConfig::from_toml_str(r#"closure_key = "I_NOPE""#).is_err());
        assert!(UntangleConfig::from_toml_str(r#"closure_key = "R_activeMoiety""#).is_err());
    }
}
