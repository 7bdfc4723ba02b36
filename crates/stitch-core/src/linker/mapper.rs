//! Field mappers: project source payload fields onto stitch keys.
//!
//! A [`SourceMapping`] is compiled once from a [`MappingConfig`] and owns its
//! compiled patterns. Projection applies the mapping's blacklist before the
//! linker ever sees a value.

use crate::error::{Result, StitchError};
use crate::keys::StitchKey;
use crate::linker::blacklist::{Blacklist, BlacklistEntry};
use crate::value::{Scalar, Value};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw string values of `field`: a string, a number, or an array of those.
fn field_values(payload: &serde_json::Value, field: &str) -> Vec<String> {
    fn scalar(v: &serde_json::Value) -> Option<String> {
        match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    match payload.get(field) {
        Some(serde_json::Value::Array(items)) => items.iter().filter_map(scalar).collect(),
        Some(v) => scalar(v).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Trait for strategies that derive stitch values from a payload
pub trait FieldMapper: Send + Sync {
    fn key(&self) -> StitchKey;

    fn map(&self, payload: &serde_json::Value) -> Vec<Scalar>;
}

/// Copies a field verbatim.
#[derive(Debug, Clone)]
pub struct DirectMapper {
    field: String,
    key: StitchKey,
}

impl DirectMapper {
    pub fn new(field: impl Into<String>, key: StitchKey) -> Self {
        Self {
            field: field.into(),
            key,
        }
    }
}

impl FieldMapper for DirectMapper {
    fn key(&self) -> StitchKey {
        self.key
    }

    fn map(&self, payload: &serde_json::Value) -> Vec<Scalar> {
        field_values(payload, &self.field)
            .iter()
            .filter_map(|raw| Scalar::parse(raw, self.key.value_type()))
            .collect()
    }
}

/// Keeps values matching a pattern. The first capture group, when present,
/// becomes the value; otherwise the whole match does.
#[derive(Debug, Clone)]
pub struct RegexMapper {
    field: String,
    key: StitchKey,
    pattern: Regex,
}

impl RegexMapper {
    pub fn new(field: impl Into<String>, key: StitchKey, pattern: &str) -> Result<Self> {
        Ok(Self {
            field: field.into(),
            key,
            pattern: Regex::new(pattern)?,
        })
    }
}

impl FieldMapper for RegexMapper {
    fn key(&self) -> StitchKey {
        self.key
    }

    fn map(&self, payload: &serde_json::Value) -> Vec<Scalar> {
        field_values(payload, &self.field)
            .iter()
            .filter_map(|raw| {
                let caps = self.pattern.captures(raw)?;
                let m = caps.get(1).or_else(|| caps.get(0))?;
                Scalar::parse(m.as_str(), self.key.value_type())
            })
            .collect()
    }
}

/// Keeps values starting with a prefix (case-insensitive), optionally
/// stripping it.
#[derive(Debug, Clone)]
pub struct PrefixMapper {
    field: String,
    key: StitchKey,
    prefix: String,
    strip: bool,
}

impl PrefixMapper {
    pub fn new(field: impl Into<String>, key: StitchKey, prefix: impl Into<String>, strip: bool) -> Self {
        Self {
            field: field.into(),
            key,
            prefix: prefix.into(),
            strip,
        }
    }
}

impl FieldMapper for PrefixMapper {
    fn key(&self) -> StitchKey {
        self.key
    }

    fn map(&self, payload: &serde_json::Value) -> Vec<Scalar> {
        let n = self.prefix.len();
        field_values(payload, &self.field)
            .iter()
            .filter_map(|raw| {
                let raw = raw.trim();
                let head = raw.get(..n)?;
                if !head.eq_ignore_ascii_case(&self.prefix) {
                    return None;
                }
                let kept = if self.strip { &raw[n..] } else { raw };
                Scalar::parse(kept, self.key.value_type())
            })
            .collect()
    }
}

/// Compiled projection of one data source's payloads.
pub struct SourceMapping {
    mappers: Vec<Box<dyn FieldMapper>>,
    blacklist: Blacklist,
}

impl std::fmt::Debug for SourceMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceMapping")
            .field("mappers", &self.mappers.len())
            .field("blacklist", &self.blacklist)
            .finish()
    }
}

impl Default for SourceMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMapping {
    pub fn new() -> Self {
        Self {
            mappers: Vec::new(),
            blacklist: Blacklist::new(),
        }
    }

    pub fn with_mapper(mut self, mapper: impl FieldMapper + 'static) -> Self {
        self.mappers.push(Box::new(mapper));
        self
    }

    pub fn with_blacklist(mut self, blacklist: Blacklist) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Stitch values of `payload`, merged per key in mapper order.
    pub fn project(&self, payload: &serde_json::Value) -> BTreeMap<StitchKey, Value> {
        let mut out: BTreeMap<StitchKey, Vec<Scalar>> = BTreeMap::new();
        for mapper in &self.mappers {
            let key = mapper.key();
            for scalar in mapper.map(payload) {
                if self.blacklist.contains(key, &scalar) {
                    continue;
                }
                let slot = out.entry(key).or_default();
                if !slot.contains(&scalar) {
                    slot.push(scalar);
                }
            }
        }
        out.into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k, Value::list(v)))
            .collect()
    }
}

/// `[[fields]]`: a direct field copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    pub key: StitchKey,
}

/// `[[patterns]]`: a regex-derived value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub field: String,
    pub key: StitchKey,
    pub regex: String,
}

/// `[[prefixes]]`: a prefix-derived value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixRule {
    pub field: String,
    pub key: StitchKey,
    pub prefix: String,
    #[serde(default)]
    pub strip: bool,
}

/// Declarative mapping for one data source, loadable from TOML.
///
/// ```toml
/// [[fields]]
/// field = "UNII"
/// key = "I_UNII"
///
/// [[patterns]]
/// field = "Codes"
/// key = "I_CAS"
/// regex = '^CAS:(\d+-\d+-\d)$'
///
/// [[blacklist]]
/// key = "N_Name"
/// values = ["WATER"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub fields: Vec<FieldRule>,
    pub patterns: Vec<PatternRule>,
    pub prefixes: Vec<PrefixRule>,
    pub blacklist: Vec<BlacklistEntry>,
}

impl MappingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn with_field(mut self, field: impl Into<String>, key: StitchKey) -> Self {
        self.fields.push(FieldRule {
            field: field.into(),
            key,
        });
        self
    }

    pub fn with_pattern(
        mut self,
        field: impl Into<String>,
        key: StitchKey,
        regex: impl Into<String>,
    ) -> Self {
        self.patterns.push(PatternRule {
            field: field.into(),
            key,
            regex: regex.into(),
        });
        self
    }

    pub fn with_blacklisted<I, S>(mut self, key: StitchKey, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist.push(BlacklistEntry {
            key,
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        let empty_field = self
            .fields
            .iter()
            .map(|r| &r.field)
            .chain(self.patterns.iter().map(|r| &r.field))
            .chain(self.prefixes.iter().map(|r| &r.field))
            .any(|f| f.trim().is_empty());
        if empty_field {
            return Err(StitchError::Validation("mapping field name is empty".into()));
        }

        if self.prefixes.iter().any(|r| r.prefix.is_empty()) {
            return Err(StitchError::Validation("mapping prefix is empty".into()));
        }

        Ok(())
    }

    /// Compile patterns and build the mapping.
    pub fn compile(&self) -> Result<SourceMapping> {
        self.validate()?;

        let mut mapping = SourceMapping::new().with_blacklist(Blacklist::from(self.blacklist.as_slice()));
        for rule in &self.fields {
            mapping = mapping.with_mapper(DirectMapper::new(&rule.field, rule.key));
        }
        for rule in &self.patterns {
            mapping = mapping.with_mapper(RegexMapper::new(&rule.field, rule.key, &rule.regex)?);
        }
        for rule in &self.prefixes {
            mapping = mapping.with_mapper(PrefixMapper::new(
                &rule.field,
                rule.key,
                &rule.prefix,
                rule.strip,
            ));
        }
        Ok(mapping)
    }
}
