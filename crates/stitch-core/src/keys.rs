use crate::value::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Linking dimension between entities.
///
/// Prefixes follow the wire names: `I_` identifiers, `H_` structure hashes,
/// `N_` names, `R_` relations, `T_` free-text tags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StitchKey {
    #[serde(rename = "I_UNII")]
    Unii,
    #[serde(rename = "I_CAS")]
    Cas,
    #[serde(rename = "I_ChEMBL")]
    ChEMBL,
    #[serde(rename = "I_CID")]
    Cid,
    #[serde(rename = "I_CODE")]
    Code,
    #[serde(rename = "H_InChIKey")]
    InChIKey,
    #[serde(rename = "H_LyChI_L5")]
    LyChIL5,
    #[serde(rename = "H_LyChI_L4")]
    LyChIL4,
    #[serde(rename = "H_LyChI_L3")]
    LyChIL3,
    #[serde(rename = "N_Name")]
    Name,
    #[serde(rename = "R_activeMoiety")]
    ActiveMoiety,
    #[serde(rename = "R_subClassOf")]
    SubClassOf,
    #[serde(rename = "R_exactMatch")]
    ExactMatch,
    #[serde(rename = "T_Keyword")]
    Keyword,
}

impl StitchKey {
    pub fn all() -> &'static [StitchKey] {
        &[
            StitchKey::Unii,
            StitchKey::Cas,
            StitchKey::ChEMBL,
            StitchKey::Cid,
            StitchKey::Code,
            StitchKey::InChIKey,
            StitchKey::LyChIL5,
            StitchKey::LyChIL4,
            StitchKey::LyChIL3,
            StitchKey::Name,
            StitchKey::ActiveMoiety,
            StitchKey::SubClassOf,
            StitchKey::ExactMatch,
            StitchKey::Keyword,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StitchKey::Unii => "I_UNII",
            StitchKey::Cas => "I_CAS",
            StitchKey::ChEMBL => "I_ChEMBL",
            StitchKey::Cid => "I_CID",
            StitchKey::Code => "I_CODE",
            StitchKey::InChIKey => "H_InChIKey",
            StitchKey::LyChIL5 => "H_LyChI_L5",
            StitchKey::LyChIL4 => "H_LyChI_L4",
            StitchKey::LyChIL3 => "H_LyChI_L3",
            StitchKey::Name => "N_Name",
            StitchKey::ActiveMoiety => "R_activeMoiety",
            StitchKey::SubClassOf => "R_subClassOf",
            StitchKey::ExactMatch => "R_exactMatch",
            StitchKey::Keyword => "T_Keyword",
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            StitchKey::Cid => ValueType::Integer,
            _ => ValueType::String,
        }
    }

    /// Trust ranking, 1 (lowest) to 5 (highest).
    pub fn priority(self) -> u8 {
        match self {
            StitchKey::Unii
            | StitchKey::Cas
            | StitchKey::ChEMBL
            | StitchKey::Cid
            | StitchKey::InChIKey
            | StitchKey::LyChIL5
            | StitchKey::ActiveMoiety => 5,
            StitchKey::Code | StitchKey::LyChIL4 | StitchKey::ExactMatch => 4,
            StitchKey::LyChIL3 | StitchKey::SubClassOf => 3,
            StitchKey::Name | StitchKey::Keyword => 1,
        }
    }

    pub fn is_directed(self) -> bool {
        self.reference_key().is_some()
    }

    /// For directed keys, the key whose values this key points at. An edge
    /// of a directed key runs toward the endpoint that carries the edge value
    /// under the reference key.
    pub fn reference_key(self) -> Option<StitchKey> {
        match self {
            StitchKey::ActiveMoiety => Some(StitchKey::Unii),
            StitchKey::SubClassOf => Some(StitchKey::Code),
            _ => None,
        }
    }
}

impl fmt::Display for StitchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StitchKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StitchKey::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown stitch key '{}'", s))
    }
}
