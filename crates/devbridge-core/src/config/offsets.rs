use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};

pub const VERSION: &str = "Version";
pub const LOAD_START_HOOK_OFFSET: &str = "LoadStartHookOffset";
pub const LOAD_START_HOOK_OFFSET2: &str = "LoadStartHookOffset2";
pub const CDP_FILTER_HOOK_OFFSET: &str = "CDPFilterHookOffset";
pub const RESOURCE_CACHE_POLICY_HOOK_OFFSET: &str = "ResourceCachePolicyHookOffset";
pub const STRUCT_OFFSET: &str = "StructOffset";
/// Key added by the resolver to record which architecture entry matched.
pub const SOURCE_ARCH: &str = "SourceArch";

/// Fields that must be present after resolution, in reporting order.
pub const REQUIRED_FIELDS: [&str; 5] = [
    LOAD_START_HOOK_OFFSET,
    LOAD_START_HOOK_OFFSET2,
    CDP_FILTER_HOOK_OFFSET,
    RESOURCE_CACHE_POLICY_HOOK_OFFSET,
    STRUCT_OFFSET,
];

/// Resolved offsets for one target architecture.
///
/// Serializes back into the key layout the instrumentation script expects,
/// with hook offsets as `0x` hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OffsetConfig {
    #[serde(rename = "Version", skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(rename = "LoadStartHookOffset", serialize_with = "serialize_hex")]
    pub load_start_hook_offset: u64,
    #[serde(rename = "LoadStartHookOffset2", serialize_with = "serialize_hex")]
    pub load_start_hook_offset2: u64,
    #[serde(rename = "CDPFilterHookOffset", serialize_with = "serialize_hex")]
    pub cdp_filter_hook_offset: u64,
    #[serde(rename = "ResourceCachePolicyHookOffset", serialize_with = "serialize_hex")]
    pub resource_cache_policy_hook_offset: u64,
    #[serde(rename = "StructOffset")]
    pub struct_offset: u64,
    #[serde(rename = "Arch", skip_serializing_if = "Option::is_none")]
    pub source_arch: Option<String>,
}

/// An offset as written in a config file: a JSON integer, a decimal string
/// or a `0x`-prefixed hex string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OffsetValue {
    Number(u64),
    Text(String),
}

impl OffsetValue {
    pub fn parse(&self, field: &'static str) -> Result<u64> {
        match self {
            OffsetValue::Number(n) => Ok(*n),
            OffsetValue::Text(s) => parse_offset(s).map_err(|message| Error::InvalidOffset {
                field,
                message,
            }),
        }
    }
}

/// Parse an offset string. Strings with a `0x`/`0X` prefix are hex, anything
/// else is decimal.
pub fn parse_offset(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex value {:?}: {}", s, e))
    } else {
        s.parse::<u64>()
            .map_err(|e| format!("invalid integer value {:?}: {}", s, e))
    }
}

/// Format an offset as a hex string with 0x prefix.
pub fn format_hex_offset(offset: u64) -> String {
    format!("0x{:X}", offset)
}

fn serialize_hex<S: Serializer>(offset: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_hex_offset(*offset))
}

/// A resolved but not yet validated entry. Every field is optional so that
/// validation can report all missing fields together.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct OffsetCandidate {
    #[serde(rename = "Version")]
    pub version: Option<OffsetValue>,
    #[serde(rename = "LoadStartHookOffset")]
    pub load_start_hook_offset: Option<OffsetValue>,
    #[serde(rename = "LoadStartHookOffset2")]
    pub load_start_hook_offset2: Option<OffsetValue>,
    #[serde(rename = "CDPFilterHookOffset")]
    pub cdp_filter_hook_offset: Option<OffsetValue>,
    #[serde(rename = "ResourceCachePolicyHookOffset")]
    pub resource_cache_policy_hook_offset: Option<OffsetValue>,
    #[serde(rename = "StructOffset")]
    pub struct_offset: Option<OffsetValue>,
    #[serde(rename = "SourceArch")]
    pub source_arch: Option<String>,
}

impl OffsetCandidate {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let present = [
            self.load_start_hook_offset.is_some(),
            self.load_start_hook_offset2.is_some(),
            self.cdp_filter_hook_offset.is_some(),
            self.resource_cache_policy_hook_offset.is_some(),
            self.struct_offset.is_some(),
        ];
        REQUIRED_FIELDS
            .iter()
            .zip(present)
            .filter(|(_, present)| !present)
            .map(|(field, _)| *field)
            .collect()
    }
}
