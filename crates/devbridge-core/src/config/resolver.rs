use std::str::FromStr;

use serde_json::{Map, Value};
use strum::{Display, EnumString};
use tracing::debug;

use super::offsets::*;
use crate::error::{Error, Result};

/// Keys under which a versioned config may hold its architecture table.
const ARCH_TABLE_KEYS: [&str; 3] = ["Arch", "ARCH", "arch"];

/// Canonical architecture names used as keys in versioned offset files.
///
/// Parsing accepts the common aliases, display yields the canonical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Arch {
    #[strum(to_string = "x64", serialize = "x86_64", serialize = "amd64")]
    X64,
    #[strum(to_string = "x86", serialize = "ia32", serialize = "i386", serialize = "i686")]
    X86,
    #[strum(to_string = "arm64", serialize = "aarch64")]
    Arm64,
}

/// Architecture identifier of the running host.
pub fn host_arch() -> &'static str {
    std::env::consts::ARCH
}

/// Table keys to try for `arch`, most specific first.
pub fn arch_candidates(arch: &str) -> Vec<String> {
    let mut candidates = vec![arch.to_string()];
    if let Ok(canonical) = Arch::from_str(arch) {
        let canonical = canonical.to_string();
        if canonical != arch {
            candidates.push(canonical);
        }
    }
    candidates
}

fn has_hook_field(entry: &Map<String, Value>) -> bool {
    match entry.get(LOAD_START_HOOK_OFFSET) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Pick the offset entry that applies to `arch`.
///
/// A legacy flat config is returned unchanged. For a versioned config the
/// matching architecture entry is returned with the top-level `Version`
/// merged in and a `SourceArch` tag naming the key that matched. Returns
/// `None` when nothing applies.
pub fn resolve(raw: &Value, arch: &str) -> Option<Value> {
    let root = raw.as_object()?;
    if has_hook_field(root) {
        return Some(raw.clone());
    }

    let table = ARCH_TABLE_KEYS
        .iter()
        .find_map(|key| root.get(*key))?
        .as_object()?;

    for key in arch_candidates(arch) {
        let Some(entry) = table.get(&key).and_then(Value::as_object) else {
            continue;
        };
        if !has_hook_field(entry) {
            debug!("Arch entry {} has no {}, skipping", key, LOAD_START_HOOK_OFFSET);
            continue;
        }

        let mut merged = entry.clone();
        if let Some(version) = root.get(VERSION).filter(|v| !v.is_null()) {
            merged.insert(VERSION.to_string(), version.clone());
        }
        merged.insert(SOURCE_ARCH.to_string(), Value::String(key));
        return Some(Value::Object(merged));
    }

    None
}

/// Validate a resolved entry, reporting every missing required field.
pub fn validate(resolved: &Value) -> Result<OffsetConfig> {
    if !resolved.is_object() {
        return Err(Error::InvalidConfig(
            "offset entry is not a JSON object".to_string(),
        ));
    }
    let candidate: OffsetCandidate = serde_json::from_value(resolved.clone())?;

    let missing = candidate.missing_fields();
    if !missing.is_empty() {
        return Err(Error::MissingFields(missing));
    }

    Ok(OffsetConfig {
        version: candidate
            .version
            .as_ref()
            .map(|v| v.parse(VERSION))
            .transpose()?,
        load_start_hook_offset: required(LOAD_START_HOOK_OFFSET, candidate.load_start_hook_offset)?,
        load_start_hook_offset2: required(
            LOAD_START_HOOK_OFFSET2,
            candidate.load_start_hook_offset2,
        )?,
        cdp_filter_hook_offset: required(CDP_FILTER_HOOK_OFFSET, candidate.cdp_filter_hook_offset)?,
        resource_cache_policy_hook_offset: required(
            RESOURCE_CACHE_POLICY_HOOK_OFFSET,
            candidate.resource_cache_policy_hook_offset,
        )?,
        struct_offset: required(STRUCT_OFFSET, candidate.struct_offset)?,
        source_arch: candidate.source_arch,
    })
}

fn required(field: &'static str, value: Option<OffsetValue>) -> Result<u64> {
    value
        .ok_or_else(|| Error::MissingFields(vec![field]))?
        .parse(field)
}

/// Resolve and validate in one step.
pub fn resolve_and_validate(raw: &Value, arch: &str) -> Result<OffsetConfig> {
    let resolved = resolve(raw, arch).ok_or_else(|| Error::UnresolvedConfig {
        arch: arch.to_string(),
    })?;
    validate(&resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat() -> Value {
        json!({
            "LoadStartHookOffset": "0x1",
            "LoadStartHookOffset2": "0x2",
            "CDPFilterHookOffset": "0x3",
            "ResourceCachePolicyHookOffset": "0x4",
            "StructOffset": 10
        })
    }

    #[test]
    fn test_arch_candidates() {
        assert_eq!(arch_candidates("x86_64"), vec!["x86_64", "x64"]);
        assert_eq!(arch_candidates("amd64"), vec!["amd64", "x64"]);
        assert_eq!(arch_candidates("ia32"), vec!["ia32", "x86"]);
        assert_eq!(arch_candidates("aarch64"), vec!["aarch64", "arm64"]);
        assert_eq!(arch_candidates("arm64"), vec!["arm64"]);
        assert_eq!(arch_candidates("riscv64"), vec!["riscv64"]);
    }

    #[test]
    fn test_legacy_config_returned_unchanged() {
        let raw = flat();
        assert_eq!(resolve(&raw, "arm64"), Some(raw.clone()));
        assert_eq!(resolve(&raw, "anything"), Some(raw));
    }

    #[test]
    fn test_versioned_config_merges_top_level_version() {
        let raw = json!({
            "Version": 17078,
            "Arch": {
                "arm64": {
                    "LoadStartHookOffset": "0x4F0620C",
                    "LoadStartHookOffset2": "0x81CEC08",
                    "CDPFilterHookOffset": "0x81BFC04",
                    "ResourceCachePolicyHookOffset": "0x4F699E8",
                    "StructOffset": 1376,
                    "Version": 1
                }
            }
        });
        let resolved = resolve(&raw, "arm64").unwrap();
        assert_eq!(resolved["Version"], 17078);
        assert_eq!(resolved["SourceArch"], "arm64");
        assert_eq!(resolved["StructOffset"], 1376);
    }

    #[test]
    fn test_versioned_config_keeps_entry_version_without_top_level() {
        let mut entry = flat();
        entry["Version"] = json!(42);
        let raw = json!({ "arch": { "x64": entry } });
        let resolved = resolve(&raw, "x64").unwrap();
        assert_eq!(resolved["Version"], 42);
    }

    #[test]
    fn test_versioned_config_matches_alias() {
        let raw = json!({ "Version": 1, "ARCH": { "x64": flat() } });
        let resolved = resolve(&raw, "x86_64").unwrap();
        assert_eq!(resolved["SourceArch"], "x64");

        let config = validate(&resolved).unwrap();
        assert_eq!(config.source_arch.as_deref(), Some("x64"));
        assert_eq!(config.version, Some(1));
    }

    #[test]
    fn test_exact_key_preferred_over_alias() {
        let mut exact = flat();
        exact["StructOffset"] = json!(99);
        let raw = json!({ "Arch": { "x86_64": exact, "x64": flat() } });
        let resolved = resolve(&raw, "x86_64").unwrap();
        assert_eq!(resolved["SourceArch"], "x86_64");
        assert_eq!(resolved["StructOffset"], 99);
    }

    #[test]
    fn test_entry_without_hook_field_is_skipped() {
        let raw = json!({
            "Arch": {
                "x86_64": { "StructOffset": 1 },
                "x64": flat()
            }
        });
        let resolved = resolve(&raw, "x86_64").unwrap();
        assert_eq!(resolved["SourceArch"], "x64");
    }

    #[test]
    fn test_missing_arch_resolves_to_none() {
        let raw = json!({ "Version": 1, "Arch": { "arm64": flat() } });
        assert_eq!(resolve(&raw, "x86_64"), None);
        assert_eq!(resolve(&raw, "ia32"), None);
    }

    #[test]
    fn test_non_object_arch_table_resolves_to_none() {
        assert_eq!(resolve(&json!({ "Arch": "arm64" }), "arm64"), None);
        assert_eq!(resolve(&json!({ "Version": 1 }), "arm64"), None);
        assert_eq!(resolve(&json!([1, 2, 3]), "arm64"), None);
    }

    #[test]
    fn test_validate_example_config() {
        let config = validate(&flat()).unwrap();
        assert_eq!(config.load_start_hook_offset, 0x1);
        assert_eq!(config.load_start_hook_offset2, 0x2);
        assert_eq!(config.cdp_filter_hook_offset, 0x3);
        assert_eq!(config.resource_cache_policy_hook_offset, 0x4);
        assert_eq!(config.struct_offset, 10);
        assert_eq!(config.version, None);
    }

    #[test]
    fn test_validate_reports_every_missing_field() {
        let fields = REQUIRED_FIELDS;
        // Every non-empty subset of the five required fields.
        for mask in 1u32..(1 << fields.len()) {
            let mut value = flat();
            let object = value.as_object_mut().unwrap();
            let mut expected = Vec::new();
            for (i, field) in fields.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    object.remove(*field);
                    expected.push(*field);
                }
            }

            match validate(&value) {
                Err(Error::MissingFields(missing)) => assert_eq!(missing, expected),
                other => panic!("mask {:#b}: unexpected result {:?}", mask, other),
            }
        }
    }

    #[test]
    fn test_validate_treats_null_as_missing() {
        let mut value = flat();
        value["CDPFilterHookOffset"] = Value::Null;
        match validate(&value) {
            Err(Error::MissingFields(missing)) => assert_eq!(missing, vec![CDP_FILTER_HOOK_OFFSET]),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_offset() {
        let mut value = flat();
        value["LoadStartHookOffset2"] = json!("0xNOPE");
        assert!(matches!(
            validate(&value),
            Err(Error::InvalidOffset { field: LOAD_START_HOOK_OFFSET2, .. })
        ));
    }

    #[test]
    fn test_resolve_and_validate_unresolved() {
        let raw = json!({ "Arch": {} });
        let err = resolve_and_validate(&raw, "arm64").unwrap_err();
        assert!(matches!(err, Error::UnresolvedConfig { ref arch } if arch == "arm64"));
        assert!(err.is_config_error());
    }
}
