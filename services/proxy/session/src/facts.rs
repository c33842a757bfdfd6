//! Device facts and their conversion to plain, serializable mappings.
//!
//! SDKs tend to hand back facts containing their own container types, such
//! as a version object that behaves like a mapping. Those are carried as
//! [`FactValue::Opaque`] and refuse to serialize; [`serialize_facts`]
//! flattens the known ones into plain maps for downstream consumers.

use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Fact name to value
pub type Facts = BTreeMap<String, FactValue>;

/// Top-level fact holding the software version object
pub const VERSION_INFO: &str = "version_info";
/// Top-level fact holding per-routing-engine software details
pub const JUNOS_INFO: &str = "junos_info";
/// Key of the version object inside each routing-engine entry
pub const RE_OBJECT: &str = "object";

/// SDK-native container that can present itself as a plain mapping
pub trait FactObject: Send + Sync + fmt::Debug {
    /// Name of the SDK type, used in error messages
    fn type_name(&self) -> &str;

    /// Plain mapping view of the container
    fn to_map(&self) -> Facts;
}

/// A single fact value
#[derive(Debug, Clone)]
pub enum FactValue {
    /// Missing value
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String
    Str(String),
    /// List of values
    List(Vec<FactValue>),
    /// Plain mapping
    Map(Facts),
    /// SDK-native container
    Opaque(Arc<dyn FactObject>),
}

impl FactValue {
    /// Whether this value and everything nested in it is free of SDK containers
    pub fn is_plain(&self) -> bool {
        match self {
            FactValue::Opaque(_) => false,
            FactValue::List(items) => items.iter().all(FactValue::is_plain),
            FactValue::Map(map) => map.values().all(FactValue::is_plain),
            _ => true,
        }
    }

    /// Borrow as a plain mapping
    pub fn as_map(&self) -> Option<&Facts> {
        match self {
            FactValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FactValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn to_plain_map(&self) -> FactValue {
        match self {
            FactValue::Opaque(object) => FactValue::Map(object.to_map()),
            other => other.clone(),
        }
    }
}

impl PartialEq for FactValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FactValue::Null, FactValue::Null) => true,
            (FactValue::Bool(a), FactValue::Bool(b)) => a == b,
            (FactValue::Int(a), FactValue::Int(b)) => a == b,
            (FactValue::Float(a), FactValue::Float(b)) => a == b,
            (FactValue::Str(a), FactValue::Str(b)) => a == b,
            (FactValue::List(a), FactValue::List(b)) => a == b,
            (FactValue::Map(a), FactValue::Map(b)) => a == b,
            (FactValue::Opaque(a), FactValue::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        FactValue::Bool(value)
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        FactValue::Int(value)
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        FactValue::Str(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        FactValue::Str(value)
    }
}

impl From<Facts> for FactValue {
    fn from(value: Facts) -> Self {
        FactValue::Map(value)
    }
}

impl Serialize for FactValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FactValue::Null => serializer.serialize_unit(),
            FactValue::Bool(b) => serializer.serialize_bool(*b),
            FactValue::Int(i) => serializer.serialize_i64(*i),
            FactValue::Float(f) => serializer.serialize_f64(*f),
            FactValue::Str(s) => serializer.serialize_str(s),
            FactValue::List(items) => items.serialize(serializer),
            FactValue::Map(map) => map.serialize(serializer),
            FactValue::Opaque(object) => Err(S::Error::custom(format!(
                "fact container {} is not serializable",
                object.type_name()
            ))),
        }
    }
}

/// Copy `facts`, converting the SDK containers under `version_info` and
/// `junos_info.<re>.object` into plain mappings.
///
/// Everything else is passed through unchanged.
pub fn serialize_facts(facts: &Facts) -> Facts {
    let mut plain = facts.clone();

    if let Some(version_info) = plain.get_mut(VERSION_INFO) {
        *version_info = version_info.to_plain_map();
    }

    // Only present in newer fact sets
    if let Some(FactValue::Map(junos_info)) = plain.get_mut(JUNOS_INFO) {
        for re_info in junos_info.values_mut() {
            if let FactValue::Map(re_info) = re_info {
                if let Some(object) = re_info.get_mut(RE_OBJECT) {
                    *object = object.to_plain_map();
                }
            }
        }
    }

    plain
}

/// Render facts as JSON; fails if an SDK container is still present
pub fn facts_to_json(facts: &Facts) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(facts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct VersionObject {
        major: i64,
        minor: i64,
        build: &'static str,
    }

    impl FactObject for VersionObject {
        fn type_name(&self) -> &str {
            "version_info"
        }

        fn to_map(&self) -> Facts {
            let mut map = Facts::new();
            map.insert("major".to_string(), FactValue::Int(self.major));
            map.insert("minor".to_string(), FactValue::Int(self.minor));
            map.insert("build".to_string(), FactValue::from(self.build));
            map
        }
    }

    fn version(major: i64, minor: i64) -> FactValue {
        FactValue::Opaque(Arc::new(VersionObject {
            major,
            minor,
            build: "R1.9",
        }))
    }

    fn routing_engine(major: i64) -> FactValue {
        let mut re = Facts::new();
        re.insert(RE_OBJECT.to_string(), version(major, 1));
        re.insert("text".to_string(), FactValue::from(format!("{}.1R1.9", major)));
        FactValue::Map(re)
    }

    fn device_facts() -> Facts {
        let mut junos_info = Facts::new();
        junos_info.insert("re0".to_string(), routing_engine(18));
        junos_info.insert("re1".to_string(), routing_engine(17));

        let mut facts = Facts::new();
        facts.insert("hostname".to_string(), FactValue::from("vmx1"));
        facts.insert("model".to_string(), FactValue::from("VMX"));
        facts.insert("switch_style".to_string(), FactValue::Null);
        facts.insert(VERSION_INFO.to_string(), version(18, 1));
        facts.insert(JUNOS_INFO.to_string(), FactValue::Map(junos_info));
        facts
    }

    #[test]
    fn test_serialize_facts_flattens_sdk_containers() {
        let facts = device_facts();
        let plain = serialize_facts(&facts);

        assert!(plain.values().all(FactValue::is_plain));
        assert_eq!(plain.len(), facts.len());
        assert_eq!(plain["hostname"], facts["hostname"]);
        assert_eq!(plain["switch_style"], FactValue::Null);

        let version_info = plain[VERSION_INFO].as_map().unwrap();
        assert_eq!(version_info["major"], FactValue::Int(18));
        assert_eq!(version_info["build"].as_str(), Some("R1.9"));

        let re1 = plain[JUNOS_INFO].as_map().unwrap()["re1"].as_map().unwrap();
        assert_eq!(re1[RE_OBJECT].as_map().unwrap()["major"], FactValue::Int(17));
        assert_eq!(re1["text"].as_str(), Some("17.1R1.9"));
    }

    #[test]
    fn test_serialize_facts_without_junos_info() {
        let mut facts = device_facts();
        facts.remove(JUNOS_INFO);

        let plain = serialize_facts(&facts);

        assert!(!plain.contains_key(JUNOS_INFO));
        assert!(plain[VERSION_INFO].is_plain());
    }

    #[test]
    fn test_plain_version_info_passes_through() {
        let mut facts = Facts::new();
        let mut version_info = Facts::new();
        version_info.insert("major".to_string(), FactValue::Int(21));
        facts.insert(VERSION_INFO.to_string(), FactValue::Map(version_info.clone()));

        let plain = serialize_facts(&facts);
        assert_eq!(plain[VERSION_INFO], FactValue::Map(version_info));
    }

    #[test]
    fn test_json_rendering() {
        let facts = device_facts();
        assert!(facts_to_json(&facts).is_err());

        let json = facts_to_json(&serialize_facts(&facts)).unwrap();
        assert_eq!(json["hostname"], "vmx1");
        assert_eq!(json["version_info"]["minor"], 1);
        assert_eq!(json["junos_info"]["re0"]["object"]["major"], 18);
        assert!(json["switch_style"].is_null());
    }
}
