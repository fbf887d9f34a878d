//! Built-in extraction routines.
//!
//! Each submodule exposes a `descriptor()` and a plugin type;
//! [`builtin_registry`] wires them into the static catalog.

use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Offset, Utc};
use plist::Value as PlistValue;

use crate::errors::RegistryError;
use crate::models::Value;
use crate::registry::{ArtifactRegistry, RegistryBuilder};

pub mod ad_id;
pub mod device_info;
pub mod labels;
pub mod routined;
pub mod system_version;

/// Registry holding every built-in artifact.
pub fn builtin_registry() -> Result<ArtifactRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    builder
        .register(system_version::descriptor(), Arc::new(system_version::SystemVersionPlist))?
        .register(ad_id::descriptor(), Arc::new(ad_id::AdvertiserId))?
        .register(routined::descriptor(), Arc::new(routined::RoutinedCacheLocations))?
        .register(device_info::descriptor(), Arc::new(device_info::DeviceInfoReport))?;
    Ok(builder.build())
}

/// Convert a plist value into a table cell.
pub fn plist_cell(value: &PlistValue) -> Value {
    match value {
        PlistValue::String(s) => Value::Text(s.clone()),
        PlistValue::Integer(i) => match (i.as_signed(), i.as_unsigned()) {
            (Some(signed), _) => Value::Integer(signed),
            (None, Some(unsigned)) => Value::Text(unsigned.to_string()),
            (None, None) => Value::Null,
        },
        PlistValue::Real(r) => Value::Real(*r),
        PlistValue::Boolean(b) => Value::from(*b),
        PlistValue::Data(bytes) => Value::Bytes(bytes.clone()),
        PlistValue::Date(date) => {
            let instant: DateTime<Utc> = SystemTime::from(*date).into();
            Value::Timestamp(instant)
        }
        PlistValue::Array(items) => {
            let parts: Vec<String> = items.iter().map(plist_text).collect();
            Value::Text(parts.join(", "))
        }
        PlistValue::Dictionary(_) => Value::Text(plist_text(value)),
        other => Value::Text(format!("{:?}", other)),
    }
}

fn plist_text(value: &PlistValue) -> String {
    match value {
        PlistValue::Dictionary(dict) => {
            let parts: Vec<String> = dict
                .iter()
                .map(|(k, v)| format!("{}: {}", k, plist_text(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        PlistValue::Array(items) => {
            let parts: Vec<String> = items.iter().map(plist_text).collect();
            format!("[{}]", parts.join(", "))
        }
        other => plist_cell(other).render(&Utc.fix()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputKind;
    use crate::registry::ArtifactFilter;

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry().unwrap();
        let keys: Vec<&str> = registry
            .list(&ArtifactFilter::default())
            .iter()
            .map(|d| d.key.as_str())
            .collect();
        assert_eq!(
            keys,
            vec!["adId", "deviceInfo", "routinedCacheLocations", "systemVersionPlist"]
        );

        let geo: Vec<&str> = registry
            .list(&ArtifactFilter::default().with_output_kind(OutputKind::Kml))
            .iter()
            .map(|d| d.key.as_str())
            .collect();
        assert_eq!(geo, vec!["adId", "routinedCacheLocations"]);
        assert!(!registry.descriptor("deviceInfo").unwrap().requires_files);
    }

    #[test]
    fn test_plist_cells() {
        assert_eq!(plist_cell(&PlistValue::String("x".into())), Value::from("x"));
        assert_eq!(plist_cell(&PlistValue::Integer(42i64.into())), Value::Integer(42));
        assert_eq!(plist_cell(&PlistValue::Boolean(true)), Value::from("true"));
        assert_eq!(
            plist_cell(&PlistValue::Array(vec![
                PlistValue::String("a".into()),
                PlistValue::Integer(1i64.into())
            ])),
            Value::from("a, 1")
        );
    }
}
