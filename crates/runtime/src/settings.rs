//! Validation and typing of plugin settings.
//!
//! Stored values are raw strings; the manifest's settings schema gives each
//! key a type. Writes are validated against the schema, and reads convert
//! the raw strings into typed values with declared defaults filling gaps.

use std::collections::HashMap;

use crate::error::PluginError;
use crate::manifest::{Manifest, SettingDecl};
use crate::plugin::SettingValue;

/// Validate one raw value against its declared schema.
pub fn validate_value(decl: &SettingDecl, raw: &str) -> Result<(), PluginError> {
    let fail = |details: String| PluginError::SettingValidationFailed {
        key: decl.key.clone(),
        details,
    };

    match decl.kind.as_str() {
        "string" | "textarea" => Ok(()),
        "number" => {
            let n: f64 = raw
                .parse()
                .map_err(|_| fail(format!("'{raw}' is not a number")))?;
            if let Some(min) = decl.min {
                if n < min as f64 {
                    return Err(fail(format!("{n} is below the minimum of {min}")));
                }
            }
            if let Some(max) = decl.max {
                if n > max as f64 {
                    return Err(fail(format!("{n} is above the maximum of {max}")));
                }
            }
            Ok(())
        }
        "boolean" => {
            if raw == "true" || raw == "false" {
                Ok(())
            } else {
                Err(fail(format!("'{raw}' is not 'true' or 'false'")))
            }
        }
        "select" => {
            if decl.options.iter().any(|o| o.value == raw) {
                Ok(())
            } else {
                Err(fail(format!("'{raw}' is not one of the declared options")))
            }
        }
        other => Err(fail(format!("unknown setting type '{other}'"))),
    }
}

/// Validate a batch of raw values against a manifest's schema.
///
/// Keys not declared in the schema are rejected.
pub fn validate_all(
    manifest: &Manifest,
    values: &HashMap<String, String>,
) -> Result<(), PluginError> {
    for (key, raw) in values {
        let Some(decl) = manifest.setting(key) else {
            return Err(PluginError::UnknownSettingKey {
                plugin: manifest.name.clone(),
                key: key.clone(),
            });
        };
        validate_value(decl, raw)?;
    }
    Ok(())
}

/// Build the typed settings map a plugin sees: declared defaults first, then
/// stored values converted per their declared type on top.
pub fn effective_settings(
    manifest: &Manifest,
    stored: &HashMap<String, String>,
) -> HashMap<String, SettingValue> {
    let mut settings = HashMap::new();

    for decl in &manifest.settings {
        if let Some(value) = default_value(decl) {
            settings.insert(decl.key.clone(), value);
        }
    }

    for (key, raw) in stored {
        if let Some(decl) = manifest.setting(key) {
            settings.insert(key.clone(), convert(decl, raw));
        }
    }

    settings
}

/// The declared default as a typed value, if one is set.
fn default_value(decl: &SettingDecl) -> Option<SettingValue> {
    let default = decl.default.as_ref()?;
    match default {
        toml::Value::String(s) => Some(SettingValue::String(s.clone())),
        toml::Value::Integer(i) => Some(SettingValue::Number(*i as f64)),
        toml::Value::Float(f) => Some(SettingValue::Number(*f)),
        toml::Value::Boolean(b) => Some(SettingValue::Bool(*b)),
        _ => None,
    }
}

fn convert(decl: &SettingDecl, raw: &str) -> SettingValue {
    match decl.kind.as_str() {
        "number" => raw
            .parse()
            .map_or_else(|_| SettingValue::String(raw.to_string()), SettingValue::Number),
        "boolean" => SettingValue::Bool(raw == "true"),
        _ => SettingValue::String(raw.to_string()),
    }
}
