//! Environment overrides
//!
//! Deployments configure the bridge through `PARK_IOT_*` variables; each one
//! replaces a single field of the file configuration.

use std::path::PathBuf;

use contracts::BridgeConfig;

/// One recognised environment variable
#[derive(Debug, Clone, Copy)]
pub struct EnvOverride {
    pub var: &'static str,
    pub field: &'static str,
    apply: fn(&mut BridgeConfig, String),
}

/// All variables applied by [`apply_overrides`], in application order
pub const ENV_OVERRIDES: &[EnvOverride] = &[
    EnvOverride {
        var: "PARK_IOT_BROKER_ADDRESS",
        field: "broker.address",
        apply: |c, v| c.broker.address = v,
    },
    EnvOverride {
        var: "PARK_IOT_BROKER_USERNAME",
        field: "broker.username",
        apply: |c, v| c.broker.username = Some(v),
    },
    EnvOverride {
        var: "PARK_IOT_BROKER_PASSWORD",
        field: "broker.password",
        apply: |c, v| c.broker.password = Some(v),
    },
    EnvOverride {
        var: "PARK_IOT_BROKER_TOPIC",
        field: "broker.topic",
        apply: |c, v| c.broker.topic = v,
    },
    EnvOverride {
        var: "PARK_IOT_STORE_URL",
        field: "store.url",
        apply: |c, v| c.store.url = v,
    },
    EnvOverride {
        var: "PARK_IOT_DEVICE_ID",
        field: "device.default_id",
        apply: |c, v| c.device.default_id = v,
    },
    EnvOverride {
        var: "PARK_IOT_DEAD_LETTER_PATH",
        field: "dead_letter.path",
        apply: |c, v| c.dead_letter.path = PathBuf::from(v),
    },
];

/// Apply every override whose variable is set and non-empty
///
/// `lookup` abstracts `std::env::var` so tests do not touch the process
/// environment. Returns the fields that were overridden.
pub fn apply_overrides<F>(config: &mut BridgeConfig, lookup: F) -> Vec<&'static str>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();
    for entry in ENV_OVERRIDES {
        if let Some(value) = lookup(entry.var).filter(|v| !v.trim().is_empty()) {
            (entry.apply)(config, value);
            applied.push(entry.field);
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_overrides_replace_file_values() {
        let vars = HashMap::from([
            ("PARK_IOT_BROKER_ADDRESS", "mqtt://10.0.0.9:1884"),
            ("PARK_IOT_DEVICE_ID", "esp32_gate"),
            ("PARK_IOT_STORE_URL", "mysql://bridge@db/iot"),
        ]);
        let mut config = BridgeConfig::default();

        let applied = apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.broker.address, "mqtt://10.0.0.9:1884");
        assert_eq!(config.device.default_id, "esp32_gate");
        assert_eq!(config.store.url, "mysql://bridge@db/iot");
        assert_eq!(
            applied,
            vec!["broker.address", "store.url", "device.default_id"]
        );
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let mut config = BridgeConfig::default();
        let applied = apply_overrides(&mut config, |k| {
            (k == "PARK_IOT_DEVICE_ID").then(|| "  ".to_string())
        });
        assert!(applied.is_empty());
        assert_eq!(config.device.default_id, "esp32_1");
    }
}
