//! Upgrades of configurations written for older versions.

use super::loader::CURRENT_CONFIG_VERSION;

/// Rewrites a pre-1.0 configuration table into the current layout.
///
/// - `skip = true` becomes `enabled = false`
/// - `outdir` becomes `output_location`
/// - `version` is set to [`CURRENT_CONFIG_VERSION`]
///
/// Stage sections may sit under `[stages]` or, in the oldest layout, at the
/// top level; top-level tables are moved under `[stages]`.
#[must_use]
pub fn upgrade_config(mut table: toml::Table) -> toml::Table {
    let legacy_sections: Vec<String> = table
        .iter()
        .filter(|(key, value)| key.as_str() != "stages" && value.is_table())
        .map(|(key, _)| key.clone())
        .collect();

    let mut stages = match table.remove("stages") {
        Some(toml::Value::Table(stages)) => stages,
        _ => toml::Table::new(),
    };
    for name in legacy_sections {
        if let Some(section) = table.remove(&name) {
            stages.entry(name).or_insert(section);
        }
    }

    for (name, section) in &mut stages {
        if let toml::Value::Table(section) = section {
            upgrade_stage(name, section);
        }
    }

    table.insert("stages".to_string(), toml::Value::Table(stages));
    table.insert(
        "version".to_string(),
        toml::Value::String(CURRENT_CONFIG_VERSION.to_string()),
    );
    table
}

fn upgrade_stage(name: &str, section: &mut toml::Table) {
    if let Some(skip) = section.remove("skip") {
        let skipped = skip.as_bool().unwrap_or(false);
        section.insert("enabled".to_string(), toml::Value::Boolean(!skipped));
        tracing::debug!(stage = name, skipped, "Upgraded 'skip' to 'enabled'");
    }
    if let Some(outdir) = section.remove("outdir") {
        section.entry("output_location").or_insert(outdir);
        tracing::debug!(stage = name, "Upgraded 'outdir' to 'output_location'");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_legacy_layout() {
        let table: toml::Table = toml::from_str(
            r#"
            name = "old"
            version = "0.7"

            [calibrate]
            outdir = "cal"

            [stages.collapse]
            skip = true
            "#,
        )
        .unwrap();

        let upgraded = upgrade_config(table);
        let stages = upgraded["stages"].as_table().unwrap();

        assert_eq!(upgraded["version"].as_str(), Some(CURRENT_CONFIG_VERSION));
        assert_eq!(stages["calibrate"]["output_location"].as_str(), Some("cal"));
        assert!(stages["calibrate"].get("outdir").is_none());
        assert_eq!(stages["collapse"]["enabled"].as_bool(), Some(false));
        assert!(upgraded.get("calibrate").is_none());
    }

    #[test]
    fn test_explicit_output_location_wins() {
        let table: toml::Table = toml::from_str(
            r#"
            name = "old"
            version = "0.9"
            [stages.register]
            outdir = "legacy"
            output_location = "new"
            skip = false
            "#,
        )
        .unwrap();

        let upgraded = upgrade_config(table);
        let register = &upgraded["stages"]["register"];
        assert_eq!(register["output_location"].as_str(), Some("new"));
        assert_eq!(register["enabled"].as_bool(), Some(true));
    }
}
