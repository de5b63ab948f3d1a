//! `ferrocall config`: Configuration management commands.

use ferrocall_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();

            let hosted = matches!(config.default_provider.as_str(), "openai" | "openrouter");
            if hosted && !config.has_api_key() {
                warnings.push(format!(
                    "No API key set for '{}' (set FERROCALL_API_KEY or OPENAI_API_KEY)",
                    config.default_provider
                ));
            }

            if config.agent.escalation_temperature > config.default_temperature {
                warnings.push(
                    "agent.escalation_temperature is above default_temperature; \
                     the directed retry should be more deterministic"
                        .to_string(),
                );
            }

            if let Some(root) = &config.tools.workspace_root
                && !std::path::Path::new(root).is_dir()
            {
                warnings.push(format!("tools.workspace_root '{root}' is not a directory"));
            }

            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Provider:        {}", config.default_provider);
            println!("   Model:           {}", config.default_model);
            println!("   Temperature:     {}", config.default_temperature);
            println!("   Tool budget:     {} per turn", config.agent.max_tool_calls_per_turn);
            println!("   Expect tool:     {}", config.agent.expect_tool);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render_redacted(&config)?);
    Ok(())
}

pub async fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = AppConfig::config_path();
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }

    std::fs::create_dir_all(AppConfig::config_dir())?;
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

/// The config as TOML with every API key masked.
fn render_redacted(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("[REDACTED]".into());
    }
    for provider in shown.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some("[REDACTED]".into());
        }
    }
    toml::to_string_pretty(&shown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_path();
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn show_masks_keys() {
        let config = AppConfig::from_toml_str(
            r#"
api_key = "sk-secret"

[providers.openrouter]
api_key = "sk-or-secret"
"#,
        )
        .unwrap();

        let rendered = render_redacted(&config).unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(!rendered.contains("sk-or-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
