//! `ferrocall doctor`: Diagnose configuration and provider health.

use ferrocall_config::AppConfig;
use ferrocall_providers::build_from_config;
use ferrocall_tools::PathPolicy;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("ferrocall doctor: system diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_path();
    if config_path.exists() {
        println!("  ok    Config file found at {}", config_path.display());
    } else {
        println!("  info  No config file, using defaults (`ferrocall config init` writes one)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ok    Configuration valid");
            config
        }
        Err(e) => {
            println!("  FAIL  Configuration invalid: {e}");
            println!();
            println!("  1 issue found. See above for details.");
            return Err(e.into());
        }
    };

    let hosted = matches!(config.default_provider.as_str(), "openai" | "openrouter");
    if hosted && !config.has_api_key() {
        println!("  warn  No API key for '{}'", config.default_provider);
        issues += 1;
    }

    // Provider reachability
    let router = build_from_config(&config);
    match router.default() {
        Some(provider) => match provider.health_check().await {
            Ok(true) => println!(
                "  ok    Provider '{}' reachable",
                router.default_provider_name()
            ),
            Ok(false) => {
                println!(
                    "  warn  Provider '{}' answered but reported unhealthy",
                    router.default_provider_name()
                );
                issues += 1;
            }
            Err(e) => {
                println!(
                    "  FAIL  Provider '{}' unreachable: {e}",
                    router.default_provider_name()
                );
                issues += 1;
            }
        },
        None => {
            println!("  FAIL  No default provider configured");
            issues += 1;
        }
    }

    // Tool workspace
    let policy = PathPolicy::from_config(&config.tools);
    let root = policy.workspace_root();
    if root.is_dir() {
        println!("  ok    Tool workspace {}", root.display());
    } else {
        println!("  FAIL  Tool workspace {} is not a directory", root.display());
        issues += 1;
    }

    println!();
    if issues == 0 {
        println!("  All checks passed!");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
