//! `keilpilot config`: inspect and initialise configuration.

use std::path::{Path, PathBuf};

use keilpilot_config::AppConfig;

fn default_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

/// Print the effective configuration with the API key redacted.
pub async fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    if config.api_key.is_some() {
        config.api_key = Some("[REDACTED]".into());
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub async fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match super::load_config(config_path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if !config.has_api_key() {
                warnings.push("No API key set (set KEILPILOT_API_KEY or OPENAI_API_KEY)".to_string());
            }
            match &config.project {
                None => warnings.push("No [project] section; build tools have nothing to build".into()),
                Some(project) if project.targets.is_empty() => {
                    warnings.push(format!("Project '{}' has no targets", project.name));
                }
                Some(project) if !project.path.is_dir() => {
                    warnings.push(format!(
                        "Project directory {} does not exist",
                        project.path.display()
                    ));
                }
                Some(_) => {}
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Endpoint:  {}", config.api_url);
            println!("   Model:     {}", config.model);
            println!("   Namespace: {}", config.agent.tool_namespace);
            if let Some(project) = &config.project {
                println!("   Project:   {} ({})", project.name, project.kind);
                println!("   Targets:   {}", project.targets.len());
            }
            Ok(())
        }
        Err(e) => {
            println!("   ❌ {e}");
            Err("Configuration is invalid".into())
        }
    }
}

/// Write a starter config file. Refuses to overwrite unless `force` is set.
pub async fn init(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(default_path);
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("✅ Wrote {}", path.display());
    Ok(())
}

pub async fn path(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(default_path);
    println!("{}", path.display());
    Ok(())
}

/// Print a starter configuration without touching the filesystem.
pub async fn print_default() -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", AppConfig::default_toml());
    Ok(())
}
