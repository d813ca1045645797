//! `stepwise config` — Configuration inspection.

use stepwise_config::AppConfig;

/// Print the effective configuration with the API key masked.
pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.oracle.api_key.is_some() {
        config.oracle.api_key = Some("[REDACTED]".into());
    }

    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn defaults() {
    println!("{}", AppConfig::default_toml());
}

#[cfg(test)]
mod tests {
    #[test]
    fn config_path_is_valid() {
        let path = stepwise_config::AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains(".stepwise"));
    }
}
