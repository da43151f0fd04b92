use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "INTERCEPT_PROXY_";
const FILE_STEM: &str = "intercept-proxy";

pub fn load_from_env_or_file() -> Result<Config> {
    let mut figment = Figment::new();

    // User config directory first, so a file in the working directory wins
    if let Some(dir) = user_config_dir() {
        figment = merge_candidates(figment, &dir);
    }
    figment = merge_candidates(figment, Path::new("."));

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.policy_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("policyDir must not be empty".into()).into());
    }

    if config.signer.not_before >= config.signer.not_after {
        return Err(ConfigError::Validation(format!(
            "signer.notBefore ({}) must be earlier than signer.notAfter ({})",
            config.signer.not_before, config.signer.not_after
        ))
        .into());
    }

    if config.signer.organization.trim().is_empty() {
        return Err(ConfigError::Validation("signer.organization must not be empty".into()).into());
    }

    Ok(())
}

fn user_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(FILE_STEM))
}

fn merge_candidates(figment: Figment, dir: &Path) -> Figment {
    figment
        .merge(Toml::file(dir.join(format!("{FILE_STEM}.toml"))))
        .merge(Json::file(dir.join(format!("{FILE_STEM}.json"))))
        .merge(Yaml::file(dir.join(format!("{FILE_STEM}.yaml"))))
        .merge(Yaml::file(dir.join(format!("{FILE_STEM}.yml"))))
}
