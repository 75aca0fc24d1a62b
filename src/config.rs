use modelpool::pool::{ClientKind, RateLimits, RegistryConfig};
use modelpool::providers::ProviderIdentifier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::warn;

#[derive(Deserialize, Serialize, Default, Debug)]
pub(crate) struct Transport {
    pub timeout_secs: Option<u64>,
}

/// One `[[models]]` entry
#[derive(Deserialize, Serialize, Debug)]
pub(crate) struct Model {
    pub pool: String,
    pub key: String,
    pub provider: ProviderIdentifier,
    pub kind: ClientKind,
    pub model_id: String,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub limits: RateLimits,
}

#[derive(Deserialize, Serialize, Default, Debug)]
pub(crate) struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub models: Vec<Model>,
}

fn get_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME");

    if let Some(home) = home {
        let home = PathBuf::from(home);

        const USER_PATHS: [&str; 2] = [".config/modelpool/config.toml", ".modelpool.toml"];

        for &path in USER_PATHS.iter() {
            let fullpath = home.join(path);

            if fullpath.exists() {
                return Some(fullpath);
            }
        }
    }

    let system_config = PathBuf::from("/etc/modelpool.toml");

    if system_config.exists() {
        Some(system_config)
    } else {
        None
    }
}

fn parse_config_or_die<S: serde::de::DeserializeOwned>(config: &str) -> S {
    let r: Result<S, toml::de::Error> = toml::de::from_str(config);

    match r {
        Ok(s) => s,
        Err(err) => die::die!("failed to parse config: {}", err),
    }
}

fn format_path(path: &[String]) -> String {
    path.join(".")
}

fn find_extra_fields_helper(
    path: &mut Vec<String>,
    user_value: &toml::Value,
    config_value: &toml::Value,
    extra: &mut Vec<String>,
) {
    match (user_value, config_value) {
        (toml::Value::Table(user_table), toml::Value::Table(config_table)) => {
            for (user_key, user_value) in user_table {
                path.push(user_key.clone());

                match config_table.get(user_key) {
                    Some(config_value) => {
                        find_extra_fields_helper(path, user_value, config_value, extra)
                    }
                    None => extra.push(format_path(path)),
                }

                path.pop();
            }
        }
        (toml::Value::Array(user_array), toml::Value::Array(config_array)) => {
            for (i, (user_value, config_value)) in user_array.iter().zip(config_array).enumerate() {
                path.push(i.to_string());

                find_extra_fields_helper(path, user_value, config_value, extra);

                path.pop();
            }
        }
        _ => {}
    }
}

/// Lists the keys of `raw_config` that do not survive a round trip through
/// [`Config`], i.e. keys that were ignored.
fn find_extra_fields(config: &Config, raw_config: &str) -> Vec<String> {
    let user_config: toml::Value = parse_config_or_die(raw_config);

    let config: toml::Value = match toml::Value::try_from(config) {
        Ok(config) => config,
        Err(_) => return Vec::new(),
    };

    let mut path = Vec::new();
    let mut extra = Vec::new();

    find_extra_fields_helper(&mut path, &user_config, &config, &mut extra);

    extra
}

pub(crate) fn parse_config(raw_config: &str) -> Config {
    let config: Config = parse_config_or_die(raw_config);

    for key in find_extra_fields(&config, raw_config) {
        warn!("config contains extraneous key \"{}\", ignoring", key);
    }

    config
}

pub(crate) fn read_config(config: Option<PathBuf>) -> Config {
    let config_path = config.or_else(get_config_path);

    if let Some(path) = config_path {
        let raw_config = match std::fs::read_to_string(&path) {
            Ok(raw_config) => raw_config,
            Err(err) => die::die!("failed to read config \"{}\": {}", path.display(), err),
        };

        parse_config(&raw_config)
    } else {
        Config::default()
    }
}
