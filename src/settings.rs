//! Settings for the `supersequel` binary, read from an optional TOML file and
//! `SUPERSEQUEL__*` environment variables (e.g. `SUPERSEQUEL__SERVER__BIND`).

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::Result;
use crate::query::Definition;

pub const DEFAULT_FILE: &str = "supersequel.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_bind() -> String { "127.0.0.1:8080".to_string() }
fn default_path() -> String { "/v1/queries".to_string() }

impl Default for ServerSettings {
    fn default() -> Self { Self { bind: default_bind(), path: default_path() } }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String { "info".to_string() }

impl Default for LogSettings {
    fn default() -> Self { Self { filter: default_filter() } }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelperSettings {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String { "_".to_string() }

impl Default for HelperSettings {
    fn default() -> Self { Self { prefix: default_prefix() } }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub helpers: HelperSettings,
    #[serde(default)]
    pub definitions: Vec<Definition>,
}

impl Settings {
    /// Load `path`, or the default file if present, then overlay the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("SUPERSEQUEL").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}
