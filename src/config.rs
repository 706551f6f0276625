use anyhow::{anyhow, Error, Result};
use figment::{
    providers::{Env, Format, Toml, Yaml},
    Figment,
};
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::string::ToString;
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;

const DEFAULT_CONFIG_PATH: &str = "/etc/stoppable/config.toml";
const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub log: Option<String>,
    #[serde(default)]
    pub server: Server,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Server {
    #[serde(default = "addr_default")]
    pub addr: String,
    // absent: wait for connections indefinitely
    pub grace_ms: Option<u64>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            addr: addr_default(),
            grace_ms: None,
        }
    }
}

fn addr_default() -> String {
    DEFAULT_SERVER_ADDR.to_string()
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self, Error> {
        let path = path.unwrap_or(PathBuf::from(DEFAULT_CONFIG_PATH));
        let figment = Figment::new();
        let figment = match path.extension().and_then(OsStr::to_str) {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
            Some(ext) => return Err(anyhow!("unexpected file extension '{}'", ext)),
            None => return Err(anyhow!("failed to parse path")),
        };

        let config: Config = figment
            .join(Env::prefixed("STOPPABLE_").split("__"))
            .extract()?;
        Ok(config)
    }

    pub fn grace(&self) -> Option<Duration> {
        self.server.grace_ms.map(Duration::from_millis)
    }

    pub fn log_level(&self) -> LevelFilter {
        match self
            .log
            .to_owned()
            .unwrap_or_else(|| "INFO".to_string())
            .to_uppercase()
            .as_str()
        {
            "TRACE" => LevelFilter::TRACE,
            "DEBUG" => LevelFilter::DEBUG,
            "WARN" => LevelFilter::WARN,
            "ERROR" => LevelFilter::ERROR,
            "INFO" => LevelFilter::INFO,
            _ => LevelFilter::INFO,
        }
    }
}
