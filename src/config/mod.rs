use std::{
    collections::{BTreeMap, HashSet},
    fs,
    net::SocketAddr,
    time::Duration,
};

use log::{debug, trace};
use pingora::server::configuration::{Opt, ServerConf};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{
    config_error,
    core::{version::parse_version, SiteResult},
    lifecycle::ModuleConfig,
    pipeline::{normalize_path, StageSpec},
};

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_paths"))]
pub struct Config {
    #[serde(default)]
    pub pingora: ServerConf,

    #[validate(length(min = 1))]
    #[validate(nested)]
    pub listeners: Vec<Listener>,

    #[validate(nested)]
    #[serde(default)]
    pub site: Site,
    #[validate(nested)]
    #[serde(default)]
    pub themes: Vec<Theme>,

    /// Target lifecycle configuration per module
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
    /// Execution paths by name
    #[serde(default)]
    pub paths: BTreeMap<String, ExecutionPath>,

    #[validate(nested)]
    pub status: Option<Status>,
    #[validate(nested)]
    pub log: Option<Log>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> SiteResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .map_err(|e| config_error!("Unable to read conf file from {}: {}", path, e))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    // config file load entry point
    pub fn load_yaml_with_opt_override(opt: &Opt) -> SiteResult<Self> {
        match &opt.conf {
            Some(path) => {
                let mut conf = Self::load_from_yaml(path)?;
                conf.merge_with_opt(opt);
                Ok(conf)
            }
            None => Err(config_error!("No path specified")),
        }
    }

    pub fn from_yaml(conf_str: &str) -> SiteResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)
            .map_err(|e| config_error!("Unable to parse yaml conf: {}", e))?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .map_err(|e| config_error!("Conf file validation failed: {}", e))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> SiteResult<String> {
        serde_yaml::to_string(self).map_err(|e| config_error!("Unable to serialize conf: {}", e))
    }

    pub fn merge_with_opt(&mut self, opt: &Opt) {
        if opt.daemon {
            self.pingora.daemon = true;
        }
    }

    fn validate_paths(&self) -> Result<(), ValidationError> {
        for (name, path) in &self.paths {
            path.check().map_err(|code| {
                let mut err = ValidationError::new(code);
                err.add_param("path".into(), name);
                err
            })?;
        }

        let mut mounts = HashSet::new();
        for (name, path) in &self.paths {
            let mount = normalize_path(&path.path).unwrap_or_default();
            if !mounts.insert(mount) {
                let mut err = ValidationError::new("duplicate_mount");
                err.add_param("path".into(), name);
                return Err(err);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Listener::validate_tls_for_offer_h2"))]
pub struct Listener {
    pub address: SocketAddr,
    pub tls: Option<Tls>,
    #[serde(default)]
    pub offer_h2: bool,
    #[serde(default)]
    pub offer_h2c: bool,
}

impl Listener {
    fn validate_tls_for_offer_h2(&self) -> Result<(), ValidationError> {
        if self.offer_h2 && self.tls.is_none() {
            Err(ValidationError::new("tls_required_for_h2"))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tls {
    pub cert_path: String,
    pub key_path: String,
}

fn validate_version(version: &str) -> Result<(), ValidationError> {
    parse_version(version)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_version"))
}

/// The site itself, registered as a core component
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Site {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(custom(function = "validate_version"))]
    pub version: String,
}

impl Default for Site {
    fn default() -> Self {
        Self {
            name: "folio".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Theme {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default = "Theme::default_version")]
    #[validate(custom(function = "validate_version"))]
    pub version: String,
}

impl Theme {
    fn default_version() -> String {
        "1.0.0".to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionPath {
    /// Mount prefix
    #[serde(default = "ExecutionPath::default_path")]
    pub path: String,
    /// Router priority, the catch-all path should stay lowest
    #[serde(default)]
    pub priority: i32,
    /// Per-request deadline in milliseconds
    pub timeout: Option<u64>,
    pub stages: Vec<StageSpec>,
}

impl ExecutionPath {
    fn default_path() -> String {
        "/".to_string()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    fn check(&self) -> Result<(), &'static str> {
        if normalize_path(&self.path).is_err() {
            return Err("invalid_mount_path");
        }
        if self.timeout == Some(0) {
            return Err("zero_timeout");
        }
        if self.stages.is_empty() {
            return Err("stages_required");
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.validate().is_err() {
                return Err("invalid_stage");
            }
            if !seen.insert(stage.name.as_str()) {
                return Err("duplicate_stage");
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Status {
    pub address: SocketAddr,
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    level
        .parse::<log::LevelFilter>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_log_level"))
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    #[validate(length(min = 1))]
    pub path: String,
    /// Default filter when RUST_LOG is unset
    #[serde(default = "Log::default_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }
}
