//! Layered configuration: built-in defaults → YAML file → `CENSUS_*` env.
//!
//! ```yaml
//! default_source: production
//! sources:
//!   production:
//!     url: https://puppetdb.example.com:8081
//!     ca_cert: /etc/census/ca.pem
//!     client_cert: /etc/census/cert.pem
//!     client_key: /etc/census/key.pem
//!     run_time_minutes: 30
//! jobs:
//!   timeout_secs: 30
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::domain::interval::RunInterval;
use crate::domain::jobs::SourceTarget;
use crate::domain::types::SourceSummary;
use crate::error::CensusError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default_source: Option<String>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    /// Expected minutes between two Puppet runs on a node.
    #[serde(default = "default_run_time")]
    pub run_time_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Per-job timeout.
    #[serde(default = "default_job_timeout")]
    pub timeout_secs: u64,
    /// Deadline for a whole job batch.
    #[serde(default = "default_request_deadline")]
    pub request_deadline_secs: u64,
    /// Size of the "recent" node list.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_job_timeout(),
            request_deadline_secs: default_request_deadline(),
            recent_limit: default_recent_limit(),
        }
    }
}

impl JobsConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Compute the timestamp-mismatch bucket (one extra pass over all nodes).
    #[serde(default)]
    pub check_mismatch: bool,
}

fn default_api_version() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_run_time() -> i64 {
    30
}

fn default_http_addr() -> String {
    "127.0.0.1:9200".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_job_timeout() -> u64 {
    30
}

fn default_request_deadline() -> u64 {
    60
}

fn default_recent_limit() -> u64 {
    25
}

/// The source a request runs against, resolved once per request.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub target: Arc<SourceTarget>,
    pub run_interval: RunInterval,
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("census").join("config.yaml"))
    }

    /// Validate everything that would otherwise fail per request.
    pub fn validate(&self) -> std::result::Result<(), CensusError> {
        for (name, source) in &self.sources {
            RunInterval::from_minutes(source.run_time_minutes).map_err(|e| {
                CensusError::Configuration(format!("source '{}': {}", name, e))
            })?;
        }
        if let Some(name) = &self.default_source {
            if !self.sources.contains_key(name) {
                return Err(self.unknown_source(name));
            }
        }
        Ok(())
    }

    /// Pick the requested source, else `default_source`, else the only one.
    pub fn resolve_source(
        &self,
        requested: Option<&str>,
    ) -> std::result::Result<SourceContext, CensusError> {
        let name = match requested.or(self.default_source.as_deref()) {
            Some(name) => name.to_string(),
            None => match self.sources.keys().next() {
                Some(only) if self.sources.len() == 1 => only.clone(),
                _ => {
                    return Err(CensusError::Configuration(
                        "no source requested and no default_source configured".to_string(),
                    ))
                }
            },
        };

        let source = self
            .sources
            .get(&name)
            .ok_or_else(|| self.unknown_source(&name))?;
        let run_interval = RunInterval::from_minutes(source.run_time_minutes)?;

        Ok(SourceContext {
            target: Arc::new(SourceTarget {
                name: name.clone(),
                url: source.url.trim_end_matches('/').to_string(),
                api_version: source.api_version,
                verify_tls: source.verify_tls,
                ca_cert: source.ca_cert.clone(),
                client_cert: source.client_cert.clone(),
                client_key: source.client_key.clone(),
            }),
            run_interval,
        })
    }

    pub fn source_summaries(&self) -> Vec<SourceSummary> {
        self.sources
            .iter()
            .map(|(name, s)| SourceSummary {
                name: name.clone(),
                url: s.url.clone(),
                api_version: s.api_version,
                verify_tls: s.verify_tls,
                run_time_minutes: s.run_time_minutes,
                is_default: self.default_source.as_deref() == Some(name.as_str()),
            })
            .collect()
    }

    fn unknown_source(&self, name: &str) -> CensusError {
        CensusError::UnknownSource {
            name: name.to_string(),
            available: if self.sources.is_empty() {
                "(none configured)".to_string()
            } else {
                self.sources.keys().cloned().collect::<Vec<_>>().join(", ")
            },
        }
    }
}

/// Load from the default path (missing file is fine) plus environment.
pub fn load() -> Result<Config> {
    let path = Config::path()?;
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<Config> {
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(path))
        .merge(Env::prefixed("CENSUS_").split("__"))
        .extract()
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let file = write_yaml(
            r#"
default_source: prod
sources:
  prod:
    url: https://puppetdb.example.com:8081/
    run_time_minutes: 60
  lab:
    url: http://lab:8080
    api_version: 3
    verify_tls: false
"#,
        );
        let cfg = load_from(file.path()).unwrap();

        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.jobs.timeout_secs, 30);
        assert_eq!(cfg.jobs.recent_limit, 25);
        assert!(!cfg.classifier.check_mismatch);
        assert_eq!(cfg.daemon.http_addr, "127.0.0.1:9200");

        let ctx = cfg.resolve_source(None).unwrap();
        assert_eq!(ctx.target.name, "prod");
        assert_eq!(ctx.target.url, "https://puppetdb.example.com:8081");
        assert_eq!(ctx.run_interval, RunInterval::from_minutes(60).unwrap());

        let lab = cfg.resolve_source(Some("lab")).unwrap();
        assert_eq!(lab.target.api_version, 3);
        assert!(!lab.target.verify_tls);
        assert_eq!(lab.run_interval, RunInterval::from_minutes(30).unwrap());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_from(&dir.path().join("absent.yaml")).unwrap();
        assert!(cfg.sources.is_empty());
        assert!(matches!(
            cfg.resolve_source(None),
            Err(CensusError::Configuration(_))
        ));
    }

    #[test]
    fn test_negative_run_time_is_rejected() {
        let file = write_yaml(
            r#"
sources:
  bad:
    url: http://bad:8080
    run_time_minutes: -10
"#,
        );
        let err = load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("negative") || format!("{:#}", err).contains("negative"));
    }

    #[test]
    fn test_unknown_source_lists_available() {
        let mut cfg = Config::default();
        cfg.sources.insert(
            "prod".into(),
            SourceConfig {
                url: "http://prod".into(),
                api_version: 4,
                verify_tls: true,
                ca_cert: None,
                client_cert: None,
                client_key: None,
                run_time_minutes: 30,
            },
        );

        // A single configured source is picked without a default.
        assert_eq!(cfg.resolve_source(None).unwrap().target.name, "prod");

        match cfg.resolve_source(Some("staging")) {
            Err(CensusError::UnknownSource { name, available }) => {
                assert_eq!(name, "staging");
                assert_eq!(available, "prod");
            }
            other => panic!("expected UnknownSource, got {:?}", other),
        }
    }
}
