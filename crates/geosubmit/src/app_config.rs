//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! Every section has defaults, so an empty environment and no file still boots a
//! working (if forgetful, in-memory) service on 127.0.0.1:7001.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::jobs::JobSpec;
use crate::locate::HttpLocatorConfig;
use crate::retry::RetryPolicy;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub locate: LocateConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// 🔑 API key → who it belongs to. Only used to label metrics; unknown keys still get in.
    #[serde(default)]
    pub api_keys: HashMap<String, ApiKeyConfig>,
}

/// 🌐 Where to listen and how much body we are willing to read.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7001))
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// 🚚 Chunking and job lifetime.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// 📦 Reports per job. Zero is bumped to one.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// ⏰ Seconds a queued job stays runnable. Six hours, then it's shed.
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            job_ttl_secs: default_job_ttl_secs(),
        }
    }
}

fn default_chunk_size() -> usize {
    100
}

fn default_job_ttl_secs() -> u64 {
    6 * 60 * 60
}

/// ✉️ How many jobs may wait before submissions start bouncing.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity", alias = "channel_size")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    10_000
}

/// 🧭 Which locator answers "-255" requests.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
pub enum LocateConfig {
    #[default]
    Disabled,
    Http(HttpLocatorConfig),
}

/// ⏲️ The aggregation schedule.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "JobSpec::defaults")]
    pub jobs: Vec<JobSpec>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            retry: RetryPolicy::default(),
            jobs: JobSpec::defaults(),
        }
    }
}

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}

/// 🏷️ One known API key.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiKeyConfig {
    pub name: String,
    /// 📈 Emit per-key upload metrics for this key.
    #[serde(default)]
    pub log: bool,
}

/// 🚀 Load the config from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 `GEOSUBMIT_*` environment variables form the base layer (nested keys use `__`,
/// e.g. `GEOSUBMIT_SERVER__BIND_ADDR`). If a TOML file is given it is merged on top
/// and wins on conflicts. No file means env only, no guessing at `config.toml`.
///
/// 💀 Returns an error if the config is unparseable, with a message that says which
/// sources were involved.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("GEOSUBMIT_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (GEOSUBMIT_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (GEOSUBMIT_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_test_config(contents: &str) -> NamedTempFile {
        let mut the_file = tempfile::Builder::new()
            .prefix("geosubmit_app_config_")
            .suffix(".toml")
            .tempfile()
            .expect("💀 No temp file for us. The filesystem said 'new phone who dis'.");
        the_file
            .write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        the_file
    }

    #[test]
    fn the_one_where_an_empty_file_still_boots_a_whole_service() {
        let the_file = write_test_config("");
        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(the_file.path()))
            .extract()
            .expect("💀 Every section should default. Serde left us on read otherwise.");

        assert_eq!(app_config.server.bind_addr, "127.0.0.1:7001".parse().expect("valid addr"));
        assert_eq!(app_config.server.max_body_bytes, 1024 * 1024);
        assert_eq!(app_config.dispatch.chunk_size, 100);
        assert_eq!(app_config.dispatch.job_ttl_secs, 21_600);
        assert_eq!(app_config.queue.capacity, 10_000);
        assert_eq!(app_config.locate, LocateConfig::Disabled);
        assert_eq!(app_config.scheduler.retry.max_attempts, 3);
        assert_eq!(app_config.scheduler.jobs, JobSpec::defaults());
        assert!(app_config.api_keys.is_empty());
    }

    #[test]
    fn the_one_where_every_knob_gets_turned() {
        let the_file = write_test_config(
            r#"
            [server]
            bind_addr = "0.0.0.0:8080"
            max_body_bytes = 2048

            [dispatch]
            chunk_size = 50
            job_ttl_secs = 60

            [queue]
            capacity = 8

            [locate.Http]
            url = "http://locate.test/v1/geolocate"

            [scheduler]
            interval_secs = 3600
            retry = { max_attempts = 5, base_delay_ms = 10 }
            jobs = [
                { kind = "location", start = 7, end = 1 },
                { kind = "unique_wifi", ago = 2 },
            ]

            [api_keys.abc123]
            name = "acme"
            log = true
            "#,
        );

        let app_config = load_config(Some(the_file.path()))
            .expect("💀 Full config should parse. The schema drift goblin does not get this win.");

        assert_eq!(app_config.server.bind_addr.port(), 8080);
        assert_eq!(app_config.dispatch.chunk_size, 50);
        assert_eq!(app_config.queue.capacity, 8);
        match app_config.locate {
            LocateConfig::Http(http) => {
                assert_eq!(http.url, "http://locate.test/v1/geolocate");
                assert_eq!(http.timeout_secs, 5);
            }
            honestly_who_knows => panic!("💀 Expected an Http locator, serde took us to {honestly_who_knows:?}"),
        }
        assert_eq!(app_config.scheduler.retry.max_attempts, 5);
        assert_eq!(app_config.scheduler.retry.max_delay_ms, 30_000);
        assert_eq!(
            app_config.scheduler.jobs,
            vec![JobSpec::Location { start: 7, end: 1 }, JobSpec::UniqueWifi { ago: 2 }]
        );
        assert_eq!(
            app_config.api_keys.get("abc123"),
            Some(&ApiKeyConfig {
                name: "acme".to_string(),
                log: true
            })
        );
    }

    #[test]
    fn the_one_where_the_queue_answers_to_its_former_stage_name() {
        let the_file = write_test_config(
            r#"
            [queue]
            channel_size = 12
            "#,
        );
        let app_config = load_config(Some(the_file.path())).expect("💀 alias should parse");
        assert_eq!(app_config.queue.capacity, 12);
    }

    #[test]
    fn the_one_where_nonsense_gets_a_helpful_error() {
        let the_file = write_test_config(
            r#"
            [dispatch]
            chunk_size = "lots"
            "#,
        );
        let the_error = load_config(Some(the_file.path())).expect_err("💀 a string is not a chunk size");
        assert!(format!("{the_error:#}").contains("GEOSUBMIT_"));
    }
}
