use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub topic: TopicConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub demo: DemoConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Consecutive command failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Successful probes needed to close a half-open circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Seconds an open circuit waits before probing again
    #[serde(default = "default_reset_timeout_seconds")]
    pub reset_timeout_seconds: u64,
}

/// Physical key suffixes appended to every topic name.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_list_suffix")]
    pub list_suffix: String,
    #[serde(default = "default_zset_suffix")]
    pub zset_suffix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Poll interval of both consumer loops, in microseconds
    #[serde(default = "default_rate_limit_period_us")]
    pub rate_limit_period_us: u64,
    #[serde(default)]
    pub use_blpop: bool,
}

/// Settings for the demo producer in the binary.
#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_reset_timeout_seconds() -> u64 {
    30
}

fn default_list_suffix() -> String {
    ":list".to_string()
}

fn default_zset_suffix() -> String {
    ":zset".to_string()
}

fn default_topic() -> String {
    "testTopic1".to_string()
}

fn default_rate_limit_period_us() -> u64 {
    200
}

fn default_publish_interval_ms() -> u64 {
    100
}

fn default_delay_ms() -> u64 {
    1000
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("redis.url", default_redis_url())?
            .set_default("topic.list_suffix", default_list_suffix())?
            .set_default("topic.zset_suffix", default_zset_suffix())?
            .set_default("consumer.topic", default_topic())?
            .set_default("consumer.rate_limit_period_us", default_rate_limit_period_us() as i64)?
            .set_default("consumer.use_blpop", false)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // MQ__REDIS__URL, MQ__CONSUMER__USE_BLPOP, ...
            .add_source(
                Environment::with_prefix("MQ")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_seconds: default_reset_timeout_seconds(),
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            list_suffix: default_list_suffix(),
            zset_suffix: default_zset_suffix(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            rate_limit_period_us: default_rate_limit_period_us(),
            use_blpop: false,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: default_publish_interval_ms(),
            delay_ms: default_delay_ms(),
        }
    }
}
