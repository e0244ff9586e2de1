use engine_core::{
    retry::RetryPolicy,
    sink::{DEFAULT_PART_SIZE, MIN_PART_SIZE, SinkConfig},
    tasks::{NetworkConfig, lifecycle::LifecycleSettings},
};
use object_store::{BackoffConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::warn;

/// Errors raised while loading or interpreting the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A parameter layer was requested that the config does not define.
    #[error("Unknown parameter layer: {0}")]
    UnknownLayer(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub aws: AwsSettings,
    pub secrets: SecretSettings,
    pub sink: SinkSettings,
    pub tasks: TaskSettings,
    pub templates: TemplateSettings,
    /// Named parameter layers, merged over `global` in request order.
    pub params: BTreeMap<String, toml::Table>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    pub region: Option<String>,
    /// Overrides every AWS endpoint, e.g. a local S3/ECS emulator.
    pub endpoint: Option<String>,
    pub allow_http: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretBackend {
    #[default]
    Aws,
    /// `{root}/{name}.json` on the local filesystem.
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretSettings {
    pub backend: SecretBackend,
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub part_size: usize,
    pub compression_level: u32,
    pub retry: RetryPolicy,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            compression_level: 6,
            retry: RetryPolicy::default(),
        }
    }
}

impl SinkSettings {
    /// Request retries for the S3 client. Every request the sink makes,
    /// multipart parts included, is retried there.
    pub fn store_retry(&self) -> RetryConfig {
        RetryConfig {
            backoff: BackoffConfig {
                init_backoff: self.retry.base_delay,
                max_backoff: self.retry.max_delay,
                base: 2.0,
            },
            max_retries: self.retry.max_attempts.saturating_sub(1),
            ..RetryConfig::default()
        }
    }

    /// Sink settings for a store built with [`store_retry`](Self::store_retry).
    /// The sink itself makes one attempt per request so a failing put is
    /// not retried on top of the client's own retries.
    pub fn to_sink_config(&self) -> SinkConfig {
        let part_size = if self.part_size < MIN_PART_SIZE {
            warn!(
                configured = self.part_size,
                minimum = MIN_PART_SIZE,
                "Part size below the multipart minimum, using the minimum"
            );
            MIN_PART_SIZE
        } else {
            self.part_size
        };

        SinkConfig {
            part_size,
            compression_level: self.compression_level.min(9),
            retry: RetryPolicy::none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub cluster: String,
    pub launch_type: String,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub stop_on_abandon: bool,
    pub cpu: String,
    pub memory: String,
    pub task_role_arn: String,
    pub execution_role_arn: String,
    pub log_group: String,
    pub log_stream_prefix: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            cluster: "default".into(),
            launch_type: "FARGATE".into(),
            poll_interval_secs: 3,
            timeout_secs: 6 * 60 * 60,
            stop_on_abandon: false,
            cpu: "1024".into(),
            memory: "2048".into(),
            task_role_arn: String::new(),
            execution_role_arn: String::new(),
            log_group: String::new(),
            log_stream_prefix: "sluice".into(),
            subnets: Vec::new(),
            security_groups: Vec::new(),
            assign_public_ip: false,
        }
    }
}

impl TaskSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.launch_type.eq_ignore_ascii_case("FARGATE") {
            return Err(ConfigError::Invalid(format!(
                "unsupported launch type `{}`; only FARGATE is available",
                self.launch_type
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "tasks.poll_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn lifecycle(&self) -> LifecycleSettings {
        LifecycleSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            stop_on_abandon: self.stop_on_abandon,
        }
    }

    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            subnets: self.subnets.clone(),
            security_groups: self.security_groups.clone(),
            assign_public_ip: self.assign_public_ip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    pub root: PathBuf,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

/// Values substituted into `{APP_ENV}`, `{dag_name}` and `{version}`
/// placeholders of string parameters.
#[derive(Debug, Clone, Copy)]
pub struct ParamScope<'a> {
    pub app_env: &'a str,
    pub dag_name: &'a str,
    pub version: &'a str,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.tasks.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&raw, path)
    }

    /// Merges `global` and then each named layer key by key; later layers
    /// win. `env` always carries the application environment. A missing
    /// `global` layer is treated as empty, any other missing layer is an
    /// error.
    pub fn layered_params(
        &self,
        layers: &[String],
        scope: ParamScope<'_>,
    ) -> Result<BTreeMap<String, JsonValue>, ConfigError> {
        let mut merged = BTreeMap::new();
        merged.insert("env".to_string(), JsonValue::from(scope.app_env));

        if let Some(global) = self.params.get("global") {
            apply_layer(&mut merged, global, scope);
        }
        for name in layers.iter().filter(|name| name.as_str() != "global") {
            let layer = self
                .params
                .get(name)
                .ok_or_else(|| ConfigError::UnknownLayer(name.clone()))?;
            apply_layer(&mut merged, layer, scope);
        }

        Ok(merged)
    }
}

fn apply_layer(merged: &mut BTreeMap<String, JsonValue>, layer: &toml::Table, scope: ParamScope<'_>) {
    for (key, value) in layer {
        let value = match value {
            toml::Value::String(s) => JsonValue::String(format_placeholders(s, scope)),
            other => toml_to_json(other),
        };
        merged.insert(key.clone(), value);
    }
}

fn format_placeholders(raw: &str, scope: ParamScope<'_>) -> String {
    raw.replace("{APP_ENV}", scope.app_env)
        .replace("{dag_name}", scope.dag_name)
        .replace("{version}", scope.version)
}

fn toml_to_json(value: &toml::Value) -> JsonValue {
    match value {
        toml::Value::String(s) => JsonValue::String(s.clone()),
        toml::Value::Integer(i) => JsonValue::from(*i),
        toml::Value::Float(f) => JsonValue::from(*f),
        toml::Value::Boolean(b) => JsonValue::Bool(*b),
        toml::Value::Datetime(dt) => JsonValue::String(dt.to_string()),
        toml::Value::Array(items) => JsonValue::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => JsonValue::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[aws]
region = "us-east-1"

[sink]
part_size = 16777216

[sink.retry]
max_attempts = 5
base_delay = 100
max_delay = 2000

[tasks]
cluster = "etl"
stop_on_abandon = true
subnets = ["subnet-1"]

[params.global]
bucket = "data-{APP_ENV}"
threads = 4

[params.mssql]
bucket = "mssql-{APP_ENV}-{dag_name}-v{version}"
"#;

    fn scope() -> ParamScope<'static> {
        ParamScope {
            app_env: "prod",
            dag_name: "orders",
            version: "1",
        }
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = EngineConfig::from_toml_str("", Path::new("sluice.toml")).unwrap();
        assert_eq!(config.sink.part_size, DEFAULT_PART_SIZE);
        assert_eq!(config.tasks.poll_interval_secs, 3);
        assert!(!config.tasks.stop_on_abandon);
        assert_eq!(config.secrets.backend, SecretBackend::Aws);
    }

    #[test]
    fn test_parses_sections() {
        let config = EngineConfig::from_toml_str(SAMPLE, Path::new("sluice.toml")).unwrap();
        assert_eq!(config.aws.region.as_deref(), Some("us-east-1"));
        assert_eq!(config.sink.retry.max_attempts, 5);
        assert_eq!(config.sink.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.tasks.cluster, "etl");
        assert!(config.tasks.lifecycle().stop_on_abandon);
        assert_eq!(config.tasks.network().subnets, vec!["subnet-1".to_string()]);
    }

    #[test]
    fn test_layers_override_global() {
        let config = EngineConfig::from_toml_str(SAMPLE, Path::new("sluice.toml")).unwrap();

        let base = config.layered_params(&[], scope()).unwrap();
        assert_eq!(base["bucket"], JsonValue::from("data-prod"));
        assert_eq!(base["threads"], JsonValue::from(4));
        assert_eq!(base["env"], JsonValue::from("prod"));

        let layered = config.layered_params(&["mssql".into()], scope()).unwrap();
        assert_eq!(layered["bucket"], JsonValue::from("mssql-prod-orders-v1"));
        assert_eq!(layered["threads"], JsonValue::from(4));
    }

    #[test]
    fn test_unknown_layer() {
        let config = EngineConfig::default();
        let err = config.layered_params(&["nope".into()], scope()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLayer(name) if name == "nope"));
    }

    #[test]
    fn test_rejects_other_launch_types() {
        let err = EngineConfig::from_toml_str("[tasks]\nlaunch_type = \"EC2\"", Path::new("x.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_small_part_size_is_clamped() {
        let settings = SinkSettings {
            part_size: 1024,
            ..SinkSettings::default()
        };
        assert_eq!(settings.to_sink_config().part_size, MIN_PART_SIZE);
    }

    #[test]
    fn test_retries_belong_to_the_store_client() {
        let settings = SinkSettings {
            retry: RetryPolicy::new(4, Duration::from_millis(100), Duration::from_secs(2)),
            ..SinkSettings::default()
        };

        let store = settings.store_retry();
        assert_eq!(store.max_retries, 3);
        assert_eq!(store.backoff.init_backoff, Duration::from_millis(100));
        assert_eq!(store.backoff.max_backoff, Duration::from_secs(2));
        assert_eq!(settings.to_sink_config().retry, RetryPolicy::none());
    }
}
