use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "arena", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file (defaults apply when omitted)
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Number of judge workers, overriding the config file
    #[arg(long = "threads", short = 't')]
    pub threads: Option<u8>,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file, or built-in defaults
    /// when no file was given.
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let Some(path) = &self.config_path else {
            return Ok(Config::default());
        };
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub judge: JudgeConfig,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    pub db_path: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit per sandbox run, in milliseconds.
    pub time_limit_ms: u64,
    /// Memory ceiling per sandbox run, in kilobytes.
    pub memory_limit_kb: u64,
    /// Container image used by the docker runner.
    pub docker_image: String,
    /// Interpreter used by the process-runner fallback.
    pub python_command: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            time_limit_ms: 2000,
            memory_limit_kb: 131072,
            docker_image: "python:3.11".to_string(),
            python_command: "python3".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct JudgeConfig {
    /// Number of judge workers; the worker pool is also the bound on
    /// concurrent sandbox runs.
    pub workers: u8,
    /// How long a request may sit in the queue before it fails as overloaded,
    /// in milliseconds.
    pub max_queue_wait_ms: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_queue_wait_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn full_config_deserializes() {
        let raw = r#"{
            "server": {"bind_address": "127.0.0.1", "bind_port": 8080},
            "sandbox": {"time_limit_ms": 500, "memory_limit_kb": 65536},
            "judge": {"workers": 4, "max_queue_wait_ms": 2500}
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.server.bind_address.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.sandbox.time_limit_ms, 500);
        assert_eq!(config.sandbox.docker_image, "python:3.11");
        assert_eq!(config.judge.workers, 4);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.sandbox.time_limit_ms, 2000);
        assert_eq!(config.judge.max_queue_wait_ms, 10_000);
        assert!(config.server.bind_port.is_none());
    }
}
