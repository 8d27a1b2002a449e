use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Deserializer, de};
use serde_json::Value;
use std::{env, fmt, fs, path::Path, path::PathBuf, str::FromStr};

const DEFAULT_PORT: u16 = 8080;

/// Broker configuration, read from a JSON document and then overlaid with
/// environment variables and CLI flags.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    pub broker_id: String,
    #[serde(default)]
    pub broker_username: String,
    #[serde(default)]
    pub broker_password: String,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
    pub storage: StorageConfig,
}

/// One entry of `plans`: which plan variant to offer under which id.
#[derive(Deserialize, Clone, Debug)]
pub struct PlanConfig {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Stardog,
    Sql,
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!("invalid log level `{}`", other)),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about = "Open Service Broker for Stardog")]
pub struct Args {
    /// Path to the JSON configuration document
    #[arg(default_value = "data/conf.json")]
    pub config: PathBuf,

    /// Port to listen on (overrides PORT and the config file)
    #[arg(long)]
    pub port: Option<u16>,

    /// Create the SQL storage schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl ServerConfig {
    /// Parse CLI args, load the config file and apply overrides. Returns the
    /// config and the migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        Self::resolve(args, |key| env::var(key).ok())
    }

    fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let mut cfg = Self::load(&args.config)?;
        cfg.apply_env(lookup)?;
        if let Some(port) = args.port {
            cfg.port = port;
        }
        cfg.validate()?;
        Ok((cfg, args.migrate))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing configuration {}", path.display()))
    }

    /// `PORT`, `SECURITY_USER_NAME` and `SECURITY_USER_PASSWORD` replace the
    /// file values when set and non-empty.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(value) = get("PORT") {
            self.port = value
                .trim()
                .parse::<u16>()
                .with_context(|| format!("parsing PORT value `{}`", value))?;
        }
        if let Some(value) = get("SECURITY_USER_NAME") {
            self.broker_username = value;
        }
        if let Some(value) = get("SECURITY_USER_PASSWORD") {
            self.broker_password = value;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.broker_id.trim().is_empty() {
            bail!("broker_id must not be empty");
        }
        if self.broker_username.is_empty() || self.broker_password.is_empty() {
            bail!("broker_username and broker_password must be set");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("broker_id", &self.broker_id)
            .field("broker_username", &self.broker_username)
            .field("log_level", &self.log_level)
            .field("log_file", &self.log_file)
            .field("plans", &self.plans.iter().map(|p| &p.id).collect::<Vec<_>>())
            .field("storage", &self.storage.kind)
            .finish()
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_host() -> String {
    "0.0.0.0".into()
}

/// The port may be written as a number or as a string.
fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid port `{}`", text))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{collections::HashMap, io::Write};
    use tempfile::NamedTempFile;

    fn sample() -> Value {
        json!({
            "port": "8181",
            "broker_id": "broker-1",
            "broker_username": "broker",
            "broker_password": "pw",
            "log_level": "debug",
            "plans": [{
                "name": "shared_database_plan",
                "id": "P",
                "parameters": {
                    "stardog_url": "http://localhost:5820",
                    "admin_username": "admin",
                    "admin_password": "admin"
                }
            }],
            "storage": {"type": "memory"}
        })
    }

    fn write_config(value: &Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file
    }

    fn args(file: &NamedTempFile, extra: &[&str]) -> Args {
        let path = file.path().to_str().unwrap().to_string();
        let mut argv = vec!["stardog-service-broker".to_string(), path];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Args::try_parse_from(argv).unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn loads_file_values() {
        let file = write_config(&sample());
        let (cfg, migrate) = ServerConfig::resolve(args(&file, &[]), env(&[])).unwrap();
        assert!(!migrate);
        assert_eq!(cfg.port, 8181);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.broker_id, "broker-1");
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.plans.len(), 1);
        assert_eq!(cfg.plans[0].name, "shared_database_plan");
        assert_eq!(cfg.storage.kind, StorageKind::Memory);
        assert!(cfg.storage.parameters.is_null());
        assert_eq!(cfg.addr(), "0.0.0.0:8181");
    }

    #[test]
    fn numeric_port_is_accepted() {
        let mut value = sample();
        value["port"] = json!(9000);
        let cfg = ServerConfig::load(write_config(&value).path()).unwrap();
        assert_eq!(cfg.port, 9000);

        value["port"] = json!("not-a-port");
        assert!(ServerConfig::load(write_config(&value).path()).is_err());
    }

    #[test]
    fn environment_overrides_file_and_flag_overrides_environment() {
        let file = write_config(&sample());
        let vars = [
            ("PORT", "7000"),
            ("SECURITY_USER_NAME", "cf-user"),
            ("SECURITY_USER_PASSWORD", "cf-pw"),
        ];
        let (cfg, _) = ServerConfig::resolve(args(&file, &[]), env(&vars)).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.broker_username, "cf-user");
        assert_eq!(cfg.broker_password, "cf-pw");

        let (cfg, migrate) =
            ServerConfig::resolve(args(&file, &["--port", "7100", "--migrate"]), env(&vars))
                .unwrap();
        assert_eq!(cfg.port, 7100);
        assert!(migrate);
    }

    #[test]
    fn empty_environment_values_are_ignored() {
        let file = write_config(&sample());
        let (cfg, _) =
            ServerConfig::resolve(args(&file, &[]), env(&[("SECURITY_USER_NAME", "")])).unwrap();
        assert_eq!(cfg.broker_username, "broker");

        let bad = ServerConfig::resolve(args(&file, &[]), env(&[("PORT", "eighty")]));
        assert!(bad.is_err());
    }

    #[test]
    fn rejects_invalid_documents() {
        let mut value = sample();
        value["log_level"] = json!("LOUD");
        assert!(ServerConfig::load(write_config(&value).path()).is_err());

        let mut value = sample();
        value["storage"] = json!({"type": "mysql"});
        assert!(ServerConfig::load(write_config(&value).path()).is_err());

        let mut value = sample();
        value["broker_id"] = json!("");
        let file = write_config(&value);
        assert!(ServerConfig::resolve(args(&file, &[]), env(&[])).is_err());

        assert!(ServerConfig::load(Path::new("/definitely/not/here.json")).is_err());
    }

    #[test]
    fn log_level_is_case_insensitive() {
        assert_eq!("Warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Error.as_filter(), "error");
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn log_level_deserializes_through_string() {
        let level: LogLevel = serde_json::from_value(json!("error")).unwrap();
        assert_eq!(level, LogLevel::Error);
        assert!(LogLevel::try_from("verbose".to_string()).is_err());
        assert!(serde_json::from_value::<LogLevel>(json!("verbose")).is_err());
    }

    #[test]
    fn debug_output_hides_password() {
        let cfg = ServerConfig::load(write_config(&sample()).path()).unwrap();
        let printed = format!("{:?}", cfg);
        assert!(printed.contains("broker-1"));
        assert!(!printed.contains("\"pw\""));
        assert!(!printed.contains("admin_password"));
    }
}
