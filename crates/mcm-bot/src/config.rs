use std::collections::HashSet;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::server::{CheckPolicy, ServerSpec};

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_DEALLOCATION_THRESHOLD: u32 = 5;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub servers_file: PathBuf,
    pub listen_addr: SocketAddr,
    pub notify_webhook_url: Option<String>,
    pub reconcile_interval: Duration,
    pub operation_timeout: Duration,
    /// Reported by `uptime`.
    pub host_name: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            servers_file: env::var("SERVERS_FILE")
                .map_err(|_| ConfigError::MissingEnv("SERVERS_FILE"))?
                .into(),
            listen_addr: env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".into())
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::InvalidEnv {
                    var: "LISTEN_ADDR",
                    reason: e.to_string(),
                })?,
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            reconcile_interval: env_duration("RECONCILE_INTERVAL", "1h")?,
            operation_timeout: env_duration("OPERATION_TIMEOUT", "10m")?,
            host_name: host_name(),
        })
    }
}

fn host_name() -> String {
    let non_empty = |v: String| Some(v.trim().to_string()).filter(|v| !v.is_empty());
    env::var("HOSTNAME")
        .ok()
        .and_then(non_empty)
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok().and_then(non_empty))
        .unwrap_or_else(|| "unknown".to_string())
}

fn env_duration(var: &'static str, default: &str) -> Result<Duration, ConfigError> {
    let raw = env::var(var).unwrap_or_else(|_| default.into());
    let duration = humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::InvalidEnv {
        var,
        reason: e.to_string(),
    })?;
    non_zero(var, duration)
}

/// Interval timers reject a zero period, so catch it at startup.
fn non_zero(field: &str, duration: Duration) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::ZeroDuration {
            field: field.to_string(),
        });
    }
    Ok(duration)
}

/// The servers file as written.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    pub check_interval: Option<String>,
    #[serde(alias = "timeout")]
    pub check_timeout: Option<String>,
    pub deallocation_threshold: Option<u32>,
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerEntry {
    /// `hostname` or `hostname:port`.
    pub host: String,
    pub name: Option<String>,
    pub resource_group: Option<String>,
    pub check_interval: Option<String>,
    #[serde(alias = "check_timeout")]
    pub timeout: Option<String>,
    pub deallocation_threshold: Option<u32>,
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Fill every unset per-server field from the global defaults.
    pub fn resolve(self) -> Result<Vec<ServerSpec>, ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }

        let defaults = CheckPolicy {
            check_interval: duration_or("check_interval", self.check_interval.as_deref(), DEFAULT_CHECK_INTERVAL)?,
            check_timeout: duration_or("check_timeout", self.check_timeout.as_deref(), DEFAULT_CHECK_TIMEOUT)?,
            deallocation_threshold: self
                .deallocation_threshold
                .unwrap_or(DEFAULT_DEALLOCATION_THRESHOLD),
        };
        if defaults.deallocation_threshold == 0 {
            return Err(ConfigError::InvalidThreshold("defaults".into()));
        }

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(self.servers.len());
        for entry in self.servers {
            let spec = entry.resolve(&defaults)?;
            if !seen.insert(spec.address()) {
                return Err(ConfigError::DuplicateHost(spec.address()));
            }
            specs.push(spec);
        }
        Ok(specs)
    }
}

impl ServerEntry {
    fn resolve(self, defaults: &CheckPolicy) -> Result<ServerSpec, ConfigError> {
        let (host, port) = split_host(&self.host)?;

        let name = self
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| host.clone());
        let resource_group = self
            .resource_group
            .filter(|rg| !rg.is_empty())
            .unwrap_or_else(|| format!("{name}-rg"));

        let field = |key: &str| format!("servers[{}].{key}", self.host);
        let policy = CheckPolicy {
            check_interval: duration_or(&field("check_interval"), self.check_interval.as_deref(), defaults.check_interval)?,
            check_timeout: duration_or(&field("timeout"), self.timeout.as_deref(), defaults.check_timeout)?,
            deallocation_threshold: self
                .deallocation_threshold
                .unwrap_or(defaults.deallocation_threshold),
        };
        if policy.deallocation_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(self.host));
        }

        Ok(ServerSpec {
            name,
            resource_group,
            host,
            port,
            policy,
        })
    }
}

impl ServerSpec {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn split_host(raw: &str) -> Result<(String, u16), ConfigError> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let (host, port) = match parts.as_slice() {
        [host] => (*host, bedrock_ping::DEFAULT_PORT),
        [host, port] => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidHost(raw.to_string()))?;
            (*host, port)
        }
        _ => return Err(ConfigError::InvalidHost(raw.to_string())),
    };
    if host.is_empty() {
        return Err(ConfigError::InvalidHost(raw.to_string()));
    }
    Ok((host.to_string(), port))
}

fn duration_or(field: &str, raw: Option<&str>, default: Duration) -> Result<Duration, ConfigError> {
    let Some(value) = raw else {
        return Ok(default);
    };
    let duration = humantime::parse_duration(value.trim()).map_err(|_| {
        ConfigError::InvalidDuration {
            field: field.to_string(),
            value: value.to_string(),
        }
    })?;
    non_zero(field, duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLEET: &str = r#"
check_interval: 2m
deallocation_threshold: 4
servers:
  - host: mc.example.com
  - host: creative.example.com:19140
    name: creative-vm
    resource_group: games
    check_interval: 30s
    timeout: 2s
    deallocation_threshold: 3
"#;

    #[test]
    fn resolves_defaults_and_overrides() {
        let specs = FleetConfig::from_yaml(FLEET).unwrap().resolve().unwrap();
        assert_eq!(specs.len(), 2);

        let plain = &specs[0];
        assert_eq!(plain.host, "mc.example.com");
        assert_eq!(plain.port, 19132);
        assert_eq!(plain.name, "mc.example.com");
        assert_eq!(plain.resource_group, "mc.example.com-rg");
        assert_eq!(
            plain.policy,
            CheckPolicy {
                check_interval: Duration::from_secs(120),
                check_timeout: DEFAULT_CHECK_TIMEOUT,
                deallocation_threshold: 4,
            }
        );

        let custom = &specs[1];
        assert_eq!(custom.address(), "creative.example.com:19140");
        assert_eq!(custom.name, "creative-vm");
        assert_eq!(custom.resource_group, "games");
        assert_eq!(custom.policy.check_interval, Duration::from_secs(30));
        assert_eq!(custom.policy.check_timeout, Duration::from_secs(2));
        assert_eq!(custom.policy.deallocation_threshold, 3);
    }

    #[test]
    fn global_defaults_when_unset() {
        let specs = FleetConfig::from_yaml("servers:\n  - host: a.example.com\n")
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(specs[0].policy.check_interval, DEFAULT_CHECK_INTERVAL);
        assert_eq!(specs[0].policy.deallocation_threshold, DEFAULT_DEALLOCATION_THRESHOLD);
    }

    #[test]
    fn rejects_host_with_two_colons() {
        let err = FleetConfig::from_yaml("servers:\n  - host: a:1:2\n")
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHost(h) if h == "a:1:2"));
    }

    #[test]
    fn rejects_non_numeric_port() {
        let err = FleetConfig::from_yaml("servers:\n  - host: a.example.com:mc\n")
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHost(_)));
    }

    #[test]
    fn rejects_bad_duration() {
        let err = FleetConfig::from_yaml("check_interval: soon\nservers:\n  - host: a\n")
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { ref field, .. } if field == "check_interval"));
    }

    #[test]
    fn rejects_zero_durations() {
        let cases = [
            ("check_interval: 0s\nservers:\n  - host: a\n", "check_interval"),
            ("check_timeout: 0s\nservers:\n  - host: a\n", "check_timeout"),
            ("servers:\n  - host: a\n    check_interval: 0m\n", "servers[a].check_interval"),
            ("servers:\n  - host: a\n    timeout: 0ms\n", "servers[a].timeout"),
        ];
        for (yaml, expected) in cases {
            let err = FleetConfig::from_yaml(yaml).unwrap().resolve().unwrap_err();
            assert!(
                matches!(err, ConfigError::ZeroDuration { ref field } if field == expected),
                "{yaml:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn rejects_zero_env_durations() {
        assert!(matches!(
            non_zero("RECONCILE_INTERVAL", Duration::ZERO),
            Err(ConfigError::ZeroDuration { ref field }) if field == "RECONCILE_INTERVAL"
        ));
        assert_eq!(
            non_zero("OPERATION_TIMEOUT", Duration::from_secs(600)).unwrap(),
            Duration::from_secs(600)
        );

        // Both env durations go through the same check.
        let err = env_duration("MCM_TEST_ZERO_OPERATION_TIMEOUT", "0s").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { ref field } if field == "MCM_TEST_ZERO_OPERATION_TIMEOUT"));
        let err = env_duration("MCM_TEST_ZERO_RECONCILE_INTERVAL", "0h").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { .. }));
    }

    #[test]
    fn host_name_is_never_empty() {
        let name = host_name();
        assert!(!name.is_empty());
        assert_eq!(name, name.trim());
    }

    #[test]
    fn rejects_zero_threshold() {
        let err = FleetConfig::from_yaml("servers:\n  - host: a\n    deallocation_threshold: 0\n")
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold(_)));
    }

    #[test]
    fn rejects_empty_fleet_and_duplicates() {
        let empty = FleetConfig::from_yaml("check_interval: 1m\n").unwrap().resolve();
        assert!(matches!(empty, Err(ConfigError::NoServers)));

        let dup = FleetConfig::from_yaml("servers:\n  - host: a\n  - host: a:19132\n")
            .unwrap()
            .resolve();
        assert!(matches!(dup, Err(ConfigError::DuplicateHost(h)) if h == "a:19132"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = FleetConfig::from_yaml("servers:\n  - host: a\n    colour: red\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = FleetConfig::load(Path::new("/nonexistent/servers.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
