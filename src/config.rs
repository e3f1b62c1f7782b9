use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LoggerError, Result};
use crate::logs::DEFAULT_CAPACITY;

pub const DEFAULT_CONFIG_FILE: &str = "udplogger.yaml";

/// Settings as written in the file. Every key may be overridden per section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    pub bind_address: Option<String>,
    pub max_entries: Option<usize>,
    pub server_port: Option<u16>,
    pub live_port: Option<u16>,
    pub tag_width: Option<usize>,
    pub ports: Option<Vec<SourceConfig>>,
}

impl ConfigSection {
    fn overlay(self, other: ConfigSection) -> ConfigSection {
        ConfigSection {
            bind_address: other.bind_address.or(self.bind_address),
            max_entries: other.max_entries.or(self.max_entries),
            server_port: other.server_port.or(self.server_port),
            live_port: other.live_port.or(self.live_port),
            tag_width: other.tag_width.or(self.tag_width),
            ports: other.ports.or(self.ports),
        }
    }
}

/// One ingestion port. Without `tag`, payloads carry their own `tag$` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub port: u16,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Fully resolved settings consumed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggerConfig {
    pub bind_address: IpAddr,
    pub max_entries: usize,
    pub server_port: u16,
    pub live_port: u16,
    pub tag_width: usize,
    pub sources: Vec<SourceConfig>,
}

/// An explicit path is taken relative to the working directory; otherwise
/// `./udplogger.yaml` must exist.
pub fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    if let Some(path) = explicit {
        return Ok(cwd.join(path));
    }
    let candidate = cwd.join(DEFAULT_CONFIG_FILE);
    if candidate.exists() {
        Ok(candidate)
    } else {
        Err(LoggerError::ConfigNotFound(PathBuf::from(DEFAULT_CONFIG_FILE)))
    }
}

pub fn load_config(path: &Path, section: Option<&str>) -> Result<LoggerConfig> {
    if !path.exists() {
        return Err(LoggerError::ConfigNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, section)
}

pub fn parse_config(content: &str, section: Option<&str>) -> Result<LoggerConfig> {
    let mut root: serde_yaml::Mapping = serde_yaml::from_str(content)?;
    let mut sections: HashMap<String, ConfigSection> = match root.remove("sections") {
        Some(value) => serde_yaml::from_value(value)?,
        None => HashMap::new(),
    };
    let global: ConfigSection = serde_yaml::from_value(serde_yaml::Value::Mapping(root))?;
    let settings = match section {
        Some(name) => {
            let overrides = sections
                .remove(name)
                .ok_or_else(|| LoggerError::SectionNotFound(name.to_string()))?;
            global.overlay(overrides)
        }
        None => global,
    };
    let config = resolve(settings)?;
    validate_config(&config)?;
    Ok(config)
}

fn resolve(settings: ConfigSection) -> Result<LoggerConfig> {
    let bind_address = match settings.bind_address {
        Some(address) => address.trim().parse().map_err(|_| {
            LoggerError::InvalidConfig(format!("bind_address is not an IP address: {address}"))
        })?,
        None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };
    let server_port = settings
        .server_port
        .ok_or_else(|| LoggerError::InvalidConfig("server_port is required".to_string()))?;
    let live_port = settings
        .live_port
        .ok_or_else(|| LoggerError::InvalidConfig("live_port is required".to_string()))?;
    let sources = settings.ports.unwrap_or_default();
    let tag_width = settings
        .tag_width
        .unwrap_or_else(|| longest_tag(&sources));

    Ok(LoggerConfig {
        bind_address,
        max_entries: settings.max_entries.unwrap_or(DEFAULT_CAPACITY),
        server_port,
        live_port,
        tag_width,
        sources,
    })
}

fn longest_tag(sources: &[SourceConfig]) -> usize {
    sources
        .iter()
        .filter_map(|source| source.tag.as_ref())
        .map(|tag| tag.chars().count())
        .max()
        .unwrap_or(0)
}

fn validate_config(config: &LoggerConfig) -> Result<()> {
    if config.max_entries == 0 {
        return Err(LoggerError::InvalidConfig(
            "max_entries must be at least 1".to_string(),
        ));
    }
    if config.sources.is_empty() {
        return Err(LoggerError::InvalidConfig(
            "at least one entry in ports is required".to_string(),
        ));
    }
    if config.server_port == 0 || config.live_port == 0 {
        return Err(LoggerError::InvalidConfig(
            "server_port and live_port must be non-zero".to_string(),
        ));
    }
    if config.server_port == config.live_port {
        return Err(LoggerError::InvalidConfig(format!(
            "server_port and live_port are both {}",
            config.server_port
        )));
    }

    let mut ports = HashSet::new();
    for source in &config.sources {
        if source.port == 0 {
            return Err(LoggerError::InvalidConfig(
                "ingestion ports must be non-zero".to_string(),
            ));
        }
        if !ports.insert(source.port) {
            return Err(LoggerError::InvalidConfig(format!(
                "duplicate ingestion port: {}",
                source.port
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const BASIC: &str = r#"
server_port: 4000
live_port: 4001
ports:
  - port: 5000
    tag: web
  - port: 5001
    tag: database
  - port: 5002
"#;

    #[test]
    fn resolves_defaults() {
        let config = parse_config(BASIC, None).unwrap();
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.server_port, 4000);
        assert_eq!(config.live_port, 4001);
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.sources[2].tag, None);
    }

    #[test]
    fn tag_width_defaults_to_longest_static_tag() {
        let config = parse_config(BASIC, None).unwrap();
        assert_eq!(config.tag_width, "database".len());
    }

    #[test]
    fn explicit_tag_width_wins() {
        let content = format!("{BASIC}tag_width: 12\n");
        assert_eq!(parse_config(&content, None).unwrap().tag_width, 12);
    }

    #[test]
    fn embedded_only_sources_have_zero_width() {
        let content = "server_port: 1\nlive_port: 2\nports:\n  - port: 3\n";
        assert_eq!(parse_config(content, None).unwrap().tag_width, 0);
    }

    #[test]
    fn section_overrides_global_keys() {
        let content = format!(
            "{BASIC}sections:\n  staging:\n    max_entries: 50\n    server_port: 4100\n"
        );
        let config = parse_config(&content, Some("staging")).unwrap();
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.server_port, 4100);
        assert_eq!(config.live_port, 4001);
        assert_eq!(config.sources.len(), 3);
    }

    #[test]
    fn unknown_section_is_an_error() {
        let err = parse_config(BASIC, Some("prod")).unwrap_err();
        assert!(matches!(err, LoggerError::SectionNotFound(name) if name == "prod"));
    }

    #[test]
    fn rejects_zero_capacity() {
        let content = format!("{BASIC}max_entries: 0\n");
        assert!(matches!(
            parse_config(&content, None),
            Err(LoggerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_duplicate_ingestion_ports() {
        let content = "server_port: 1\nlive_port: 2\nports:\n  - port: 3\n  - port: 3\n";
        assert!(matches!(
            parse_config(content, None),
            Err(LoggerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_shared_tcp_port() {
        let content = "server_port: 7\nlive_port: 7\nports:\n  - port: 3\n";
        assert!(matches!(
            parse_config(content, None),
            Err(LoggerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn requires_server_port() {
        let content = "live_port: 2\nports:\n  - port: 3\n";
        assert!(matches!(
            parse_config(content, None),
            Err(LoggerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn requires_ports() {
        let content = "server_port: 1\nlive_port: 2\n";
        assert!(matches!(
            parse_config(content, None),
            Err(LoggerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_bad_bind_address() {
        let content = format!("{BASIC}bind_address: not-an-ip\n");
        assert!(matches!(
            parse_config(&content, None),
            Err(LoggerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn malformed_yaml_is_reported() {
        assert!(matches!(
            parse_config("server_port: [", None),
            Err(LoggerError::Yaml(_))
        ));
    }

    #[test]
    fn misspelled_key_is_rejected() {
        let content = format!("{BASIC}max_entrys: 10\n");
        assert!(matches!(
            parse_config(&content, None),
            Err(LoggerError::Yaml(_))
        ));
    }

    #[test]
    fn misspelled_section_key_is_rejected() {
        let content = format!("{BASIC}sections:\n  staging:\n    live_prot: 4101\n");
        assert!(matches!(
            parse_config(&content, Some("staging")),
            Err(LoggerError::Yaml(_))
        ));
    }

    #[test]
    fn misspelled_port_key_is_rejected() {
        let content = "server_port: 1\nlive_port: 2\nports:\n  - port: 3\n    tga: web\n";
        assert!(matches!(
            parse_config(content, None),
            Err(LoggerError::Yaml(_))
        ));
    }

    #[test]
    fn explicit_config_path_is_anchored_to_the_working_directory() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            config_path(Some(PathBuf::from("conf/udplogger.yaml"))).unwrap(),
            cwd.join("conf/udplogger.yaml")
        );
        let absolute = cwd.join("elsewhere.yaml");
        assert_eq!(config_path(Some(absolute.clone())).unwrap(), absolute);
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BASIC.as_bytes()).unwrap();
        let config = load_config(file.path(), None).unwrap();
        assert_eq!(config.server_port, 4000);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");
        assert!(matches!(
            load_config(&path, None),
            Err(LoggerError::ConfigNotFound(p)) if p == path
        ));
    }
}
