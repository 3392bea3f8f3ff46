//! Bridge configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{BridgeError, Result};
use crate::protocol::DEFAULT_STATUS_PORT;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub editor: EditorSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_status_port")]
    pub status_port: u16,
    /// 0 lets the OS pick a free port
    #[serde(default)]
    pub socket_port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            status_port: default_status_port(),
            socket_port: 0,
        }
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Delay before a local edit is forwarded. Works around hosts that fire
    /// an empty-document change right before the close.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// `[editor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EditorSection {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_extension")]
    pub extension: String,
    pub scratch_dir: Option<String>,
}

impl Default for EditorSection {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            extension: default_extension(),
            scratch_dir: None,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub dir: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_status_port() -> u16 {
    DEFAULT_STATUS_PORT
}
fn default_settle_delay_ms() -> u64 {
    50
}
fn default_extension() -> String {
    "txt".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Program + leading arguments used to open a scratch file. The file path is
/// appended last. The process must not exit until the user closes the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EditorCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a shell-style command line such as `"code --wait"`
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self::new(program, words.collect()))
    }

    /// `$VISUAL`, then `$EDITOR`, then `vi`
    pub fn from_env() -> Self {
        ["VISUAL", "EDITOR"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find_map(|line| Self::parse(&line))
            .unwrap_or_else(|| Self::new("vi", Vec::new()))
    }
}

impl fmt::Display for EditorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub status_port: Option<u16>,
    pub socket_port: Option<u16>,
    pub editor: Option<String>,
    pub settle_delay_ms: Option<u64>,
    pub scratch_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_dir: Option<PathBuf>,
}

/// Resolved configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub status_port: u16,
    pub socket_port: u16,
    pub settle_delay: Duration,
    pub editor: EditorCommand,
    pub extension: String,
    pub scratch_dir: Option<PathBuf>,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            status_port: default_status_port(),
            socket_port: 0,
            settle_delay: Duration::from_millis(default_settle_delay_ms()),
            editor: EditorCommand::from_env(),
            extension: default_extension(),
            scratch_dir: None,
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Default location: `<config_dir>/dx-ghost/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dx-ghost").join("config.toml"))
    }

    /// Load config from a TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: &CliOverrides) -> Result<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse_file(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, overrides)
    }

    pub fn parse_file(content: &str) -> Result<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| BridgeError::Config(format!("config parse error: {e}")))
    }

    /// Merge CLI overrides over file values
    pub fn resolve(file: ConfigFile, overrides: &CliOverrides) -> Result<Self> {
        let host_str = overrides.host.clone().unwrap_or(file.server.host);
        let host = host_str
            .parse::<IpAddr>()
            .map_err(|e| BridgeError::Config(format!("invalid host {host_str:?}: {e}")))?;

        let editor = match overrides.editor.as_deref() {
            Some(line) => EditorCommand::parse(line)
                .ok_or_else(|| BridgeError::Config("empty editor command".to_string()))?,
            None => match file.editor.command {
                Some(program) if !program.trim().is_empty() => {
                    EditorCommand::new(program.trim(), file.editor.args)
                }
                _ => EditorCommand::from_env(),
            },
        };

        let scratch_dir = overrides
            .scratch_dir
            .clone()
            .or_else(|| file.editor.scratch_dir.as_deref().map(expand_tilde_str));
        let log_dir = overrides
            .log_dir
            .clone()
            .or_else(|| file.logging.dir.as_deref().map(expand_tilde_str));

        Ok(Self {
            host,
            status_port: overrides.status_port.unwrap_or(file.server.status_port),
            socket_port: overrides.socket_port.unwrap_or(file.server.socket_port),
            settle_delay: Duration::from_millis(
                overrides
                    .settle_delay_ms
                    .unwrap_or(file.session.settle_delay_ms),
            ),
            editor,
            extension: file.editor.extension,
            scratch_dir,
            log_level: overrides.log_level.clone().unwrap_or(file.logging.level),
            log_dir,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
