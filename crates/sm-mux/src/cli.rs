//! Command-line interface

use std::path::PathBuf;

use clap::Parser;
use sm_core::config::ListenerConfig;
use sm_core::ConfigError;

/// Drive many reverse shell sessions from one terminal
#[derive(Parser, Debug)]
#[command(name = "shellmux")]
#[command(version, about)]
pub struct Args {
    /// Address to listen on: PORT, HOST PORT or HOST:PORT
    #[arg(num_args = 0..=2, value_name = "ADDRESS")]
    pub address: Vec<String>,

    /// Path to configuration file
    #[arg(short, long, env = "SHELLMUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Connect to a bind shell at HOST:PORT (repeatable)
    #[arg(long = "connect", value_name = "HOST:PORT")]
    pub connect: Vec<String>,

    /// Do not listen; only use --connect sessions
    #[arg(long)]
    pub no_listen: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Args {
    /// The listener named on the command line, if any
    pub fn listener(&self) -> Result<Option<ListenerConfig>, ConfigError> {
        if self.address.is_empty() {
            return Ok(None);
        }
        parse_listen_address(&self.address).map(Some)
    }
}

/// Interpret the positional address words.
///
/// `[]` is the default listener, `[PORT]` listens on loopback, `[HOST:PORT]`
/// and `[HOST, PORT]` name both parts.
pub fn parse_listen_address(words: &[String]) -> Result<ListenerConfig, ConfigError> {
    let defaults = ListenerConfig::default();
    if words.is_empty() {
        return Ok(defaults);
    }

    let (host, port) = match words {
        [host, port] => (host.as_str(), port.as_str()),
        [word] if word.bytes().all(|b| b.is_ascii_digit()) => (defaults.host.as_str(), word.as_str()),
        [word] => split_host_port(word).unwrap_or((defaults.host.as_str(), word.as_str())),
        _ => {
            return Err(ConfigError::Invalid(format!(
                "expected at most HOST PORT, got {} words",
                words.len()
            )))
        }
    };

    Ok(ListenerConfig {
        host: host.to_string(),
        port: parse_port(port)?,
        autostart: true,
    })
}

/// Split `HOST:PORT`, accepting `[v6]:PORT`
pub fn split_host_port(value: &str) -> Option<(&str, &str)> {
    let (host, port) = value.rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some((host, port))
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(format!("invalid port: {}", value)))
}

/// Parse a `--connect` target
pub fn parse_connect_target(value: &str) -> Result<(String, u16), ConfigError> {
    let (host, port) = split_host_port(value)
        .ok_or_else(|| ConfigError::Invalid(format!("expected HOST:PORT, got {}", value)))?;
    Ok((host.to_string(), parse_port(port)?))
}
