//! Command-line configuration (design §6). Parsing lives here rather than
//! in `main.rs` so the validation rules — disk spec grammar, listen
//! address grammar — are unit-testable without a process boundary.

use crate::error::ConfigError;
use clap::Parser;
use russh_keys::key::{KeyPair, PublicKey};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "mpm2emd", about = "Multi-user MP/M II emulator with SSH/SFTP/HTTP front ends")]
pub struct Cli {
    /// Mount a disk image at drive LETTER:PATH (repeatable).
    #[arg(short, long = "disk", value_name = "LETTER:PATH")]
    pub disks: Vec<String>,

    /// Cold-boot image.
    #[arg(short, long = "boot", value_name = "PATH")]
    pub boot: Option<PathBuf>,

    /// Direct system image.
    #[arg(short = 's', long = "sys", value_name = "PATH")]
    pub sys: Option<PathBuf>,

    /// Also mirror console 0 to local stdio.
    #[arg(short, long = "local")]
    pub local: bool,

    /// SSH listen port.
    #[arg(short, long = "port", default_value_t = 2222)]
    pub port: u16,

    /// Host key (PEM or DER).
    #[arg(short = 'k', long = "key", value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Authorized public keys.
    #[arg(short = 'a', long = "authorized-keys", value_name = "PATH")]
    pub authorized_keys: Option<PathBuf>,

    /// Accept any SSH authentication.
    #[arg(short = 'n', long = "no-auth")]
    pub no_auth: bool,

    /// HTTP port (0 disables).
    #[arg(short = 'w', long = "http", default_value_t = 0)]
    pub http: u16,

    /// Access log path.
    #[arg(long = "log", value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// Wall-clock run limit in seconds (0 = none).
    #[arg(short, long = "timeout", default_value_t = 0)]
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpec {
    pub drive: u8,
    pub path: PathBuf,
}

/// Parse a `LETTER:PATH` disk spec into a zero-based drive index (A=0..P=15).
pub fn parse_disk_spec(spec: &str) -> Result<DiskSpec, ConfigError> {
    let (letter, path) = spec
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidDiskSpec(spec.to_string()))?;
    let letter = letter.trim();
    if letter.len() != 1 {
        return Err(ConfigError::InvalidDiskSpec(spec.to_string()));
    }
    let ch = letter.chars().next().unwrap().to_ascii_uppercase();
    if !('A'..='P').contains(&ch) {
        return Err(ConfigError::DriveOutOfRange(ch));
    }
    if path.is_empty() {
        return Err(ConfigError::InvalidDiskSpec(spec.to_string()));
    }
    Ok(DiskSpec { drive: ch as u8 - b'A', path: PathBuf::from(path) })
}

/// Parse a listen address per design §6: `PORT`, `HOST:PORT`,
/// `[IPv6]:PORT`, or `HOST` alone (default port supplied by the caller).
/// An empty host binds all interfaces.
pub fn parse_listen_address(spec: &str, default_port: u16) -> Result<SocketAddr, ConfigError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(SocketAddr::new(IpAddr::from([0, 0, 0, 0]), default_port));
    }
    if let Ok(port) = spec.parse::<u16>() {
        return Ok(SocketAddr::new(IpAddr::from([0, 0, 0, 0]), port));
    }
    if let Ok(addr) = spec.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Some(bracketed) = spec.strip_prefix('[') {
        if let Some((host, rest)) = bracketed.split_once(']') {
            let port: u16 = match rest.strip_prefix(':') {
                Some(p) => p
                    .parse()
                    .map_err(|_| ConfigError::InvalidListenAddress(spec.to_string()))?,
                None => default_port,
            };
            let ip: IpAddr = host
                .parse()
                .map_err(|_| ConfigError::InvalidListenAddress(spec.to_string()))?;
            return Ok(SocketAddr::new(ip, port));
        }
        return Err(ConfigError::InvalidListenAddress(spec.to_string()));
    }
    if let Some((host, port_str)) = spec.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            if let Ok(ip) = host.parse::<IpAddr>() {
                return Ok(SocketAddr::new(ip, port));
            }
            // Hostname:port is not a socket address this layer can
            // resolve synchronously; callers that need DNS resolution do
            // it themselves (tokio::net::lookup_host) before binding.
            return Err(ConfigError::InvalidListenAddress(spec.to_string()));
        }
    }
    if let Ok(ip) = spec.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    Err(ConfigError::InvalidListenAddress(spec.to_string()))
}

/// Load the SSH host key from `path`, or generate a fresh ephemeral
/// ed25519 key if none was given — a server still needs a key even when
/// the operator hasn't provisioned one, and regenerating it every start
/// is an accepted tradeoff for the `--no-auth`/ad-hoc use case this
/// covers (operators who care about a stable host key fingerprint supply
/// `--key`).
pub fn load_host_key(path: Option<&Path>) -> Result<KeyPair, ConfigError> {
    match path {
        Some(path) => russh_keys::load_secret_key(path, None).map_err(|_| ConfigError::InvalidHostKey(path.display().to_string())),
        None => Ok(KeyPair::generate_ed25519().expect("ed25519 key generation cannot fail")),
    }
}

/// Parse an OpenSSH `authorized_keys`-style file: one `algo base64 [comment]`
/// entry per line, blank lines and `#`-comments ignored.
pub fn load_authorized_keys(path: Option<&Path>) -> Result<Vec<PublicKey>, ConfigError> {
    let Some(path) = path else { return Ok(Vec::new()) };
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::AuthorizedKeys { path: path.display().to_string(), source })?;
    let mut keys = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(blob) = line.split_whitespace().nth(1) else { continue };
        if let Ok(key) = russh_keys::parse_public_key_base64(blob) {
            keys.push(key);
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_disk_spec_letter_and_path() {
        let spec = parse_disk_spec("A:/srv/disks/a.img").unwrap();
        assert_eq!(spec.drive, 0);
        assert_eq!(spec.path, PathBuf::from("/srv/disks/a.img"));
    }

    #[test]
    fn rejects_drive_letter_out_of_range() {
        let err = parse_disk_spec("Z:/srv/disks/z.img").unwrap_err();
        assert!(matches!(err, ConfigError::DriveOutOfRange('Z')));
    }

    #[test]
    fn rejects_spec_without_colon() {
        assert!(parse_disk_spec("nocolonhere").is_err());
    }

    #[test]
    fn parses_bare_port() {
        let addr = parse_listen_address("2222", 22).unwrap();
        assert_eq!(addr.port(), 2222);
    }

    #[test]
    fn parses_host_and_port() {
        let addr = parse_listen_address("127.0.0.1:2222", 22).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:2222");
    }

    #[test]
    fn parses_ipv6_bracket_form() {
        let addr = parse_listen_address("[::1]:2222", 22).unwrap();
        assert_eq!(addr.port(), 2222);
    }

    #[test]
    fn empty_host_binds_all_interfaces() {
        let addr = parse_listen_address("", 2222).unwrap();
        assert_eq!(addr.ip(), IpAddr::from([0, 0, 0, 0]));
        assert_eq!(addr.port(), 2222);
    }
}
