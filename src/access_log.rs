//! Access log line formatting (design §6): one line per host-facing event,
//! appended to the configured log path.

use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Http,
    Ssh,
    Sftp,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Http => "HTTP",
            Kind::Ssh => "SSH",
            Kind::Sftp => "SFTP",
        }
    }
}

pub fn format_line(at: DateTime<Utc>, kind: Kind, remote: &str, details: &str) -> String {
    format!("{} [{}] {} {}", at.format("%Y-%m-%d %H:%M:%S"), kind.as_str(), remote, details)
}

pub struct AccessLog {
    file: Option<Mutex<std::fs::File>>,
}

impl AccessLog {
    /// `path = None` disables logging entirely (a no-op sink).
    pub fn open(path: Option<&Path>) -> std::io::Result<Self> {
        let file = match path {
            Some(p) => Some(Mutex::new(OpenOptions::new().create(true).append(true).open(p)?)),
            None => None,
        };
        Ok(AccessLog { file })
    }

    pub fn record(&self, kind: Kind, remote: &str, details: &str) {
        let Some(file) = &self.file else { return };
        let line = format_line(Utc::now(), kind, remote, details);
        if let Ok(mut f) = file.lock() {
            let _ = writeln!(f, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_one_line_per_event() {
        let at = DateTime::parse_from_rfc3339("2026-07-28T12:34:56Z").unwrap().with_timezone(&Utc);
        let line = format_line(at, Kind::Ssh, "10.0.0.5:51515", "console=2 user=anon");
        assert_eq!(line, "2026-07-28 12:34:56 [SSH] 10.0.0.5:51515 console=2 user=anon");
    }

    #[test]
    fn disabled_log_does_not_error_on_record() {
        let log = AccessLog::open(None).unwrap();
        log.record(Kind::Http, "127.0.0.1", "GET /");
    }

    #[test]
    fn writes_appended_lines_to_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let log = AccessLog::open(Some(file.path())).unwrap();
        log.record(Kind::Sftp, "1.2.3.4", "drive=A op=read");
        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert!(contents.contains("[SFTP]"));
        assert!(contents.contains("drive=A op=read"));
    }
}
