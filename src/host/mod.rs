//! SSH/SFTP/HTTP front end (component H): client multiplexing onto
//! consoles and the file bridge. Everything in this module talks to the
//! core only through `Context` — no direct CPU or memory access, per the
//! shared-resource policy in design §5.

pub mod http;
pub mod sftp;
pub mod ssh;

/// Parse the 8.3-ish bridge path grammar shared by SFTP and HTTP:
/// `/{DRIVE}[.{USER}]/{NAME.EXT}`. Returns `(drive, user, name)`.
pub fn parse_bridge_path(path: &str) -> Option<(char, u8, Option<String>)> {
    let trimmed = path.trim_start_matches('/');
    let mut parts = trimmed.splitn(2, '/');
    let drive_part = parts.next()?;
    let name = parts.next().filter(|s| !s.is_empty()).map(|s| s.to_string());

    let mut drive_chars = drive_part.splitn(2, '.');
    let drive = drive_chars.next()?.chars().next()?.to_ascii_uppercase();
    if !('A'..='P').contains(&drive) {
        return None;
    }
    let user = match drive_chars.next() {
        Some(u) => u.parse::<u8>().ok()?,
        None => 0,
    };
    Some((drive, user, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_drive_only_root() {
        assert_eq!(parse_bridge_path("/A/"), Some(('A', 0, None)));
    }

    #[test]
    fn parses_drive_with_user_and_filename() {
        assert_eq!(
            parse_bridge_path("/B.3/README.TXT"),
            Some(('B', 3, Some("README.TXT".to_string())))
        );
    }

    #[test]
    fn rejects_drive_letter_out_of_range() {
        assert_eq!(parse_bridge_path("/Z/FILE.TXT"), None);
    }
}
