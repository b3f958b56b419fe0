use std::fmt;

/// Structured server version, e.g. `9.6.3` or `14beta1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub patch: Option<u32>,
    /// Non-numeric trailer such as `beta1` or `(Debian 16.2-1)`.
    pub extra: Option<String>,
    /// The version string as reported by the server.
    pub native: String,
}

impl ServerVersion {
    /// Parse up to three dot-separated components. Text following the digits
    /// of a component ends the numeric part and lands in `extra`.
    #[must_use]
    pub fn parse(native: &str) -> Self {
        let trimmed = native.trim();
        let (token, trailer) = match trimmed.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, rest.trim()),
            None => (trimmed, ""),
        };

        let mut numbers: [Option<u32>; 3] = [None; 3];
        let mut extra = String::new();
        for (slot, part) in numbers.iter_mut().zip(token.splitn(3, '.')) {
            let digits = part.bytes().take_while(u8::is_ascii_digit).count();
            *slot = part[..digits].parse().ok();
            if digits < part.len() {
                extra.push_str(&part[digits..]);
                break;
            }
        }
        if !trailer.is_empty() {
            if !extra.is_empty() {
                extra.push(' ');
            }
            extra.push_str(trailer);
        }

        let [major, minor, patch] = numbers;
        Self {
            major,
            minor,
            patch,
            extra: (!extra.is_empty()).then_some(extra),
            native: native.to_string(),
        }
    }

    #[must_use]
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        match self.major {
            Some(m) if m > major => true,
            Some(m) if m == major => self.minor.unwrap_or(0) >= minor,
            _ => false,
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.native)
    }
}

/// Result of [`Connection::server_version`](super::Connection::server_version).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerVersionInfo {
    Native(String),
    Structured(ServerVersion),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_part_version() {
        let v = ServerVersion::parse("9.6.3");
        assert_eq!((v.major, v.minor, v.patch), (Some(9), Some(6), Some(3)));
        assert_eq!(v.extra, None);
    }

    #[test]
    fn two_part_version_with_distribution_trailer() {
        let v = ServerVersion::parse("16.2 (Debian 16.2-1.pgdg120+2)");
        assert_eq!((v.major, v.minor, v.patch), (Some(16), Some(2), None));
        assert_eq!(v.extra.as_deref(), Some("(Debian 16.2-1.pgdg120+2)"));
        assert_eq!(v.native, "16.2 (Debian 16.2-1.pgdg120+2)");
    }

    #[test]
    fn prerelease_suffix_goes_to_extra() {
        let v = ServerVersion::parse("14beta1");
        assert_eq!(v.major, Some(14));
        assert_eq!(v.minor, None);
        assert_eq!(v.extra.as_deref(), Some("beta1"));

        let v = ServerVersion::parse("8.2rc1");
        assert_eq!((v.major, v.minor), (Some(8), Some(2)));
        assert_eq!(v.extra.as_deref(), Some("rc1"));
    }

    #[test]
    fn escape_settings_gate() {
        assert!(ServerVersion::parse("8.2.0").at_least(8, 2));
        assert!(ServerVersion::parse("10.1").at_least(8, 2));
        assert!(!ServerVersion::parse("8.1.9").at_least(8, 2));
        assert!(!ServerVersion::parse("garbage").at_least(8, 2));
    }
}
