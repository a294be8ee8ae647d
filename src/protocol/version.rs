use std::{fmt, str::FromStr};

/// A `major.minor` protocol version. Orders by major, then minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    major: u8,
    minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub const fn major(&self) -> u8 {
        self.major
    }

    pub const fn minor(&self) -> u8 {
        self.minor
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| format!("expected MAJOR.MINOR, found '{s}'"))?;
        let parse = |part: &str| {
            part.parse::<u8>()
                .map_err(|e| format!("invalid version component '{part}': {e}"))
        };
        Ok(Self::new(parse(major)?, parse(minor)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_major_then_minor() {
        let mut versions = vec![
            ProtocolVersion::new(5, 8),
            ProtocolVersion::new(4, 4),
            ProtocolVersion::new(5, 0),
        ];
        versions.sort();
        assert_eq!(
            versions,
            vec![
                ProtocolVersion::new(4, 4),
                ProtocolVersion::new(5, 0),
                ProtocolVersion::new(5, 8)
            ]
        );
    }

    #[test]
    fn parses_display_form() {
        let version: ProtocolVersion = "5.4".parse().unwrap();
        assert_eq!(version, ProtocolVersion::new(5, 4));
        assert_eq!(version.to_string(), "5.4");
        assert!("5".parse::<ProtocolVersion>().is_err());
        assert!("5.x".parse::<ProtocolVersion>().is_err());
    }
}
