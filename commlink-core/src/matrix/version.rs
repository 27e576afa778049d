use std::{fmt, str::FromStr};

use tracing::debug;

use crate::matrix::error::MatrixError;

/// A `MAJOR.MINOR` Matrix client-server API version.
///
/// Ordering is numeric, major first, so `1.10 > 1.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse a catalog identifier of the form `v<digits>p<digits>`.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        let (major, minor) = identifier.strip_prefix('v')?.split_once('p')?;
        Some(Self::new(parse_digits(major)?, parse_digits(minor)?))
    }

    /// Parse a version string as advertised by `/_matrix/client/versions`.
    ///
    /// Accepts `v1.1` and the bare `v1` (read as `1.0`). Legacy `r0.x.y`
    /// releases and anything else yield `None`.
    pub fn from_advertised(advertised: &str) -> Option<Self> {
        let rest = advertised.strip_prefix('v')?;
        match rest.split_once('.') {
            Some((major, minor)) => Some(Self::new(parse_digits(major)?, parse_digits(minor)?)),
            None => Some(Self::new(parse_digits(rest)?, 0)),
        }
    }

    /// The catalog identifier for this version, e.g. `v1p7`.
    pub fn identifier(&self) -> String {
        format!("v{}p{}", self.major, self.minor)
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = MatrixError;

    /// Parses `MAJOR.MINOR`, with or without a leading `v`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix('v').unwrap_or(s);
        trimmed
            .split_once('.')
            .and_then(|(major, minor)| Some(Self::new(parse_digits(major)?, parse_digits(minor)?)))
            .ok_or_else(|| MatrixError::Protocol(format!("not a MAJOR.MINOR version: {s:?}")))
    }
}

/// One locally implemented protocol revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedVersion {
    pub identifier: String,
    pub version: ApiVersion,
}

impl SupportedVersion {
    pub fn new(version: ApiVersion) -> Self {
        Self {
            identifier: version.identifier(),
            version,
        }
    }
}

/// Pick the highest version both sides support.
///
/// Server strings that do not parse as `vMAJOR[.MINOR]` are ignored. An empty
/// intersection is a hard failure.
pub fn negotiate(
    server_url: &str,
    client: &[SupportedVersion],
    server_versions: &[String],
) -> Result<SupportedVersion, MatrixError> {
    let advertised: Vec<ApiVersion> = server_versions
        .iter()
        .filter_map(|v| ApiVersion::from_advertised(v))
        .collect();

    let chosen = client
        .iter()
        .filter(|supported| advertised.contains(&supported.version))
        .max_by_key(|supported| supported.version)
        .cloned()
        .ok_or_else(|| MatrixError::Negotiation {
            server_url: server_url.to_owned(),
            server_versions: server_versions.to_vec(),
        })?;

    debug!(version = %chosen.version, "negotiated Matrix API version with {server_url}");
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supported(versions: &[(u32, u32)]) -> Vec<SupportedVersion> {
        versions
            .iter()
            .map(|&(major, minor)| SupportedVersion::new(ApiVersion::new(major, minor)))
            .collect()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_catalog_identifiers() {
        assert_eq!(ApiVersion::from_identifier("v1p7"), Some(ApiVersion::new(1, 7)));
        assert_eq!(ApiVersion::from_identifier("v12p30"), Some(ApiVersion::new(12, 30)));
        assert_eq!(ApiVersion::from_identifier("v1.1"), None);
        assert_eq!(ApiVersion::from_identifier("vp1"), None);
        assert_eq!(ApiVersion::from_identifier("v1p+1"), None);
        assert_eq!(ApiVersion::from_identifier("matrix_client"), None);
    }

    #[test]
    fn parses_advertised_versions() {
        assert_eq!(ApiVersion::from_advertised("v1.1"), Some(ApiVersion::new(1, 1)));
        assert_eq!(ApiVersion::from_advertised("v1"), Some(ApiVersion::new(1, 0)));
        assert_eq!(ApiVersion::from_advertised("r0.6.1"), None);
        assert_eq!(ApiVersion::from_advertised("v1.1.1"), None);
    }

    #[test]
    fn orders_numerically_not_lexically() {
        assert!(ApiVersion::new(1, 10) > ApiVersion::new(1, 9));
        assert!(ApiVersion::new(2, 0) > ApiVersion::new(1, 99));
        assert_eq!("1.10".parse::<ApiVersion>().unwrap(), ApiVersion::new(1, 10));
        assert_eq!(ApiVersion::new(1, 7).to_string(), "1.7");
    }

    #[test]
    fn selects_highest_common_version() {
        let client = supported(&[(1, 0), (1, 1)]);
        let chosen = negotiate("https://hs", &client, &strings(&["v1", "v1.1", "v2"])).unwrap();
        assert_eq!(chosen.version, ApiVersion::new(1, 1));
        assert_eq!(chosen.identifier, "v1p1");
    }

    #[test]
    fn ignores_server_order_and_legacy_releases() {
        let client = supported(&[(1, 1), (1, 2), (1, 3)]);
        let server = strings(&["v1.3", "r0.6.1", "v1.1", "v1.2"]);
        let chosen = negotiate("https://hs", &client, &server).unwrap();
        assert_eq!(chosen.version, ApiVersion::new(1, 3));
    }

    #[test]
    fn empty_intersection_is_a_negotiation_error() {
        let client = supported(&[(1, 0)]);
        let err = negotiate("https://hs", &client, &strings(&["v2"])).unwrap_err();
        assert!(matches!(err, MatrixError::Negotiation { ref server_versions, .. } if server_versions == &["v2"]));
    }
}
