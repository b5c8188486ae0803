use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::ModelError;

/// Opaque scan identifier.
///
/// The token doubles as a file-name stem in the results directory, so it is
/// restricted to ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct ScanId(String);

impl ScanId {
    pub const MAX_LEN: usize = 128;

    /// Fresh, time-ordered identifier.
    pub fn generate() -> Self {
        ScanId(Uuid::now_v7().to_string())
    }

    pub fn parse(raw: impl Into<String>) -> Result<Self, ModelError> {
        let raw = raw.into();
        if Self::is_valid(&raw) {
            Ok(ScanId(raw))
        } else {
            Err(ModelError::InvalidScanId(raw))
        }
    }

    pub fn is_valid(raw: &str) -> bool {
        !raw.is_empty()
            && raw.len() <= Self::MAX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ScanId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ScanId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanId::parse(s)
    }
}

impl TryFrom<String> for ScanId {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ScanId::parse(value)
    }
}

impl From<ScanId> for String {
    fn from(id: ScanId) -> Self {
        id.0
    }
}
