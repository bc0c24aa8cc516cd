//! Connection strings: `Key=Value;Key=Value` credential lists.
//!
//! Keys are matched case-insensitively. Values may contain `=` (base64 keys
//! do); only the first `=` of each segment splits key from value.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    entries: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConnectionStringError {
    #[error("connection string is empty")]
    Empty,
    #[error("segment without '=': {0}")]
    MalformedSegment(String),
    #[error("missing key {0}")]
    MissingKey(String),
}

impl ConnectionString {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConnectionStringError> {
        self.get(key)
            .ok_or_else(|| ConnectionStringError::MissingKey(key.to_string()))
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = HashMap::new();
        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::MalformedSegment(segment.to_string()))?;
            entries.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
        if entries.is_empty() {
            return Err(ConnectionStringError::Empty);
        }
        Ok(Self { entries })
    }
}

// Values are credentials; keep them out of logs.
impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("ConnectionString")
            .field("keys", &keys)
            .finish()
    }
}
