use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version token of a guest's remote configuration.
///
/// A 20-byte value rendered as 40 lowercase hex characters. Attached to update
/// calls so the remote side rejects the write if the configuration changed
/// since it was read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest([u8; 20]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Digest {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(trimmed, &mut bytes)
            .map_err(|_| SchemaError::InvalidDigest(s.to_owned()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Digest {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_hex()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "3f8a5c0e9b2d4e6f708192a3b4c5d6e7f8091a2b";

    #[test]
    fn parses_and_renders_forty_hex_chars() {
        let d: Digest = TOKEN.parse().unwrap();
        assert_eq!(d.to_string(), TOKEN);
        assert_eq!(d.as_bytes()[0], 0x3f);
    }

    #[test]
    fn uppercase_input_renders_lowercase() {
        let d: Digest = TOKEN.to_uppercase().parse().unwrap();
        assert_eq!(d.to_hex(), TOKEN);
    }

    #[test]
    fn rejects_wrong_length_and_non_hex() {
        assert!("abcd".parse::<Digest>().is_err());
        assert!(TOKEN.replace('a', "z").parse::<Digest>().is_err());
        assert!(format!("{TOKEN}00").parse::<Digest>().is_err());
    }
}
