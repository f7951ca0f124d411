use thiserror::Error;

#[derive(Debug, Error)]
#[error("not a hex string")]
pub struct InvalidHex;

/// A byte string in its canonical encoding: lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hex(String);

impl Hex {
    pub fn encode(data: &[u8]) -> Self {
        Hex(hex::encode(data))
    }

    pub fn parse(s: &str) -> Result<Self, InvalidHex> {
        let bytes = hex::decode(s).map_err(|_| InvalidHex)?;
        Ok(Self::encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
