use std::fmt;

use engine_core::error::ExtractError;

/// A log sequence number: ten big-endian bytes, totally ordered.
///
/// The canonical text form is three colon-separated hex groups
/// (`00000020:000000f8:0003`); the parser also accepts the bare
/// 20-digit form some catalog views return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn([u8; 10]);

impl Lsn {
    pub const ZERO: Lsn = Lsn([0u8; 10]);

    pub fn from_bytes(bytes: [u8; 10]) -> Self {
        Lsn(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 10] {
        &self.0
    }

    pub fn from_hex(raw: &str) -> Result<Self, ExtractError> {
        let compact: String = raw.chars().filter(|c| *c != ':').collect();
        if compact.len() != 20 {
            return Err(ExtractError::StateParse(format!(
                "log position `{raw}` is not a 10-byte hex string"
            )));
        }
        let bytes = hex::decode(&compact)
            .map_err(|_| ExtractError::StateParse(format!("log position `{raw}` is not hex")))?;
        let mut out = [0u8; 10];
        out.copy_from_slice(&bytes);
        Ok(Lsn(out))
    }

    /// Canonical colon-separated form.
    pub fn to_hex(&self) -> String {
        format!(
            "{}:{}:{}",
            hex::encode(&self.0[0..4]),
            hex::encode(&self.0[4..8]),
            hex::encode(&self.0[8..10]),
        )
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
