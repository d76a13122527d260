//! Content fingerprints over resolved operation lists.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::canonical::canonical_operations_bytes;
use crate::error::CoreError;
use crate::operation::SyncOperation;

/// Domain separator mixed into every fingerprint.
const FINGERPRINT_DOMAIN: &[u8] = b"ccsync-fingerprint-v0:";

/// A 32-byte Blake3 digest of a resolved channel.
///
/// Order-sensitive: the same operations in a different order hash differently.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// Fingerprint an ordered operation list.
    pub fn of(operations: &[SyncOperation]) -> Result<Self, CoreError> {
        let bytes = canonical_operations_bytes(operations)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(&bytes);
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ChannelKind;
    use proptest::prelude::*;

    fn ops(data: &str) -> Vec<SyncOperation> {
        SyncOperation::for_file(ChannelKind::Library, "a.lua", data, 8)
    }

    #[test]
    fn test_fingerprint_stable() {
        assert_eq!(Fingerprint::of(&ops("print(1)")).unwrap(), Fingerprint::of(&ops("print(1)")).unwrap());
    }

    #[test]
    fn test_empty_list() {
        let empty = Fingerprint::of(&[]).unwrap();
        assert_ne!(empty, Fingerprint::of(&ops("")).unwrap());
    }

    #[test]
    fn test_display() {
        let fp = Fingerprint::from_bytes([0xab; 32]);
        assert_eq!(fp.to_string(), "abababababababab");
        assert!(format!("{:?}", fp).starts_with("Fingerprint("));
    }

    proptest! {
        #[test]
        fn single_byte_change_changes_fingerprint(text in "[a-z ]{1,64}", idx in 0usize..64) {
            let idx = idx % text.len();
            let mut bytes = text.clone().into_bytes();
            bytes[idx] = if bytes[idx] == b'z' { b'y' } else { b'z' };
            let edited = String::from_utf8(bytes).unwrap();

            prop_assert_ne!(Fingerprint::of(&ops(&text)).unwrap(), Fingerprint::of(&ops(&edited)).unwrap());
        }
    }
}
