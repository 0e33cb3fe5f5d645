/// The compile-fingerprint ("oracle inputs"): a value derived from a
/// project's sources, classpath and options that uniquely identifies a
/// compilation. Two concurrent requests with equal fingerprints must share
/// one execution.
///
/// The scheduler never interprets the bytes; callers (the `setup`
/// collaborator, §6) are responsible for deriving one deterministically so
/// that equal `BundleInputs` produce equal fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Derive a fingerprint from anything hashable, for callers that don't
    /// need a cryptographic digest (tests, simple setups keyed on source
    /// file mtimes + classpath strings).
    pub fn from_hash<T: std::hash::Hash>(value: &T) -> Self {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        value.hash(&mut hasher);
        let lo = hasher.finish();
        0u8.hash(&mut hasher);
        let hi = hasher.finish();
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&lo.to_le_bytes());
        bytes[8..].copy_from_slice(&hi.to_le_bytes());
        Self(bytes)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_hash_to_equal_fingerprints() {
        let a = Fingerprint::from_hash(&"same-sources-same-classpath");
        let b = Fingerprint::from_hash(&"same-sources-same-classpath");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_hash_to_different_fingerprints() {
        let a = Fingerprint::from_hash(&"a");
        let b = Fingerprint::from_hash(&"b");
        assert_ne!(a, b);
    }
}
