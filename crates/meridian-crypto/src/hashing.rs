/// BLAKE3 hash (32 bytes).
pub type Hash = [u8; 32];

/// Hash arbitrary data using BLAKE3.
pub fn hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Hash data and return lowercase hex.
pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(hash(data))
}

/// Hash the concatenation of several parts without intermediate copies.
pub fn hash_parts(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"meridian"), hash(b"meridian"));
        assert_ne!(hash(b"meridian"), hash(b"meridiam"));
    }

    #[test]
    fn test_hash_hex_length() {
        assert_eq!(hash_hex(b"").len(), 64);
    }

    #[test]
    fn test_hash_parts_matches_concatenation() {
        assert_eq!(hash_parts(&[&b"ab"[..], &b"cd"[..]]), hash(b"abcd"));
    }
}
