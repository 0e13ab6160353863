//! Hashing Module
//!
//! Key-to-slot derivation and payload integrity digests. Both use FNV-1a,
//! which is deterministic across processes and cheap enough to run on the
//! hot path. Neither is a cryptographic guarantee.

/// How much of the payload the checksum covers. Truncation and the common
/// corruption patterns show up in the head of the file; hashing the full
/// payload buys little at artifact sizes in the megabytes.
const CHECKSUM_WINDOW: usize = 1024;

const FNV32_OFFSET: u32 = 0x811c9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;
const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

// == Slot Derivation ==
/// Derives the artifact filename for a key.
///
/// FNV-1a 32-bit over the UTF-8 bytes of the key, rendered as fixed-width
/// lowercase hex. Stable across process restarts and safe in storage
/// paths. Distinct keys can collide; the cache stores one artifact per
/// slot, so a collision overwrites the other key's artifact. At the
/// expected namespace size (tens to low hundreds of keys) this is a rare,
/// accepted risk.
pub fn slot_name(key: &str) -> String {
    format!("{:08x}.bin", fnv1a_32(key.as_bytes()))
}

// == Payload Checksum ==
/// Computes the integrity digest stored alongside an entry.
///
/// FNV-1a 64-bit over the first [`CHECKSUM_WINDOW`] bytes of the payload,
/// with the total length folded in so that truncated files never verify.
pub fn payload_checksum(bytes: &[u8]) -> String {
    let window = &bytes[..bytes.len().min(CHECKSUM_WINDOW)];
    let mut hash = fnv1a_64(window);
    for byte in (bytes.len() as u64).to_le_bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV64_PRIME);
    }
    format!("{hash:016x}")
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV32_OFFSET, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV32_PRIME)
    })
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV64_OFFSET, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV64_PRIME)
    })
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_name_deterministic() {
        assert_eq!(slot_name("mesh_42/island_3"), slot_name("mesh_42/island_3"));
    }

    #[test]
    fn test_slot_name_shape() {
        let slot = slot_name("some key with spaces / and slashes");
        assert_eq!(slot.len(), "00000000.bin".len());
        assert!(slot.ends_with(".bin"));
        let stem = slot.trim_end_matches(".bin");
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_slot_name_known_vector() {
        // FNV-1a 32-bit of the empty input is the offset basis
        assert_eq!(slot_name(""), "811c9dc5.bin");
    }

    #[test]
    fn test_slot_name_distinct_keys() {
        assert_ne!(slot_name("island_a"), slot_name("island_b"));
    }

    #[test]
    fn test_checksum_deterministic() {
        let data = vec![7u8; 4096];
        assert_eq!(payload_checksum(&data), payload_checksum(&data));
    }

    #[test]
    fn test_checksum_detects_corruption_in_window() {
        let data = vec![7u8; 4096];
        let mut tampered = data.clone();
        tampered[10] ^= 0xff;
        assert_ne!(payload_checksum(&data), payload_checksum(&tampered));
    }

    #[test]
    fn test_checksum_detects_truncation() {
        // Same first kilobyte, different length
        let full = vec![7u8; 4096];
        let truncated = vec![7u8; 2048];
        assert_ne!(payload_checksum(&full), payload_checksum(&truncated));
    }

    #[test]
    fn test_checksum_empty_payload() {
        // Must not panic and must still be length-sensitive
        assert_ne!(payload_checksum(&[]), payload_checksum(&[0]));
    }
}
