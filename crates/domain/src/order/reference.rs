//! Order reference number generation.

use chrono::Utc;
use uuid::Uuid;

/// Generates a globally unique, human-readable order reference.
///
/// Combines a millisecond timestamp with a random 8-hex-digit suffix, so
/// collisions require two orders in the same millisecond drawing the same
/// 32 random bits. Format: `ORD-1731103442713-9F86D081`.
pub fn new_reference_number() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>()
        .to_uppercase();
    format!("ORD-{millis}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_format() {
        let reference = new_reference_number();
        let parts: Vec<&str> = reference.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_uniqueness() {
        let references: HashSet<String> = (0..1_000).map(|_| new_reference_number()).collect();
        assert_eq!(references.len(), 1_000);
    }
}
