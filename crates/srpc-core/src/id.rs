//! Correlation identifier generation.

/// Generate a fresh correlation identifier for an outgoing call.
///
/// ULIDs are unique enough across the calls that can ever be pending on one
/// connection, which is all the correlator assumes — it never enforces
/// uniqueness itself.
pub fn next_correlation_id() -> String {
    ulid::Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<String> = (0..1024).map(|_| next_correlation_id()).collect();
        assert_eq!(ids.len(), 1024);
    }

    #[test]
    fn ids_are_canonical_ulids() {
        let id = next_correlation_id();
        assert_eq!(id.len(), 26);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
