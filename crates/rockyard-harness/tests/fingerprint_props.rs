//! Property tests for fingerprint determinism and discrimination.

use proptest::prelude::*;

use rockyard_harness::ledger::fingerprint;

proptest! {
    /// Identical inputs always hash to the identical 16-hex fingerprint.
    #[test]
    fn fingerprint_is_deterministic(
        instance in "[a-z][a-z0-9._]{0,30}",
        seed in any::<u64>(),
        kind in "[a-z_]{1,20}",
        reason in ".{0,80}",
        tail in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let first = fingerprint(&instance, seed, &kind, &reason, &tail);
        let second = fingerprint(&instance, seed, &kind, &reason, &tail);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), 16);
        prop_assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    /// Changing the seed changes the fingerprint.
    #[test]
    fn seed_discriminates(
        instance in "[a-z][a-z0-9._]{0,30}",
        seed in any::<u64>(),
        kind in "[a-z_]{1,20}",
        reason in ".{0,80}",
    ) {
        let other_seed = seed.wrapping_add(1);
        prop_assert_ne!(
            fingerprint(&instance, seed, &kind, &reason, b""),
            fingerprint(&instance, other_seed, &kind, &reason, b"")
        );
    }

    /// Changing the failure kind changes the fingerprint.
    #[test]
    fn failure_kind_discriminates(
        instance in "[a-z][a-z0-9._]{0,30}",
        seed in any::<u64>(),
        reason in ".{0,80}",
    ) {
        prop_assert_ne!(
            fingerprint(&instance, seed, "timeout", &reason, b""),
            fingerprint(&instance, seed, "exit_error", &reason, b"")
        );
    }
}
