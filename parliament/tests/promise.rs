//! Promises must order exactly like their (government, round) tuples, and the retry jitter must
//! stay inside its modulus.  Cheap properties, but everything above them leans on both.

use proptest::prelude::*;

use parliament::proposer::Jitter;
use parliament_pb::Promise;

proptest! {
    #[test]
    fn promises_order_like_tuples(g1 in 0u64..1000, r1 in 0u64..1000, g2 in 0u64..1000, r2 in 0u64..1000) {
        let a = Promise::new(g1, r1);
        let b = Promise::new(g2, r2);
        prop_assert_eq!((g1, r1).cmp(&(g2, r2)), a.cmp(&b));
    }

    #[test]
    fn increments_strictly_increase(g in 0u64..u64::MAX - 1, r in 0u64..u64::MAX - 1) {
        let p = Promise::new(g, r);
        prop_assert!(p.next_round() > p);
        prop_assert!(p.next_government() > p);
        prop_assert!(p.next_government().is_boundary());
        prop_assert!(p.next_government() > p.next_round());
    }

    #[test]
    fn backoff_stays_under_timeout(seed in 0u64..u64::MAX, timeout in 1u64..1_000_000) {
        let mut jitter = Jitter::new(seed);
        for _ in 0..8 {
            prop_assert!(jitter.backoff(timeout) < timeout);
        }
    }
}
