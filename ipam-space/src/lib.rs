//! Per-peer free/taken address accounting over the ranges a peer's [Ring]
//! currently says it owns.
//!
//! [Ring]: https://docs.rs/ipam-ring

mod error;
mod space;

pub use error::{Result, SpaceError};
pub use space::{Space, MIN_SUBNET_SIZE};

#[cfg(test)]
mod tests {
    use super::*;
    use ipam_types::{Addr, Range};

    #[test]
    fn update_ranges_starts_fully_free() {
        let mut space = Space::new();
        space.update_ranges(&[Range::new(Addr(0), Addr(10))]);
        assert_eq!(space.num_free_total(), 10);
        assert_eq!(space.owned_ranges(), vec![Range::new(Addr(0), Addr(10))]);
    }

    #[test]
    fn claim_then_free_round_trips() {
        let mut space = Space::new();
        space.update_ranges(&[Range::new(Addr(0), Addr(10))]);
        space.claim(Addr(3)).unwrap();
        assert_eq!(space.num_free_total(), 9);
        assert_eq!(space.claim(Addr(3)), Err(SpaceError::AlreadyTaken(Addr(3))));
        space.free(Addr(3));
        assert_eq!(space.num_free_total(), 10);
    }

    #[test]
    fn claim_outside_owned_ranges_fails() {
        let mut space = Space::new();
        space.update_ranges(&[Range::new(Addr(0), Addr(10))]);
        assert_eq!(space.claim(Addr(50)), Err(SpaceError::NotOwned(Addr(50))));
    }

    #[test]
    fn free_unknown_address_is_a_no_op() {
        let mut space = Space::new();
        space.update_ranges(&[Range::new(Addr(0), Addr(10))]);
        space.free(Addr(99)); // does not panic
    }

    #[test]
    fn allocate_in_returns_lowest_free_address() {
        let mut space = Space::new();
        space.update_ranges(&[Range::new(Addr(0), Addr(10))]);
        space.claim(Addr(0)).unwrap();
        let addr = space.allocate_in(Range::new(Addr(0), Addr(10)), None).unwrap();
        assert_eq!(addr, Addr(1));
    }

    #[test]
    fn allocate_in_prefers_range_with_most_free_addresses() {
        let mut space = Space::new();
        space.update_ranges(&[
            Range::new(Addr(0), Addr(4)),
            Range::new(Addr(100), Addr(200)),
        ]);
        // Exhaust all but one address in the small range.
        for a in 0..3 {
            space.claim(Addr(a)).unwrap();
        }
        let addr = space
            .allocate_in(Range::new(Addr(0), Addr(200)), None)
            .unwrap();
        assert_eq!(addr, Addr(100));
    }

    #[test]
    fn allocate_in_respects_preferred_subrange() {
        let mut space = Space::new();
        space.update_ranges(&[Range::new(Addr(0), Addr(100))]);
        let addr = space
            .allocate_in(Range::new(Addr(0), Addr(100)), Some(Range::new(Addr(50), Addr(60))))
            .unwrap();
        assert_eq!(addr, Addr(50));
    }

    #[test]
    fn update_ranges_drops_addresses_outside_new_ownership() {
        let mut space = Space::new();
        space.update_ranges(&[Range::new(Addr(0), Addr(10))]);
        space.claim(Addr(5)).unwrap();
        space.update_ranges(&[Range::new(Addr(0), Addr(3))]);
        assert_eq!(space.owned_ranges(), vec![Range::new(Addr(0), Addr(3))]);
        assert_eq!(space.num_free_total(), 3);
    }

    #[test]
    fn donate_returns_largest_free_chunk_at_least_min_size() {
        let mut space = Space::new();
        space.update_ranges(&[Range::new(Addr(0), Addr(20))]);
        space.claim(Addr(10)).unwrap();
        let (chunk, ok) = space.donate(Range::new(Addr(0), Addr(20)));
        assert!(ok);
        // free runs are [0,10) (size 10) and [11,20) (size 9); the larger wins.
        assert_eq!(chunk, Some(Range::new(Addr(0), Addr(10))));
        assert!(!space.owned_ranges().iter().any(|r| r.contains(Addr(3))));
        assert!(space.owned_ranges().iter().any(|r| r.contains(Addr(15))));
    }

    #[test]
    fn donate_refuses_chunks_smaller_than_minimum() {
        let mut space = Space::new();
        space.update_ranges(&[Range::new(Addr(0), Addr(3))]);
        space.claim(Addr(1)).unwrap();
        // Free runs are [0,1) and [2,3), both below MIN_SUBNET_SIZE.
        let (chunk, ok) = space.donate(Range::new(Addr(0), Addr(3)));
        assert!(!ok);
        assert_eq!(chunk, None);
    }

    #[test]
    fn donate_requires_overlap_with_requested_range() {
        let mut space = Space::new();
        space.update_ranges(&[Range::new(Addr(0), Addr(100))]);
        let (chunk, ok) = space.donate(Range::new(Addr(200), Addr(300)));
        assert!(!ok);
        assert_eq!(chunk, None);
    }
}
