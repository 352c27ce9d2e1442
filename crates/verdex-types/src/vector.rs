//! Version vectors and their five-way comparison.
//!
//! A version vector is an ordered list of `(id, value)` counters, one per
//! device that has ever touched the file, sorted by id. Two vectors are
//! *concurrent* when neither dominates the other; the concurrent orderings
//! still carry a deterministic direction so that callers get a stable (if
//! arbitrary) tie-break from the comparison alone.

use std::fmt;

/// One device's counter within a version vector.
///
/// The id is the 64-bit short form of the device identity, not the full
/// 32-byte id; the mapping between the two is maintained by the protocol
/// layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Counter {
    pub id: u64,
    pub value: u64,
}

/// The outcome of comparing two version vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    /// The vectors are identical.
    Equal,
    /// This vector dominates the other.
    Greater,
    /// The other vector dominates this one.
    Lesser,
    /// Neither dominates, but this one wins the deterministic direction.
    ConcurrentGreater,
    /// Neither dominates, and the other wins the deterministic direction.
    ConcurrentLesser,
}

/// A version vector: counters sorted ascending by id, no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Vector {
    counters: Vec<Counter>,
}

impl Vector {
    /// The empty vector, which every other vector dominates.
    pub const fn new() -> Self {
        Self {
            counters: Vec::new(),
        }
    }

    /// Build a vector from counters. The input is sorted by id; duplicate
    /// ids are a caller bug.
    pub fn from_counters(mut counters: Vec<Counter>) -> Self {
        counters.sort_by_key(|c| c.id);
        debug_assert!(
            counters.windows(2).all(|w| w[0].id < w[1].id),
            "duplicate counter id in version vector"
        );
        Self { counters }
    }

    /// The counters, sorted ascending by id.
    pub fn counters(&self) -> &[Counter] {
        &self.counters
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Increment the counter for `id`, inserting it at value 1 if absent.
    pub fn update(&mut self, id: u64) {
        match self.counters.binary_search_by_key(&id, |c| c.id) {
            Ok(i) => self.counters[i].value += 1,
            Err(i) => self.counters.insert(i, Counter { id, value: 1 }),
        }
    }

    /// Compare this vector to `other`.
    ///
    /// Walks both counter lists in id order. A counter missing from one side
    /// counts as zero. The first time the walk sees evidence in both
    /// directions the vectors are concurrent, and the direction of the
    /// difference seen at that point decides `ConcurrentGreater` versus
    /// `ConcurrentLesser`. The result is deterministic and antisymmetric.
    pub fn compare(&self, other: &Vector) -> Ordering {
        let a = &self.counters;
        let b = &other.counters;
        let (mut ai, mut bi) = (0, 0);
        let mut result = Ordering::Equal;

        while ai < a.len() || bi < b.len() {
            let a_missing = ai >= a.len();
            let b_missing = bi >= b.len();

            if !a_missing && (b_missing || a[ai].id < b[bi].id) {
                // Counter present only on our side.
                if a[ai].value > 0 {
                    if result == Ordering::Lesser {
                        return Ordering::ConcurrentGreater;
                    }
                    result = Ordering::Greater;
                }
                ai += 1;
            } else if !b_missing && (a_missing || b[bi].id < a[ai].id) {
                // Counter present only on the other side.
                if b[bi].value > 0 {
                    if result == Ordering::Greater {
                        return Ordering::ConcurrentLesser;
                    }
                    result = Ordering::Lesser;
                }
                bi += 1;
            } else {
                // Same id on both sides.
                if a[ai].value > b[bi].value {
                    if result == Ordering::Lesser {
                        return Ordering::ConcurrentGreater;
                    }
                    result = Ordering::Greater;
                } else if a[ai].value < b[bi].value {
                    if result == Ordering::Greater {
                        return Ordering::ConcurrentLesser;
                    }
                    result = Ordering::Lesser;
                }
                ai += 1;
                bi += 1;
            }
        }

        result
    }

    pub fn equal(&self, other: &Vector) -> bool {
        self.compare(other) == Ordering::Equal
    }

    pub fn lesser_equal(&self, other: &Vector) -> bool {
        matches!(self.compare(other), Ordering::Equal | Ordering::Lesser)
    }

    pub fn greater_equal(&self, other: &Vector) -> bool {
        matches!(self.compare(other), Ordering::Equal | Ordering::Greater)
    }

    /// Whether neither vector dominates the other.
    pub fn concurrent(&self, other: &Vector) -> bool {
        matches!(
            self.compare(other),
            Ordering::ConcurrentGreater | Ordering::ConcurrentLesser
        )
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, c) in self.counters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", c.id, c.value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(pairs: &[(u64, u64)]) -> Vector {
        Vector::from_counters(
            pairs
                .iter()
                .map(|&(id, value)| Counter { id, value })
                .collect(),
        )
    }

    #[test]
    fn empty_vectors_are_equal() {
        assert_eq!(Vector::new().compare(&Vector::new()), Ordering::Equal);
    }

    #[test]
    fn identical_vectors_are_equal() {
        let a = v(&[(1, 2), (2, 3)]);
        assert_eq!(a.compare(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn dominating_vector_is_greater() {
        let a = v(&[(1, 2), (2, 3)]);
        let b = v(&[(1, 2), (2, 2)]);
        assert_eq!(a.compare(&b), Ordering::Greater);
        assert_eq!(b.compare(&a), Ordering::Lesser);
    }

    #[test]
    fn missing_counter_counts_as_zero() {
        let a = v(&[(1, 1), (2, 1)]);
        let b = v(&[(1, 1)]);
        assert_eq!(a.compare(&b), Ordering::Greater);
        assert_eq!(b.compare(&a), Ordering::Lesser);
    }

    #[test]
    fn zero_valued_counter_is_inert() {
        let a = v(&[(1, 1), (2, 0)]);
        let b = v(&[(1, 1)]);
        assert_eq!(a.compare(&b), Ordering::Equal);
    }

    #[test]
    fn crossing_updates_are_concurrent() {
        let a = v(&[(1, 2), (2, 1)]);
        let b = v(&[(1, 1), (2, 2)]);
        assert_eq!(a.compare(&b), Ordering::ConcurrentLesser);
        assert_eq!(b.compare(&a), Ordering::ConcurrentGreater);
    }

    #[test]
    fn disjoint_ids_are_concurrent() {
        let a = v(&[(1, 1)]);
        let b = v(&[(2, 1)]);
        assert!(a.concurrent(&b));
        assert!(b.concurrent(&a));
    }

    #[test]
    fn update_increments_existing_counter() {
        let mut a = v(&[(5, 1)]);
        a.update(5);
        assert_eq!(a.counters(), &[Counter { id: 5, value: 2 }]);
    }

    #[test]
    fn update_inserts_new_counter_sorted() {
        let mut a = v(&[(5, 1)]);
        a.update(2);
        assert_eq!(
            a.counters(),
            &[Counter { id: 2, value: 1 }, Counter { id: 5, value: 1 }]
        );
    }

    #[test]
    fn updated_vector_dominates_original() {
        let mut a = v(&[(1, 3), (2, 1)]);
        let before = a.clone();
        a.update(2);
        assert_eq!(a.compare(&before), Ordering::Greater);
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(v(&[(1, 2), (7, 1)]).to_string(), "{1:2, 7:1}");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_vector() -> impl Strategy<Value = Vector> {
            proptest::collection::btree_map(0u64..8, 0u64..4, 0..6).prop_map(|m| {
                Vector::from_counters(m.into_iter().map(|(id, value)| Counter { id, value }).collect())
            })
        }

        fn mirror(o: Ordering) -> Ordering {
            match o {
                Ordering::Equal => Ordering::Equal,
                Ordering::Greater => Ordering::Lesser,
                Ordering::Lesser => Ordering::Greater,
                Ordering::ConcurrentGreater => Ordering::ConcurrentLesser,
                Ordering::ConcurrentLesser => Ordering::ConcurrentGreater,
            }
        }

        proptest! {
            /// Comparison is antisymmetric under mirroring.
            #[test]
            fn prop_compare_antisymmetric(a in arb_vector(), b in arb_vector()) {
                prop_assert_eq!(a.compare(&b), mirror(b.compare(&a)));
            }

            /// A vector always equals itself.
            #[test]
            fn prop_compare_reflexive(a in arb_vector()) {
                prop_assert_eq!(a.compare(&a.clone()), Ordering::Equal);
            }

            /// An update strictly dominates the pre-update vector.
            #[test]
            fn prop_update_dominates(mut a in arb_vector(), id in 0u64..8) {
                let before = a.clone();
                a.update(id);
                prop_assert_eq!(a.compare(&before), Ordering::Greater);
            }
        }
    }
}
