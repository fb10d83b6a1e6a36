use serde::Deserialize;

/// Nullness value in the checker's lattice.
///
/// Ordering: Bottom < Null < Nullable and Bottom < NonNull < Nullable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub(crate) enum Nullness {
    Bottom,
    Null,
    NonNull,
    Nullable,
}

impl Nullness {
    /// Least upper bound. Bottom loses; disagreement yields Nullable.
    pub(crate) fn least_upper_bound(self, other: Nullness) -> Nullness {
        if self == other {
            return self;
        }
        if self == Nullness::Bottom {
            return other;
        }
        if other == Nullness::Bottom {
            return self;
        }
        Nullness::Nullable
    }

    /// Greatest lower bound. Nullable loses; disagreement yields Bottom.
    pub(crate) fn greatest_lower_bound(self, other: Nullness) -> Nullness {
        if self == other {
            return self;
        }
        if self == Nullness::Nullable {
            return other;
        }
        if other == Nullness::Nullable {
            return self;
        }
        Nullness::Bottom
    }

    /// Nullness deducible for a variable known to be *not equal* to an
    /// expression with this nullness. Knowing `x != null` pins `x` to
    /// NonNull; inequality with a NonNull value excludes a single concrete
    /// value, so nothing better than Nullable follows.
    pub(crate) fn deduced_when_not_equal(self) -> Nullness {
        match self {
            Nullness::Null => Nullness::NonNull,
            Nullness::NonNull => Nullness::Nullable,
            Nullness::Nullable => Nullness::Nullable,
            Nullness::Bottom => Nullness::Bottom,
        }
    }

    /// True if a value with this nullness might be null at runtime.
    pub(crate) fn is_possibly_null(self) -> bool {
        matches!(self, Nullness::Null | Nullness::Nullable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Nullness; 4] = [
        Nullness::Bottom,
        Nullness::Null,
        Nullness::NonNull,
        Nullness::Nullable,
    ];

    #[test]
    fn least_upper_bound_is_commutative_and_idempotent() {
        for a in ALL {
            assert_eq!(a.least_upper_bound(a), a);
            for b in ALL {
                assert_eq!(a.least_upper_bound(b), b.least_upper_bound(a));
            }
        }
    }

    #[test]
    fn greatest_lower_bound_is_commutative_and_idempotent() {
        for a in ALL {
            assert_eq!(a.greatest_lower_bound(a), a);
            for b in ALL {
                assert_eq!(a.greatest_lower_bound(b), b.greatest_lower_bound(a));
            }
        }
    }

    #[test]
    fn bottom_is_identity_for_least_upper_bound() {
        for a in ALL {
            assert_eq!(Nullness::Bottom.least_upper_bound(a), a);
            assert_eq!(a.least_upper_bound(Nullness::Bottom), a);
        }
    }

    #[test]
    fn nullable_is_identity_for_greatest_lower_bound() {
        for a in ALL {
            assert_eq!(Nullness::Nullable.greatest_lower_bound(a), a);
            assert_eq!(a.greatest_lower_bound(Nullness::Nullable), a);
        }
    }

    #[test]
    fn disagreement_meets_at_the_extremes() {
        assert_eq!(
            Nullness::Null.least_upper_bound(Nullness::NonNull),
            Nullness::Nullable
        );
        assert_eq!(
            Nullness::Null.greatest_lower_bound(Nullness::NonNull),
            Nullness::Bottom
        );
    }

    #[test]
    fn inequality_deduction_swaps_null_to_nonnull() {
        assert_eq!(Nullness::Null.deduced_when_not_equal(), Nullness::NonNull);
        assert_eq!(
            Nullness::NonNull.deduced_when_not_equal(),
            Nullness::Nullable
        );
        assert_eq!(
            Nullness::Nullable.deduced_when_not_equal(),
            Nullness::Nullable
        );
        assert_eq!(Nullness::Bottom.deduced_when_not_equal(), Nullness::Bottom);
    }

    #[test]
    fn possibly_null_covers_null_and_nullable() {
        assert!(Nullness::Null.is_possibly_null());
        assert!(Nullness::Nullable.is_possibly_null());
        assert!(!Nullness::NonNull.is_possibly_null());
        assert!(!Nullness::Bottom.is_possibly_null());
    }
}
