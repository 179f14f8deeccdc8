//! Virtual simulation time. One tick is one picosecond.

use std::ops::{Add, AddAssign, Sub};

use crate::units::Nanosecs;

macro_rules! time_unit {
    ($name: ident) => {
        #[derive(
            Debug,
            Default,
            Copy,
            Clone,
            PartialOrd,
            Ord,
            PartialEq,
            Eq,
            Hash,
            derive_more::Add,
            derive_more::Display,
            derive_more::FromStr,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(u128);

        impl $name {
            pub const ZERO: $name = Self::new(0);
            pub const ONE: $name = Self::new(1);
            pub const MAX: $name = Self::new(u128::MAX);

            pub const fn new(value: u128) -> Self {
                Self(value)
            }

            /// Truncates to whole nanoseconds, saturating at `u64::MAX`.
            pub fn into_nanos(self) -> Nanosecs {
                let ns = self.0 / 1_000;
                Nanosecs::new(u64::try_from(ns).unwrap_or(u64::MAX))
            }
        }
    };
}

time_unit!(Time);

impl Time {
    pub const fn into_delta(self) -> Delta {
        Delta::new(self.0)
    }

    /// Time elapsed since `earlier`, or zero if `earlier` lies in the future.
    pub const fn saturating_since(self, earlier: Time) -> Delta {
        Delta::new(self.0.saturating_sub(earlier.0))
    }
}

time_unit!(Delta);

impl Delta {
    pub const fn into_time(self) -> Time {
        Time::new(self.0)
    }

    pub const fn saturating_mul(self, rhs: u64) -> Delta {
        Delta::new(self.0.saturating_mul(rhs as u128))
    }
}

impl From<u128> for Time {
    fn from(val: u128) -> Self {
        Self(val)
    }
}

impl Add<Delta> for Time {
    type Output = Time;

    fn add(self, rhs: Delta) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub<Time> for Time {
    type Output = Delta;

    fn sub(self, rhs: Time) -> Self::Output {
        Delta::new(self.0 - rhs.0)
    }
}

impl AddAssign<Delta> for Time {
    fn add_assign(&mut self, rhs: Delta) {
        *self = Self(self.0 + rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_since_clamps_at_zero() {
        let t = Time::new(1_000);
        assert_eq!(t.saturating_since(Time::new(400)), Delta::new(600));
        assert_eq!(Time::new(400).saturating_since(t), Delta::ZERO);
    }

    #[test]
    fn into_nanos_saturates() {
        assert_eq!(Time::new(2_999).into_nanos(), Nanosecs::new(2));
        assert_eq!(Time::MAX.into_nanos(), Nanosecs::MAX);
    }
}
