use crate::time::{Delta, Time};

macro_rules! unit {
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
            derive_more::Sub,
            derive_more::AddAssign,
            derive_more::SubAssign,
            derive_more::Sum,
            derive_more::Display,
            derive_more::FromStr,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const ZERO: $name = Self::new(0);
            pub const ONE: $name = Self::new(1);
            pub const MAX: $name = Self::new(u64::MAX);

            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn into_u64(self) -> u64 {
                self.0
            }

            pub const fn into_f64(self) -> f64 {
                self.0 as f64
            }

            pub const fn into_usize(self) -> usize {
                self.0 as usize
            }

            pub const fn saturating_sub(self, rhs: Self) -> Self {
                Self::new(self.0.saturating_sub(rhs.0))
            }
        }
    };
}

unit!(Picosecs);
unit!(Nanosecs);
unit!(Microsecs);

impl Picosecs {
    pub fn into_delta(self) -> Delta {
        Delta::new(u128::from(self.0))
    }
}

impl Nanosecs {
    // Widen before scaling: any u64 nanosecond count fits in u128 picoseconds.
    pub fn into_time(self) -> Time {
        Time::new(u128::from(self.0) * 1_000)
    }

    pub fn into_delta(self) -> Delta {
        Delta::new(u128::from(self.0) * 1_000)
    }
}

impl Microsecs {
    pub const fn into_ns(self) -> Nanosecs {
        Nanosecs::new(self.0 * 1_000)
    }
}

unit!(Bytes);
unit!(Kilobytes);

impl Kilobytes {
    pub const fn into_bytes(self) -> Bytes {
        Bytes::new(self.0 * 1_000)
    }
}

impl From<Kilobytes> for Bytes {
    fn from(val: Kilobytes) -> Self {
        val.into_bytes()
    }
}

unit!(BitsPerSec);
unit!(Gbps);

impl BitsPerSec {
    /// Time to serialize one byte onto a link of this rate, truncated to whole picoseconds.
    pub fn ps_per_byte(&self) -> Picosecs {
        assert!(*self != BitsPerSec::ZERO);
        Picosecs::new(8 * 1_000_000_000_000 / self.0)
    }
}

impl Gbps {
    pub const fn into_bps(self) -> BitsPerSec {
        BitsPerSec::new(self.0 * 1_000_000_000)
    }
}

impl From<Gbps> for BitsPerSec {
    fn from(val: Gbps) -> Self {
        val.into_bps()
    }
}
