use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub(crate) const NANOSECONDS_PER_SECOND: i32 = 1_000_000_000;

///
/// TimestampError
///
/// Invariant violations for `Timestamp` construction.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimestampError {
    NegativeNanoseconds { seconds: i64, nanoseconds: i32 },
    NanosecondsOutOfRange { nanoseconds: i32 },
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeNanoseconds { .. } => {
                write!(f, "The nanoseconds of a Timestamp cannot be negative.")
            }
            Self::NanosecondsOutOfRange { nanoseconds } => write!(
                f,
                "Timestamp nanoseconds must be less than one second, got {nanoseconds}"
            ),
        }
    }
}

impl std::error::Error for TimestampError {}

///
/// Timestamp
///
/// Seconds since the epoch plus a sub-second nanosecond part.
///
/// Invariants:
/// - `|nanoseconds| < 1_000_000_000`
/// - the two fields never carry opposite signs; instants before the epoch
///   hold non-positive nanoseconds, instants at or after it non-negative
///   ones, and zero seconds requires a non-negative nanosecond part.
///
/// Ordering is by seconds, then nanoseconds, which is total under the
/// sign invariant.
///

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
pub struct Timestamp {
    seconds: i64,
    nanoseconds: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanoseconds: i32) -> Result<Self, TimestampError> {
        if nanoseconds.abs() >= NANOSECONDS_PER_SECOND {
            return Err(TimestampError::NanosecondsOutOfRange { nanoseconds });
        }
        let sign_ok = if seconds > 0 {
            nanoseconds >= 0
        } else if seconds < 0 {
            nanoseconds <= 0
        } else {
            nanoseconds >= 0
        };
        if !sign_ok {
            return Err(TimestampError::NegativeNanoseconds {
                seconds,
                nanoseconds,
            });
        }

        Ok(Self {
            seconds,
            nanoseconds,
        })
    }

    /// The epoch instant.
    #[must_use]
    pub const fn epoch() -> Self {
        Self {
            seconds: 0,
            nanoseconds: 0,
        }
    }

    #[must_use]
    pub const fn seconds(self) -> i64 {
        self.seconds
    }

    #[must_use]
    pub const fn nanoseconds(self) -> i32 {
        self.nanoseconds
    }

    pub(crate) fn cmp_parts(self, other: Self) -> Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then(self.nanoseconds.cmp(&other.nanoseconds))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}:{}", self.seconds, self.nanoseconds)
    }
}

///
/// TESTS
///
