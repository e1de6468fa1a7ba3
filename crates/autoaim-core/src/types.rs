//! Core data types shared by the estimator crates.
//!
//! The detector frontend emits one [`Pose`] per visible armor plate per frame
//! (or one [`RuneObservation`] per rune blade), each stamped with a
//! [`Timestamp`]. Everything downstream works on these values; no pixels or
//! camera state ever cross this boundary.

use chrono::Utc;
use nalgebra::Vector4;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::angles;

/// A wall-clock instant with nanosecond resolution.
///
/// The only operation the estimators perform on timestamps is elapsed-seconds
/// between two of them, so the representation is a plain
/// (seconds, nanoseconds) pair. Construct from raw parts in tests to keep
/// them deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub seconds: i64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// Creates a timestamp from seconds and nanoseconds.
    #[must_use]
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Creates a timestamp from the current time.
    #[must_use]
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            seconds: now.timestamp(),
            nanos: now.timestamp_subsec_nanos(),
        }
    }

    /// Total nanoseconds since epoch.
    #[must_use]
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.seconds) * 1_000_000_000 + i128::from(self.nanos)
    }

    /// Elapsed seconds from `earlier` to `self` (negative if `self` precedes it).
    #[must_use]
    pub fn duration_since(&self, earlier: &Self) -> f64 {
        (self.as_nanos() - earlier.as_nanos()) as f64 / 1e9
    }

    /// This timestamp shifted by `secs` seconds (may be negative).
    #[must_use]
    pub fn offset(&self, secs: f64) -> Self {
        let total = self.as_nanos() + (secs * 1e9).round() as i128;
        Self {
            seconds: (total.div_euclid(1_000_000_000)) as i64,
            nanos: (total.rem_euclid(1_000_000_000)) as u32,
        }
    }
}

/// World-frame pose of an armor plate: position in metres, yaw in radians.
///
/// Yaw is the heading of the plate's outward normal projected on the ground
/// plane, wrapped to [−π, π]. Never compare yaws by raw subtraction; use
/// [`angles::safe_sub`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// X position (m)
    pub x: f64,
    /// Y position (m)
    pub y: f64,
    /// Z position (m)
    pub z: f64,
    /// Plate yaw (rad), wrapped to [−π, π]
    pub yaw: f64,
}

impl Pose {
    /// The all-zero pose returned by queries on empty slots.
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        yaw: 0.0,
    };

    /// Creates a pose from components.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64, yaw: f64) -> Self {
        Self { x, y, z, yaw }
    }

    /// 3-D Euclidean distance to another pose (yaw ignored).
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Planar range from the sensor origin.
    #[must_use]
    pub fn range(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Bearing of the sight line from the sensor origin to this pose.
    #[must_use]
    pub fn bearing(&self) -> f64 {
        self.y.atan2(self.x)
    }

    /// Signed angle between the sight line and the plate yaw.
    ///
    /// Zero means the plate direction coincides with the line from the sensor
    /// to the target; the plate most face-on to the observer minimises the
    /// absolute value of this offset.
    #[must_use]
    pub fn aim_offset(&self) -> f64 {
        angles::safe_sub(self.bearing(), self.yaw)
    }

    /// View as a (x, y, z, yaw) column vector.
    #[must_use]
    pub fn as_vector(&self) -> Vector4<f64> {
        Vector4::new(self.x, self.y, self.z, self.yaw)
    }

    /// Builds a pose from a (x, y, z, yaw) column vector.
    #[must_use]
    pub fn from_vector(v: &Vector4<f64>) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// One detector observation of the illuminated rune blade.
///
/// `x, y, z` locate the blade tip (the armor pattern at the end of the lit
/// blade); `rune_yaw` is the orientation of the rune plane and `blade_angle`
/// the roll angle of the lit blade within that plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RuneObservation {
    /// Blade tip X (m)
    pub x: f64,
    /// Blade tip Y (m)
    pub y: f64,
    /// Blade tip Z (m)
    pub z: f64,
    /// Rune plane orientation (rad)
    pub rune_yaw: f64,
    /// Lit blade roll angle (rad)
    pub blade_angle: f64,
}

impl RuneObservation {
    /// Creates an observation from components.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64, rune_yaw: f64, blade_angle: f64) -> Self {
        Self {
            x,
            y,
            z,
            rune_yaw,
            blade_angle,
        }
    }
}

/// Identity label of an armor plate, as classified by the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ArmorId {
    /// No identity / nothing to shoot
    #[default]
    Unknown,
    /// Sentry robot
    Sentry,
    /// Hero robot
    Hero,
    /// Engineer robot
    Engineer,
    /// Standard robot 3
    Infantry3,
    /// Standard robot 4
    Infantry4,
    /// Standard robot 5
    Infantry5,
    /// Outpost structure
    Outpost,
    /// Base structure
    Base,
}

impl ArmorId {
    /// All identities, in slot order.
    pub const ALL: [ArmorId; 9] = [
        ArmorId::Unknown,
        ArmorId::Sentry,
        ArmorId::Hero,
        ArmorId::Engineer,
        ArmorId::Infantry3,
        ArmorId::Infantry4,
        ArmorId::Infantry5,
        ArmorId::Outpost,
        ArmorId::Base,
    ];

    /// Stable slot index for fixed per-identity state tables.
    #[must_use]
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|id| id == self).unwrap_or(0)
    }
}

impl std::fmt::Display for ArmorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArmorId::Unknown => "unknown",
            ArmorId::Sentry => "sentry",
            ArmorId::Hero => "hero",
            ArmorId::Engineer => "engineer",
            ArmorId::Infantry3 => "infantry-3",
            ArmorId::Infantry4 => "infantry-4",
            ArmorId::Infantry5 => "infantry-5",
            ArmorId::Outpost => "outpost",
            ArmorId::Base => "base",
        };
        write!(f, "{name}")
    }
}
