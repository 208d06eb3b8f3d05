//! Typed records decoded from device packets
//!
//! Each struct mirrors one Garmin datatype layout. Fields that the device
//! declares as unused are read and dropped by the decoders.

use crate::protocol::CapabilityManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semicircle value the device uses for "no position"
pub const INVALID_SEMICIRCLES: i32 = 0x7FFF_FFFF;

/// Position in semicircles (2^31 semicircles = 180 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: i32,
    pub longitude: i32,
}

impl Position {
    /// Latitude in degrees
    pub fn latitude_degrees(&self) -> f64 {
        semicircles_to_degrees(self.latitude)
    }

    /// Longitude in degrees
    pub fn longitude_degrees(&self) -> f64 {
        semicircles_to_degrees(self.longitude)
    }

    /// (latitude, longitude) in degrees
    pub fn to_degrees(&self) -> (f64, f64) {
        (self.latitude_degrees(), self.longitude_degrees())
    }

    /// Track points without a fix carry the invalid marker in both fields
    pub fn is_valid(&self) -> bool {
        self.latitude != INVALID_SEMICIRCLES && self.longitude != INVALID_SEMICIRCLES
    }
}

/// Convert semicircles to degrees
pub fn semicircles_to_degrees(semicircles: i32) -> f64 {
    semicircles as f64 * (180.0 / 2_147_483_648.0)
}

/// Product Data (A000)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: u16,
    /// Software version multiplied by 100
    pub software_version: i16,
    pub description: String,
    pub extra: Vec<String>,
}

/// Result of capability negotiation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub product: ProductInfo,
    pub extended_product_data: Vec<String>,
    pub capabilities: CapabilityManager,
}

impl DeviceCapabilities {
    pub fn manager(&self) -> &CapabilityManager {
        &self.capabilities
    }
}

/// Quick workout summary embedded in a run (D1009)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuickWorkout {
    /// Time in hundredths of a second
    pub time: u32,
    /// Distance in meters
    pub distance: f32,
}

/// Run (D1009)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub track_index: u16,
    pub first_lap_index: u16,
    pub last_lap_index: u16,
    pub sport_type: u8,
    pub program_type: u8,
    pub multisport: u8,
    pub quick_workout: QuickWorkout,
    pub workout: Workout,
}

/// Lap (D1011, D1015)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    pub index: u16,
    pub start_time: DateTime<Utc>,
    /// Duration in hundredths of a second
    pub total_time: u32,
    /// Distance in meters
    pub total_distance: f32,
    /// Meters per second
    pub max_speed: f32,
    pub begin: Position,
    pub end: Position,
    pub calories: u16,
    pub avg_heart_rate: u8,
    pub max_heart_rate: u8,
    pub intensity: u8,
    pub avg_cadence: u8,
    pub trigger_method: u8,
}

/// One step of a workout (D1008)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutStep {
    pub custom_name: String,
    pub target_custom_zone_low: f32,
    pub target_custom_zone_high: f32,
    pub duration_value: u16,
    pub intensity: u8,
    pub duration_type: u8,
    pub target_type: u8,
    pub target_value: u8,
}

/// Workout (D1008)
///
/// The wire layout always carries 20 step slots; only the first
/// `valid_step_count` are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub valid_step_count: u32,
    pub steps: Vec<WorkoutStep>,
    pub name: String,
    pub sport_type: u8,
}

/// Workout Occurrence (D1003)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutOccurrence {
    pub workout_name: String,
    pub day: DateTime<Utc>,
}

/// Workout Limits (D1005)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutLimits {
    pub max_workouts: u32,
    pub max_unscheduled_workouts: u32,
    pub max_occurrences: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateZone {
    pub low_heart_rate: u8,
    pub high_heart_rate: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedZone {
    /// Meters per second
    pub low_speed: f32,
    pub high_speed: f32,
    pub name: String,
}

/// Zone tables for one activity of the fitness profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityProfile {
    pub heart_rate_zones: Vec<HeartRateZone>,
    pub speed_zones: Vec<SpeedZone>,
    /// Kilograms
    pub gear_weight: f32,
    pub max_heart_rate: u8,
}

/// Fitness User Profile (D1004)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessUserProfile {
    pub running: ActivityProfile,
    pub biking: ActivityProfile,
    pub other: ActivityProfile,
    /// Kilograms
    pub weight: f32,
    pub birth_year: u16,
    pub birth_month: u8,
    pub birth_day: u8,
    /// 0 = female, 1 = male
    pub gender: u8,
}

/// Track header, layout depends on the negotiated datatype
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackHeader {
    /// D311: bare track index
    Index(u16),
    /// D310 and D312
    Identified {
        display: bool,
        color: u8,
        identifier: String,
    },
}

/// Track point (D304)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub position: Position,
    pub time: DateTime<Utc>,
    /// Meters
    pub altitude: f32,
    /// Meters from the start of the track
    pub distance: f32,
    pub heart_rate: u8,
    pub cadence: u8,
    pub sensor: bool,
}

/// A track header together with the points that followed it
///
/// `header` is `None` when the device sends points without a header (A300).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackLog {
    pub header: Option<TrackHeader>,
    pub points: Vec<TrackPoint>,
}

/// Almanac (D501)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlmanacEntry {
    pub week_number: u16,
    pub toa: f32,
    pub af0: f32,
    pub af1: f32,
    pub eccentricity: f32,
    pub sqrta: f32,
    pub m0: f32,
    pub w: f32,
    pub omg0: f32,
    pub odot: f32,
    pub inclination: f32,
    pub health: u8,
}

/// Course Limits (D1013)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseLimits {
    pub max_courses: u32,
    pub max_course_laps: u32,
    pub max_course_points: u32,
    pub max_course_track_points: u32,
}

/// Course family record whose field layout is not decoded
///
/// The negotiated datatype has been checked; the payload is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub datatype: u16,
    pub payload: Vec<u8>,
}

/// Course track header and the points that followed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseTrack {
    pub header: Option<CourseRecord>,
    pub points: Vec<CourseRecord>,
}

/// Everything a run download returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    pub runs: Vec<Run>,
    pub laps: Vec<Lap>,
    pub tracks: Vec<TrackLog>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semicircles_to_degrees() {
        assert_eq!(semicircles_to_degrees(0), 0.0);
        assert!((semicircles_to_degrees(1 << 30) - 90.0).abs() < 1e-9);
        assert!((semicircles_to_degrees(i32::MIN) + 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_validity() {
        let position = Position {
            latitude: 596_523_235,
            longitude: -1_431_655_765,
        };
        assert!(position.is_valid());
        assert!((position.latitude_degrees() - 50.0).abs() < 1e-6);
        assert!((position.longitude_degrees() + 120.0).abs() < 1e-6);

        let no_fix = Position {
            latitude: INVALID_SEMICIRCLES,
            longitude: INVALID_SEMICIRCLES,
        };
        assert!(!no_fix.is_valid());
    }

    #[test]
    fn test_track_header_serializes() {
        let header = TrackHeader::Identified {
            display: true,
            color: 4,
            identifier: "ACTIVE LOG".to_string(),
        };
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains("ACTIVE LOG"));

        let back: TrackHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(back, header);
    }
}
