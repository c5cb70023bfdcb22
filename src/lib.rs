//! GNSS time transfer processing toolchain.
//!
//! `timetx` turns a day of raw GNSS receiver logs and the matching 1 Hz
//! time-interval counter log into standard time-comparison products:
//! CGGTTS (V1 / V2E) track files and RINEX (V2 / V3) observation and
//! navigation files.
//!
//! The pipeline is strictly batch:
//! 1. a receiver decoder ([rx]) parses the day's log into
//!    [measurement::ReceiverMeasurement]s and per-constellation
//!    ephemeris stores,
//! 2. the counter log is loaded ([counter]),
//! 3. receiver and counter epochs are aligned on a second-of-day grid
//!    ([pairing]),
//! 4. the [cggtts] track engine and the [rinex] writers consume the
//!    matched pairs.

pub mod antenna;
pub mod cggtts;
pub mod counter;
pub mod ephemeris;
pub mod galileo;
pub mod geodesy;
pub mod gps;
pub mod hex;
pub mod measurement;
pub mod pairing;
pub mod rinex;
pub mod rx;
pub mod store;
pub mod troposphere;
pub mod utility;

extern crate gnss_rs as gnss;

/// Speed of light in vacuum, m/s
pub const CLIGHT: f64 = 299_792_458.0;

/// Seconds in one day
pub const SECS_PER_DAY: u32 = 86_400;

/// Seconds in one GPS week
pub const SECS_PER_WEEK: u32 = 604_800;

pub mod prelude {
    pub use crate::antenna::Antenna;
    pub use crate::counter::{CounterLog, CounterMeasurement};
    pub use crate::ephemeris::{Ephemeris, GalEphemeris, GpsEphemeris, IonosphereData, UtcData};
    pub use crate::measurement::{ObservationCode, ReceiverMeasurement, SvMeasurement};
    pub use crate::pairing::MeasurementPair;
    pub use crate::store::Store;
    pub use gnss::prelude::{Constellation, SV};
    pub use hifitime::{Duration, Epoch, Unit};
}
