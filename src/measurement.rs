//! The common measurement model every receiver decoder produces.

use gnss::prelude::{Constellation, SV};
use hifitime::Epoch;
use strum_macros::EnumString;

/// RINEX-style observation codes carried by the decoders. Pseudorange
/// codes (`Cxx`) are measured in seconds, carrier-phase codes (`Lxx`)
/// in cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString)]
pub enum ObservationCode {
    C1C,
    C1B,
    C1P,
    C2C,
    C2P,
    C2L,
    C2I,
    C2M,
    C7I,
    C7Q,
    L1C,
    L1B,
    L1P,
    L2P,
    L2C,
    L2L,
    L2I,
    L7I,
    L7Q,
}

impl ObservationCode {
    /// True for pseudorange (code) observations
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            Self::C1C
                | Self::C1B
                | Self::C1P
                | Self::C2C
                | Self::C2P
                | Self::C2L
                | Self::C2I
                | Self::C2M
                | Self::C7I
                | Self::C7Q
        )
    }

    /// True for carrier-phase observations
    pub fn is_phase(&self) -> bool {
        !self.is_code()
    }

    /// Carrier-phase code observed on the same signal as a pseudorange
    /// code, if one exists in the closed set.
    pub fn phase_counterpart(&self) -> Option<Self> {
        match self {
            Self::C1C => Some(Self::L1C),
            Self::C1B => Some(Self::L1B),
            Self::C1P => Some(Self::L1P),
            Self::C2P => Some(Self::L2P),
            Self::C2C => Some(Self::L2C),
            Self::C2L => Some(Self::L2L),
            Self::C2I => Some(Self::L2I),
            Self::C7I => Some(Self::L7I),
            Self::C7Q => Some(Self::L7Q),
            _ => None,
        }
    }

    /// Observation label at the requested RINEX major version.
    /// V2 uses the historical two-letter forms.
    pub fn rinex_str(&self, major: u8) -> &'static str {
        if major == 2 {
            match self {
                Self::C1C => "C1",
                Self::C1P => "P1",
                Self::C2P => "P2",
                Self::C2L => "C2",
                Self::L1C | Self::L1P => "L1",
                Self::L2P | Self::L2L => "L2",
                Self::C1B => "C1B",
                Self::C2C => "C2C",
                Self::C2M => "C2M",
                Self::C2I => "C2I",
                Self::C7I => "C7I",
                Self::C7Q => "C7Q",
                Self::L1B => "L1B",
                Self::L2C => "L2C",
                Self::L2I => "L2I",
                Self::L7I => "L7I",
                Self::L7Q => "L7Q",
            }
        } else {
            match self {
                Self::C1C => "C1C",
                Self::C1B => "C1B",
                Self::C1P => "C1P",
                Self::C2C => "C2C",
                Self::C2P => "C2P",
                Self::C2L => "C2L",
                Self::C2I => "C2I",
                Self::C2M => "C2M",
                Self::C7I => "C7I",
                Self::C7Q => "C7Q",
                Self::L1C => "L1C",
                Self::L1B => "L1B",
                Self::L1P => "L1P",
                Self::L2P => "L2P",
                Self::L2C => "L2C",
                Self::L2L => "L2L",
                Self::L2I => "L2I",
                Self::L7I => "L7I",
                Self::L7Q => "L7Q",
            }
        }
    }

    /// True if this code is broadcast by the given constellation.
    pub fn compatible_with(&self, c: Constellation) -> bool {
        match c {
            Constellation::GPS => matches!(
                self,
                Self::C1C
                    | Self::C1P
                    | Self::C2P
                    | Self::C2L
                    | Self::C2M
                    | Self::L1C
                    | Self::L1P
                    | Self::L2P
                    | Self::L2L
            ),
            Constellation::Galileo => matches!(
                self,
                Self::C1C | Self::C1B | Self::C7I | Self::C7Q | Self::L1C | Self::L1B | Self::L7I | Self::L7Q
            ),
            Constellation::BeiDou => {
                matches!(self, Self::C2I | Self::C7I | Self::L2I | Self::L7I)
            },
            Constellation::Glonass => matches!(
                self,
                Self::C1C | Self::C1P | Self::C2C | Self::C2P | Self::L1C | Self::L2C
            ),
            Constellation::QZSS => matches!(self, Self::C1C | Self::L1C),
            _ => false,
        }
    }
}

impl std::fmt::Display for ObservationCode {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str(self.rinex_str(3))
    }
}

/// Scratch state attached to an SV observation during the
/// integer-second interpolation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InterpState {
    /// Interpolated pseudorange, s (swapped with the raw value once the
    /// arc has been processed)
    pub interpolated: f64,
    /// Fractional-second offset of the raw observation, s
    pub tmfracs: f64,
    /// Integer GPS timestamp of the observation, s
    pub t_gps: i64,
}

/// One observation of one signal from one space vehicle at one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct SvMeasurement {
    pub sv: SV,
    pub code: ObservationCode,
    /// Pseudorange in seconds for code observations, cycles for phase
    pub meas: f64,
    /// Loss-of-lock indicator, RINEX convention
    pub lli: u8,
    /// Signal strength indicator, RINEX convention
    pub signal: u8,
    /// Interpolation scratch, populated only during the post-load pass
    pub interp: Option<InterpState>,
}

impl SvMeasurement {
    pub fn new(sv: SV, code: ObservationCode, meas: f64) -> Self {
        Self {
            sv,
            code,
            meas,
            lli: 0,
            signal: 0,
            interp: None,
        }
    }
}

/// One epoch's worth of SV observations, as assembled by a receiver
/// decoder. The decoder fills whichever of `tm_utc` / `tm_gps` the
/// receiver reports; the other is completed after the leap-second count
/// is known.
#[derive(Debug, Clone)]
pub struct ReceiverMeasurement {
    /// GPS time of week, s. Integer-valued except in positioning mode.
    pub gps_tow: f64,
    /// Truncated (10 bit) GPS week number
    pub gps_wn: u16,
    /// UTC time of the measurement
    pub tm_utc: Epoch,
    /// GPS time of the measurement
    pub tm_gps: Epoch,
    /// Offset of the true measurement time from the integer second,
    /// in [-0.5, 0.5) s. Zeroed by the interpolation pass.
    pub tmfracs: f64,
    /// PC clock stamp of the log line
    pub pc_hh: u8,
    pub pc_mm: u8,
    pub pc_ss: u8,
    /// Sawtooth correction, s. Convention: added to the counter reading.
    pub sawtooth: f64,
    /// Receiver clock offset, s (diagnostic only)
    pub time_offset: f64,
    /// RINEX epoch flag
    pub epoch_flag: u8,
    /// SV observations of this epoch
    pub svs: Vec<SvMeasurement>,
}

impl ReceiverMeasurement {
    pub fn new() -> Self {
        Self {
            gps_tow: 0.0,
            gps_wn: 0,
            tm_utc: Epoch::from_mjd_utc(0.0),
            tm_gps: Epoch::from_mjd_utc(0.0),
            tmfracs: 0.0,
            pc_hh: 0,
            pc_mm: 0,
            pc_ss: 0,
            sawtooth: 0.0,
            time_offset: 0.0,
            epoch_flag: 0,
            svs: Vec::new(),
        }
    }

    /// PC clock stamp as seconds of day
    pub fn pc_tod(&self) -> u32 {
        self.pc_hh as u32 * 3600 + self.pc_mm as u32 * 60 + self.pc_ss as u32
    }

    /// UTC time of day of the measurement, rounded to the nearest
    /// second once `tmfracs` is accounted for
    pub fn utc_tod(&self) -> u32 {
        let (_, _, _, h, m, s, _) = self.tm_utc.to_gregorian_utc();
        let t = h as f64 * 3600.0 + m as f64 * 60.0 + s as f64 + self.tmfracs;
        t.round() as u32
    }
}

impl Default for ReceiverMeasurement {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn code_classification() {
        assert!(ObservationCode::C1C.is_code());
        assert!(ObservationCode::L1C.is_phase());
        assert_eq!(
            ObservationCode::C1C.phase_counterpart(),
            Some(ObservationCode::L1C)
        );
        assert_eq!(ObservationCode::from_str("C7Q").unwrap(), ObservationCode::C7Q);
    }

    #[test]
    fn rinex_labels() {
        assert_eq!(ObservationCode::C1C.rinex_str(2), "C1");
        assert_eq!(ObservationCode::C1P.rinex_str(2), "P1");
        assert_eq!(ObservationCode::C2P.rinex_str(2), "P2");
        assert_eq!(ObservationCode::C1C.rinex_str(3), "C1C");
    }

    #[test]
    fn constellation_compatibility() {
        assert!(ObservationCode::C1C.compatible_with(Constellation::GPS));
        assert!(ObservationCode::C1B.compatible_with(Constellation::Galileo));
        assert!(!ObservationCode::C1B.compatible_with(Constellation::GPS));
        assert!(ObservationCode::C2I.compatible_with(Constellation::BeiDou));
        assert!(!ObservationCode::C2I.compatible_with(Constellation::GPS));
    }

    #[test]
    fn tod_helpers() {
        let mut rm = ReceiverMeasurement::new();
        rm.pc_hh = 1;
        rm.pc_mm = 2;
        rm.pc_ss = 3;
        assert_eq!(rm.pc_tod(), 3723);
        rm.tm_utc = Epoch::from_gregorian_utc(2016, 1, 17, 23, 59, 59, 0);
        rm.tmfracs = 0.4;
        assert_eq!(rm.utc_tod(), 86399);
    }
}
