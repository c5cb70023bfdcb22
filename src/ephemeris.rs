//! Broadcast ephemerides and navigation parameter blocks.

/// Keplerian orbital element set shared by the GPS LNAV and Galileo
/// INAV broadcast models. Angles are in radians, rates in rad/s.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Keplerian {
    /// Square root of the semi-major axis, m^0.5
    pub sqrt_a: f64,
    /// Eccentricity
    pub e: f64,
    /// Mean anomaly at reference time
    pub m0: f64,
    /// Longitude of ascending node at weekly epoch
    pub omega0: f64,
    /// Argument of perigee
    pub omega: f64,
    /// Inclination at reference time
    pub i0: f64,
    /// Mean motion correction
    pub delta_n: f64,
    /// Rate of right ascension
    pub omega_dot: f64,
    /// Rate of inclination
    pub idot: f64,
    pub c_uc: f64,
    pub c_us: f64,
    pub c_rc: f64,
    pub c_rs: f64,
    pub c_ic: f64,
    pub c_is: f64,
}

/// GPS LNAV broadcast ephemeris.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpsEphemeris {
    pub svn: u8,
    /// Estimated time of transmission of the frame, s of week
    pub t_ephem: f64,
    /// Truncated week number as broadcast
    pub week_number: u16,
    /// URA index (converted to metres via [crate::gps::URA_METRES])
    pub sv_accuracy_raw: u8,
    /// URA in metres
    pub sv_accuracy: f64,
    pub sv_health: u8,
    pub iodc: u16,
    pub iode: u8,
    /// IODE repeated in subframe 3, for the data-cutover check
    pub f3_iode: u8,
    /// Group delay, s
    pub t_gd: f64,
    /// Clock data reference time, s of week
    pub t_oc: f64,
    /// Ephemeris reference time, s of week
    pub t_oe: f64,
    pub a_f0: f64,
    pub a_f1: f64,
    pub a_f2: f64,
    pub kepler: Keplerian,
    /// Second of day the message was logged (-1 when unknown)
    pub t_logged: i32,
    /// Subframe completion bitmap: 0x07 when subframes 1-3 received
    pub subframes: u8,
}

/// Galileo INAV broadcast ephemeris.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GalEphemeris {
    pub svn: u8,
    pub iod_nav: u16,
    /// Clock data reference time, s of week
    pub t_0c: f64,
    /// Ephemeris reference time, s of week
    pub t_0e: f64,
    pub a_f0: f64,
    pub a_f1: f64,
    pub a_f2: f64,
    /// Broadcast group delay E1-E5a, s
    pub bgd_e1e5a: f64,
    /// Broadcast group delay E1-E5b, s
    pub bgd_e1e5b: f64,
    /// Signal-in-space accuracy, m
    pub sisa: f64,
    /// Signal validity / health flags
    pub sig_flags: u8,
    /// Galileo system time week number
    pub wn: u16,
    /// Time of week of the page set, s
    pub tow: f64,
    /// Data source flags (I/NAV E1-B)
    pub data_source: u16,
    pub kepler: Keplerian,
    /// Word-type completion bitmap: 0x1f when words 1-5 received
    pub subframes: u8,
}

/// Broadcast ephemeris, polymorphic over the constellation.
#[derive(Debug, Clone, PartialEq)]
pub enum Ephemeris {
    Gps(GpsEphemeris),
    Gal(GalEphemeris),
}

impl Ephemeris {
    pub fn svn(&self) -> u8 {
        match self {
            Self::Gps(e) => e.svn,
            Self::Gal(e) => e.svn,
        }
    }

    /// Clock data reference time, s of week
    pub fn t0c(&self) -> f64 {
        match self {
            Self::Gps(e) => e.t_oc,
            Self::Gal(e) => e.t_0c,
        }
    }

    /// Ephemeris reference time, s of week
    pub fn t0e(&self) -> f64 {
        match self {
            Self::Gps(e) => e.t_oe,
            Self::Gal(e) => e.t_0e,
        }
    }

    /// Issue of data (IODE for GPS, IODnav for Galileo)
    pub fn iod(&self) -> u16 {
        match self {
            Self::Gps(e) => e.iode as u16,
            Self::Gal(e) => e.iod_nav,
        }
    }

    /// Broadcast week number
    pub fn week(&self) -> u16 {
        match self {
            Self::Gps(e) => e.week_number,
            Self::Gal(e) => e.wn,
        }
    }

    /// Accuracy quantity used for the URA filter, metres
    /// (URA for GPS, SISA for Galileo)
    pub fn accuracy(&self) -> f64 {
        match self {
            Self::Gps(e) => e.sv_accuracy,
            Self::Gal(e) => e.sisa,
        }
    }

    pub fn kepler(&self) -> &Keplerian {
        match self {
            Self::Gps(e) => &e.kepler,
            Self::Gal(e) => &e.kepler,
        }
    }

    pub fn as_gps(&self) -> Option<&GpsEphemeris> {
        match self {
            Self::Gps(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_gal(&self) -> Option<&GalEphemeris> {
        match self {
            Self::Gal(e) => Some(e),
            _ => None,
        }
    }
}

/// Klobuchar broadcast ionosphere parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IonosphereData {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub a3: f64,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub b3: f64,
}

/// Galileo broadcast (NeQuick) ionosphere coefficients; stored for the
/// navigation products, not used by the single-frequency model.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GalIonosphereData {
    pub ai0: f64,
    pub ai1: f64,
    pub ai2: f64,
    /// Ionospheric disturbance flags
    pub sf_flags: u8,
}

/// Broadcast UTC parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UtcData {
    pub a0: f64,
    pub a1: f64,
    /// Reference time of week for the UTC parameters, s
    pub t_ot: f64,
    pub wn_t: u16,
    /// Current leap second count
    pub dt_ls: i16,
    /// Week number of a scheduled leap second (8 low bits as broadcast)
    pub wn_lsf: u16,
    /// Day number of a scheduled leap second
    pub dn: u16,
    /// Leap second count after the scheduled event
    pub dt_lsf: i16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_accessors() {
        let mut gps = GpsEphemeris::default();
        gps.svn = 5;
        gps.t_oc = 7200.0;
        gps.t_oe = 7200.0;
        gps.iode = 66;
        gps.week_number = 877;
        let e = Ephemeris::Gps(gps);
        assert_eq!(e.svn(), 5);
        assert_eq!(e.t0c(), 7200.0);
        assert_eq!(e.iod(), 66);
        assert_eq!(e.week(), 877);
        assert!(e.as_gps().is_some());
        assert!(e.as_gal().is_none());

        let mut gal = GalEphemeris::default();
        gal.svn = 11;
        gal.iod_nav = 103;
        gal.t_0e = 3600.0;
        let e = Ephemeris::Gal(gal);
        assert_eq!(e.svn(), 11);
        assert_eq!(e.iod(), 103);
        assert_eq!(e.t0e(), 3600.0);
    }
}
