//! Galileo-specific arithmetic: SISA decoding and E1 broadcast
//! corrections on top of the shared Keplerian machinery.

use log::warn;

use crate::antenna::Antenna;
use crate::ephemeris::{GalEphemeris, IonosphereData};
use crate::geodesy;
use crate::gps;
use crate::troposphere;
use crate::CLIGHT;

/// Highest SVN carried in Galileo stores
pub const MAX_SVN: u8 = 36;

/// Decodes a broadcast SISA index to metres (OS SIS ICD 5.1.12).
/// Indices with no accuracy prediction decode to a sentinel large
/// enough to fail any URA filter.
pub fn decode_sisa(index: u8) -> f64 {
    match index {
        0..=49 => index as f64 * 0.01,
        50..=74 => 0.5 + (index as f64 - 50.0) * 0.02,
        75..=99 => 1.0 + (index as f64 - 75.0) * 0.04,
        100..=125 => 2.0 + (index as f64 - 100.0) * 0.16,
        _ => 8192.0, // NAPA
    }
}

/// Broadcast corrections for one Galileo E1 pseudorange.
///
/// The Keplerian propagation is shared with GPS; the group delay is the
/// E1-E5b broadcast group delay of the I/NAV clock model, and the
/// single-frequency ionosphere uses the Klobuchar set broadcast by GPS,
/// which is what a combined-constellation receiver provides.
pub fn pseudorange_corrections(
    gps_tow: f64,
    prange: f64,
    ant: &Antenna,
    eph: &GalEphemeris,
    iono: &IonosphereData,
) -> Option<gps::Corrections> {
    let gpssvt = gps_tow - prange;
    let dt = gpssvt - eph.t_0c;
    let clock_correction = eph.a_f0 + eph.a_f1 * dt + eph.a_f2 * dt * dt;
    let tk = gpssvt - clock_correction;

    let (x, ek) = gps::sat_xyz(&eph.kepler, eph.t_0e, tk)?;
    let relativistic = -4.442807633e-10 * eph.kepler.e * eph.kepler.sqrt_a * ek.sin();
    let range = prange + clock_correction + relativistic - eph.bgd_e1e5b;

    let ax = ant.x - gps::OMEGA_E_DOT * ant.y * range;
    let ay = ant.y + gps::OMEGA_E_DOT * ant.x * range;
    let az = ant.z;

    let svrange = (prange + clock_correction) * CLIGHT;
    let dx = x[0] - ax;
    let dy = x[1] - ay;
    let dz = x[2] - az;
    let svdist = (dx * dx + dy * dy + dz * dz).sqrt();
    let err = (svrange - svdist) / CLIGHT;

    let (azimuth, elevation) = geodesy::sat_az_el(x, ant.ecef(), ant.latitude, ant.longitude);

    if err.abs() >= 1000.0e-9 {
        warn!(
            "E1 pseudorange correction rejected: error {:.1} ns",
            err.abs() * 1e9
        );
        return None;
    }

    Some(gps::Corrections {
        refsys: (clock_correction + relativistic - eph.bgd_e1e5b - svdist / CLIGHT) * 1e9,
        refsv: (relativistic - eph.bgd_e1e5b - svdist / CLIGHT) * 1e9,
        tropo: troposphere::delay(elevation, ant.height),
        iono: gps::iono_delay(
            azimuth,
            elevation,
            ant.latitude,
            ant.longitude,
            gps_tow,
            iono,
        ),
        azimuth,
        elevation,
        ioe: eph.iod_nav,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sisa_bands() {
        assert_eq!(decode_sisa(0), 0.0);
        assert!((decode_sisa(49) - 0.49).abs() < 1e-12);
        assert!((decode_sisa(50) - 0.5).abs() < 1e-12);
        assert!((decode_sisa(74) - 0.98).abs() < 1e-12);
        assert!((decode_sisa(75) - 1.0).abs() < 1e-12);
        assert!((decode_sisa(100) - 2.0).abs() < 1e-12);
        assert!((decode_sisa(125) - 6.0).abs() < 1e-12);
        assert!(decode_sisa(255) > 100.0);
    }
}
