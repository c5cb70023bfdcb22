//! GPS orbital arithmetic, broadcast corrections and time conversions.

use hifitime::Epoch;
use log::warn;

use crate::antenna::Antenna;
use crate::ephemeris::{GpsEphemeris, IonosphereData, Keplerian, UtcData};
use crate::geodesy;
use crate::measurement::ObservationCode;
use crate::store::Store;
use crate::troposphere;
use crate::utility;
use crate::{CLIGHT, SECS_PER_DAY, SECS_PER_WEEK};

/// WGS84 earth gravitational constant for the GPS user, m³/s²
pub const MU: f64 = 3.986005e14;
/// WGS84 earth rotation rate, rad/s
pub const OMEGA_E_DOT: f64 = 7.2921151467e-5;
/// Relativistic clock correction constant, s/m^0.5
const F_REL: f64 = -4.442807633e-10;
/// Kepler equation iteration cap
const MAX_ITERATIONS: usize = 10;

/// Highest SVN carried in GPS stores
pub const MAX_SVN: u8 = 32;

/// URA index to metres (ICD 20.3.3.3.1.3)
pub const URA_METRES: [f64; 16] = [
    2.0, 2.8, 4.0, 5.7, 8.0, 11.3, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0,
    0.0,
];

/// Accuracy cap used when an ephemeris is only needed for a coarse
/// geometric range (ms-ambiguity recovery).
const AMBIGUITY_URA_CAP: f64 = 16.0;

/// Outputs of the broadcast pseudorange correction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Corrections {
    /// REFSV correction, ns (no SV clock term)
    pub refsv: f64,
    /// REFSYS correction, ns (SV clock term included)
    pub refsys: f64,
    /// Modelled ionospheric delay, ns
    pub iono: f64,
    /// Modelled tropospheric delay, ns
    pub tropo: f64,
    /// Azimuth at the antenna, deg
    pub azimuth: f64,
    /// Elevation at the antenna, deg
    pub elevation: f64,
    /// Issue of ephemeris used
    pub ioe: u16,
}

/// ECEF satellite position (m) from the Keplerian broadcast elements at
/// GPS system time `t` (s of week). Also returns the eccentric anomaly.
/// Fails when the Kepler equation does not converge.
pub fn sat_xyz(k: &Keplerian, t_oe: f64, t: f64) -> Option<([f64; 3], f64)> {
    let a = k.sqrt_a * k.sqrt_a;
    let e = k.e;

    // beginning/end of week crossovers (ICD 20.3.3.4.3.1)
    let mut tk = t - t_oe;
    if tk > 302_400.0 {
        tk -= SECS_PER_WEEK as f64;
    } else if tk < -302_400.0 {
        tk += SECS_PER_WEEK as f64;
    }

    let mk = k.m0 + ((MU / (a * a * a)).sqrt() + k.delta_n) * tk;
    let mut ek = mk;
    let mut converged = false;
    for _ in 0..MAX_ITERATIONS {
        let ek_old = ek;
        ek = mk + e * ek_old.sin();
        if (ek - ek_old).abs() < 1e-8 {
            converged = true;
            break;
        }
    }
    if !converged {
        return None;
    }

    let phik = ((1.0 - e * e).sqrt() * ek.sin()).atan2(ek.cos() - e) + k.omega;
    let (s2p, c2p) = (2.0 * phik).sin_cos();

    let uk = phik + k.c_us * s2p + k.c_uc * c2p;
    let rk = a * (1.0 - e * ek.cos()) + k.c_rc * c2p + k.c_rs * s2p;
    let ik = k.i0 + k.idot * tk + k.c_ic * c2p + k.c_is * s2p;
    let xk = rk * uk.cos();
    let yk = rk * uk.sin();
    let omegak = k.omega0 + (k.omega_dot - OMEGA_E_DOT) * tk - OMEGA_E_DOT * t_oe;

    Some((
        [
            xk * omegak.cos() - yk * ik.cos() * omegak.sin(),
            xk * omegak.sin() + yk * ik.cos() * omegak.cos(),
            yk * ik.sin(),
        ],
        ek,
    ))
}

/// Rolls the clock reference time onto the current GPS day. Near the
/// end of the day an ephemeris whose toc falls in the first six hours
/// belongs to the next day.
fn toc_seconds_of_week(gps_tow: f64, t_oc: f64) -> f64 {
    let igpslt = gps_tow as i64;
    let mut gps_day = igpslt / SECS_PER_DAY as i64;
    let tod = igpslt % SECS_PER_DAY as i64;

    let mut toc = t_oc;
    toc -= SECS_PER_DAY as f64 * (toc / SECS_PER_DAY as f64).floor();
    let toc_hour = (toc / 3600.0).floor();
    toc -= 3600.0 * toc_hour;
    let toc_minute = (toc / 60.0).floor();
    toc -= 60.0 * toc_minute;
    let toc_second = toc.floor();

    if tod >= (SECS_PER_DAY as i64 - 6 * 3600) && (toc_hour as i64) < 6 {
        gps_day += 1;
    }
    gps_day as f64 * SECS_PER_DAY as f64 + toc_hour * 3600.0 + toc_minute * 60.0 + toc_second
}

/// Klobuchar single-frequency ionospheric delay, ns.
/// Azimuth/elevation and the antenna coordinates are in degrees; `gps_t`
/// is a GPS time of day or time of week in seconds.
pub fn iono_delay(
    az_deg: f64,
    elev_deg: f64,
    lat_deg: f64,
    lon_deg: f64,
    gps_t: f64,
    p: &IonosphereData,
) -> f64 {
    let pi = std::f64::consts::PI;

    let az = az_deg / 180.0; // semi-circles
    let elev = elev_deg / 180.0;
    let phi_u = lat_deg / 180.0;
    let lambda_u = lon_deg / 180.0;

    let psi = 0.0137 / (elev + 0.11) - 0.022;

    let mut phi_i = phi_u + psi * (az * pi).cos();
    phi_i = phi_i.clamp(-0.416, 0.416);

    let lambda_i = lambda_u + psi * (az * pi).sin() / (phi_i * pi).cos();

    let mut t = 4.32e4 * lambda_i + gps_t;
    t = t.rem_euclid(SECS_PER_DAY as f64);

    let phi_m = phi_i + 0.064 * ((lambda_i - 1.617) * pi).cos();

    let mut per = p.b0 + p.b1 * phi_m + p.b2 * phi_m.powi(2) + p.b3 * phi_m.powi(3);
    if per < 72_000.0 {
        per = 72_000.0;
    }

    let x = 2.0 * pi * (t - 50_400.0) / per;

    let mut amp = p.a0 + p.a1 * phi_m + p.a2 * phi_m.powi(2) + p.a3 * phi_m.powi(3);
    if amp < 0.0 {
        amp = 0.0;
    }

    let f = 1.0 + 16.0 * (0.53 - elev).powi(3);

    let t_iono = if x.abs() < 1.57 {
        f * (5e-9 + amp * (1.0 - x.powi(2) / 2.0 + x.powi(4) / 24.0))
    } else {
        f * 5e-9
    };

    t_iono * 1e9
}

/// Broadcast corrections for one GPS pseudorange.
///
/// `gps_tow` is the (rounded) GPS time of week of the measurement and
/// `prange` the raw pseudorange in seconds. Returns None when the
/// Kepler solver fails or the corrected range disagrees with the
/// geometric range by more than 1 µs (stale or wrong ephemeris).
pub fn pseudorange_corrections(
    gps_tow: f64,
    prange: f64,
    ant: &Antenna,
    eph: &GpsEphemeris,
    code: ObservationCode,
    iono: &IonosphereData,
) -> Option<Corrections> {
    // ICD 20.3.3.3.3.2: L2 group delay scaling
    let tgd_corr = match code {
        ObservationCode::C2P => (77.0 * 77.0) / (60.0 * 60.0),
        _ => 1.0,
    };

    let toc = toc_seconds_of_week(gps_tow, eph.t_oc);

    // SV clock correction (ICD 20.3.3.3.3.1)
    let gpssvt = gps_tow - prange;
    let dt = gpssvt - toc;
    let clock_correction = eph.a_f0 + eph.a_f1 * dt + eph.a_f2 * dt * dt;
    let tk = gpssvt - clock_correction;

    let (x, ek) = sat_xyz(&eph.kepler, eph.t_oe, tk)?;
    let relativistic = F_REL * eph.kepler.e * eph.kepler.sqrt_a * ek.sin();
    let range = prange + clock_correction + relativistic - tgd_corr * eph.t_gd;

    // Sagnac: displace the antenna by the earth rotation over the
    // signal flight time (ICD 20.3.3.4.3.4)
    let ax = ant.x - OMEGA_E_DOT * ant.y * range;
    let ay = ant.y + OMEGA_E_DOT * ant.x * range;
    let az = ant.z;

    let svrange = (prange + clock_correction) * CLIGHT;
    let dx = x[0] - ax;
    let dy = x[1] - ay;
    let dz = x[2] - az;
    let svdist = (dx * dx + dy * dy + dz * dz).sqrt();
    let err = (svrange - svdist) / CLIGHT;

    let (azimuth, elevation) = geodesy::sat_az_el(x, ant.ecef(), ant.latitude, ant.longitude);

    if err.abs() >= 1000.0e-9 {
        warn!("pseudorange correction rejected: error {:.1} ns", err.abs() * 1e9);
        return None;
    }

    Some(Corrections {
        refsys: (clock_correction + relativistic - tgd_corr * eph.t_gd - svdist / CLIGHT) * 1e9,
        refsv: (relativistic - tgd_corr * eph.t_gd - svdist / CLIGHT) * 1e9,
        tropo: troposphere::delay(elevation, ant.height),
        iono: iono_delay(
            azimuth,
            elevation,
            ant.latitude,
            ant.longitude,
            gps_tow,
            iono,
        ),
        azimuth,
        elevation,
        ioe: eph.iode as u16,
    })
}

/// Integer-millisecond pseudorange correction, recovered from the
/// geometric range to the best available ephemeris. Returns None when
/// no usable ephemeris exists or the orbit solution fails; callers
/// drop the sample in that case.
pub fn resolve_ms_ambiguity(
    store: &Store,
    ant: &Antenna,
    gps_tow: f64,
    svn: u8,
    meas: f64,
) -> Option<f64> {
    let eph = store.nearest(svn, gps_tow, AMBIGUITY_URA_CAP)?;
    let eph = eph.as_gps()?;

    let toc = toc_seconds_of_week(gps_tow, eph.t_oc);
    let gpssvt = gps_tow - meas;
    let dt = gpssvt - toc;
    let clock_correction = eph.a_f0 + eph.a_f1 * dt + eph.a_f2 * dt * dt;
    let tk = gpssvt - clock_correction;

    let (x, ek) = sat_xyz(&eph.kepler, eph.t_oe, tk)?;
    let relativistic = F_REL * eph.kepler.e * eph.kepler.sqrt_a * ek.sin();
    let range = meas + clock_correction + relativistic - eph.t_gd;

    let ax = ant.x - OMEGA_E_DOT * ant.y * range;
    let ay = ant.y + OMEGA_E_DOT * ant.x * range;
    let az = ant.z;
    let dx = x[0] - ax;
    let dy = x[1] - ay;
    let dz = x[2] - az;
    let svdist = (dx * dx + dy * dy + dz * dz).sqrt() / CLIGHT;

    let err = range - svdist;
    Some(-(err * 1000.0).round() / 1000.0)
}

/// Measured (dual-frequency) ionospheric delay on the first code, s.
pub fn meas_iono_delay(pr1: f64, pr2: f64) -> f64 {
    let gamma = (77.0 * 77.0) / (60.0 * 60.0);
    (pr2 - pr1) / (gamma - 1.0)
}

/// Leap-second count applicable on `mjd`, resolved from the broadcast
/// schedule. The broadcast WN_LSF carries only 8 bits; ICD 20.3.3.5.2.4
/// bounds the true difference to 127 weeks.
pub fn current_leap_seconds(mjd: i32, utc: &UtcData) -> Option<i32> {
    if utc.dt_ls == 0 && utc.dt_lsf == 0 {
        return None;
    }
    let gps_week = (mjd - 44244) / 7;
    let mut sched_week = (gps_week & !0xff) | (utc.wn_lsf as i32 & 0xff);
    while gps_week - sched_week > 127 {
        sched_week += 256;
    }
    while gps_week - sched_week < -127 {
        sched_week -= 256;
    }
    let sched_mjd = 44244 + 7 * sched_week + utc.dn as i32;
    Some(if mjd >= sched_mjd {
        utc.dt_lsf as i32
    } else {
        utc.dt_ls as i32
    })
}

/// UTC time to GPS time of week / truncated week / full week.
pub fn utc_to_gps(tm_utc: Epoch, leap_seconds: i32) -> (u32, u16, u32) {
    let t_gps = utility::naive_gps_secs(tm_utc) + leap_seconds as i64;
    let wn = (t_gps / SECS_PER_WEEK as i64) as u32;
    let tow = (t_gps - wn as i64 * SECS_PER_WEEK as i64) as u32;
    (tow, (wn % 1024) as u16, wn)
}

/// GPS time of week + truncated week to the date/time in the GPS
/// timescale, with the truncated week recovered by requiring the date
/// to fall at or after 2016-01-01 (one full rollover era).
pub fn gps_to_epoch(tow: u32, truncated_wn: u16) -> Epoch {
    let mut t = truncated_wn as i64 * SECS_PER_WEEK as i64 + tow as i64;
    // naive seconds of 2016-01-01 00:00:00 since the GPS origin
    let reference = (57388 - 44244) as i64 * SECS_PER_DAY as i64;
    let era = SECS_PER_WEEK as i64 * 1024;
    // nearest whole number of eras moving t to the anchor
    let rollovers = (reference - t + era / 2).div_euclid(era);
    if rollovers > 0 {
        t += rollovers * era;
    }
    utility::epoch_from_naive_gps_secs(t)
}

/// GPS time of week + truncated week to the UTC date/time.
pub fn gps_to_utc(tow: u32, truncated_wn: u16, leap_seconds: i32) -> Epoch {
    let gps = gps_to_epoch(tow, truncated_wn);
    utility::epoch_from_naive_gps_secs(utility::naive_gps_secs(gps) - leap_seconds as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A plausible GPS ephemeris, close to a real broadcast set.
    pub(crate) fn test_ephemeris() -> GpsEphemeris {
        let mut e = GpsEphemeris::default();
        e.svn = 1;
        e.iode = 87;
        e.iodc = 87;
        e.week_number = 877;
        e.t_oc = 7200.0;
        e.t_oe = 7200.0;
        e.sv_accuracy_raw = 0;
        e.sv_accuracy = 2.0;
        e.kepler = Keplerian {
            sqrt_a: 5153.655,
            e: 0.0091,
            m0: 1.05827953357,
            omega0: -2.2427,
            omega: 0.88683,
            i0: 0.9629,
            delta_n: 4.5e-9,
            omega_dot: -8.1e-9,
            idot: 1.0e-10,
            c_uc: 1.1e-6,
            c_us: 7.9e-6,
            c_rc: 2.2e2,
            c_rs: 2.1e1,
            c_ic: -1.1e-7,
            c_is: 9.3e-8,
        };
        e
    }

    #[test]
    fn orbit_radius_is_gps_like() {
        let e = test_ephemeris();
        let (x, _) = sat_xyz(&e.kepler, e.t_oe, e.t_oe).unwrap();
        let r = (x[0] * x[0] + x[1] * x[1] + x[2] * x[2]).sqrt();
        assert!(
            r > 25_000.0e3 && r < 28_000.0e3,
            "orbit radius {} outside GPS shell",
            r
        );
    }

    #[test]
    fn kepler_fails_gracefully() {
        let mut e = test_ephemeris();
        e.kepler.e = f64::NAN;
        assert!(sat_xyz(&e.kepler, e.t_oe, 0.0).is_none());
    }

    #[test]
    fn clock_correction_constant_af0() {
        // a_f0 only: the correction must equal a_f0 exactly
        let ant = Antenna::default().with_ecef(-4_646_844.3, 2_553_749.7, -3_534_466.9);
        let mut e = test_ephemeris();
        e.a_f0 = 1e-4;
        e.a_f1 = 0.0;
        e.a_f2 = 0.0;
        e.t_gd = 0.0;
        let iono = IonosphereData::default();
        let tow = 7230.0;
        let pr = 7.6e-2;
        if let Some(c) = pseudorange_corrections(tow, pr, &ant, &e, ObservationCode::C1C, &iono) {
            // REFSYS - REFSV isolates the clock term (in ns)
            assert!((c.refsys - c.refsv - 1e5).abs() < 1e-6);
        }
        // directly verify the clock polynomial
        let toc = toc_seconds_of_week(tow, e.t_oc);
        let dt = (tow - pr) - toc;
        let clock = e.a_f0 + e.a_f1 * dt + e.a_f2 * dt * dt;
        assert_eq!(clock, 1e-4);
    }

    #[test]
    fn toc_rolls_to_next_day() {
        // 23:30 with a toc at 01:00: the ephemeris belongs to tomorrow
        let tow = 84_600.0;
        let toc = toc_seconds_of_week(tow, 3600.0);
        assert_eq!(toc, SECS_PER_DAY as f64 + 3600.0);
        // mid-day: no roll
        let toc = toc_seconds_of_week(43_200.0, 39_600.0);
        assert_eq!(toc, 39_600.0);
    }

    #[test]
    fn iono_day_night() {
        let p = IonosphereData {
            a0: 1.1176e-8,
            a1: 7.4506e-9,
            a2: -5.9605e-8,
            a3: -5.9605e-8,
            b0: 90_112.0,
            b1: 16_384.0,
            b2: -196_608.0,
            b3: -65_536.0,
        };
        // mid-latitude, moderate elevation
        let day = iono_delay(180.0, 45.0, -33.0, 151.0, 10_000.0, &p);
        assert!(day > 0.0 && day < 100.0);
        // the 5 ns floor shows up far from the diurnal peak
        let night = iono_delay(180.0, 45.0, -33.0, 151.0, 70_000.0, &p);
        assert!(night >= 0.0);
    }

    #[test]
    fn leap_second_schedule() {
        let mut utc = UtcData::default();
        assert!(current_leap_seconds(57_400, &utc).is_none());

        utc.dt_ls = 16;
        utc.dt_lsf = 17;
        // event scheduled mid-2015 (WN_LSF truncated to 8 bits)
        let event_mjd = 57_204; // 2015-07-01
        let week = (event_mjd - 44244) / 7;
        utc.wn_lsf = (week & 0xff) as u16;
        utc.dn = ((event_mjd - 44244) - week * 7) as u16;

        assert_eq!(current_leap_seconds(57_100, &utc), Some(16));
        assert_eq!(current_leap_seconds(57_300, &utc), Some(17));
    }

    #[test]
    fn utc_gps_round_trip() {
        let utc = Epoch::from_gregorian_utc(2016, 1, 17, 12, 0, 0, 0);
        let (tow, twn, wn) = utc_to_gps(utc, 17);
        assert_eq!(wn / 1024, 1); // one rollover era in
        let back = gps_to_utc(tow, twn, 17);
        assert_eq!(back, utc);
        // GPS timescale runs ahead of UTC by the leap count
        let gps = gps_to_epoch(tow, twn);
        assert_eq!(
            utility::naive_gps_secs(gps) - utility::naive_gps_secs(utc),
            17
        );
    }

    #[test]
    fn ms_ambiguity_round_trip() {
        let ant = Antenna::default().with_ecef(-4_646_844.3, 2_553_749.7, -3_534_466.9);
        let mut store = Store::new(MAX_SVN);
        store.add(crate::ephemeris::Ephemeris::Gps(test_ephemeris()));

        // coarse geometric pseudorange for this geometry; the ephemeris
        // reference time is still ahead of the measurement
        let tow = 7100.0;
        let base = resolve_ms_ambiguity(&store, &ant, tow, 1, 0.075).unwrap();
        let truth = 0.075 + base; // consistent with the ephemeris to < 0.5 ms

        // shift the measurement by 3 ms: the correction must grow by -3 ms
        let c1 = resolve_ms_ambiguity(&store, &ant, tow, 1, truth).unwrap();
        let c2 = resolve_ms_ambiguity(&store, &ant, tow, 1, truth + 3.0e-3).unwrap();
        assert!((c1 - c2 - 3.0e-3).abs() < 1e-12);

        // no ephemeris for this SV
        assert!(resolve_ms_ambiguity(&store, &ant, tow, 2, 0.075).is_none());
    }

    #[test]
    fn dual_frequency_iono_sign() {
        // P2 delayed more than P1: positive L1 iono estimate
        let d = meas_iono_delay(0.0700000, 0.0700001);
        assert!(d > 0.0);
    }
}
