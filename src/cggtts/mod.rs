//! CGGTTS track generation.
//!
//! Implements the BIPM common-view schedule, the per-SV track fits
//! (quadratic sub-fits for V1, 30 s sampling for V2E) and the V1 / V2E
//! file formats with their line and header checksums.

pub mod checksum;

use std::io::Write;

use gnss::prelude::Constellation;
use log::{debug, info};

use crate::antenna::Antenna;
use crate::counter::CounterLog;
use crate::ephemeris::Ephemeris;
use crate::galileo;
use crate::gps;
use crate::measurement::ObservationCode;
use crate::pairing::MeasurementPair;
use crate::rx::{Dataset, ReceiverInfo};
use crate::utility;
use checksum::checksum;

/// Tracks per day in the BIPM schedule (occasionally one more)
const NTRACKS: usize = 89;
/// Track duration, s
const NTRACKPOINTS: usize = 780;
/// Highest SVN the track tensor carries (BDS 1-37, Galileo 1-36)
const MAX_SV: usize = 37;

const APP_NAME: &str = "timetx";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    V1,
    #[default]
    V2E,
}

impl std::str::FromStr for Version {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, ()> {
        match s.to_uppercase().as_str() {
            "V1" => Ok(Self::V1),
            "V2E" => Ok(Self::V2E),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayKind {
    #[default]
    Internal,
    System,
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingConvention {
    #[default]
    Plain,
    Bipm,
}

/// Per-file generation counters, reported in the processing log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CggttsStats {
    pub good_tracks: u32,
    pub low_elevation: u32,
    pub high_dsg: u32,
    pub short_tracks: u32,
    pub ephemeris_misses: u32,
    pub pseudorange_failures: u32,
    pub bad_measurements: u32,
}

/// The BIPM 13-minute track schedule for one MJD: start minutes of the
/// up-to-90 tracks, ascending. The 4 min/day drift keeps the schedule
/// aligned with the GPS sidereal period; MJD 50722 is the reference.
pub fn bipm_schedule(mjd: i32) -> Vec<i32> {
    let mut schedule = Vec::with_capacity(NTRACKS + 1);
    let mut mins = 2;
    for _ in 0..NTRACKS {
        let mut m = mins - 4 * (mjd - 50722);
        if m < 0 {
            let ndays = (m / 1436).abs() + 1;
            m += ndays * 1436;
        }
        schedule.push(m % 1436);
        mins += 16;
    }
    schedule.sort_unstable();
    // one more track fits at the end of the day when the last slot
    // starts early enough
    if schedule[NTRACKS - 1] % 60 < 43 {
        schedule.push(schedule[NTRACKS - 1] + 16);
    }
    schedule
}

/// Converts a configured code selection ("C1", "P1+P2", "C1C",
/// "C1C+C2P", ...) into observation codes. Two-letter CGGTTS names and
/// three-letter RINEX names are accepted, but not mixed.
pub fn select_codes(
    s: &str,
    constellation: Constellation,
) -> Option<(ObservationCode, Option<ObservationCode>)> {
    use std::str::FromStr;
    if !s.is_ascii() {
        return None;
    }
    let two = |c: &str| -> Option<ObservationCode> {
        match c {
            "C1" | "E1" => Some(ObservationCode::C1C),
            "P1" => Some(ObservationCode::C1P),
            "P2" => Some(ObservationCode::C2P),
            "C2" => Some(ObservationCode::C2C),
            "B1" => Some(ObservationCode::C2I),
            "B2" => Some(ObservationCode::C7I),
            _ => None,
        }
    };
    let (code1, code2) = match s.len() {
        2 => (two(s)?, None),
        5 => (two(&s[0..2])?, Some(two(&s[3..5])?)),
        3 => (ObservationCode::from_str(s).ok()?, None),
        7 => (
            ObservationCode::from_str(&s[0..3]).ok()?,
            Some(ObservationCode::from_str(&s[4..7]).ok()?),
        ),
        _ => return None,
    };
    if !code1.compatible_with(constellation) {
        return None;
    }
    Some((code1, code2))
}

/// Output file name for one CGGTTS product.
pub fn filename(
    convention: NamingConvention,
    path: &str,
    mjd: i32,
    constellation: Constellation,
    lab_id: &str,
    receiver_id: &str,
) -> String {
    match convention {
        NamingConvention::Plain => format!("{}/{}.cctf", path, mjd),
        NamingConvention::Bipm => {
            let c = format!("{:x}", constellation);
            format!(
                "{}/{}M{}{}{:2}.{:03}",
                path,
                c,
                lab_id,
                receiver_id,
                mjd / 1000,
                mjd % 1000
            )
        },
    }
}

/// Per-sample series accumulated over one track, ready for the final
/// linear fits. REFSV/REFSYS/MDTR/MDIO/MSIO are in ns, angles in
/// degrees, times in UTC seconds of day.
#[derive(Debug, Clone, Default)]
pub struct TrackSamples {
    pub tutc: Vec<f64>,
    pub az: Vec<f64>,
    pub el: Vec<f64>,
    pub mdtr: Vec<f64>,
    pub mdio: Vec<f64>,
    pub refsv: Vec<f64>,
    pub refsys: Vec<f64>,
    pub msio: Option<Vec<f64>>,
}

/// One fitted track, scaled to the CGGTTS integer units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FittedTrack {
    /// Elevation at track centre, 0.1 deg
    pub elv: i64,
    /// Azimuth at track centre, 0.1 deg
    pub azth: i64,
    /// REFSV at track centre, 0.1 ns
    pub refsv: i64,
    /// REFSV slope, 0.1 ps/s
    pub srsv: i64,
    /// REFSYS at track centre, 0.1 ns
    pub refsys: i64,
    /// REFSYS slope, 0.1 ps/s
    pub srsys: i64,
    /// RMS of the REFSYS fit residuals, 0.1 ns
    pub dsg: i64,
    /// Modelled tropospheric delay and slope, 0.1 ns / 0.1 ps/s
    pub mdtr: i64,
    pub smdt: i64,
    /// Modelled ionospheric delay and slope, 0.1 ns / 0.1 ps/s
    pub mdio: i64,
    pub smdi: i64,
    /// Measured ionosphere (dual-frequency): delay, slope, residuals
    pub msio: Option<(i64, i64, i64)>,
    /// True when a slope or DSG hit its clamp
    pub clamped: bool,
}

/// Linear-fits every series at track centre `tc` and applies the
/// CGGTTS scalings. `meas_delay` (ns) is the total measurement system
/// delay subtracted from REFSV and REFSYS.
pub fn fit_track(samples: &TrackSamples, tc: f64, meas_delay: f64) -> Option<FittedTrack> {
    let mut trk = FittedTrack::default();

    let az = utility::linear_fit(&samples.tutc, &samples.az, tc)?;
    trk.azth = (az.value * 10.0).round() as i64;

    let el = utility::linear_fit(&samples.tutc, &samples.el, tc)?;
    trk.elv = (el.value * 10.0).round() as i64;

    let mdtr = utility::linear_fit(&samples.tutc, &samples.mdtr, tc)?;
    trk.mdtr = (mdtr.value * 10.0).round() as i64;
    trk.smdt = (mdtr.slope * 10_000.0).round() as i64;

    let refsv = utility::linear_fit(&samples.tutc, &samples.refsv, tc)?;
    trk.refsv = ((refsv.value - meas_delay) * 10.0).round() as i64;
    trk.srsv = (refsv.slope * 10_000.0).round() as i64;

    let refsys = utility::linear_fit(&samples.tutc, &samples.refsys, tc)?;
    trk.refsys = ((refsys.value - meas_delay) * 10.0).round() as i64;
    trk.srsys = (refsys.slope * 10_000.0).round() as i64;
    trk.dsg = (refsys.rms * 10.0).round() as i64;

    let mdio = utility::linear_fit(&samples.tutc, &samples.mdio, tc)?;
    trk.mdio = (mdio.value * 10.0).round() as i64;
    trk.smdi = (mdio.slope * 10_000.0).round() as i64;

    if let Some(msio) = &samples.msio {
        let fit = utility::linear_fit(&samples.tutc, msio, tc)?;
        trk.msio = Some((
            (fit.value * 10.0).round() as i64,
            (fit.slope * 10_000.0).round() as i64,
            (fit.rms * 10.0).round() as i64,
        ));
    }

    // range clamps: anything at the rail is a bad measurement
    if trk.srsv > 99_999 {
        trk.srsv = 99_999;
        trk.clamped = true;
    }
    if trk.srsv < -99_999 {
        trk.srsv = -99_999;
        trk.clamped = true;
    }
    if trk.srsys > 99_999 {
        trk.srsys = 99_999;
        trk.clamped = true;
    }
    if trk.srsys < -99_999 {
        trk.srsys = -99_999;
        trk.clamped = true;
    }
    if trk.dsg > 999 {
        trk.dsg = 999;
        trk.clamped = true;
    }

    Some(trk)
}

/// One CGGTTS output: a (constellation, code) selection written for a
/// single MJD.
#[derive(Debug, Clone)]
pub struct Cggtts {
    pub version: Version,
    pub reference: String,
    pub lab: String,
    pub comments: String,
    /// Revision date (year, month, day) of the header
    pub rev_date: (u16, u8, u8),
    /// Antenna cable delay, ns
    pub cab_dly: f64,
    /// Internal delay for code 1, ns
    pub int_dly: f64,
    /// Internal delay for code 2 (dual-frequency outputs), ns
    pub int_dly2: f64,
    /// Reference cable delay, ns
    pub ref_dly: f64,
    pub cal_id: String,
    pub delay_kind: DelayKind,
    /// Receiver 1 PPS offset, ns
    pub pps_offset: f64,
    /// Shortest acceptable track, s
    pub min_track_length: i64,
    /// Lowest acceptable elevation at track centre, deg
    pub min_elevation: f64,
    /// Largest acceptable DSG, ns
    pub max_dsg: f64,
    /// Ephemerides above this URA/SISA (m) are not used
    pub max_ura: f64,
    pub constellation: Constellation,
    pub code1: ObservationCode,
    pub code2: Option<ObservationCode>,
    /// Start/stop of the processed window, s of day
    pub start_time: u32,
    pub stop_time: u32,
    pub antenna: Antenna,
    pub rx_info: ReceiverInfo,
}

impl Cggtts {
    pub fn new(antenna: &Antenna, rx_info: &ReceiverInfo) -> Self {
        Self {
            version: Version::V2E,
            reference: String::new(),
            lab: String::new(),
            comments: String::new(),
            rev_date: (2016, 1, 1),
            cab_dly: 0.0,
            int_dly: 0.0,
            int_dly2: 0.0,
            ref_dly: 0.0,
            cal_id: String::new(),
            delay_kind: DelayKind::Internal,
            pps_offset: 0.0,
            min_track_length: 390,
            min_elevation: 10.0,
            max_dsg: 10.0,
            max_ura: 3.0,
            constellation: Constellation::GPS,
            code1: ObservationCode::C1C,
            code2: None,
            start_time: 0,
            stop_time: SECS - 1,
            antenna: antenna.clone(),
            rx_info: rx_info.clone(),
        }
    }

    fn is_p3(&self) -> bool {
        self.code2.is_some()
    }

    /// Constellation letter and FRC column content for V2E lines.
    fn frc_code(&self) -> &'static str {
        use ObservationCode::*;
        match (self.constellation, self.code1, self.code2) {
            (Constellation::Galileo, C1C, None) => "E1",
            (_, C1C, None) => "L1C",
            (_, C1B, None) => "E1",
            (_, C1P, None) => "L1P",
            (_, C2P, None) => "L2P",
            (_, C2I, None) => "B1i",
            (_, _, Some(_)) => "L3P",
            _ => "",
        }
    }

    /// Two-letter code names for the header delay line.
    fn code_str(&self, code: ObservationCode) -> &'static str {
        use ObservationCode::*;
        match code {
            C1C => {
                if self.constellation == Constellation::Galileo {
                    "E1"
                } else {
                    "C1"
                }
            },
            C1B => "E1",
            C1P => "P1",
            C2P => "P2",
            C2C => "C2",
            C2I => "B1",
            C7I => "B2",
            _ => "??",
        }
    }

    /// Broadcast corrections for one pseudorange, dispatched on the
    /// ephemeris variant.
    fn corrections(
        &self,
        dataset: &Dataset,
        eph: &Ephemeris,
        gps_tow: f64,
        prange: f64,
    ) -> Option<gps::Corrections> {
        let iono = dataset.gps_iono.unwrap_or_default();
        match eph {
            Ephemeris::Gps(e) => gps::pseudorange_corrections(
                gps_tow,
                prange,
                &self.antenna,
                e,
                self.code1,
                &iono,
            ),
            Ephemeris::Gal(e) => {
                galileo::pseudorange_corrections(gps_tow, prange, &self.antenna, e, &iono)
            },
        }
    }

    fn store<'a>(&self, dataset: &'a Dataset) -> &'a crate::store::Store {
        match self.constellation {
            Constellation::Galileo => &dataset.galileo,
            _ => &dataset.gps,
        }
    }

    /// Generates the observation file for one MJD from the matched
    /// measurement pairs.
    pub fn write_tracks<W: Write>(
        &self,
        w: &mut W,
        mjd: i32,
        dataset: &Dataset,
        counter: &CounterLog,
        pairs: &[MeasurementPair],
        tic_enabled: bool,
    ) -> std::io::Result<CggttsStats> {
        let mut stats = CggttsStats::default();

        // total measurement system delay, subtracted from REFSV/REFSYS
        let meas_delay = self.pps_offset + self.int_dly + self.cab_dly - self.ref_dly;
        let use_tic = if tic_enabled { 1.0 } else { 0.0 };
        let quad_fits = self.version == Version::V1;
        let lin_fit_interval: i64 = if quad_fits { 15 } else { 30 };
        let is_p3 = self.is_p3();

        debug!("using TIC: {}, P3: {}", tic_enabled, is_p3);

        self.write_header(w)?;

        let schedule = bipm_schedule(mjd);
        let measurements = &dataset.measurements;
        let store = self.store(dataset);

        // per-track observation tensor: [svn][second][code1|code2],
        // holding (epoch index, sv index, counter index)
        type Cell = Option<(usize, usize, usize)>;
        let mut svtrk: Vec<[Cell; 2]> = vec![[None; 2]; (MAX_SV + 1) * NTRACKPOINTS];
        let mut sv_obs_count = [0u32; MAX_SV + 1];

        for start_minute in schedule {
            let track_start = (start_minute * 60) as usize;
            let mut track_stop = track_start + NTRACKPOINTS - 1;
            if track_stop >= SECS as usize {
                track_stop = SECS as usize - 1;
            }
            // window it
            if track_start < self.start_time as usize || track_start > self.stop_time as usize {
                continue;
            }

            for cell in svtrk.iter_mut() {
                *cell = [None; 2];
            }
            sv_obs_count.fill(0);

            // matched pairs are looked up directly: the index is TOD
            for m in track_start..=track_stop {
                if !pairs[m].is_matched() {
                    continue;
                }
                let ri = pairs[m].receiver.unwrap();
                let ci = pairs[m].counter.unwrap();
                for (si, svm) in measurements[ri].svs.iter().enumerate() {
                    if svm.sv.constellation != self.constellation {
                        continue;
                    }
                    let svn = svm.sv.prn as usize;
                    if svn == 0 || svn > MAX_SV {
                        continue;
                    }
                    if svm.code == self.code1 {
                        svtrk[svn * NTRACKPOINTS + (m - track_start)][0] = Some((ri, si, ci));
                        sv_obs_count[svn] += 1;
                    } else if Some(svm.code) == self.code2 {
                        svtrk[svn * NTRACKPOINTS + (m - track_start)][1] = Some((ri, si, ci));
                    }
                }
            }

            let hh = start_minute / 60;
            let mm = start_minute % 60;

            for sv in 1..=MAX_SV {
                if sv_obs_count[sv] == 0 {
                    continue;
                }

                let mut samples = TrackSamples::default();
                if is_p3 {
                    samples.msio = Some(Vec::new());
                }
                let mut ioe: u16 = 0;
                let mut locked_eph: Option<&Ephemeris> = None;

                if quad_fits {
                    // V1: quadratic sub-fits over 15 s segments
                    let mut q_tutc: Vec<f64> = Vec::with_capacity(15);
                    let mut q_prange: Vec<f64> = Vec::with_capacity(15);
                    let mut q_refpps: Vec<f64> = Vec::with_capacity(15);
                    let mut seg_fits: Vec<(f64, f64, f64, f64)> = Vec::new(); // (tutc, prange, refpps, gpstow)
                    let mut last_ri: Option<usize> = None;

                    let mut t = track_start;
                    while t <= track_stop {
                        if let Some((ri, si, ci)) = svtrk[sv * NTRACKPOINTS + (t - track_start)][0]
                        {
                            let rxm = &measurements[ri];
                            let tmeas = rxm.utc_tod() as f64;
                            // the counter series is smoothed along with
                            // the pseudoranges, cleaning up residual
                            // sawtooth error
                            q_refpps.push(
                                use_tic * (counter.measurements[ci].rdg + rxm.sawtooth) * 1e9,
                            );
                            q_prange.push(rxm.svs[si].meas);
                            q_tutc.push(tmeas);
                            last_ri = Some(ri);
                        }
                        t += 1;

                        if (t - track_start) % 15 == 0 || (t - track_start) == NTRACKPOINTS {
                            // demand more than half a segment so the
                            // fit interpolates rather than extrapolates
                            if q_tutc.len() > 7 {
                                let tc = (t - 1) as f64 - 7.0;
                                let rxm = &measurements[last_ri.unwrap()];
                                let mut gps_day = (rxm.gps_tow / SECS as f64).floor();
                                let tod = tc + dataset.leap_seconds as f64;
                                if tod >= SECS as f64 {
                                    gps_day += 1.0;
                                    if gps_day == 7.0 {
                                        gps_day = 0.0;
                                    }
                                }
                                let gpstow =
                                    tc + dataset.leap_seconds as f64 + gps_day * SECS as f64;
                                let pr = utility::quad_fit(&q_tutc, &q_prange, tc);
                                let pps = utility::quad_fit(&q_tutc, &q_refpps, tc);
                                if let (Some(pr), Some(pps)) = (pr, pps) {
                                    seg_fits.push((tc, pr, pps, gpstow));
                                }
                            }
                            q_tutc.clear();
                            q_prange.clear();
                            q_refpps.clear();
                        }
                    }

                    for (tutc, prange, refpps, gpstow) in seg_fits {
                        if locked_eph.is_none() {
                            // one ephemeris per track
                            locked_eph = store.nearest(sv as u8, gpstow, self.max_ura);
                            if locked_eph.is_none() {
                                stats.ephemeris_misses += 1;
                            }
                        }
                        let corr = locked_eph
                            .and_then(|eph| self.corrections(dataset, eph, gpstow, prange));
                        match corr {
                            Some(c) => {
                                ioe = c.ioe;
                                samples.tutc.push(tutc);
                                samples.az.push(c.azimuth);
                                samples.el.push(c.elevation);
                                samples.mdtr.push(c.tropo);
                                samples.mdio.push(c.iono);
                                samples
                                    .refsv
                                    .push(prange * 1e9 + c.refsv - c.iono - c.tropo + refpps);
                                samples
                                    .refsys
                                    .push(prange * 1e9 + c.refsys - c.iono - c.tropo + refpps);
                            },
                            None => stats.pseudorange_failures += 1,
                        }
                    }
                } else {
                    // V2E: 30 s sampled values
                    let mut tsearch = track_start as i64;
                    let mut t = 0usize;
                    while t < NTRACKPOINTS && track_start + t <= track_stop {
                        let cell1 = svtrk[sv * NTRACKPOINTS + t][0];
                        let (ri, si, ci) = match cell1 {
                            Some(c) => c,
                            None => {
                                t += 1;
                                continue;
                            },
                        };
                        let cell2 = svtrk[sv * NTRACKPOINTS + t][1];
                        if is_p3 && cell2.is_none() {
                            t += 1;
                            continue;
                        }

                        let rxm = &measurements[ri];
                        let tmeas = rxm.utc_tod() as i64;
                        if tmeas == tsearch {
                            if locked_eph.is_none() {
                                locked_eph = store.nearest(sv as u8, rxm.gps_tow, self.max_ura);
                                if locked_eph.is_none() {
                                    stats.ephemeris_misses += 1;
                                }
                            }
                            let prange = rxm.svs[si].meas;
                            let corr = locked_eph.and_then(|eph| {
                                self.corrections(dataset, eph, rxm.gps_tow, prange)
                            });
                            match corr {
                                Some(c) => {
                                    ioe = c.ioe;
                                    let refpps = use_tic
                                        * (counter.measurements[ci].rdg + rxm.sawtooth)
                                        * 1e9;
                                    samples.tutc.push(tmeas as f64);
                                    samples.az.push(c.azimuth);
                                    samples.el.push(c.elevation);
                                    samples.mdtr.push(c.tropo);
                                    samples.mdio.push(c.iono);
                                    samples
                                        .refsv
                                        .push(prange * 1e9 + c.refsv - c.iono - c.tropo + refpps);
                                    samples
                                        .refsys
                                        .push(prange * 1e9 + c.refsys - c.iono - c.tropo + refpps);
                                    if let (Some(msio), Some((ri2, si2, _))) =
                                        (samples.msio.as_mut(), cell2)
                                    {
                                        let pr2 = measurements[ri2].svs[si2].meas;
                                        msio.push(1e9 * gps::meas_iono_delay(prange, pr2));
                                    }
                                },
                                None => stats.pseudorange_failures += 1,
                            }
                            tsearch += 30;
                            t += 1;
                        } else if tmeas > tsearch {
                            tsearch += 30;
                            // this measurement must be re-tested
                        } else {
                            t += 1;
                        }
                    }
                }

                let npts = samples.tutc.len() as i64;
                if npts * lin_fit_interval < self.min_track_length {
                    stats.short_tracks += 1;
                    continue;
                }

                let tc = (track_start + track_stop) as f64 / 2.0;
                let trk = match fit_track(&samples, tc, meas_delay) {
                    Some(t) => t,
                    None => continue,
                };
                if trk.clamped {
                    stats.bad_measurements += 1;
                }

                if trk.elv < (self.min_elevation * 10.0) as i64 {
                    stats.low_elevation += 1;
                    continue;
                }
                if trk.dsg as f64 > self.max_dsg * 10.0 {
                    stats.high_dsg += 1;
                    continue;
                }

                stats.good_tracks += 1;
                let line =
                    self.format_track(sv, mjd, hh, mm, npts * lin_fit_interval, ioe, &trk);
                writeln!(w, "{}{:02X}", line, checksum(&line))?;
            }
        }

        info!("ephemeris search misses: {}", stats.ephemeris_misses);
        info!("pseudorange calculation failures: {}", stats.pseudorange_failures);
        info!("bad measurements: {}", stats.bad_measurements);
        info!("{} good tracks", stats.good_tracks);
        info!("{} low elevation tracks", stats.low_elevation);
        info!("{} high DSG tracks", stats.high_dsg);
        info!("{} short tracks", stats.short_tracks);

        Ok(stats)
    }

    /// One track line, without the trailing checksum.
    fn format_track(
        &self,
        sv: usize,
        mjd: i32,
        hh: i32,
        mm: i32,
        track_length: i64,
        ioe: u16,
        trk: &FittedTrack,
    ) -> String {
        match self.version {
            Version::V1 => format!(
                " {:02} {:>2} {:>5} {:02}{:02}00 {:>4} {:>3} {:>4} {:>11} {:>6} {:>11} {:>6} {:>4} {:>3} {:>4} {:>4} {:>4} {:>4} ",
                sv, "FF", mjd, hh, mm, track_length, trk.elv, trk.azth, trk.refsv, trk.srsv,
                trk.refsys, trk.srsys, trk.dsg, ioe, trk.mdtr, trk.smdt, trk.mdio, trk.smdi
            ),
            Version::V2E => {
                let gnss = format!("{:x}", self.constellation);
                if let Some((msio, smsi, isg)) = trk.msio {
                    format!(
                        "{}{:02} {:>2} {:>5} {:02}{:02}00 {:>4} {:>3} {:>4} {:>11} {:>6} {:>11} {:>6} {:>4} {:>3} {:>4} {:>4} {:>4} {:>4} {:>4} {:>4} {:>3} {:>2} {:>2} {:>3} ",
                        gnss, sv, "FF", mjd, hh, mm, track_length, trk.elv, trk.azth, trk.refsv,
                        trk.srsv, trk.refsys, trk.srsys, trk.dsg, ioe, trk.mdtr, trk.smdt,
                        trk.mdio, trk.smdi, msio, smsi, isg, 0, 0, self.frc_code()
                    )
                } else {
                    format!(
                        "{}{:02} {:>2} {:>5} {:02}{:02}00 {:>4} {:>3} {:>4} {:>11} {:>6} {:>11} {:>6} {:>4} {:>3} {:>4} {:>4} {:>4} {:>4} {:>2} {:>2} {:>3} ",
                        gnss, sv, "FF", mjd, hh, mm, track_length, trk.elv, trk.azth, trk.refsv,
                        trk.srsv, trk.refsys, trk.srsys, trk.dsg, ioe, trk.mdtr, trk.smdt,
                        trk.mdio, trk.smdi, 0, 0, self.frc_code()
                    )
                }
            },
        }
    }

    fn write_header<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let mut cksum: u32 = 0;
        let mut put = |w: &mut W, line: String| -> std::io::Result<()> {
            cksum += checksum(&line) as u32;
            writeln!(w, "{}", line)
        };

        match self.version {
            Version::V1 => put(w, "GGTTS GPS DATA FORMAT VERSION = 01".to_string())?,
            Version::V2E => put(
                w,
                "CGGTTS     GENERIC DATA FORMAT VERSION = 2E".to_string(),
            )?,
        }

        put(
            w,
            format!(
                "REV DATE = {:4}-{:02}-{:02}",
                self.rev_date.0, self.rev_date.1, self.rev_date.2
            ),
        )?;
        put(
            w,
            format!(
                "RCVR = {} {} {} {:4} {},v{}",
                self.rx_info.manufacturer,
                self.rx_info.model,
                self.rx_info.serial_number,
                self.rx_info.commission_year,
                APP_NAME,
                APP_VERSION
            ),
        )?;
        put(w, format!("CH = {:02}", self.rx_info.channels))?;
        if self.is_p3() {
            put(
                w,
                format!(
                    "IMS = {} {} {} {:4} {},v{}",
                    self.rx_info.manufacturer,
                    self.rx_info.model,
                    self.rx_info.serial_number,
                    self.rx_info.commission_year,
                    APP_NAME,
                    APP_VERSION
                ),
            )?;
        } else {
            put(w, "IMS = 99999".to_string())?;
        }
        put(w, format!("LAB = {}", self.lab))?;
        put(w, format!("X = {:+.3} m", self.antenna.x))?;
        put(w, format!("Y = {:+.3} m", self.antenna.y))?;
        put(w, format!("Z = {:+.3} m", self.antenna.z))?;
        put(w, format!("FRAME = {}", self.antenna.frame))?;
        let comments = if self.comments.is_empty() {
            "NO COMMENT"
        } else {
            &self.comments
        };
        put(w, format!("COMMENTS = {}", comments))?;

        match self.version {
            Version::V1 => {
                put(w, format!("INT DLY = {:.1} ns", self.int_dly))?;
            },
            Version::V2E => {
                let cons = match self.constellation {
                    Constellation::BeiDou => "BDS",
                    Constellation::Galileo => "GAL",
                    Constellation::Glonass => "GLO",
                    _ => "GPS",
                };
                let dly = match self.delay_kind {
                    DelayKind::Internal => "INT",
                    DelayKind::System => "SYS",
                    DelayKind::Total => "TOT",
                };
                if let Some(code2) = self.code2 {
                    put(
                        w,
                        format!(
                            "{} DLY = {:.1} ns ({} {}),{:.1} ns ({} {})      CAL_ID = {}",
                            dly,
                            self.int_dly,
                            cons,
                            self.code_str(self.code1),
                            self.int_dly2,
                            cons,
                            self.code_str(code2),
                            self.cal_id
                        ),
                    )?;
                } else {
                    put(
                        w,
                        format!(
                            "{} DLY = {:.1} ns ({} {})     CAL_ID = {}",
                            dly,
                            self.int_dly,
                            cons,
                            self.code_str(self.code1),
                            self.cal_id
                        ),
                    )?;
                }
            },
        }

        if self.delay_kind == DelayKind::Internal {
            put(w, format!("CAB DLY = {:.1} ns", self.cab_dly))?;
        }
        if self.delay_kind != DelayKind::Total {
            put(w, format!("REF DLY = {:.1} ns", self.ref_dly))?;
        }
        put(w, format!("REF = {}", self.reference))?;

        cksum += checksum("CKSUM = ") as u32;
        writeln!(w, "CKSUM = {:02X}", (cksum % 256) as u8)?;
        writeln!(w)?;

        let msio = self.is_p3();
        match (self.version, msio) {
            (Version::V1, true) => {
                writeln!(w, "PRN CL  MJD  STTIME TRKL ELV AZTH   REFSV      SRSV     REFGPS    SRGPS  DSG IOE MDTR SMDT MDIO SMDI MSIO SMSI ISG CK")?;
                writeln!(w, "             hhmmss  s  .1dg .1dg    .1ns     .1ps/s     .1ns    .1ps/s .1ns     .1ns.1ps/s.1ns.1ps/s.1ns.1ps/s.1ns  ")?;
            },
            (Version::V1, false) => {
                writeln!(w, "PRN CL  MJD  STTIME TRKL ELV AZTH   REFSV      SRSV     REFGPS    SRGPS  DSG IOE MDTR SMDT MDIO SMDI CK")?;
                writeln!(w, "             hhmmss  s  .1dg .1dg    .1ns     .1ps/s     .1ns    .1ps/s .1ns     .1ns.1ps/s.1ns.1ps/s  ")?;
            },
            (Version::V2E, true) => {
                writeln!(w, "SAT CL  MJD  STTIME TRKL ELV AZTH   REFSV      SRSV     REFSYS    SRSYS  DSG IOE MDTR SMDT MDIO SMDI MSIO SMSI ISG FR HC FRC CK")?;
                writeln!(w, "             hhmmss  s  .1dg .1dg    .1ns     .1ps/s     .1ns    .1ps/s .1ns     .1ns.1ps/s.1ns.1ps/s.1ns.1ps/s.1ns            ")?;
            },
            (Version::V2E, false) => {
                writeln!(w, "SAT CL  MJD  STTIME TRKL ELV AZTH   REFSV      SRSV     REFSYS    SRSYS  DSG IOE MDTR SMDT MDIO SMDI FR HC FRC CK")?;
                writeln!(w, "             hhmmss  s  .1dg .1dg    .1ns     .1ps/s     .1ns    .1ps/s .1ns     .1ns.1ps/s.1ns.1ps/s            ")?;
            },
        }

        Ok(())
    }
}

const SECS: u32 = crate::SECS_PER_DAY;
