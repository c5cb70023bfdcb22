//! Receiver log decoders.
//!
//! One decoder per receiver family, each turning a day's line-oriented
//! log (`MSGID HH:MM:SS HEXPAYLOAD`) into the common measurement model:
//! a time-ordered list of [ReceiverMeasurement]s, per-constellation
//! ephemeris stores and the latest ionosphere / UTC parameter blocks.

pub mod javad;
pub mod nvs;
pub mod trimble;
pub mod ublox;

use gnss::prelude::Constellation;
use log::{debug, info};
use scan_fmt::scan_fmt;
use thiserror::Error;

use crate::antenna::Antenna;
use crate::ephemeris::{GalIonosphereData, IonosphereData, UtcData};
use crate::gps;
use crate::measurement::{InterpState, ObservationCode, ReceiverMeasurement};
use crate::store::Store;
use crate::utility;

/// Largest time gap (s) between successive observations of one SV
/// before the interpolation pass starts a new arc.
const INTERPOLATION_GAP: i64 = 10;

/// Largest time gap (s) in a pseudorange series before the
/// ms-ambiguity correction is recomputed.
const AMBIGUITY_MAX_GAP: f64 = 3.0;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to open receiver log")]
    Io(#[from] std::io::Error),
    #[error("no ionosphere parameters found in {0}")]
    MissingIonosphere(String),
    #[error("no UTC parameters found in {0}")]
    MissingUtc(String),
    #[error("no measurements found in {0}")]
    NoMeasurements(String),
}

/// Whether the receiver's reported sawtooth correction applies to the
/// pulse of the current second or the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SawtoothPhase {
    CurrentSecond,
    NextSecond,
}

/// Receiver identity, partly configured and partly recovered from the
/// log's annotation messages.
#[derive(Debug, Clone, Default)]
pub struct ReceiverInfo {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub sw_version: String,
    pub channels: u16,
    pub commission_year: u16,
}

/// Per-run decoder counters, reported in the processing log.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub lines_read: u32,
    /// Malformed lines / payloads
    pub error_count: u32,
    /// Observations rejected by the sanity checks
    pub bad_measurements: u32,
    /// Epochs whose sawtooth could not be realigned
    pub bad_sawtooth_corrections: u32,
    /// SV observations accepted
    pub sv_measurements: u32,
    /// Observations dropped because the ms ambiguity was unresolvable
    pub ambiguity_drops: Vec<(Constellation, u32)>,
}

/// The decoded day: measurements, navigation data and counters.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub measurements: Vec<ReceiverMeasurement>,
    pub gps: Store,
    pub galileo: Store,
    pub gps_iono: Option<IonosphereData>,
    pub gps_utc: Option<UtcData>,
    pub gal_iono: Option<GalIonosphereData>,
    pub gal_utc: Option<UtcData>,
    pub leap_seconds: i32,
    pub stats: Stats,
}

impl Default for Dataset {
    fn default() -> Self {
        Self {
            measurements: Vec::new(),
            gps: Store::new(gps::MAX_SVN),
            galileo: Store::new(crate::galileo::MAX_SVN),
            gps_iono: None,
            gps_utc: None,
            gal_iono: None,
            gal_utc: None,
            leap_seconds: 0,
            stats: Stats::default(),
        }
    }
}

/// Common decoder interface, one implementation per receiver family.
pub trait Decode {
    /// Parses the day's log. The antenna is needed by decoders that
    /// resolve pseudorange millisecond ambiguities.
    fn read_log(&mut self, path: &str, mjd: i32, antenna: &Antenna) -> Result<(), Error>;

    fn dataset(&self) -> &Dataset;

    fn info(&self) -> &ReceiverInfo;

    /// Constellations this decoder produces measurements for
    fn constellations(&self) -> &[Constellation];
}

/// Parses a `HH:MM:SS` PC timestamp.
pub(crate) fn parse_pc_time(s: &str) -> Option<(u8, u8, u8)> {
    match scan_fmt!(s, "{d}:{d}:{d}", u8, u8, u8) {
        (Some(h), Some(m), Some(sec)) if h < 24 && m < 60 && sec < 60 => Some((h, m, sec)),
        _ => None,
    }
}

/// Splits a log line into (message id, PC timestamp, hex payload).
pub(crate) fn split_line(line: &str) -> Option<(&str, &str, &str)> {
    let mut it = line.split_ascii_whitespace();
    let msgid = it.next()?;
    let pctime = it.next()?;
    let payload = it.next()?;
    Some((msgid, pctime, payload))
}

/// Realigns the sawtooth correction for receivers that report it for
/// the next pulse: each epoch takes the previous epoch's value when the
/// two are exactly 1 s apart; across a gap the current value is the
/// best guess and the correction is counted as bad. The first epoch is
/// always a bad correction.
pub(crate) fn realign_sawtooth(measurements: &mut [ReceiverMeasurement]) -> u32 {
    if measurements.is_empty() {
        return 0;
    }
    let mut prev_sawtooth = measurements[0].sawtooth;
    let mut t_prev = utility::naive_gps_secs(measurements[0].tm_utc);
    let mut bad = 1u32;
    for m in measurements.iter_mut().skip(1) {
        let saw_tmp = m.sawtooth;
        let t = utility::naive_gps_secs(m.tm_utc);
        if t - t_prev == 1 {
            m.sawtooth = prev_sawtooth;
        } else {
            bad += 1;
        }
        prev_sawtooth = saw_tmp;
        t_prev = t;
    }
    bad
}

/// Places the pseudoranges of every (SV, code) series onto integer
/// second stamps by 3-point Lagrange interpolation over contiguous
/// arcs. An arc ends at a gap longer than [INTERPOLATION_GAP]; arcs
/// shorter than 3 points are left untouched. All `tmfracs` are zeroed
/// afterwards.
pub(crate) fn interpolate_measurements(measurements: &mut [ReceiverMeasurement]) {
    use std::collections::HashMap;

    // collect (epoch index, sv index) per series, stamping the scratch
    // state as we go
    let mut series: HashMap<(Constellation, u8, ObservationCode), Vec<(usize, usize)>> =
        HashMap::new();
    for (mi, m) in measurements.iter_mut().enumerate() {
        let t_gps = utility::naive_gps_secs(m.tm_gps);
        let tmfracs = m.tmfracs;
        for (si, svm) in m.svs.iter_mut().enumerate() {
            if !svm.code.is_code() {
                continue;
            }
            svm.interp = Some(InterpState {
                interpolated: svm.meas,
                tmfracs,
                t_gps,
            });
            series
                .entry((svm.sv.constellation, svm.sv.prn, svm.code))
                .or_default()
                .push((mi, si));
        }
    }

    for track in series.values() {
        if track.len() < 3 {
            continue;
        }

        let mut arc_start = 0usize;
        for t in 1..track.len() - 1 {
            let (t_next, _, _) = series_state(measurements, track[t + 1]);
            let (t_here, _, _) = series_state(measurements, track[t]);
            let last_pair = t == track.len() - 2;
            if (t_next - t_here > INTERPOLATION_GAP) || last_pair {
                let mut arc_stop = t;
                if last_pair && t_next - t_here <= INTERPOLATION_GAP {
                    arc_stop += 1;
                }
                if arc_stop - arc_start < 2 {
                    arc_start = t + 1;
                    continue;
                }
                debug!(
                    "interpolation arc: {} points {}..{}",
                    track.len(),
                    arc_start,
                    arc_stop
                );

                // first point of the arc
                let (t1, f1, y1) = series_state(measurements, track[arc_start]);
                let (t2, f2, y2) = series_state(measurements, track[arc_start + 1]);
                let (t3, f3, y3) = series_state(measurements, track[arc_start + 2]);
                let v = utility::lagrange3(
                    0.0,
                    f1,
                    y1,
                    (t2 - t1) as f64 + f2,
                    y2,
                    (t3 - t1) as f64 + f3,
                    y3,
                );
                set_interpolated(measurements, track[arc_start], v);

                // interior points: centred 3-point stencil
                for i in arc_start + 1..arc_stop {
                    let (t1, f1, y1) = series_state(measurements, track[i - 1]);
                    let (t2, f2, y2) = series_state(measurements, track[i]);
                    let (t3, f3, y3) = series_state(measurements, track[i + 1]);
                    let v = utility::lagrange3(
                        (t2 - t1) as f64,
                        f1,
                        y1,
                        (t2 - t1) as f64 + f2,
                        y2,
                        (t3 - t1) as f64 + f3,
                        y3,
                    );
                    set_interpolated(measurements, track[i], v);
                }

                // last point
                let (t1, f1, y1) = series_state(measurements, track[arc_stop - 2]);
                let (t2, f2, y2) = series_state(measurements, track[arc_stop - 1]);
                let (t3, f3, y3) = series_state(measurements, track[arc_stop]);
                let v = utility::lagrange3(
                    (t3 - t1) as f64,
                    f1,
                    y1,
                    (t2 - t1) as f64 + f2,
                    y2,
                    (t3 - t1) as f64 + f3,
                    y3,
                );
                set_interpolated(measurements, track[arc_stop], v);

                arc_start = t + 1;
            }
        }

        // swap the interpolated values in, keeping the raw ones in the
        // scratch state
        for idx in track {
            let svm = &mut measurements[idx.0].svs[idx.1];
            if let Some(st) = svm.interp.as_mut() {
                let raw = svm.meas;
                svm.meas = st.interpolated;
                st.interpolated = raw;
            }
        }
    }

    for m in measurements.iter_mut() {
        m.tmfracs = 0.0;
    }
}

fn series_state(measurements: &[ReceiverMeasurement], idx: (usize, usize)) -> (i64, f64, f64) {
    let svm = &measurements[idx.0].svs[idx.1];
    let st = svm.interp.unwrap();
    (st.t_gps, st.tmfracs, svm.meas)
}

fn set_interpolated(measurements: &mut [ReceiverMeasurement], idx: (usize, usize), v: f64) {
    if let Some(st) = measurements[idx.0].svs[idx.1].interp.as_mut() {
        st.interpolated = v;
    }
}

/// Resolves integer-millisecond pseudorange ambiguities for every GPS
/// C1C series. A correction is recomputed on the first sample of a
/// series, after a gap longer than [AMBIGUITY_MAX_GAP], and on a step
/// larger than `step_tolerance` (s) between consecutive samples.
/// Samples whose correction cannot be computed are dropped. Returns the
/// number of dropped observations.
pub(crate) fn resolve_ms_ambiguities(
    dataset: &mut Dataset,
    antenna: &Antenna,
    step_tolerance: f64,
) -> u32 {
    let mut dropped = 0u32;

    for svn in 1..=gps::MAX_SVN {
        let mut corr: Option<f64> = None;
        let mut last_tow = f64::MAX;
        let mut last_meas = 0.0f64;

        for mi in 0..dataset.measurements.len() {
            let gps_tow = dataset.measurements[mi].gps_tow;
            let mut si = 0;
            while si < dataset.measurements[mi].svs.len() {
                let svm = &dataset.measurements[mi].svs[si];
                if !(svm.sv.constellation == Constellation::GPS
                    && svm.sv.prn == svn
                    && svm.code == ObservationCode::C1C)
                {
                    si += 1;
                    continue;
                }
                let curr_meas = svm.meas;

                let recompute = corr.is_none()
                    || gps_tow - last_tow > AMBIGUITY_MAX_GAP
                    || (gps_tow > last_tow && (curr_meas - last_meas).abs() > step_tolerance);
                if recompute {
                    corr = gps::resolve_ms_ambiguity(
                        &dataset.gps,
                        antenna,
                        gps_tow,
                        svn,
                        curr_meas,
                    );
                }

                last_tow = gps_tow;
                last_meas = curr_meas;

                match corr {
                    Some(c) => {
                        dataset.measurements[mi].svs[si].meas += c;
                        si += 1;
                    },
                    None => {
                        debug!("ms ambiguity unresolved: G{:02} tow {}", svn, gps_tow);
                        dropped += 1;
                        dataset.measurements[mi].svs.remove(si);
                    },
                }
                break;
            }
        }
    }

    if dropped > 0 {
        info!("dropped {} GPS observations (ms ambiguity failures)", dropped);
    }
    dataset
        .stats
        .ambiguity_drops
        .push((Constellation::GPS, dropped));
    dropped
}

/// Completes `tm_utc` from `tm_gps` once the leap-second count is known.
pub(crate) fn derive_utc_from_gps(measurements: &mut [ReceiverMeasurement], leap_seconds: i32) {
    for m in measurements.iter_mut() {
        let t = utility::naive_gps_secs(m.tm_gps) - leap_seconds as i64;
        m.tm_utc = utility::epoch_from_naive_gps_secs(t);
    }
}

/// Completes `tm_gps` from `tm_utc` once the leap-second count is known.
pub(crate) fn derive_gps_from_utc(measurements: &mut [ReceiverMeasurement], leap_seconds: i32) {
    for m in measurements.iter_mut() {
        let t = utility::naive_gps_secs(m.tm_utc) + leap_seconds as i64;
        m.tm_gps = utility::epoch_from_naive_gps_secs(t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnss::prelude::SV;
    use hifitime::Epoch;

    use crate::measurement::SvMeasurement;

    fn epoch_at(tod: i64) -> Epoch {
        // some fixed day
        utility::epoch_from_naive_gps_secs((57_404 - 44_244) * 86_400 + tod)
    }

    fn measurement(tod: i64, sawtooth: f64) -> ReceiverMeasurement {
        let mut m = ReceiverMeasurement::new();
        m.tm_utc = epoch_at(tod);
        m.tm_gps = epoch_at(tod + 17);
        m.sawtooth = sawtooth;
        m
    }

    #[test]
    fn pc_time_parsing() {
        assert_eq!(parse_pc_time("02:03:04"), Some((2, 3, 4)));
        assert_eq!(parse_pc_time("23:59:59"), Some((23, 59, 59)));
        assert!(parse_pc_time("24:00:00").is_none());
        assert!(parse_pc_time("junk").is_none());
    }

    #[test]
    fn sawtooth_shift_on_contiguous_epochs() {
        let mut ms: Vec<ReceiverMeasurement> = (0..5)
            .map(|i| measurement(i, i as f64 * 1.0e-9))
            .collect();
        let bad = realign_sawtooth(&mut ms);
        assert_eq!(bad, 1); // first epoch only
        for i in 1..5 {
            assert!((ms[i].sawtooth - (i as f64 - 1.0) * 1.0e-9).abs() < 1e-18);
        }
    }

    #[test]
    fn sawtooth_gap_keeps_current_value() {
        let mut ms = vec![
            measurement(0, 1.0e-9),
            measurement(1, 2.0e-9),
            measurement(5, 3.0e-9), // gap
            measurement(6, 4.0e-9),
        ];
        let bad = realign_sawtooth(&mut ms);
        assert_eq!(bad, 2); // first epoch + the gap
        assert!((ms[1].sawtooth - 1.0e-9).abs() < 1e-18);
        assert!((ms[2].sawtooth - 3.0e-9).abs() < 1e-18); // untouched
        assert!((ms[3].sawtooth - 3.0e-9).abs() < 1e-18);
    }

    #[test]
    fn interpolation_zeroes_tmfracs_and_hits_grid() {
        // a linearly drifting pseudorange sampled slightly off-grid:
        // interpolation onto the integer second must recover the linear
        // model exactly
        let sv = SV::new(Constellation::GPS, 8);
        let slope = 1.0e-7; // s/s
        let frac = 0.2;
        let mut ms: Vec<ReceiverMeasurement> = (0..10)
            .map(|i| {
                let mut m = measurement(i, 0.0);
                m.tmfracs = frac;
                m.svs.push(SvMeasurement::new(
                    sv,
                    ObservationCode::C1C,
                    0.070 + slope * (i as f64 + frac),
                ));
                m
            })
            .collect();
        interpolate_measurements(&mut ms);
        for (i, m) in ms.iter().enumerate() {
            assert_eq!(m.tmfracs, 0.0);
            let expect = 0.070 + slope * i as f64;
            assert!(
                (m.svs[0].meas - expect).abs() < 1e-15,
                "epoch {}: {} vs {}",
                i,
                m.svs[0].meas,
                expect
            );
        }
    }

    #[test]
    fn short_arcs_left_alone() {
        let sv = SV::new(Constellation::GPS, 3);
        let mut ms: Vec<ReceiverMeasurement> = (0..2)
            .map(|i| {
                let mut m = measurement(i, 0.0);
                m.tmfracs = 0.3;
                m.svs.push(SvMeasurement::new(sv, ObservationCode::C1C, 0.071));
                m
            })
            .collect();
        interpolate_measurements(&mut ms);
        assert!((ms[0].svs[0].meas - 0.071).abs() < 1e-18);
        assert_eq!(ms[0].tmfracs, 0.0);
    }

    #[test]
    fn utc_gps_completion() {
        let mut ms = vec![measurement(100, 0.0)];
        let before = ms[0].tm_gps;
        derive_utc_from_gps(&mut ms, 17);
        assert_eq!(
            utility::naive_gps_secs(before) - utility::naive_gps_secs(ms[0].tm_utc),
            17
        );
        derive_gps_from_utc(&mut ms, 17);
        assert_eq!(ms[0].tm_gps, before);
    }
}
