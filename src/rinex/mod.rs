//! RINEX V2 / V3 observation and navigation file generation.

use std::io::Write;

use gnss::prelude::Constellation;
use itertools::Itertools;
use log::info;

use crate::measurement::ObservationCode;
use crate::pairing::MeasurementPair;
use crate::rx::{Dataset, ReceiverInfo};
use crate::utility;
use crate::{antenna::Antenna, counter::CounterLog};
use crate::{CLIGHT, SECS_PER_DAY};

const APP_NAME: &str = "timetx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    #[default]
    V2,
    V3,
}

impl Version {
    fn name(&self) -> &'static str {
        match self {
            Self::V2 => "2.11",
            Self::V3 => "3.02",
        }
    }
}

/// RINEX file generation for one receiver and antenna.
#[derive(Debug, Clone, Default)]
pub struct Rinex {
    pub agency: String,
    pub observer: String,
    pub antenna: Antenna,
    pub rx_info: ReceiverInfo,
}

/// `<MARKER><DDD>0.<YY>O` observation file name.
pub fn obs_filename(marker: &str, mjd: i32) -> String {
    let (year, _, _, yday) = utility::mjd_to_date(mjd);
    format!("{}{:03}0.{:02}O", marker, yday, year % 100)
}

/// `<MARKER><DDD>0.<YY>N` navigation file name.
pub fn nav_filename(marker: &str, mjd: i32) -> String {
    let (year, _, _, yday) = utility::mjd_to_date(mjd);
    format!("{}{:03}0.{:02}N", marker, yday, year % 100)
}

/// C-style `%19.12e` scientific notation: 12 fractional digits and a
/// signed two-digit exponent, right-aligned to 19 columns.
fn fmt_e(v: f64) -> String {
    let s = format!("{:.12e}", v);
    let (mant, exp) = s.split_once('e').unwrap();
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    format!("{:>19}", format!("{}e{}{:0>2}", mant, sign, digits))
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// File generation timestamp for the PGM / RUN BY / DATE header line.
fn run_date(version: Version) -> String {
    let unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let mjd = 40_587 + unix.div_euclid(SECS_PER_DAY as i64);
    let tod = unix.rem_euclid(SECS_PER_DAY as i64);
    let (y, mo, d, _) = utility::mjd_to_date(mjd as i32);
    let (h, mi, s) = (tod / 3600, (tod % 3600) / 60, tod % 60);
    match version {
        Version::V2 => format!(
            "{:02}-{}-{:02} {:02}:{:02}:{:02}",
            d,
            MONTHS[mo as usize - 1],
            y % 100,
            h,
            mi,
            s
        ),
        Version::V3 => format!("{:04}{:02}{:02} {:02}{:02}{:02} UTC", y, mo, d, h, mi, s),
    }
}

impl Rinex {
    pub fn new(antenna: &Antenna, rx_info: &ReceiverInfo) -> Self {
        Self {
            agency: "UNKNOWN".to_string(),
            observer: "UNKNOWN".to_string(),
            antenna: antenna.clone(),
            rx_info: rx_info.clone(),
        }
    }

    /// Writes the observation file: every matched epoch whose
    /// integer-second stamp is a multiple of `interval`.
    pub fn write_observation_file<W: Write>(
        &self,
        w: &mut W,
        version: Version,
        _mjd: i32,
        interval: u32,
        dataset: &Dataset,
        _counter: &CounterLog,
        pairs: &[MeasurementPair],
        constellations: &[Constellation],
    ) -> std::io::Result<()> {
        let measurements = &dataset.measurements;

        let obs = match constellations {
            [Constellation::GPS] => 'G',
            [Constellation::Glonass] => 'R',
            [Constellation::Galileo] => 'E',
            _ => 'M',
        };
        writeln!(
            w,
            "{:>9}{:11}{:<20}{}{:<19}{:<20}",
            version.name(),
            "",
            "O",
            obs,
            "",
            "RINEX VERSION / TYPE"
        )?;
        writeln!(
            w,
            "{:<20}{:<20}{:<20}{:<20}",
            APP_NAME,
            self.agency,
            run_date(version),
            "PGM / RUN BY / DATE"
        )?;
        writeln!(w, "{:<60}{:<20}", self.antenna.marker_name, "MARKER NAME")?;
        writeln!(
            w,
            "{:<20}{:40}{:<20}",
            self.antenna.marker_number, "", "MARKER NUMBER"
        )?;
        writeln!(
            w,
            "{:<20}{:<40}{:<20}",
            self.observer, self.agency, "OBSERVER / AGENCY"
        )?;
        writeln!(
            w,
            "{:<20}{:<20}{:<20}{:<20}",
            self.rx_info.serial_number,
            self.rx_info.model,
            self.rx_info.sw_version,
            "REC # / TYPE / VERS"
        )?;
        writeln!(
            w,
            "{:<20}{:<20}{:<20}{:<20}",
            self.antenna.antenna_number, self.antenna.antenna_type, " ", "ANT # / TYPE"
        )?;
        writeln!(
            w,
            "{:14.4}{:14.4}{:14.4}{:<18}{:<20}",
            self.antenna.x, self.antenna.y, self.antenna.z, " ", "APPROX POSITION XYZ"
        )?;
        writeln!(
            w,
            "{:14.4}{:14.4}{:14.4}{:<18}{:<20}",
            self.antenna.delta_h,
            self.antenna.delta_e,
            self.antenna.delta_n,
            " ",
            "ANTENNA: DELTA H/E/N"
        )?;

        match version {
            Version::V2 => {
                writeln!(w, "{:>6}{:<54}{:<20}", 1, "    C1", "# / TYPES OF OBSERV")?;
            },
            Version::V3 => {
                writeln!(
                    w,
                    "{:<1}  {:>3} {:>3}{:50}{:<20}",
                    "G", 1, "C1C", " ", "SYS / # / OBS TYPES"
                )?;
            },
        }

        // first observation on the interval grid
        let mut obs_time: i64 = 0;
        let mut curr = 0usize;
        while curr < pairs.len() && obs_time <= SECS_PER_DAY as i64 {
            if !pairs[curr].is_matched() {
                curr += 1;
                continue;
            }
            let rm = &measurements[pairs[curr].receiver.unwrap()];
            let (y, mo, d, h, mi, s, _) = rm.tm_gps.to_gregorian_utc();
            let t_meas = (h as f64 * 3600.0 + mi as f64 * 60.0 + s as f64 + rm.tmfracs).round()
                as i64;
            if t_meas == obs_time {
                writeln!(
                    w,
                    "{:>6}{:>6}{:>6}{:>6}{:>6}{:13.7}{:<5}{:>3}{:<9}{:<20}",
                    y,
                    mo,
                    d,
                    h,
                    mi,
                    s as f64 + rm.tmfracs,
                    " ",
                    "GPS",
                    " ",
                    "TIME OF FIRST OBS"
                )?;
                break;
            } else if t_meas < obs_time {
                curr += 1;
            } else {
                obs_time += interval as i64;
            }
        }
        writeln!(w, "{:>6}{:54}{:<20}", dataset.leap_seconds, " ", "LEAP SECONDS")?;
        writeln!(w, "{:60}{:<20}", "", "END OF HEADER")?;

        // data block
        let mut obs_time: i64 = 0;
        let mut curr = 0usize;
        while curr < pairs.len() && obs_time <= SECS_PER_DAY as i64 {
            if !pairs[curr].is_matched() {
                curr += 1;
                continue;
            }
            let rm = &measurements[pairs[curr].receiver.unwrap()];
            let (y, mo, d, h, mi, s, _) = rm.tm_gps.to_gregorian_utc();
            let t_meas = (h as f64 * 3600.0 + mi as f64 * 60.0 + s as f64 + rm.tmfracs).round()
                as i64;
            if t_meas == obs_time {
                let svs: Vec<_> = rm
                    .svs
                    .iter()
                    .filter(|svm| {
                        svm.sv.constellation == Constellation::GPS
                            && svm.code == ObservationCode::C1C
                    })
                    .collect();
                match version {
                    Version::V2 => {
                        write!(
                            w,
                            " {:02} {:>2} {:>2} {:>2} {:>2}{:11.7}  {:1}{:>3}",
                            y % 100,
                            mo,
                            d,
                            h,
                            mi,
                            s as f64 + rm.tmfracs,
                            rm.epoch_flag,
                            svs.len()
                        )?;
                        // 12 SV ids per line, continuations indented
                        let sv_lines = svs.iter().chunks(12);
                        for (n, mut chunk) in (&sv_lines).into_iter().enumerate() {
                            if n > 0 {
                                write!(w, "\n{:32}", "")?;
                            }
                            chunk.try_for_each(|svm| write!(w, "G{:02}", svm.sv.prn))?;
                        }
                        writeln!(w)?;
                        for svm in svs.iter() {
                            writeln!(
                                w,
                                "{:14.3}{:1}{:1}",
                                svm.meas * CLIGHT,
                                svm.lli,
                                svm.signal
                            )?;
                        }
                    },
                    Version::V3 => {
                        writeln!(
                            w,
                            "> {:4} {:02} {:02} {:02} {:02}{:11.7} {:1}{:>3}{:6}{:15.12}",
                            y,
                            mo,
                            d,
                            h,
                            mi,
                            s as f64,
                            rm.epoch_flag,
                            svs.len(),
                            " ",
                            0.0
                        )?;
                        for svm in svs.iter() {
                            writeln!(
                                w,
                                "G{:02}{:14.3}{:1}{:1}",
                                svm.sv.prn,
                                svm.meas * CLIGHT,
                                svm.lli,
                                svm.signal
                            )?;
                        }
                    },
                }
                obs_time += interval as i64;
                curr += 1;
            } else if t_meas < obs_time {
                curr += 1;
            } else {
                obs_time += interval as i64;
            }
        }

        Ok(())
    }

    /// Writes the GPS navigation file.
    pub fn write_navigation_file<W: Write>(
        &self,
        w: &mut W,
        version: Version,
        mjd: i32,
        dataset: &Dataset,
    ) -> std::io::Result<()> {
        let iono = dataset.gps_iono.unwrap_or_default();
        let utc = dataset.gps_utc.unwrap_or_default();

        // GPS week 0 begins midnight 5/6 Jan 1980, MJD 44244
        let gps_week = (mjd - 44244) / 7;

        match version {
            Version::V2 => {
                writeln!(
                    w,
                    "{:>9}{:11}{:<1}{:<39}{:<20}",
                    version.name(),
                    "",
                    "N",
                    "",
                    "RINEX VERSION / TYPE"
                )?;
                writeln!(
                    w,
                    "{:<20}{:<20}{:<20}{:<20}",
                    APP_NAME,
                    self.agency,
                    run_date(version),
                    "PGM / RUN BY / DATE"
                )?;
                writeln!(
                    w,
                    "{:2}{}{}{}{}{:10}{:<20}",
                    "",
                    fmt_e12(iono.a0),
                    fmt_e12(iono.a1),
                    fmt_e12(iono.a2),
                    fmt_e12(iono.a3),
                    "",
                    "ION ALPHA"
                )?;
                writeln!(
                    w,
                    "{:2}{}{}{}{}{:10}{:<20}",
                    "",
                    fmt_e12(iono.b0),
                    fmt_e12(iono.b1),
                    fmt_e12(iono.b2),
                    fmt_e12(iono.b3),
                    "",
                    "ION BETA"
                )?;
                writeln!(
                    w,
                    "{:3}{}{}{:>9}{:>9} {:<20}",
                    "",
                    fmt_e(utc.a0),
                    fmt_e(utc.a1),
                    utc.t_ot as i64,
                    gps_week,
                    "DELTA-UTC: A0,A1,T,W"
                )?;
            },
            Version::V3 => {
                writeln!(
                    w,
                    "{:>9}{:11}{:<20}{:<20}{:<20}",
                    version.name(),
                    "",
                    "N: GNSS NAV DATA",
                    "G: GPS",
                    "RINEX VERSION / TYPE"
                )?;
                writeln!(
                    w,
                    "{:<20}{:<20}{:<20}{:<20}",
                    APP_NAME,
                    self.agency,
                    run_date(version),
                    "PGM / RUN BY / DATE"
                )?;
                writeln!(
                    w,
                    "GPSA {}{}{}{}{:7}{:<20}",
                    fmt_e12(iono.a0),
                    fmt_e12(iono.a1),
                    fmt_e12(iono.a2),
                    fmt_e12(iono.a3),
                    "",
                    "IONOSPHERIC CORR"
                )?;
                writeln!(
                    w,
                    "GPSB {}{}{}{}{:7}{:<20}",
                    fmt_e12(iono.b0),
                    fmt_e12(iono.b1),
                    fmt_e12(iono.b2),
                    fmt_e12(iono.b3),
                    "",
                    "IONOSPHERIC CORR"
                )?;
                writeln!(
                    w,
                    "GPUT {}{}{:>7}{:>5} {:>5} {:>2} {:<20}",
                    fmt_e17(utc.a0),
                    fmt_e16(utc.a1),
                    utc.t_ot as i64,
                    gps_week,
                    " ",
                    0,
                    "TIME SYSTEM CORR"
                )?;
            },
        }

        writeln!(w, "{:>6}{:54}{:<20}", dataset.leap_seconds, " ", "LEAP SECONDS")?;
        writeln!(w, "{:60}{:<20}", " ", "END OF HEADER")?;

        // GPS week expansion through the 1024-week rollovers, anchored
        // on the processed MJD
        let mut last_gps_week = -1i64;
        let mut last_toc = -1f64;
        let mut week_rollovers = 0i64;

        for eph in dataset.gps.iter() {
            let eph = match eph.as_gps() {
                Some(e) => e,
                None => continue,
            };
            let mut tmjd = mjd;
            let mut gps_week = eph.week_number as i64;
            while tmjd >= 51_412 {
                gps_week += 1024;
                tmjd -= 7 * 1024;
            }
            if last_gps_week == -1 {
                last_gps_week = gps_week;
            }
            let toc = eph.t_oc;
            if last_toc < 0.0 {
                last_toc = toc;
            }
            // the week is unchanged but Toc jumped backward: a rollover
            // happened inside the broadcast set
            if gps_week == last_gps_week && toc - last_toc < -2.0 * SECS_PER_DAY as f64 {
                week_rollovers = 1;
            } else if gps_week == last_gps_week + 1 {
                week_rollovers = 0;
            }
            last_gps_week = gps_week;
            last_toc = toc;
            let gps_week = gps_week + week_rollovers;

            let t = utility::epoch_from_naive_gps_secs(
                gps_week * 7 * SECS_PER_DAY as i64 + toc as i64,
            );
            let (y, mo, d, h, mi, s, _) = t.to_gregorian_utc();

            match version {
                Version::V2 => {
                    writeln!(
                        w,
                        "{:02} {:02} {:02} {:02} {:02} {:02} {:4.1}{}{}{}",
                        eph.svn,
                        y % 100,
                        mo,
                        d,
                        h,
                        mi,
                        s as f64,
                        fmt_e(eph.a_f0),
                        fmt_e(eph.a_f1),
                        fmt_e(eph.a_f2)
                    )?;
                },
                Version::V3 => {
                    writeln!(
                        w,
                        "G{:02} {:4} {:02} {:02} {:02} {:02} {:02}{}{}{}",
                        eph.svn,
                        y,
                        mo,
                        d,
                        h,
                        mi,
                        s,
                        fmt_e(eph.a_f0),
                        fmt_e(eph.a_f1),
                        fmt_e(eph.a_f2)
                    )?;
                },
            }

            let pad = match version {
                Version::V2 => "   ",
                Version::V3 => "    ",
            };
            let k = &eph.kepler;
            writeln!(
                w,
                "{}{}{}{}{}",
                pad,
                fmt_e(eph.iode as f64),
                fmt_e(k.c_rs),
                fmt_e(k.delta_n),
                fmt_e(k.m0)
            )?;
            writeln!(
                w,
                "{}{}{}{}{}",
                pad,
                fmt_e(k.c_uc),
                fmt_e(k.e),
                fmt_e(k.c_us),
                fmt_e(k.sqrt_a)
            )?;
            writeln!(
                w,
                "{}{}{}{}{}",
                pad,
                fmt_e(eph.t_oe),
                fmt_e(k.c_ic),
                fmt_e(k.omega0),
                fmt_e(k.c_is)
            )?;
            writeln!(
                w,
                "{}{}{}{}{}",
                pad,
                fmt_e(k.i0),
                fmt_e(k.c_rc),
                fmt_e(k.omega),
                fmt_e(k.omega_dot)
            )?;
            writeln!(
                w,
                "{}{}{}{}{}",
                pad,
                fmt_e(k.idot),
                fmt_e(1.0),
                fmt_e(gps_week as f64),
                fmt_e(0.0)
            )?;
            writeln!(
                w,
                "{}{}{}{}{}",
                pad,
                fmt_e(gps::URA_METRES[eph.sv_accuracy_raw.min(15) as usize]),
                fmt_e(eph.sv_health as f64),
                fmt_e(eph.t_gd),
                fmt_e(eph.iodc as f64)
            )?;
            writeln!(
                w,
                "{}{}{}{}{}",
                pad,
                fmt_e(eph.t_ephem),
                fmt_e(0.0),
                fmt_e(0.0),
                fmt_e(0.0)
            )?;
        }

        info!("wrote {} navigation records", dataset.gps.len());
        Ok(())
    }
}

use crate::gps;

/// `%12.4e` style: 4 fractional digits, 12 columns.
fn fmt_e12(v: f64) -> String {
    let s = format!("{:.4e}", v);
    let (mant, exp) = s.split_once('e').unwrap();
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    format!("{:>12}", format!("{}e{}{:0>2}", mant, sign, digits))
}

/// `%17.10e` style.
fn fmt_e17(v: f64) -> String {
    let s = format!("{:.10e}", v);
    let (mant, exp) = s.split_once('e').unwrap();
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    format!("{:>17}", format!("{}e{}{:0>2}", mant, sign, digits))
}

/// `%16.9e` style.
fn fmt_e16(v: f64) -> String {
    let s = format!("{:.9e}", v);
    let (mant, exp) = s.split_once('e').unwrap();
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ('-', d),
        None => ('+', exp),
    };
    format!("{:>16}", format!("{}e{}{:0>2}", mant, sign, digits))
}
