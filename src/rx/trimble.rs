//! Trimble Resolution T / SMT 360 log decoder.
//!
//! Trimble packets log their multi-byte fields MSB first, so every
//! field is byte-reversed before the shared little-endian reads apply.
//! The primary time packet 8FAB opens each second; raw measurement
//! reports (5A) accumulate until the next 8FAB closes the epoch.

use gnss::prelude::{Constellation, SV};
use log::{debug, info, warn};

use crate::antenna::Antenna;
use crate::ephemeris::{Ephemeris, GpsEphemeris, IonosphereData, UtcData};
use crate::gps;
use crate::hex;
use crate::measurement::{ObservationCode, ReceiverMeasurement, SvMeasurement};
use crate::rx::{self, Dataset, Decode, Error, ReceiverInfo};
use crate::utility;

const MAX_CHANNELS: usize = 12;
/// Step threshold for re-running the ms-ambiguity fix, s
const STEP_TOLERANCE: f64 = 0.001 * 0.99;
/// Raw 5A measurements are reported in units of 61.0948 ns
const MEAS_LSB: f64 = 61.0948e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Model {
    ResolutionT,
    Resolution360,
}

pub struct Trimble {
    pub info: ReceiverInfo,
    pub log: Dataset,
    model: Model,
    /// Old Resolution T firmware reports the sawtooth in seconds
    sawtooth_multiplier: f64,
    constellations: Vec<Constellation>,
}

impl Trimble {
    pub fn new(model: &str, firmware: &str) -> Self {
        let (m, channels) = match model {
            "Resolution T" => (Model::ResolutionT, 12),
            "Resolution SMT 360" => (Model::Resolution360, 32),
            other => {
                warn!("unknown Trimble model {}, assuming Resolution SMT 360", other);
                (Model::Resolution360, 32)
            },
        };
        let sawtooth_multiplier = if m == Model::ResolutionT && firmware == "old" {
            1.0
        } else {
            1.0e-9
        };
        Self {
            info: ReceiverInfo {
                manufacturer: "Trimble".to_string(),
                model: model.to_string(),
                channels,
                ..Default::default()
            },
            log: Dataset::default(),
            model: m,
            sawtooth_multiplier,
            constellations: vec![Constellation::GPS],
        }
    }

    /// Byte-reverses an MSB-first field so the little-endian reads
    /// apply. `offset` and `len` are in bytes within the hex payload.
    fn field(msg: &str, offset: usize, len: usize) -> Option<Vec<u8>> {
        let start = 2 * offset;
        let stop = start + 2 * len;
        if stop > msg.len() {
            return None;
        }
        hex::hex_to_bin(&hex::reverse_pairs(&msg[start..stop]))
    }
}

impl Decode for Trimble {
    fn read_log(&mut self, path: &str, mjd: i32, antenna: &Antenna) -> Result<(), Error> {
        info!("reading {}", path);
        let content = std::fs::read_to_string(path)?;

        let mut linecount = 0u32;
        let mut pctime = String::new();

        let mut use_data = true;
        let mut got_8fac = false;
        let mut got_rxid = false;
        let mut got_sw_version = false;

        let mut gpsmeas: Vec<SvMeasurement> = Vec::new();
        let mut gpstow: u32 = 0;
        let mut gpswn: u16 = 0;
        let mut rx_time_offset: f32 = 0.0; // ns
        let mut sawtooth: f32 = 0.0;
        let (mut fab_ss, mut fab_mm, mut fab_hh) = (0u8, 0u8, 0u8);
        let (mut fab_mday, mut fab_mon) = (0u8, 0u8);
        let mut fab_yyyy: u16 = 0;

        let year_offset = match self.model {
            Model::ResolutionT => 1900,
            Model::Resolution360 => 2000,
        };

        for line in content.lines() {
            linecount += 1;
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with('%')
                || line.starts_with('@')
            {
                continue;
            }
            let (_msgid, currpctime, msg) = match rx::split_line(line) {
                Some(parts) => parts,
                None => {
                    debug!("bad data at line {}", linecount);
                    continue;
                },
            };

            // primary time packet: first message of each second
            if msg.starts_with("8fab") {
                if got_8fac && !gpsmeas.is_empty() && use_data {
                    let mut rmeas = ReceiverMeasurement::new();
                    rmeas.gps_tow = gpstow as f64;
                    rmeas.gps_wn = gpswn;
                    // reported correction is subtracted; our convention
                    // is added to the counter reading
                    rmeas.sawtooth = -(sawtooth as f64);
                    rmeas.time_offset = rx_time_offset as f64;

                    // the 8FAB packet is configured for the UTC date;
                    // the GPS date follows once leap seconds are known
                    rmeas.tm_utc = utility::epoch_from_naive_gps_secs(
                        (utility::date_to_mjd(fab_yyyy as i32, fab_mon, fab_mday) as i64 - 44244)
                            * 86_400
                            + fab_hh as i64 * 3600
                            + fab_mm as i64 * 60
                            + fab_ss as i64,
                    );

                    if let Some((hh, mm, ss)) = rx::parse_pc_time(&pctime) {
                        rmeas.pc_hh = hh;
                        rmeas.pc_mm = mm;
                        rmeas.pc_ss = ss;
                    }

                    // correct the code measurements for the receiver
                    // time offset, reported in ns
                    for svm in gpsmeas.iter_mut() {
                        svm.meas += rx_time_offset as f64 * 1.0e-9;
                    }
                    rmeas.svs = std::mem::take(&mut gpsmeas);
                    self.log.stats.sv_measurements += rmeas.svs.len() as u32;
                    self.log.measurements.push(rmeas);
                }

                // GPS time may not be set yet
                match Self::field(msg, 10, 1).and_then(|p| hex::read_u8(&p, 0)) {
                    Some(flags) if flags & 0x04 != 0 => {
                        use_data = false;
                        gpsmeas.clear();
                        debug!("GPS time not set yet at line {}", linecount);
                        continue;
                    },
                    None => {
                        self.log.stats.error_count += 1;
                        continue;
                    },
                    _ => {},
                }

                gpsmeas.clear();
                use_data = true;
                got_8fac = false;
                pctime = currpctime.to_string();

                let ok = (|| -> Option<()> {
                    gpstow = hex::read_u32(&Self::field(msg, 2, 4)?, 0)?;
                    gpswn = hex::read_u16(&Self::field(msg, 6, 2)?, 0)?;
                    fab_ss = hex::read_u8(&Self::field(msg, 11, 1)?, 0)?;
                    fab_mm = hex::read_u8(&Self::field(msg, 12, 1)?, 0)?;
                    fab_hh = hex::read_u8(&Self::field(msg, 13, 1)?, 0)?;
                    fab_mday = hex::read_u8(&Self::field(msg, 14, 1)?, 0)?;
                    fab_mon = hex::read_u8(&Self::field(msg, 15, 1)?, 0)?;
                    fab_yyyy = hex::read_u16(&Self::field(msg, 16, 2)?, 0)?;
                    Some(())
                })();
                if ok.is_none() {
                    self.log.stats.error_count += 1;
                    use_data = false;
                }
                continue;
            }

            // raw measurement report
            if msg.starts_with("5a") {
                if gpsmeas.len() >= MAX_CHANNELS {
                    use_data = false;
                    debug!("too many 5A messages at line {}", linecount);
                }
                let svn = match Self::field(msg, 1, 1).and_then(|p| hex::read_u8(&p, 0)) {
                    Some(s) => s,
                    None => {
                        self.log.stats.error_count += 1;
                        continue;
                    },
                };
                if svn <= gps::MAX_SVN {
                    if gpsmeas.iter().any(|m| m.sv.prn == svn) {
                        // a duplicate SV means lost data: void the second
                        use_data = false;
                        gpsmeas.clear();
                        debug!("duplicate/unexpected SV at line {}", linecount);
                    } else if let Some(raw) =
                        Self::field(msg, 10, 4).and_then(|p| hex::read_f32(&p, 0))
                    {
                        let sv = SV::new(Constellation::GPS, svn);
                        gpsmeas.push(SvMeasurement::new(
                            sv,
                            ObservationCode::C1C,
                            raw as f64 * MEAS_LSB,
                        ));
                    } else {
                        self.log.stats.error_count += 1;
                    }
                }
                continue;
            }

            // secondary time packet: receiver offset and sawtooth
            if msg.starts_with("8fac") {
                let ok = (|| -> Option<()> {
                    rx_time_offset = hex::read_f32(&Self::field(msg, 17, 4)?, 0)?;
                    let st = hex::read_f32(&Self::field(msg, 61, 4)?, 0)?;
                    sawtooth = st * self.sawtooth_multiplier as f32;
                    Some(())
                })();
                match ok {
                    Some(()) => got_8fac = true,
                    None => self.log.stats.error_count += 1,
                }
                continue;
            }

            // hardware serial number
            if !got_rxid && msg.starts_with("8f41") {
                if msg.len() == 18 * 2 {
                    let prefix = Self::field(msg, 2, 2).and_then(|p| hex::read_i16(&p, 0));
                    let sn = Self::field(msg, 4, 4).and_then(|p| hex::read_u32(&p, 0));
                    if let (Some(prefix), Some(sn)) = (prefix, sn) {
                        self.info.serial_number = format!("{}-{}", prefix, sn);
                        got_rxid = true;
                        info!("serial number {}", self.info.serial_number);
                    }
                } else {
                    debug!("bad 8f41 message size at line {}", linecount);
                }
                continue;
            }

            // ionosphere parameters
            if self.log.gps_iono.is_none() && msg.starts_with("580204") {
                if msg.len() == 45 * 2 {
                    let iono = (|| -> Option<IonosphereData> {
                        Some(IonosphereData {
                            a0: hex::read_f32(&Self::field(msg, 13, 4)?, 0)? as f64,
                            a1: hex::read_f32(&Self::field(msg, 17, 4)?, 0)? as f64,
                            a2: hex::read_f32(&Self::field(msg, 21, 4)?, 0)? as f64,
                            a3: hex::read_f32(&Self::field(msg, 25, 4)?, 0)? as f64,
                            b0: hex::read_f32(&Self::field(msg, 29, 4)?, 0)? as f64,
                            b1: hex::read_f32(&Self::field(msg, 33, 4)?, 0)? as f64,
                            b2: hex::read_f32(&Self::field(msg, 37, 4)?, 0)? as f64,
                            b3: hex::read_f32(&Self::field(msg, 41, 4)?, 0)? as f64,
                        })
                    })();
                    self.log.gps_iono = iono;
                } else {
                    debug!("bad 580204 message size at line {}", linecount);
                }
                continue;
            }

            // UTC parameters
            if self.log.gps_utc.is_none() && msg.starts_with("580205") {
                if msg.len() == 44 * 2 {
                    let utc = (|| -> Option<UtcData> {
                        Some(UtcData {
                            a0: hex::read_f64(&Self::field(msg, 18, 8)?, 0)?,
                            a1: hex::read_f32(&Self::field(msg, 26, 4)?, 0)? as f64,
                            dt_ls: hex::read_i16(&Self::field(msg, 30, 2)?, 0)?,
                            t_ot: hex::read_f32(&Self::field(msg, 32, 4)?, 0)? as f64,
                            wn_t: hex::read_u16(&Self::field(msg, 36, 2)?, 0)?,
                            wn_lsf: hex::read_u16(&Self::field(msg, 38, 2)?, 0)?,
                            dn: hex::read_u16(&Self::field(msg, 40, 2)?, 0)?,
                            dt_lsf: hex::read_i16(&Self::field(msg, 42, 2)?, 0)?,
                        })
                    })();
                    if let Some(utc) = utc {
                        if let Some(leap) = gps::current_leap_seconds(mjd, &utc) {
                            self.log.leap_seconds = leap;
                            self.log.gps_utc = Some(utc);
                        }
                    }
                } else {
                    debug!("bad 580205 message size at line {}", linecount);
                }
                continue;
            }

            // software version report
            if !got_sw_version && msg.starts_with("45") {
                let v = (|| -> Option<(u8, u8, u8, u8, u8, u8, u8, u8, u8, u8)> {
                    Some((
                        hex::read_u8(&Self::field(msg, 1, 1)?, 0)?,
                        hex::read_u8(&Self::field(msg, 2, 1)?, 0)?,
                        hex::read_u8(&Self::field(msg, 3, 1)?, 0)?,
                        hex::read_u8(&Self::field(msg, 4, 1)?, 0)?,
                        hex::read_u8(&Self::field(msg, 5, 1)?, 0)?,
                        hex::read_u8(&Self::field(msg, 6, 1)?, 0)?,
                        hex::read_u8(&Self::field(msg, 7, 1)?, 0)?,
                        hex::read_u8(&Self::field(msg, 8, 1)?, 0)?,
                        hex::read_u8(&Self::field(msg, 9, 1)?, 0)?,
                        hex::read_u8(&Self::field(msg, 10, 1)?, 0)?,
                    ))
                })();
                if let Some((av1, av2, am, ad, ay, cv1, cv2, cm, cd, cy)) = v {
                    self.info.sw_version = format!(
                        "{}.{} {}-{:02}-{:02}",
                        cv1,
                        cv2,
                        cy as u16 + year_offset,
                        cm,
                        cd
                    );
                    let _app = format!("{}.{} {}-{:02}-{:02}", av1, av2, ay as u16 + 1900, am, ad);
                    got_sw_version = true;
                    info!("sw version {}", self.info.sw_version);
                }
                continue;
            }

            // ephemeris
            if msg.starts_with("580206") {
                if msg.len() == 172 * 2 {
                    if let Some(eph) = read_gps_ephemeris(msg) {
                        self.log.gps.add(Ephemeris::Gps(eph));
                    } else {
                        self.log.stats.error_count += 1;
                    }
                } else {
                    debug!("bad 580206 message size at line {}", linecount);
                }
                continue;
            }
        }

        self.log.stats.lines_read = linecount;

        if self.log.gps_iono.is_none() {
            return Err(Error::MissingIonosphere(path.to_string()));
        }
        if self.log.gps_utc.is_none() {
            return Err(Error::MissingUtc(path.to_string()));
        }
        if self.log.measurements.is_empty() {
            return Err(Error::NoMeasurements(path.to_string()));
        }

        // Post-load: GPS date/time from the UTC date, then 1 ms steps,
        // then the 1 s grid.
        rx::derive_gps_from_utc(&mut self.log.measurements, self.log.leap_seconds);
        rx::resolve_ms_ambiguities(&mut self.log, antenna, STEP_TOLERANCE);
        rx::interpolate_measurements(&mut self.log.measurements);

        info!("done: read {} lines", linecount);
        info!("{} measurements read", self.log.measurements.len());
        info!("{} ephemeris entries read", self.log.gps.len());
        Ok(())
    }

    fn dataset(&self) -> &Dataset {
        &self.log
    }

    fn info(&self) -> &ReceiverInfo {
        &self.info
    }

    fn constellations(&self) -> &[Constellation] {
        &self.constellations
    }
}

/// Decodes the 580206 ephemeris report. Angular fields are already in
/// radians; no ICD rescaling applies.
fn read_gps_ephemeris(msg: &str) -> Option<GpsEphemeris> {
    let f = Trimble::field;
    let mut ed = GpsEphemeris::default();
    ed.svn = hex::read_u8(&f(msg, 5, 1)?, 0)?;
    ed.t_ephem = hex::read_f32(&f(msg, 6, 4)?, 0)? as f64;
    ed.week_number = hex::read_u16(&f(msg, 10, 2)?, 0)?;
    ed.sv_accuracy_raw = hex::read_u8(&f(msg, 14, 1)?, 0)?.min(15);
    ed.sv_health = hex::read_u8(&f(msg, 15, 1)?, 0)?;
    ed.iodc = hex::read_u16(&f(msg, 16, 2)?, 0)?;
    ed.t_gd = hex::read_f32(&f(msg, 18, 4)?, 0)? as f64;
    ed.t_oc = hex::read_f32(&f(msg, 22, 4)?, 0)? as f64;
    ed.a_f2 = hex::read_f32(&f(msg, 26, 4)?, 0)? as f64;
    ed.a_f1 = hex::read_f32(&f(msg, 30, 4)?, 0)? as f64;
    ed.a_f0 = hex::read_f32(&f(msg, 34, 4)?, 0)? as f64;
    ed.sv_accuracy = hex::read_f32(&f(msg, 38, 4)?, 0)? as f64;
    ed.iode = hex::read_u8(&f(msg, 42, 1)?, 0)?;
    ed.kepler.c_rs = hex::read_f32(&f(msg, 44, 4)?, 0)? as f64;
    ed.kepler.delta_n = hex::read_f32(&f(msg, 48, 4)?, 0)? as f64;
    ed.kepler.m0 = hex::read_f64(&f(msg, 52, 8)?, 0)?;
    ed.kepler.c_uc = hex::read_f32(&f(msg, 60, 4)?, 0)? as f64;
    ed.kepler.e = hex::read_f64(&f(msg, 64, 8)?, 0)?;
    ed.kepler.c_us = hex::read_f32(&f(msg, 72, 4)?, 0)? as f64;
    ed.kepler.sqrt_a = hex::read_f64(&f(msg, 76, 8)?, 0)?;
    ed.t_oe = hex::read_f32(&f(msg, 84, 4)?, 0)? as f64;
    ed.kepler.c_ic = hex::read_f32(&f(msg, 88, 4)?, 0)? as f64;
    ed.kepler.omega0 = hex::read_f64(&f(msg, 92, 8)?, 0)?;
    ed.kepler.c_is = hex::read_f32(&f(msg, 100, 4)?, 0)? as f64;
    ed.kepler.i0 = hex::read_f64(&f(msg, 104, 8)?, 0)?;
    ed.kepler.c_rc = hex::read_f32(&f(msg, 112, 4)?, 0)? as f64;
    ed.kepler.omega = hex::read_f64(&f(msg, 116, 8)?, 0)?;
    ed.kepler.omega_dot = hex::read_f32(&f(msg, 124, 4)?, 0)? as f64;
    ed.kepler.idot = hex::read_f32(&f(msg, 128, 4)?, 0)? as f64;
    debug!("ephemeris: svn={}", ed.svn);
    Some(ed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    fn hexstr_be(bytes: &[u8]) -> String {
        // fields are logged MSB first
        let mut s = String::new();
        for b in bytes.iter().rev() {
            write!(s, "{:02x}", b).unwrap();
        }
        s
    }

    #[test]
    fn field_reversal() {
        // a float stored MSB-first round-trips through field()
        let v = 1234.5f32;
        let hexed = hexstr_be(&v.to_le_bytes());
        let msg = format!("00{}", hexed); // one byte of padding
        let p = Trimble::field(&msg, 1, 4).unwrap();
        assert_eq!(hex::read_f32(&p, 0), Some(v));
    }

    fn fab_line(pc: &str, tow: u32, wn: u16, hh: u8, mm: u8, ss: u8) -> String {
        let mut b = vec![0u8; 18];
        b[0] = 0x8f;
        b[1] = 0xab;
        b[2..6].copy_from_slice(&tow.to_be_bytes());
        b[6..8].copy_from_slice(&wn.to_be_bytes());
        b[10] = 0x00; // timing flags: GPS time valid
        b[11] = ss;
        b[12] = mm;
        b[13] = hh;
        b[14] = 17; // mday
        b[15] = 1; // month
        b[16..18].copy_from_slice(&2016u16.to_be_bytes());
        let mut s = String::new();
        for byte in &b {
            write!(s, "{:02x}", byte).unwrap();
        }
        format!("8b {} {}", pc, s)
    }

    fn fac_line(pc: &str, offset_ns: f32, sawtooth_ns: f32) -> String {
        let mut b = vec![0u8; 68];
        b[0] = 0x8f;
        b[1] = 0xac;
        b[17..21].copy_from_slice(&{
            let mut x = offset_ns.to_le_bytes();
            x.reverse();
            x
        });
        b[61..65].copy_from_slice(&{
            let mut x = sawtooth_ns.to_le_bytes();
            x.reverse();
            x
        });
        let mut s = String::new();
        for byte in &b {
            write!(s, "{:02x}", byte).unwrap();
        }
        format!("8b {} {}", pc, s)
    }

    fn raw_line(pc: &str, svn: u8, counts: f32) -> String {
        let mut b = vec![0u8; 14];
        b[0] = 0x5a;
        b[1] = svn;
        b[10..14].copy_from_slice(&{
            let mut x = counts.to_le_bytes();
            x.reverse();
            x
        });
        let mut s = String::new();
        for byte in &b {
            write!(s, "{:02x}", byte).unwrap();
        }
        format!("5a {} {}", pc, s)
    }

    #[test]
    fn sawtooth_sign_flipped() {
        use std::io::Write as _;
        // iono: 45 bytes of zeros with the right id
        let mut iono = vec![0u8; 45];
        iono[0] = 0x58;
        iono[1] = 0x02;
        iono[2] = 0x04;
        let mut iono_s = String::new();
        for byte in &iono {
            write!(iono_s, "{:02x}", byte).unwrap();
        }
        // utc: 44 bytes, dt_ls at 30..32 (MSB first), schedule fields
        let mut utc = vec![0u8; 44];
        utc[0] = 0x58;
        utc[1] = 0x02;
        utc[2] = 0x05;
        utc[30..32].copy_from_slice(&17i16.to_be_bytes());
        utc[38..40].copy_from_slice(&137u16.to_be_bytes()); // wn_lsf
        utc[40..42].copy_from_slice(&5u16.to_be_bytes()); // dn
        utc[42..44].copy_from_slice(&18i16.to_be_bytes()); // dt_lsf
        let mut utc_s = String::new();
        for byte in &utc {
            write!(utc_s, "{:02x}", byte).unwrap();
        }

        let lines = vec![
            format!("58 00:00:00 {}", iono_s),
            format!("58 00:00:00 {}", utc_s),
            fab_line("00:00:01", 3601, 877, 0, 0, 1),
            raw_line("00:00:01", 4, 1_200_000.0),
            fac_line("00:00:01", 10.0, 3.5),
            fab_line("00:00:02", 3602, 877, 0, 0, 2),
        ];
        let path = std::env::temp_dir().join(format!("trimble-{}.rx", std::process::id()));
        let mut fd = std::fs::File::create(&path).unwrap();
        for l in &lines {
            writeln!(fd, "{}", l).unwrap();
        }

        let mut rx = Trimble::new("Resolution SMT 360", "");
        let ant = Antenna::default().with_ecef(-4_646_844.3, 2_553_749.7, -3_534_466.9);
        rx.read_log(path.to_str().unwrap(), 57404, &ant).unwrap();

        assert_eq!(rx.log.measurements.len(), 1);
        let m = &rx.log.measurements[0];
        // reported sawtooth (ns, subtracted) becomes negative seconds added
        assert!((m.sawtooth + 3.5e-9).abs() < 1e-15);
        // no ephemeris in the log: the ms-ambiguity pass drops the SV
        assert!(m.svs.is_empty());
        assert_eq!(
            rx.log.stats.ambiguity_drops,
            vec![(Constellation::GPS, 1)]
        );
        std::fs::remove_file(path).ok();
    }
}
