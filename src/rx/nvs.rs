//! NVS NV08C receiver log decoder.
//!
//! NVS message order varies within a second, so messages are grouped by
//! the PC timestamp of the log line; a change of timestamp closes the
//! second. The 0x72 message carries its time of week as an 80-bit
//! extended float, and the sawtooth correction applies to the next
//! pulse with the opposite sign convention.

use gnss::prelude::{Constellation, SV};
use log::{debug, info, warn};

use crate::antenna::Antenna;
use crate::ephemeris::{Ephemeris, GpsEphemeris, IonosphereData, UtcData};
use crate::gps;
use crate::hex;
use crate::measurement::{ObservationCode, ReceiverMeasurement, SvMeasurement};
use crate::rx::{self, Dataset, Decode, Error, ReceiverInfo, SawtoothPhase};

const MAX_CHANNELS: usize = 16;

const MSG46: u32 = 0x01;
const MSG72: u32 = 0x02;
const MSG74: u32 = 0x04;
const MSGF5: u32 = 0x08;

pub struct Nvs {
    pub info: ReceiverInfo,
    pub sawtooth_phase: SawtoothPhase,
    pub log: Dataset,
    constellations: Vec<Constellation>,
}

impl Nvs {
    pub fn new(model: &str) -> Self {
        if model != "NV08C-CSM" {
            warn!("unknown NVS model {}, assuming NV08C-CSM", model);
        }
        Self {
            info: ReceiverInfo {
                manufacturer: "NVS".to_string(),
                model: "NV08C-CSM".to_string(),
                channels: 32,
                ..Default::default()
            },
            sawtooth_phase: SawtoothPhase::NextSecond,
            log: Dataset::default(),
            constellations: vec![Constellation::GPS],
        }
    }
}

impl Decode for Nvs {
    fn read_log(&mut self, path: &str, mjd: i32, _antenna: &Antenna) -> Result<(), Error> {
        info!("reading {}", path);
        let content = std::fs::read_to_string(path)?;

        let reqd_msgs = MSG46 | MSG72 | MSG74 | MSGF5;
        let mut current_msgs: u32 = 0;
        let mut duplicate_messages = false;

        let mut pctime = String::new();
        let mut linecount = 0u32;

        let mut svmeas: Vec<SvMeasurement> = Vec::new();
        let mut tmeas_utc_ms: f64 = 0.0; // since start of week
        let mut d_gps_utc_ms: f64 = 0.0;
        let mut week_num: u16 = 0;
        let mut rx_time_offset: f64 = 0.0;
        let mut sawtooth: f64 = 0.0;
        let mut gps_utc_offset_ms: f64 = 0.0;

        for line in content.lines() {
            linecount += 1;
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with('%')
                || line.starts_with('@')
            {
                continue;
            }

            let (msgid, currpctime, msg) = match rx::split_line(line) {
                Some(parts) => parts,
                None => {
                    debug!("bad data at line {}", linecount);
                    current_msgs = 0;
                    svmeas.clear();
                    duplicate_messages = false;
                    continue;
                },
            };

            // a new PC timestamp closes the previous second
            if currpctime != pctime {
                if current_msgs == reqd_msgs && !duplicate_messages && !svmeas.is_empty() {
                    let mut rmeas = ReceiverMeasurement::new();
                    rmeas.sawtooth = sawtooth;
                    rmeas.time_offset = rx_time_offset;
                    if let Some((hh, mm, ss)) = rx::parse_pc_time(&pctime) {
                        rmeas.pc_hh = hh;
                        rmeas.pc_mm = mm;
                        rmeas.pc_ss = ss;
                    }

                    // rounded: measurements go onto a 1 s grid later
                    rmeas.gps_tow = ((tmeas_utc_ms + d_gps_utc_ms) / 1000.0).round();
                    rmeas.gps_wn = week_num;

                    let leap = (d_gps_utc_ms / 1000.0).round() as i32;
                    rmeas.tm_utc = gps::gps_to_utc(rmeas.gps_tow as u32, rmeas.gps_wn, leap);
                    rmeas.tm_gps = gps::gps_to_epoch(rmeas.gps_tow as u32, rmeas.gps_wn);

                    // offset of the true measurement time from nominal,
                    // in [-0.5, 0.5) so the interpolation works
                    let mut tmfracs = tmeas_utc_ms / 1000.0 - (tmeas_utc_ms / 1000.0).floor();
                    if tmfracs > 0.5 {
                        tmfracs -= 1.0;
                    }
                    rmeas.tmfracs = tmfracs;

                    rmeas.svs = std::mem::take(&mut svmeas);
                    self.log.stats.sv_measurements += rmeas.svs.len() as u32;
                    self.log.measurements.push(rmeas);
                } else if !pctime.is_empty() {
                    svmeas.clear();
                    debug!("duplicate/missing messages at {}", pctime);
                }
                current_msgs = 0;
                duplicate_messages = false;
                pctime = currpctime.to_string();
            }

            let payload = match hex::hex_to_bin(msg) {
                Some(p) => p,
                None => {
                    self.log.stats.error_count += 1;
                    continue;
                },
            };

            match msgid {
                // raw measurements
                "F5" => {
                    if current_msgs & MSGF5 != 0 {
                        duplicate_messages = true;
                        continue;
                    }
                    if payload.len() >= 27 && (payload.len() - 27) % 30 == 0 {
                        tmeas_utc_ms = hex::read_f64(&payload, 0).unwrap();
                        week_num = hex::read_u16(&payload, 8).unwrap();
                        d_gps_utc_ms = hex::read_f64(&payload, 10).unwrap();
                        rx_time_offset = hex::read_i8(&payload, 26).unwrap() as f64 * 1e-3;

                        let nsats = (payload.len() - 27) / 30;
                        for s in 0..nsats {
                            let base = 27 + s * 30;
                            let signal = hex::read_u8(&payload, base).unwrap();
                            if signal & 0x02 == 0 {
                                continue; // GPS only
                            }
                            let svn = hex::read_u8(&payload, base + 1).unwrap();
                            let pr_ms = hex::read_f64(&payload, base + 12).unwrap();
                            let flags = hex::read_u8(&payload, base + 28).unwrap();
                            if flags & (0x01 | 0x02 | 0x04 | 0x10) != 0 {
                                // correct for the GPS-UTC offset, which
                                // steps once per day
                                let meas = pr_ms * 1e-3
                                    + (gps_utc_offset_ms.round() - gps_utc_offset_ms) * 1e-3;
                                let sv = SV::new(Constellation::GPS, svn);
                                svmeas.push(SvMeasurement::new(sv, ObservationCode::C1C, meas));
                            }
                        }
                        if svmeas.len() >= MAX_CHANNELS {
                            debug!("too many F5 channels at line {}", linecount);
                            svmeas.clear();
                            continue;
                        }
                        current_msgs |= MSGF5;
                    } else {
                        self.log.stats.error_count += 1;
                        debug!("F5 message wrong size at line {}", linecount);
                    }
                },
                // time and frequency parameters: TOW and sawtooth
                "72" => {
                    if current_msgs & MSG72 != 0 {
                        duplicate_messages = true;
                        continue;
                    }
                    if payload.len() == 34 {
                        let _tow_ms = hex::read_f80(&payload, 0).unwrap();
                        let st = hex::read_f64(&payload, 21).unwrap();
                        // reported in ns for the next pulse, opposite sign
                        sawtooth = -st * 1e-9;
                        current_msgs |= MSG72;
                    } else {
                        self.log.stats.error_count += 1;
                        debug!("0x72 message wrong size at line {}", linecount);
                    }
                },
                // time message
                "46" => {
                    if current_msgs & MSG46 != 0 {
                        duplicate_messages = true;
                        continue;
                    }
                    if payload.len() == 10 {
                        current_msgs |= MSG46;
                    } else {
                        self.log.stats.error_count += 1;
                        debug!("0x46 message wrong size at line {}", linecount);
                    }
                },
                // time scale parameters
                "74" => {
                    if current_msgs & MSG74 != 0 {
                        duplicate_messages = true;
                        continue;
                    }
                    if payload.len() == 51 {
                        let _gps_rx_offset = hex::read_f80(&payload, 0).unwrap();
                        gps_utc_offset_ms = hex::read_f80(&payload, 20).unwrap();
                        current_msgs |= MSG74;
                    } else {
                        self.log.stats.error_count += 1;
                        debug!("0x74 message wrong size at line {}", linecount);
                    }
                },
                // ionosphere parameters
                "4A" => {
                    if payload.len() == 33 {
                        if hex::read_u8(&payload, 32) == Some(255) {
                            self.log.gps_iono = Some(IonosphereData {
                                a0: hex::read_f32(&payload, 0).unwrap() as f64,
                                a1: hex::read_f32(&payload, 4).unwrap() as f64,
                                a2: hex::read_f32(&payload, 8).unwrap() as f64,
                                a3: hex::read_f32(&payload, 12).unwrap() as f64,
                                b0: hex::read_f32(&payload, 16).unwrap() as f64,
                                b1: hex::read_f32(&payload, 20).unwrap() as f64,
                                b2: hex::read_f32(&payload, 24).unwrap() as f64,
                                b3: hex::read_f32(&payload, 28).unwrap() as f64,
                            });
                        }
                    } else {
                        self.log.stats.error_count += 1;
                        debug!("0x4A message wrong size at line {}", linecount);
                    }
                },
                // GPS / UTC parameters
                "4B" => {
                    if payload.len() == 42 {
                        if hex::read_u8(&payload, 30) == Some(255) {
                            let utc = UtcData {
                                a1: hex::read_f64(&payload, 0).unwrap(),
                                a0: hex::read_f64(&payload, 8).unwrap(),
                                t_ot: hex::read_u32(&payload, 16).unwrap() as f64,
                                wn_t: hex::read_u16(&payload, 20).unwrap(),
                                dt_ls: hex::read_i16(&payload, 22).unwrap(),
                                wn_lsf: hex::read_u16(&payload, 24).unwrap(),
                                dn: hex::read_u16(&payload, 26).unwrap(),
                                dt_lsf: hex::read_i16(&payload, 28).unwrap(),
                            };
                            if let Some(leap) = gps::current_leap_seconds(mjd, &utc) {
                                self.log.leap_seconds = leap;
                                self.log.gps_utc = Some(utc);
                            }
                        }
                    } else {
                        self.log.stats.error_count += 1;
                        debug!("0x4B message wrong size at line {}", linecount);
                    }
                },
                // extended ephemeris
                "F7" => {
                    if payload.len() == 138 {
                        if hex::read_u8(&payload, 0) == Some(0x01) {
                            if let Some(mut eph) = read_gps_ephemeris(&payload) {
                                eph.t_logged = rx::parse_pc_time(currpctime)
                                    .map(|(h, m, s)| h as i32 * 3600 + m as i32 * 60 + s as i32)
                                    .unwrap_or(-1);
                                self.log.gps.add(Ephemeris::Gps(eph));
                            }
                        }
                    } else if payload.len() != 93 {
                        // 93 bytes is the GLONASS variant, not used
                        self.log.stats.error_count += 1;
                        debug!("0xF7 message wrong size at line {}", linecount);
                    }
                },
                _ => {},
            }
        }

        self.log.stats.lines_read = linecount;

        if self.log.gps_iono.is_none() {
            return Err(Error::MissingIonosphere(path.to_string()));
        }
        if self.log.gps_utc.is_none() {
            return Err(Error::MissingUtc(path.to_string()));
        }

        // The sawtooth applies to the next pulse; realign it first.
        if self.sawtooth_phase == SawtoothPhase::NextSecond {
            self.log.stats.bad_sawtooth_corrections =
                rx::realign_sawtooth(&mut self.log.measurements);
        }

        rx::interpolate_measurements(&mut self.log.measurements);
        rx::derive_utc_from_gps(&mut self.log.measurements, self.log.leap_seconds);

        info!("done: read {} lines", linecount);
        info!("{} measurements read", self.log.measurements.len());
        info!("{} ephemeris entries read", self.log.gps.len());
        info!(
            "{} bad sawtooth corrections",
            self.log.stats.bad_sawtooth_corrections
        );
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

/// Decodes the 0xF7 extended ephemeris. NVS reports times in ms and
/// rates per ms; everything is rescaled to seconds here.
fn read_gps_ephemeris(p: &[u8]) -> Option<GpsEphemeris> {
    let mut ed = GpsEphemeris::default();
    ed.svn = hex::read_u8(p, 1)?;
    ed.kepler.c_rs = hex::read_f32(p, 2)? as f64;
    ed.kepler.delta_n = hex::read_f32(p, 6)? as f64 * 1000.0;
    ed.kepler.m0 = hex::read_f64(p, 10)?;
    ed.kepler.c_uc = hex::read_f32(p, 18)? as f64;
    ed.kepler.e = hex::read_f64(p, 22)?;
    ed.kepler.c_us = hex::read_f32(p, 30)? as f64;
    ed.kepler.sqrt_a = hex::read_f64(p, 34)?;
    ed.t_oe = hex::read_f64(p, 42)? * 1e-3;
    ed.kepler.c_ic = hex::read_f32(p, 50)? as f64;
    ed.kepler.omega0 = hex::read_f64(p, 54)?;
    ed.kepler.c_is = hex::read_f32(p, 62)? as f64;
    ed.kepler.i0 = hex::read_f64(p, 66)?;
    ed.kepler.c_rc = hex::read_f32(p, 74)? as f64;
    ed.kepler.omega = hex::read_f64(p, 78)?;
    ed.kepler.omega_dot = hex::read_f64(p, 86)? * 1000.0;
    ed.kepler.idot = hex::read_f64(p, 94)? * 1000.0;
    ed.t_gd = hex::read_f32(p, 102)? as f64 * 1e-3;
    ed.t_oc = hex::read_f64(p, 106)? * 1e-3;
    ed.a_f2 = hex::read_f32(p, 114)? as f64 * 1000.0;
    ed.a_f1 = hex::read_f32(p, 118)? as f64;
    ed.a_f0 = hex::read_f32(p, 122)? as f64 * 1e-3;
    ed.sv_accuracy_raw = (hex::read_u16(p, 126)?).min(15) as u8;
    ed.sv_accuracy = gps::URA_METRES[ed.sv_accuracy_raw as usize];
    ed.iode = hex::read_u16(p, 128)? as u8;
    ed.iodc = hex::read_u16(p, 130)?;
    ed.week_number = hex::read_u16(p, 136)?;
    debug!("GPS eph {} toe {} toc {}", ed.svn, ed.t_oe, ed.t_oc);
    Some(ed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;
    use std::io::Write as _;

    fn hexstr(bytes: &[u8]) -> String {
        let mut s = String::new();
        for b in bytes {
            write!(s, "{:02x}", b).unwrap();
        }
        s
    }

    fn f80_bytes(v: f64) -> [u8; 10] {
        let bits = v.abs().to_bits();
        let mut b = [0u8; 10];
        if v == 0.0 {
            return b;
        }
        let mantissa52 = bits & 0x000f_ffff_ffff_ffff;
        let exp11 = ((bits >> 52) & 0x7ff) as i32 - 1023;
        let m80 = 0x8000_0000_0000_0000u64 | (mantissa52 << 11);
        b[0..8].copy_from_slice(&m80.to_le_bytes());
        let e80 = (exp11 + 16383) as u16;
        b[8] = (e80 & 0xff) as u8;
        b[9] = (e80 >> 8) as u8 | if v < 0.0 { 0x80 } else { 0 };
        b
    }

    fn f5_line(pc: &str, tow_ms: f64, wn: u16, leap_ms: f64, svn: u8, pr_ms: f64) -> String {
        let mut p = vec![0u8; 27 + 30];
        p[0..8].copy_from_slice(&tow_ms.to_le_bytes());
        p[8..10].copy_from_slice(&wn.to_le_bytes());
        p[10..18].copy_from_slice(&leap_ms.to_le_bytes());
        p[26] = 0; // rx offset, ms
        p[27] = 0x02; // GPS
        p[28] = svn;
        p[39..47].copy_from_slice(&pr_ms.to_le_bytes());
        p[55] = 0x07; // flags
        format!("F5 {} {}", pc, hexstr(&p))
    }

    fn msg72_line(pc: &str, tow_ms: f64, sawtooth_ns: f64) -> String {
        let mut p = vec![0u8; 34];
        p[0..10].copy_from_slice(&f80_bytes(tow_ms));
        p[21..29].copy_from_slice(&sawtooth_ns.to_le_bytes());
        format!("72 {} {}", pc, hexstr(&p))
    }

    fn msg46_line(pc: &str) -> String {
        let mut p = vec![0u8; 10];
        p[0..4].copy_from_slice(&3600u32.to_le_bytes());
        p[4] = 17;
        p[5] = 1;
        p[6..8].copy_from_slice(&2016u16.to_le_bytes());
        format!("46 {} {}", pc, hexstr(&p))
    }

    fn msg74_line(pc: &str, gps_utc_ms: f64) -> String {
        let mut p = vec![0u8; 51];
        p[20..30].copy_from_slice(&f80_bytes(gps_utc_ms));
        p[50] = 0xff;
        format!("74 {} {}", pc, hexstr(&p))
    }

    fn iono_line(pc: &str) -> String {
        let mut p = vec![0u8; 33];
        p[0..4].copy_from_slice(&1.1e-8f32.to_le_bytes());
        p[32] = 255;
        format!("4A {} {}", pc, hexstr(&p))
    }

    fn utc_line(pc: &str) -> String {
        let mut p = vec![0u8; 42];
        p[22..24].copy_from_slice(&17i16.to_le_bytes());
        p[24..26].copy_from_slice(&137u16.to_le_bytes());
        p[26..28].copy_from_slice(&5u16.to_le_bytes());
        p[28..30].copy_from_slice(&18i16.to_le_bytes());
        p[30] = 255;
        format!("4B {} {}", pc, hexstr(&p))
    }

    fn write_log(name: &str, lines: &[String]) -> String {
        let path = std::env::temp_dir().join(format!("nvs-{}-{}.rx", std::process::id(), name));
        let mut fd = std::fs::File::create(&path).unwrap();
        for l in lines {
            writeln!(fd, "{}", l).unwrap();
        }
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn sawtooth_next_second_realignment() {
        // three contiguous seconds; the sawtooth reported at second N
        // must end up attached to second N+1, sign flipped
        let mut lines = vec![iono_line("00:00:00"), utc_line("00:00:00")];
        let wn = 856u16;
        let leap_ms = 17_000.0;
        for i in 0..3 {
            let pc = format!("00:00:{:02}", i + 1);
            let tow_ms = (3600.0 + i as f64) * 1000.0;
            lines.push(f5_line(&pc, tow_ms - leap_ms, wn, leap_ms, 5, 0.072e3));
            lines.push(msg72_line(&pc, tow_ms, (i + 1) as f64));
            lines.push(msg46_line(&pc));
            lines.push(msg74_line(&pc, leap_ms));
        }
        lines.push(format!("FF 00:00:05 {}", hexstr(&[0]))); // closes last second
        let path = write_log("saw", &lines);

        let mut rx = Nvs::new("NV08C-CSM");
        let ant = Antenna::default();
        rx.read_log(&path, 57404, &ant).unwrap();

        assert_eq!(rx.log.measurements.len(), 3);
        assert_eq!(rx.log.stats.bad_sawtooth_corrections, 1);
        // second epoch carries the first epoch's (sign-flipped) value
        assert!((rx.log.measurements[1].sawtooth + 1.0e-9).abs() < 1e-15);
        assert!((rx.log.measurements[2].sawtooth + 2.0e-9).abs() < 1e-15);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn ephemeris_rescaling() {
        let mut p = vec![0u8; 138];
        p[0] = 0x01;
        p[1] = 9;
        p[42..50].copy_from_slice(&7_200_000.0f64.to_le_bytes()); // toe ms
        p[106..114].copy_from_slice(&7_200_000.0f64.to_le_bytes()); // toc ms
        p[122..126].copy_from_slice(&0.1f32.to_le_bytes()); // af0, ms
        p[128..130].copy_from_slice(&44u16.to_le_bytes()); // iode
        let ed = read_gps_ephemeris(&p).unwrap();
        assert_eq!(ed.svn, 9);
        assert_eq!(ed.t_oe, 7200.0);
        assert_eq!(ed.t_oc, 7200.0);
        assert!((ed.a_f0 - 1e-4).abs() < 1e-10);
        assert_eq!(ed.iode, 44);
    }

    #[test]
    fn duplicate_message_voids_the_second() {
        let mut lines = vec![iono_line("00:00:00"), utc_line("00:00:00")];
        let pc = "00:00:01";
        lines.push(f5_line(pc, 3600_000.0, 856, 17_000.0, 5, 72.0));
        lines.push(msg72_line(pc, 3_600_000.0, 1.0));
        lines.push(msg72_line(pc, 3_600_000.0, 1.0)); // duplicate
        lines.push(msg46_line(pc));
        lines.push(msg74_line(pc, 17_000.0));
        lines.push(format!("FF 00:00:03 {}", hexstr(&[0])));
        let path = write_log("dup", &lines);

        let mut rx = Nvs::new("NV08C-CSM");
        let ant = Antenna::default();
        rx.read_log(&path, 57404, &ant).unwrap();
        assert_eq!(rx.log.measurements.len(), 0);
        std::fs::remove_file(path).ok();
    }
}
