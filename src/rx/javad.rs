//! Javad receiver log decoder.
//!
//! Javad logs carry one message per line; the epoch is closed by the
//! Receiver Date (RD) message, at which point the accumulated channel
//! data for the previous second is emitted if every required message
//! arrived exactly once.

use gnss::prelude::{Constellation, SV};
use log::{debug, info, warn};

use crate::antenna::Antenna;
use crate::ephemeris::{Ephemeris, GpsEphemeris, IonosphereData, UtcData};
use crate::gps;
use crate::hex;
use crate::measurement::{ObservationCode, ReceiverMeasurement, SvMeasurement};
use crate::rx::{self, Dataset, Decode, Error, ReceiverInfo};
use crate::utility;

const MAX_CHANNELS: usize = 32;

// per-second message flags
const AZ_MSG: u32 = 0x01;
const EL_MSG: u32 = 0x02;
const F1_MSG: u32 = 0x04;
const F2_MSG: u32 = 0x08;
const FC_MSG: u32 = 0x10;
const R1_MSG: u32 = 0x20;
const R2_MSG: u32 = 0x40;
const RC_MSG: u32 = 0x80;
const RT_MSG: u32 = 0x200;
const SI_MSG: u32 = 0x400;
const SS_MSG: u32 = 0x800;
const TO_MSG: u32 = 0x1000;
const YA_MSG: u32 = 0x2000;
const ZA_MSG: u32 = 0x4000;

/// Javad receiver decoder. The HE_GD model tracks P1/P2 as well as C/A.
pub struct Javad {
    pub info: ReceiverInfo,
    pub dual_frequency: bool,
    pub log: Dataset,
    constellations: Vec<Constellation>,
}

impl Javad {
    pub fn new(model: &str) -> Self {
        let mut dual_frequency = false;
        let mut model = model.to_string();
        if model == "HE_GD" {
            dual_frequency = true;
        } else {
            warn!("unknown Javad model {}, assuming single frequency", model);
            model = "generic".to_string();
        }
        Self {
            info: ReceiverInfo {
                manufacturer: "Javad".to_string(),
                model,
                channels: 32,
                ..Default::default()
            },
            dual_frequency,
            log: Dataset::default(),
            constellations: vec![Constellation::GPS],
        }
    }

    /// Reconstructs the receiver identity from the `@RXID` annotations.
    fn parse_rxid(&mut self, rxid: &[String]) {
        if rxid.is_empty() || rxid.len() % 4 != 0 {
            return;
        }
        let idx = rxid.len() - 4;
        let joined: String = rxid[idx..].concat();
        let cleaned: String = joined
            .chars()
            .filter(|c| !matches!(c, '{' | '}' | '"'))
            .collect();
        let vals: Vec<&str> = cleaned.split(',').collect();
        if vals.len() >= 7 {
            self.info.serial_number = vals[0].trim_start().to_string();
            self.info.model = vals[1].to_string();
            self.info.sw_version = format!("{} {} {}", vals[4].trim_start(), vals[5], vals[6]);
            info!(
                "rx s/n {}, model {}, sw {}",
                self.info.serial_number, self.info.model, self.info.sw_version
            );
        }
    }
}

impl Decode for Javad {
    fn read_log(&mut self, path: &str, mjd: i32, _antenna: &Antenna) -> Result<(), Error> {
        info!("reading {}", path);
        let content = std::fs::read_to_string(path)?;

        let mut rxid: Vec<String> = Vec::new();

        let reqd_msgs = if self.dual_frequency {
            AZ_MSG
                | EL_MSG
                | FC_MSG
                | RC_MSG
                | RT_MSG
                | SI_MSG
                | SS_MSG
                | TO_MSG
                | YA_MSG
                | ZA_MSG
                | R1_MSG
                | R2_MSG
                | F1_MSG
                | F2_MSG
        } else {
            AZ_MSG | EL_MSG | FC_MSG | RC_MSG | RT_MSG | SI_MSG | SS_MSG | TO_MSG | YA_MSG | ZA_MSG
        };

        let mut curr_msgs: u32 = 0;
        let mut nsats: usize = 0;
        let mut tracked_svs = [0u8; MAX_CHANNELS];
        let mut ca_pr = [0.0f64; MAX_CHANNELS];
        let mut ca_lock = [0u16; MAX_CHANNELS];
        let mut p1_pr = [0.0f64; MAX_CHANNELS];
        let mut p2_pr = [0.0f64; MAX_CHANNELS];

        let mut gps_tod_ms: u32 = 0;
        let mut rx_time_offset: f64 = 0.0;
        let mut smoothing_offset: f64 = 0.0;
        let mut sawtooth: f64 = 0.0;

        // per-second duplicate counters
        let (mut rc_cnt, mut rc_full_cnt) = (0u32, 0u32);
        let (mut r1_cnt, mut r1_short_cnt) = (0u32, 0u32);
        let (mut r2_cnt, mut r2_short_cnt) = (0u32, 0u32);

        let mut rd_year: u16 = 0;
        let (mut rd_month, mut rd_day) = (0u8, 0u8);

        let mut pctime = String::new();
        let mut linecount = 0u32;

        for line in content.lines() {
            linecount += 1;
            if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('@') {
                if let Some(pos) = rest.find("RXID") {
                    rxid.push(rest[pos + 4..].to_string());
                }
                continue;
            }

            // MSGID HH:MM:SS HEX with fixed delimiters
            let bytes = line.as_bytes();
            if line.len() < 16
                || bytes[2] != b' '
                || bytes[5] != b':'
                || bytes[8] != b':'
                || bytes[11] != b' '
            {
                self.log.stats.error_count += 1;
                continue;
            }
            let (msgid, currpctime, msg) = match rx::split_line(line) {
                Some(parts) => parts,
                None => {
                    self.log.stats.error_count += 1;
                    continue;
                },
            };
            if msgid == "NP" {
                continue;
            }
            let payload = hex::hex_to_bin(msg);

            // The Receiver Date message starts each second: close out
            // the previous one.
            if msgid == "RD" {
                let counters_ok = rc_cnt <= 1
                    && rc_full_cnt <= 1
                    && (!self.dual_frequency
                        || (r1_cnt <= 1 && r1_short_cnt <= 1 && r2_cnt <= 1 && r2_short_cnt <= 1));

                if curr_msgs == reqd_msgs && counters_ok {
                    let mut rmeas = ReceiverMeasurement::new();
                    self.log.stats.sv_measurements += nsats as u32;
                    for chan in 0..nsats {
                        // PLL must be locked before the channel is usable
                        if ca_lock[chan] & 0xff != 0x53 {
                            debug!(
                                "C/A unlocked at line {} (prn={})",
                                linecount, tracked_svs[chan]
                            );
                            self.log.stats.bad_measurements += 1;
                            continue;
                        }
                        // wild pseudorange or receiver offset
                        let pr = ca_pr[chan] - rx_time_offset;
                        if !(0.05..0.10).contains(&pr) {
                            debug!("C/A pseudorange out of range at line {} ({})", linecount, pr);
                            self.log.stats.bad_measurements += 1;
                            continue;
                        }
                        let sv = SV::new(Constellation::GPS, tracked_svs[chan]);
                        rmeas.svs.push(SvMeasurement::new(sv, ObservationCode::C1C, pr));
                        if self.dual_frequency {
                            let p1 = p1_pr[chan] - rx_time_offset;
                            if (0.05..0.10).contains(&p1) {
                                rmeas.svs.push(SvMeasurement::new(sv, ObservationCode::C1P, p1));
                            }
                            let p2 = p2_pr[chan] - rx_time_offset;
                            if (0.05..0.10).contains(&p2) {
                                rmeas.svs.push(SvMeasurement::new(sv, ObservationCode::C2P, p2));
                            }
                        }
                    }

                    if rmeas.svs.is_empty() {
                        self.log.stats.error_count += 1;
                        debug!("no useable measurements at {}", currpctime);
                    } else if let Some((hh, mm, ss)) = rx::parse_pc_time(&pctime) {
                        rmeas.pc_hh = hh;
                        rmeas.pc_mm = mm;
                        rmeas.pc_ss = ss;

                        let tod = gps_tod_ms as f64 / 1000.0 + rx_time_offset;
                        if (-0.1..86_400.1).contains(&tod) {
                            let igps_tod = (gps_tod_ms / 1000) as i64;
                            let gps_mjd =
                                utility::date_to_mjd(rd_year as i32, rd_month, rd_day) as i64;
                            rmeas.tm_gps = utility::epoch_from_naive_gps_secs(
                                (gps_mjd - 44244) * 86_400 + igps_tod,
                            );
                            let wday = (gps_mjd - 44244).rem_euclid(7);
                            rmeas.gps_tow = (86_400 * wday + igps_tod) as f64;
                            rmeas.tmfracs = rx_time_offset;

                            // YA and TO can roll over at different times
                            if smoothing_offset - rx_time_offset > 5e-4 {
                                smoothing_offset -= 1e-3;
                            }
                            if smoothing_offset - rx_time_offset < -5e-4 {
                                smoothing_offset += 1e-3;
                            }
                            rmeas.sawtooth = sawtooth - (smoothing_offset - rx_time_offset);
                            rmeas.time_offset = rx_time_offset;

                            self.log.measurements.push(rmeas);
                        } else {
                            self.log.stats.error_count += 1;
                            debug!("GPS TOD out of range at {}", pctime);
                        }
                    } else {
                        self.log.stats.error_count += 1;
                        debug!("unreadable PC time {}", currpctime);
                    }
                }

                match payload.as_deref() {
                    Some(p) if p.len() == 6 => {
                        rd_year = hex::read_u16(p, 0).unwrap_or(0);
                        rd_month = hex::read_u8(p, 2).unwrap_or(0);
                        rd_day = hex::read_u8(p, 3).unwrap_or(0);
                    },
                    _ => {
                        self.log.stats.error_count += 1;
                        debug!("RD message wrong size at line {}", linecount);
                    },
                }

                pctime = currpctime.to_string();
                curr_msgs = 0;
                rc_cnt = 0;
                rc_full_cnt = 0;
                r1_cnt = 0;
                r1_short_cnt = 0;
                r2_cnt = 0;
                r2_short_cnt = 0;
                continue;
            }

            let payload = match payload {
                Some(p) => p,
                None => {
                    self.log.stats.error_count += 1;
                    continue;
                },
            };

            match msgid {
                // Receiver Time: GPS time of day, ms
                "~~" => {
                    if payload.len() == 5 {
                        gps_tod_ms = hex::read_u32(&payload, 0).unwrap();
                        curr_msgs |= RT_MSG;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // Satellite Indices
                "SI" => {
                    if curr_msgs & SI_MSG != 0 {
                        // unexpected second SI: void the second
                        curr_msgs = 0;
                        rc_cnt = 0;
                        rc_full_cnt = 0;
                        r1_cnt = 0;
                        r1_short_cnt = 0;
                        r2_cnt = 0;
                        r2_short_cnt = 0;
                        continue;
                    }
                    nsats = payload.len().saturating_sub(1).min(MAX_CHANNELS);
                    tracked_svs[..nsats].copy_from_slice(&payload[..nsats]);
                    curr_msgs |= SI_MSG;
                },
                // Receiver-to-reference time offset
                "TO" => {
                    if payload.len() == 9 {
                        let off = hex::read_f64(&payload, 0).unwrap();
                        if !(1e-10..=1e-3).contains(&off.abs()) {
                            self.log.stats.bad_measurements += 1;
                            debug!("TO outlier at line {}: {}", linecount, off);
                        } else {
                            rx_time_offset = off;
                            curr_msgs |= TO_MSG;
                        }
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // Smoothing offset for PPS A
                "YA" => {
                    if payload.len() == 10 {
                        let off = hex::read_f64(&payload, 0).unwrap();
                        // zero follows a tracking glitch
                        if off.abs() > 1e-3 || off == 0.0 {
                            self.log.stats.bad_measurements += 1;
                            debug!("YA outlier at line {}: {}", linecount, off);
                        } else {
                            smoothing_offset = off;
                            curr_msgs |= YA_MSG;
                        }
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // PPS A sawtooth, ns
                "ZA" => {
                    if payload.len() == 5 {
                        let st = hex::read_f32(&payload, 0).unwrap() as f64;
                        if st.abs() > 50.0 {
                            self.log.stats.bad_measurements += 1;
                            debug!("ZA outlier at line {}: {}", linecount, st);
                        } else {
                            sawtooth = st * 1e-9;
                            curr_msgs |= ZA_MSG;
                        }
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // channel-indexed messages need SI first
                _ if curr_msgs & SI_MSG == 0 => {},
                // Navigation status
                "SS" => {
                    if payload.len().saturating_sub(2) == nsats {
                        curr_msgs |= SS_MSG;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // Elevations
                "EL" => {
                    if payload.len().saturating_sub(1) == nsats {
                        curr_msgs |= EL_MSG;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // Azimuths
                "AZ" => {
                    if payload.len().saturating_sub(1) == nsats {
                        curr_msgs |= AZ_MSG;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // Delta C/A pseudoranges
                "rc" => {
                    if rc_full_cnt > 0 {
                        // full pseudoranges take precedence
                    } else if payload.len().saturating_sub(1) / 4 == nsats {
                        for i in 0..nsats {
                            let v = hex::read_i32(&payload, 4 * i).unwrap();
                            ca_pr[i] = v as f64 * 1e-11 + 0.075;
                        }
                        curr_msgs |= RC_MSG;
                        rc_cnt += 1;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // Full C/A pseudoranges
                "RC" => {
                    if payload.len().saturating_sub(1) / 8 == nsats {
                        for i in 0..nsats {
                            ca_pr[i] = hex::read_f64(&payload, 8 * i).unwrap();
                        }
                        curr_msgs |= RC_MSG;
                        rc_full_cnt += 1;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // C/A lock flags
                "FC" => {
                    if payload.len().saturating_sub(1) / 2 == nsats {
                        for i in 0..nsats {
                            ca_lock[i] = hex::read_u16(&payload, 2 * i).unwrap();
                        }
                        curr_msgs |= FC_MSG;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // P1 / P2 messages, dual-frequency models only
                "R1" if self.dual_frequency => {
                    if payload.len().saturating_sub(1) / 8 == nsats {
                        for i in 0..nsats {
                            p1_pr[i] = hex::read_f64(&payload, 8 * i).unwrap();
                        }
                        curr_msgs |= R1_MSG;
                        r1_cnt += 1;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                "r1" if self.dual_frequency => {
                    if r1_cnt == 0 {
                        if payload.len().saturating_sub(1) / 4 == nsats {
                            for i in 0..nsats {
                                let v = hex::read_i32(&payload, 4 * i).unwrap();
                                p1_pr[i] = v as f64 * 1e-11 + 0.075;
                            }
                            curr_msgs |= R1_MSG;
                            r1_short_cnt += 1;
                        } else {
                            self.log.stats.error_count += 1;
                        }
                    }
                },
                "R2" if self.dual_frequency => {
                    if payload.len().saturating_sub(1) / 8 == nsats {
                        for i in 0..nsats {
                            p2_pr[i] = hex::read_f64(&payload, 8 * i).unwrap();
                        }
                        curr_msgs |= R2_MSG;
                        r2_cnt += 1;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                "r2" if self.dual_frequency => {
                    if r2_cnt == 0 {
                        if payload.len().saturating_sub(1) / 4 == nsats {
                            for i in 0..nsats {
                                let v = hex::read_i32(&payload, 4 * i).unwrap();
                                p2_pr[i] = v as f64 * 1e-11 + 0.075;
                            }
                            curr_msgs |= R2_MSG;
                            r2_short_cnt += 1;
                        } else {
                            self.log.stats.error_count += 1;
                        }
                    }
                },
                "F1" if self.dual_frequency => {
                    if payload.len().saturating_sub(1) / 2 == nsats {
                        curr_msgs |= F1_MSG;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                "F2" if self.dual_frequency => {
                    if payload.len().saturating_sub(1) / 2 == nsats {
                        curr_msgs |= F2_MSG;
                    } else {
                        self.log.stats.error_count += 1;
                    }
                },
                // intermittent messages
                "IO" if self.log.gps_iono.is_none() => {
                    if payload.len() == 39 {
                        self.log.gps_iono = Some(IonosphereData {
                            a0: hex::read_f32(&payload, 6).unwrap() as f64,
                            a1: hex::read_f32(&payload, 10).unwrap() as f64,
                            a2: hex::read_f32(&payload, 14).unwrap() as f64,
                            a3: hex::read_f32(&payload, 18).unwrap() as f64,
                            b0: hex::read_f32(&payload, 22).unwrap() as f64,
                            b1: hex::read_f32(&payload, 26).unwrap() as f64,
                            b2: hex::read_f32(&payload, 30).unwrap() as f64,
                            b3: hex::read_f32(&payload, 34).unwrap() as f64,
                        });
                    } else {
                        self.log.stats.error_count += 1;
                        debug!("bad IO message size at line {}", linecount);
                    }
                },
                "UO" if self.log.gps_utc.is_none() => {
                    if payload.len() == 24 {
                        let utc = UtcData {
                            a0: hex::read_f64(&payload, 0).unwrap(),
                            a1: hex::read_f32(&payload, 8).unwrap() as f64,
                            t_ot: hex::read_u32(&payload, 12).unwrap() as f64,
                            wn_t: hex::read_u16(&payload, 16).unwrap(),
                            dt_ls: hex::read_i16(&payload, 18).unwrap(),
                            dn: hex::read_u8(&payload, 19).unwrap() as u16,
                            wn_lsf: hex::read_u16(&payload, 20).unwrap(),
                            dt_lsf: hex::read_i8(&payload, 22).unwrap() as i16,
                        };
                        if let Some(leap) = gps::current_leap_seconds(mjd, &utc) {
                            self.log.leap_seconds = leap;
                            self.log.gps_utc = Some(utc);
                        }
                    } else {
                        self.log.stats.error_count += 1;
                        debug!("bad UO message size at line {}", linecount);
                    }
                },
                // GPS ephemeris
                "GE" => {
                    if payload.len() == 123 {
                        if let Some(eph) = read_gps_ephemeris(&payload) {
                            self.log.gps.add(Ephemeris::Gps(eph));
                        }
                    } else {
                        self.log.stats.error_count += 1;
                        debug!("bad GE message size at line {}", linecount);
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

        // Post-load cleanups: interpolate onto the 1 s grid and derive
        // the UTC time tags now that the leap count is known.
        rx::interpolate_measurements(&mut self.log.measurements);
        rx::derive_utc_from_gps(&mut self.log.measurements, self.log.leap_seconds);

        self.parse_rxid(&rxid);

        info!("done: read {} lines", linecount);
        info!("{} measurements read", self.log.measurements.len());
        info!("{} ephemeris entries read", self.log.gps.len());
        info!("{} errors in input file", self.log.stats.error_count);
        info!("{} SV measurements rejected", self.log.stats.bad_measurements);
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

/// Decodes the GE (GPS ephemeris) message. The angular Kepler fields
/// arrive in semicircles and are converted to radians here.
fn read_gps_ephemeris(p: &[u8]) -> Option<GpsEphemeris> {
    let pi = std::f64::consts::PI;
    let mut ed = GpsEphemeris::default();
    ed.svn = hex::read_u8(p, 0)?;
    ed.t_ephem = hex::read_u32(p, 1)? as f64;
    ed.iodc = hex::read_i16(p, 6)? as u16;
    ed.t_oc = hex::read_i32(p, 8)? as f64;
    ed.sv_accuracy_raw = hex::read_i8(p, 12)?.clamp(0, 15) as u8;
    ed.sv_accuracy = gps::URA_METRES[ed.sv_accuracy_raw as usize];
    ed.sv_health = hex::read_u8(p, 13)?;
    ed.week_number = hex::read_i16(p, 14)? as u16;
    ed.t_gd = hex::read_f32(p, 16)? as f64;
    ed.a_f2 = hex::read_f32(p, 20)? as f64;
    ed.a_f1 = hex::read_f32(p, 24)? as f64;
    ed.a_f0 = hex::read_f32(p, 28)? as f64;
    ed.t_oe = hex::read_i32(p, 32)? as f64;
    ed.iode = hex::read_i16(p, 36)? as u8;
    ed.kepler.sqrt_a = hex::read_f64(p, 38)?;
    ed.kepler.e = hex::read_f64(p, 46)?;
    ed.kepler.m0 = hex::read_f64(p, 54)? * pi;
    ed.kepler.omega0 = hex::read_f64(p, 62)? * pi;
    ed.kepler.i0 = hex::read_f64(p, 70)? * pi;
    ed.kepler.omega = hex::read_f64(p, 78)? * pi;
    ed.kepler.delta_n = hex::read_f32(p, 86)? as f64 * pi;
    ed.kepler.omega_dot = hex::read_f32(p, 90)? as f64 * pi;
    ed.kepler.idot = hex::read_f32(p, 94)? as f64 * pi;
    ed.kepler.c_rc = hex::read_f32(p, 98)? as f64;
    ed.kepler.c_rs = hex::read_f32(p, 102)? as f64;
    ed.kepler.c_uc = hex::read_f32(p, 106)? as f64;
    ed.kepler.c_us = hex::read_f32(p, 110)? as f64;
    ed.kepler.c_ic = hex::read_f32(p, 114)? as f64;
    ed.kepler.c_is = hex::read_f32(p, 118)? as f64;
    debug!("ephemeris: svn={} toe={} iode={}", ed.svn, ed.t_oe, ed.iode);
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

    /// Builds one complete Javad second ending in the RD message of the
    /// following second.
    fn second_lines(
        pc: &str,
        tod_ms: u32,
        to_value: f64,
        prn: u8,
        prange: f64,
        locked: bool,
    ) -> Vec<String> {
        let mut lines = Vec::new();
        // ~~ : TOD in ms + checksum byte
        let mut p = tod_ms.to_le_bytes().to_vec();
        p.push(0);
        lines.push(format!("~~ {} {}", pc, hexstr(&p)));
        // SI: one SV + checksum
        lines.push(format!("SI {} {}", pc, hexstr(&[prn, 0])));
        // SS: nav status (2 trailing bytes)
        lines.push(format!("SS {} {}", pc, hexstr(&[0, 0, 0])));
        // EL / AZ
        lines.push(format!("EL {} {}", pc, hexstr(&[45, 0])));
        lines.push(format!("AZ {} {}", pc, hexstr(&[90, 0])));
        // TO: f64 + checksum
        let mut p = to_value.to_le_bytes().to_vec();
        p.push(0);
        lines.push(format!("TO {} {}", pc, hexstr(&p)));
        // YA: f64 + 2 trailing
        let mut p = to_value.to_le_bytes().to_vec();
        p.extend_from_slice(&[0, 0]);
        lines.push(format!("YA {} {}", pc, hexstr(&p)));
        // ZA: f32 ns + checksum
        let mut p = 5.0f32.to_le_bytes().to_vec();
        p.push(0);
        lines.push(format!("ZA {} {}", pc, hexstr(&p)));
        // FC: lock flags
        let lock: u16 = if locked { 0x53 } else { 0 };
        let mut p = lock.to_le_bytes().to_vec();
        p.push(0);
        lines.push(format!("FC {} {}", pc, hexstr(&p)));
        // RC: full C/A pseudorange
        let mut p = prange.to_le_bytes().to_vec();
        p.push(0);
        lines.push(format!("RC {} {}", pc, hexstr(&p)));
        lines
    }

    fn rd_line(pc: &str) -> String {
        // 2016-01-17 + reference time byte + checksum
        let mut p = 2016u16.to_le_bytes().to_vec();
        p.extend_from_slice(&[1, 17, 0, 0]);
        format!("RD {} {}", pc, hexstr(&p))
    }

    fn iono_line(pc: &str) -> String {
        let mut p = vec![0u8; 39];
        for (i, v) in [1.1e-8f32, 0.0, 0.0, 0.0, 90112.0, 0.0, 0.0, 0.0]
            .iter()
            .enumerate()
        {
            p[6 + 4 * i..10 + 4 * i].copy_from_slice(&v.to_le_bytes());
        }
        format!("IO {} {}", pc, hexstr(&p))
    }

    fn utc_line(pc: &str) -> String {
        let mut p = vec![0u8; 24];
        p[0..8].copy_from_slice(&1.0e-9f64.to_le_bytes());
        // dt_ls shares its high byte with DN in this message; DN = 0
        // keeps the low-byte leap count intact
        p[18..20].copy_from_slice(&17i16.to_le_bytes());
        p[20..22].copy_from_slice(&137u16.to_le_bytes()); // wn_lsf
        p[22] = 18; // dt_lsf (i8)
        format!("UO {} {}", pc, hexstr(&p))
    }

    fn write_log(name: &str, lines: &[String]) -> String {
        let path =
            std::env::temp_dir().join(format!("javad-{}-{}.rx", std::process::id(), name));
        let mut fd = std::fs::File::create(&path).unwrap();
        for l in lines {
            writeln!(fd, "{}", l).unwrap();
        }
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn decodes_a_complete_second() {
        let mut lines = vec![
            "# comment".to_string(),
            "% another".to_string(),
            // the RD message opens the second and shares its timestamp
            rd_line("00:00:01"),
        ];
        lines.extend(second_lines("00:00:01", 1000, 5.0e-5, 12, 0.0701, true));
        // intermittent messages arrive inside a second, after SI
        lines.push(iono_line("00:00:01"));
        lines.push(utc_line("00:00:01"));
        lines.push(rd_line("00:00:02")); // closes the second
        let path = write_log("ok", &lines);

        let mut rx = Javad::new("HE_GD");
        rx.dual_frequency = false; // single-frequency message set in this log
        let ant = Antenna::default();
        rx.read_log(&path, 57404, &ant).unwrap();

        assert_eq!(rx.log.measurements.len(), 1);
        let m = &rx.log.measurements[0];
        assert_eq!(m.svs.len(), 1);
        assert_eq!(m.svs[0].sv.prn, 12);
        // pseudorange is corrected for the receiver offset
        assert!((m.svs[0].meas - (0.0701 - 5.0e-5)).abs() < 1e-12);
        assert_eq!((m.pc_hh, m.pc_mm, m.pc_ss), (0, 0, 1));
        assert_eq!(rx.log.leap_seconds, 17);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn unlocked_pll_is_rejected() {
        let mut lines = vec![rd_line("00:00:01")];
        lines.extend(second_lines("00:00:01", 1000, 5.0e-5, 12, 0.0701, false));
        lines.push(iono_line("00:00:01"));
        lines.push(utc_line("00:00:01"));
        lines.push(rd_line("00:00:02"));
        let path = write_log("unlocked", &lines);

        let mut rx = Javad::new("HE_GD");
        rx.dual_frequency = false;
        let ant = Antenna::default();
        rx.read_log(&path, 57404, &ant).unwrap();

        assert_eq!(rx.log.measurements.len(), 0);
        assert_eq!(rx.log.stats.bad_measurements, 1);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn out_of_range_time_offset_drops_the_second() {
        // a TO of 0.5 s is far outside [1e-10, 1e-3]
        let mut lines = vec![rd_line("00:00:01")];
        lines.extend(second_lines("00:00:01", 1000, 0.5, 12, 0.0701, true));
        lines.push(iono_line("00:00:01"));
        lines.push(utc_line("00:00:01"));
        lines.push(rd_line("00:00:02"));
        let path = write_log("badto", &lines);

        let mut rx = Javad::new("HE_GD");
        rx.dual_frequency = false;
        let ant = Antenna::default();
        rx.read_log(&path, 57404, &ant).unwrap();

        // required TO message never validated, so the second is dropped
        assert_eq!(rx.log.measurements.len(), 0);
        assert!(rx.log.stats.bad_measurements >= 1);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_iono_is_fatal() {
        let lines = vec![rd_line("00:00:00"), utc_line("00:00:00")];
        let path = write_log("noiono", &lines);
        let mut rx = Javad::new("HE_GD");
        let ant = Antenna::default();
        assert!(matches!(
            rx.read_log(&path, 57404, &ant),
            Err(Error::MissingIonosphere(_))
        ));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn ge_ephemeris_scaling() {
        let mut p = vec![0u8; 123];
        p[0] = 7; // svn
        p[8..12].copy_from_slice(&7200i32.to_le_bytes()); // t_oc
        p[32..36].copy_from_slice(&7200i32.to_le_bytes()); // t_oe
        p[36..38].copy_from_slice(&66i16.to_le_bytes()); // iode
        p[38..46].copy_from_slice(&5153.6f64.to_le_bytes()); // sqrtA
        p[54..62].copy_from_slice(&0.5f64.to_le_bytes()); // M0, semicircles
        let ed = read_gps_ephemeris(&p).unwrap();
        assert_eq!(ed.svn, 7);
        assert_eq!(ed.iode, 66);
        assert_eq!(ed.t_oe, 7200.0);
        assert!((ed.kepler.m0 - 0.5 * std::f64::consts::PI).abs() < 1e-12);
    }
}
