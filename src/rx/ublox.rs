//! u-blox M8T / ZED-F9 log decoder.
//!
//! The raw-measurement message (0215) opens each second. Broadcast
//! navigation data arrives as raw subframes (0213): GPS LNAV words and
//! Galileo INAV pages are reassembled bit-field by bit-field, with the
//! ICD scale factors applied as the words complete.

use gnss::prelude::{Constellation, SV};
use log::{debug, info, warn};

use crate::antenna::Antenna;
use crate::ephemeris::{Ephemeris, GalEphemeris, GpsEphemeris, IonosphereData, UtcData};
use crate::galileo;
use crate::gps;
use crate::hex;
use crate::measurement::{ObservationCode, ReceiverMeasurement, SvMeasurement};
use crate::rx::{self, Dataset, Decode, Error, ReceiverInfo};
use crate::{CLIGHT, SECS_PER_DAY};

const ICD_PI: f64 = 3.1415926535898;

const MSG0121: u32 = 0x01;
const MSG0122: u32 = 0x02;
const MSG0215: u32 = 0x04;
const MSG0D01: u32 = 0x08;

/// Step threshold for re-running the ms-ambiguity fix, s
const STEP_TOLERANCE: f64 = 0.001 * 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Model {
    NeoM8t,
    ZedF9p,
    ZedF9t,
}

pub struct Ublox {
    pub info: ReceiverInfo,
    pub log: Dataset,
    /// Keep carrier-phase observations as well as pseudoranges
    pub all_observations: bool,
    /// Keep the receiver's reported timestamps and pseudoranges
    /// untouched (no clock-bias removal, fractional TOW kept)
    pub positioning_mode: bool,
    model: Model,
    constellations: Vec<Constellation>,
    alert_pages: u32,
    gps_eph: Vec<GpsEphemeris>,
    gal_eph: Vec<GalEphemeris>,
}

impl Ublox {
    pub fn new(model: &str) -> Self {
        let (m, channels) = match model {
            "NEO-M8T" | "LEA-M8T" => (Model::NeoM8t, 72),
            "ZED-F9P" => (Model::ZedF9p, 184),
            "ZED-F9T" => (Model::ZedF9t, 184),
            other => {
                warn!("unknown u-blox model {}, assuming NEO-M8T", other);
                (Model::NeoM8t, 72)
            },
        };
        Self {
            info: ReceiverInfo {
                manufacturer: "ublox".to_string(),
                model: model.to_string(),
                channels,
                ..Default::default()
            },
            log: Dataset::default(),
            all_observations: false,
            positioning_mode: false,
            model: m,
            constellations: vec![
                Constellation::GPS,
                Constellation::Glonass,
                Constellation::Galileo,
                Constellation::BeiDou,
            ],
            alert_pages: 0,
            gps_eph: vec![GpsEphemeris::default(); gps::MAX_SVN as usize + 1],
            gal_eph: vec![GalEphemeris::default(); galileo::MAX_SVN as usize + 1],
        }
    }

    pub fn with_constellations(mut self, c: &[Constellation]) -> Self {
        self.constellations = c.to_vec();
        self
    }

    /// Signal id to observation codes, per model. Returns
    /// (code, carrier-phase code).
    fn signal_codes(
        &self,
        constellation: Constellation,
        sig_id: u8,
    ) -> Option<(ObservationCode, ObservationCode)> {
        use ObservationCode::*;
        match constellation {
            Constellation::BeiDou => match sig_id {
                0 | 1 => Some((C2I, L2I)),
                2 | 3 => Some((C7I, L7I)),
                _ => None,
            },
            Constellation::Galileo => match sig_id {
                0 => Some((C1C, L1C)),
                1 => Some((C1B, L1B)),
                5 => Some((C7I, L7I)),
                6 => Some((C7Q, L7Q)),
                _ => None,
            },
            Constellation::Glonass => match sig_id {
                0 => Some((C1C, L1C)),
                2 => Some((C2C, L2C)),
                _ => None,
            },
            Constellation::GPS => match sig_id {
                0 => Some((C1C, L1C)),
                3 => Some((C2L, L2L)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Carrier frequency in Hz for clock-bias conversion to cycles.
    fn code_to_freq(constellation: Constellation, code: ObservationCode) -> f64 {
        use ObservationCode::*;
        match (constellation, code) {
            (Constellation::GPS, L1C) => 1575.42e6,
            (Constellation::GPS, L2L) => 1227.60e6,
            (Constellation::Galileo, L1C) | (Constellation::Galileo, L1B) => 1575.42e6,
            (Constellation::Galileo, L7I) | (Constellation::Galileo, L7Q) => 1207.14e6,
            (Constellation::BeiDou, L2I) => 1561.098e6,
            (Constellation::BeiDou, L7I) => 1207.14e6,
            (Constellation::Glonass, L1C) => 1602.0e6,
            (Constellation::Glonass, L2C) => 1246.0e6,
            _ => 1.0,
        }
    }

    fn max_svn(constellation: Constellation) -> u8 {
        match constellation {
            Constellation::GPS => gps::MAX_SVN,
            Constellation::Galileo => galileo::MAX_SVN,
            Constellation::BeiDou => 37,
            Constellation::Glonass => 26,
            _ => 32,
        }
    }
}

/// Bits m..=n of k, LSB = bit 0.
fn mid(k: u32, m: u32, n: u32) -> u32 {
    (k >> m) & ((1u32 << (n - m + 1)) - 1)
}

/// Sign-extends the low `bits` of v.
fn sext(v: u32, bits: u32) -> i32 {
    ((v << (32 - bits)) as i32) >> (32 - bits)
}

impl Decode for Ublox {
    fn read_log(&mut self, path: &str, _mjd: i32, antenna: &Antenna) -> Result<(), Error> {
        info!(
            "reading {}, constellations: {:?}",
            path, self.constellations
        );
        let content = std::fs::read_to_string(path)?;

        let reqd_msgs = MSG0121 | MSG0122 | MSG0215 | MSG0D01;
        let mut current_msgs: u32 = 0;

        let mut pctime = String::new();
        let mut linecount = 0u32;

        let mut svmeas: Vec<SvMeasurement> = Vec::new();
        let mut sawtooth_ps: i32 = 0;
        let mut clock_bias_ns: i32 = 0;
        let mut meas_tow: f64 = -1.0;
        let mut meas_gps_wn: u16 = 0;
        let mut meas_leap_secs: i8 = 0;

        let (mut utc_year, mut utc_mon, mut utc_day) = (0u16, 0u8, 0u8);
        let (mut utc_hour, mut utc_min, mut utc_sec) = (0u8, 0u8, 0u8);

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
                    continue;
                },
            };
            let payload = match hex::hex_to_bin(msg) {
                Some(p) => p,
                None => {
                    self.log.stats.error_count += 1;
                    continue;
                },
            };

            match msgid {
                // raw measurements: starts each second
                "0215" => {
                    if current_msgs == reqd_msgs && !svmeas.is_empty() {
                        let mut rmeas = ReceiverMeasurement::new();
                        // reported in ps, added to the TIC reading
                        rmeas.sawtooth = sawtooth_ps as f64 * 1e-12;
                        rmeas.time_offset = clock_bias_ns as f64 * 1e-9;

                        if let Some((hh, mm, ss)) = rx::parse_pc_time(&pctime) {
                            rmeas.pc_hh = hh;
                            rmeas.pc_mm = mm;
                            rmeas.pc_ss = ss;
                        }

                        // rounded except in positioning mode: the grid
                        // is what time transfer works on
                        if self.positioning_mode {
                            rmeas.gps_tow = meas_tow;
                            rmeas.tmfracs = meas_tow - meas_tow.floor();
                        } else {
                            rmeas.gps_tow = meas_tow.round();
                            rmeas.tmfracs = 0.0;
                        }
                        rmeas.gps_wn = meas_gps_wn % 1024;

                        rmeas.tm_utc = hifitime::Epoch::from_gregorian_utc(
                            utc_year as i32,
                            utc_mon,
                            utc_day,
                            utc_hour,
                            utc_min,
                            utc_sec,
                            0,
                        );
                        rmeas.tm_gps = gps::gps_to_epoch(rmeas.gps_tow as u32, rmeas.gps_wn);

                        for svm in svmeas.iter_mut() {
                            if !self.positioning_mode {
                                if svm.code.is_code() {
                                    // evidently it is subtracted
                                    svm.meas -= clock_bias_ns as f64 * 1e-9;
                                    // keep only the sub-ms part for GPS so
                                    // the ambiguity resolution applies
                                    if svm.sv.constellation == Constellation::GPS
                                        && svm.code == ObservationCode::C1C
                                    {
                                        svm.meas -= 1e-3 * (svm.meas / 1e-3).floor();
                                    }
                                } else {
                                    let f = Self::code_to_freq(svm.sv.constellation, svm.code);
                                    svm.meas -= clock_bias_ns as f64 * 1e-9 * f;
                                }
                            }
                        }
                        rmeas.svs = std::mem::take(&mut svmeas);
                        self.log.stats.sv_measurements += rmeas.svs.len() as u32;
                        self.log.measurements.push(rmeas);
                    } else if current_msgs != 0 {
                        debug!("required message missing at {}", pctime);
                        svmeas.clear();
                    }

                    pctime = currpctime.to_string();
                    current_msgs = 0;

                    if payload.len() > 18 {
                        let nmeas = hex::read_u8(&payload, 11).unwrap() as usize;
                        if payload.len() == 2 + 16 + nmeas * 32 {
                            meas_tow = hex::read_f64(&payload, 0).unwrap();
                            meas_gps_wn = hex::read_u16(&payload, 8).unwrap();
                            meas_leap_secs = hex::read_i8(&payload, 10).unwrap();
                            let rec_stat = hex::read_u8(&payload, 12).unwrap();
                            if rec_stat & 0x01 == 0 {
                                meas_leap_secs = 0;
                            }
                            for m in 0..nmeas {
                                let gnss_id = hex::read_u8(&payload, 36 + 32 * m).unwrap();
                                let constellation = match gnss_id {
                                    0 => Constellation::GPS,
                                    2 => Constellation::Galileo,
                                    3 => Constellation::BeiDou,
                                    6 => Constellation::Glonass,
                                    _ => continue,
                                };
                                if !self.constellations.contains(&constellation) {
                                    continue;
                                }
                                let pr = hex::read_f64(&payload, 16 + 32 * m).unwrap();
                                let cp = hex::read_f64(&payload, 24 + 32 * m).unwrap();
                                let sv_id = hex::read_u8(&payload, 37 + 32 * m).unwrap();
                                let sig_id = match self.model {
                                    Model::ZedF9p | Model::ZedF9t => {
                                        hex::read_u8(&payload, 38 + 32 * m).unwrap()
                                    },
                                    Model::NeoM8t => 0,
                                };
                                let trk_stat = hex::read_u8(&payload, 46 + 32 * m).unwrap();

                                // svid 255 flags an unknown GLONASS slot
                                if trk_stat > 0
                                    && pr / CLIGHT < 1.0
                                    && sv_id <= Self::max_svn(constellation)
                                {
                                    if let Some((code, cp_code)) =
                                        self.signal_codes(constellation, sig_id)
                                    {
                                        let sv = SV::new(constellation, sv_id);
                                        svmeas.push(SvMeasurement::new(sv, code, pr / CLIGHT));
                                        if self.all_observations {
                                            svmeas.push(SvMeasurement::new(sv, cp_code, cp));
                                        }
                                    }
                                }
                            }
                            current_msgs |= MSG0215;
                        } else {
                            debug!("bad 0215 message size at line {}", linecount);
                            self.log.stats.error_count += 1;
                        }
                    } else {
                        debug!("empty/malformed 0215 message at line {}", linecount);
                        self.log.stats.error_count += 1;
                    }
                },
                // time pulse data: the sawtooth correction, ps
                "0d01" => {
                    if payload.len() == 16 + 2 {
                        sawtooth_ps = hex::read_i32(&payload, 8).unwrap();
                        current_msgs |= MSG0D01;
                    } else {
                        debug!("bad 0d01 message size at line {}", linecount);
                        self.log.stats.error_count += 1;
                    }
                },
                // UTC time solution
                "0121" => {
                    if payload.len() == 20 + 2 {
                        let valid = hex::read_u8(&payload, 19).unwrap();
                        if valid & 0x04 != 0 {
                            utc_year = hex::read_u16(&payload, 12).unwrap();
                            utc_mon = hex::read_u8(&payload, 14).unwrap();
                            utc_day = hex::read_u8(&payload, 15).unwrap();
                            utc_hour = hex::read_u8(&payload, 16).unwrap();
                            utc_min = hex::read_u8(&payload, 17).unwrap();
                            utc_sec = hex::read_u8(&payload, 18).unwrap();
                            current_msgs |= MSG0121;
                        } else {
                            debug!("UTC not valid yet at line {}", linecount);
                        }
                    } else {
                        debug!("bad 0121 message size at line {}", linecount);
                        self.log.stats.error_count += 1;
                    }
                },
                // clock solution: receiver clock bias, ns
                "0122" => {
                    if payload.len() == 20 + 2 {
                        clock_bias_ns = hex::read_i32(&payload, 4).unwrap();
                        current_msgs |= MSG0122;
                    } else {
                        debug!("bad 0122 message size at line {}", linecount);
                        self.log.stats.error_count += 1;
                    }
                },
                // unique chip id, polled at the start of the day
                "2703" => {
                    if payload.len() == 9 + 2 {
                        self.info.serial_number = format!("0x{}", &msg[4 * 2..4 * 2 + 2 * 5]);
                        info!("receiver serial number {}", self.info.serial_number);
                    } else {
                        debug!("bad 2703 message size at line {}", linecount);
                    }
                },
                // ionosphere / UTC parameters
                "0b02" if self.log.gps_utc.is_none() => {
                    if payload.len() == 72 + 2 {
                        let utc = UtcData {
                            a0: hex::read_f64(&payload, 4).unwrap(),
                            a1: hex::read_f64(&payload, 12).unwrap(),
                            t_ot: hex::read_i32(&payload, 20).unwrap() as f64,
                            wn_t: hex::read_i16(&payload, 24).unwrap() as u16,
                            dt_ls: hex::read_i16(&payload, 26).unwrap(),
                            wn_lsf: hex::read_i16(&payload, 28).unwrap() as u16,
                            dn: hex::read_i16(&payload, 30).unwrap() as u16,
                            dt_lsf: hex::read_i16(&payload, 32).unwrap(),
                        };
                        self.log.leap_seconds = utc.dt_ls as i32;
                        self.log.gps_utc = Some(utc);
                        self.log.gps_iono = Some(IonosphereData {
                            a0: hex::read_f32(&payload, 36).unwrap() as f64,
                            a1: hex::read_f32(&payload, 40).unwrap() as f64,
                            a2: hex::read_f32(&payload, 44).unwrap() as f64,
                            a3: hex::read_f32(&payload, 48).unwrap() as f64,
                            b0: hex::read_f32(&payload, 52).unwrap() as f64,
                            b1: hex::read_f32(&payload, 56).unwrap() as f64,
                            b2: hex::read_f32(&payload, 60).unwrap() as f64,
                            b3: hex::read_f32(&payload, 64).unwrap() as f64,
                        });
                    } else {
                        debug!("bad 0b02 message size at line {}", linecount);
                        self.log.stats.error_count += 1;
                    }
                },
                // raw subframe data
                "0213" => {
                    if payload.len() < 8 {
                        self.log.stats.error_count += 1;
                        continue;
                    }
                    let gnss_id = hex::read_u8(&payload, 0).unwrap();
                    let sv_id = hex::read_u8(&payload, 1).unwrap();
                    let num_words = hex::read_u8(&payload, 4).unwrap() as usize;
                    let mut dwords = [0u32; 10];
                    let n = num_words.min(10);
                    if payload.len() < 8 + 4 * n {
                        self.log.stats.error_count += 1;
                        continue;
                    }
                    for (i, w) in dwords.iter_mut().take(n).enumerate() {
                        *w = hex::read_u32(&payload, 8 + 4 * i).unwrap();
                    }
                    match gnss_id {
                        0 => {
                            if meas_tow >= 0.0 && sv_id >= 1 && sv_id <= gps::MAX_SVN {
                                self.read_gps_lnav_subframe(
                                    sv_id,
                                    &dwords,
                                    meas_tow as i64,
                                    meas_gps_wn as i64,
                                );
                            }
                        },
                        2 => {
                            if sv_id >= 1 && sv_id <= galileo::MAX_SVN {
                                self.read_gal_inav_page(sv_id, &dwords);
                            }
                        },
                        _ => {},
                    }
                },
                _ => {},
            }
        }

        self.log.stats.lines_read = linecount;
        self.log.leap_seconds = meas_leap_secs as i32;

        if self.log.gps_utc.is_none() {
            return Err(Error::MissingUtc(path.to_string()));
        }
        if self.log.measurements.is_empty() {
            return Err(Error::NoMeasurements(path.to_string()));
        }

        self.log.gps.fix_week_rollovers();
        self.log.galileo.fix_week_rollovers();

        // The sawtooth applies to the next pulse.
        self.log.stats.bad_sawtooth_corrections = rx::realign_sawtooth(&mut self.log.measurements);

        if !self.positioning_mode {
            rx::resolve_ms_ambiguities(&mut self.log, antenna, STEP_TOLERANCE);
        }

        info!("done: read {} lines", linecount);
        info!("{} measurements read", self.log.measurements.len());
        info!("{} GPS ephemeris entries read", self.log.gps.len());
        info!("{} GAL ephemeris entries read", self.log.galileo.len());
        info!(
            "{} bad sawtooth corrections",
            self.log.stats.bad_sawtooth_corrections
        );
        info!("{} alert pages in navigation data", self.alert_pages);
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

impl Ublox {
    /// Decodes one GPS LNAV subframe. Words arrive parity-stripped in
    /// bits 6-29; the approximate transmission time resolves the week.
    fn read_gps_lnav_subframe(&mut self, sv_id: u8, raw: &[u32; 10], tow_trans: i64, wn_trans: i64) {
        let mut dwords = [0u32; 10];
        for i in 0..10 {
            dwords[i] = raw[i] >> 6;
        }
        let id = (dwords[1] >> 2) & 0x07; // handover word subframe id

        let ed = &mut self.gps_eph[sv_id as usize];
        ed.svn = sv_id;
        ed.t_ephem = ((((dwords[1] >> 7) & 0x01ffff) << 2) as f64) * 604_799.0 / 403_199.0;

        match id {
            1 => {
                ed.subframes |= 0x01;
                ed.week_number = ((dwords[2] >> 14) & 1023) as u16;
                ed.sv_accuracy_raw = ((dwords[2] >> 8) & 0xf) as u8;
                ed.sv_accuracy = gps::URA_METRES[ed.sv_accuracy_raw as usize];
                ed.sv_health = ((dwords[2] >> 2) & 63) as u8;
                let hibits = (dwords[2] & 0x03) << 8;

                let t_gd = sext(dwords[6] & 0xff, 8);
                ed.t_gd = t_gd as f64 / 2f64.powi(31);

                let lobits = (dwords[7] >> 16) & 0xff;
                ed.iodc = (hibits | lobits) as u16;
                ed.t_oc = (16 * (dwords[7] & 0xffff)) as f64;

                let af2 = sext((dwords[8] >> 16) & 0xff, 8);
                ed.a_f2 = af2 as f64 / 2f64.powi(55);
                let af1 = sext(dwords[8] & 0xffff, 16);
                ed.a_f1 = af1 as f64 / 2f64.powi(43);
                let af0 = sext(dwords[9] >> 2, 22);
                ed.a_f0 = af0 as f64 / 2f64.powi(31);
            },
            2 => {
                ed.subframes |= 0x02;
                ed.iode = ((dwords[2] >> 16) & 0xff) as u8;
                ed.kepler.c_rs = sext(dwords[2] & 0xffff, 16) as f64 / 32.0;
                ed.kepler.delta_n =
                    ICD_PI * sext((dwords[3] >> 8) & 0xffff, 16) as f64 / 2f64.powi(43);

                let hibits = (dwords[3] & 0xff) << 24;
                let lobits = dwords[4] & 0xffffff;
                ed.kepler.m0 = ICD_PI * ((hibits | lobits) as i32) as f64 / 2f64.powi(31);

                ed.kepler.c_uc = sext((dwords[5] >> 8) & 0xffff, 16) as f64 / 2f64.powi(29);
                let hibits = (dwords[5] & 0xff) << 24;
                let lobits = dwords[6] & 0xffffff;
                ed.kepler.e = (hibits | lobits) as f64 / 2f64.powi(33);

                ed.kepler.c_us = sext((dwords[7] >> 8) & 0xffff, 16) as f64 / 2f64.powi(29);
                let hibits = (dwords[7] & 0xff) << 24;
                let lobits = dwords[8] & 0xffffff;
                ed.kepler.sqrt_a = (hibits | lobits) as f64 / 2f64.powi(19);

                ed.t_oe = (16 * ((dwords[9] >> 8) & 0xffff)) as f64;
            },
            3 => {
                ed.subframes |= 0x04;
                ed.kepler.c_ic = sext((dwords[2] >> 8) & 0xffff, 16) as f64 / 2f64.powi(29);
                let hibits = (dwords[2] & 0xff) << 24;
                let lobits = dwords[3] & 0xffffff;
                ed.kepler.omega0 = ICD_PI * ((hibits | lobits) as i32) as f64 / 2f64.powi(31);

                ed.kepler.c_is = sext((dwords[4] >> 8) & 0xffff, 16) as f64 / 2f64.powi(29);
                let hibits = (dwords[4] & 0xff) << 24;
                let lobits = dwords[5] & 0xffffff;
                ed.kepler.i0 = ICD_PI * ((hibits | lobits) as i32) as f64 / 2f64.powi(31);

                ed.kepler.c_rc = sext((dwords[6] >> 8) & 0xffff, 16) as f64 / 32.0;
                let hibits = (dwords[6] & 0xff) << 24;
                let lobits = dwords[7] & 0xffffff;
                ed.kepler.omega = ICD_PI * ((hibits | lobits) as i32) as f64 / 2f64.powi(31);

                ed.kepler.omega_dot = ICD_PI * sext(dwords[8] & 0xffffff, 24) as f64 / 2f64.powi(43);

                ed.f3_iode = ((dwords[9] >> 16) & 0xff) as u8;
                ed.kepler.idot = ICD_PI * sext((dwords[9] >> 2) & 0x3fff, 14) as f64 / 2f64.powi(43);
            },
            4 => {
                // subframe 4 page 18 carries the ionosphere and UTC
                // parameters; the model changes rarely, one set will do
                if self.log.gps_utc.is_some() {
                    return;
                }
                let page_sv_id = (dwords[2] >> 16) & 0x3f;
                if page_sv_id != 56 {
                    return;
                }
                let iono = IonosphereData {
                    a0: sext((dwords[2] >> 8) & 0xff, 8) as f64 / 2f64.powi(30),
                    a1: sext(dwords[2] & 0xff, 8) as f64 / 2f64.powi(27),
                    a2: sext((dwords[3] >> 16) & 0xff, 8) as f64 / 2f64.powi(24),
                    a3: sext((dwords[3] >> 8) & 0xff, 8) as f64 / 2f64.powi(24),
                    b0: sext(dwords[3] & 0xff, 8) as f64 * 2f64.powi(11),
                    b1: sext((dwords[4] >> 16) & 0xff, 8) as f64 * 2f64.powi(14),
                    b2: sext((dwords[4] >> 8) & 0xff, 8) as f64 * 2f64.powi(16),
                    b3: sext(dwords[4] & 0xff, 8) as f64 * 2f64.powi(16),
                };

                let a1 = sext(dwords[5] & 0xffffff, 24);
                let hibits = (dwords[6] & 0xffffff) << 8;
                let lobits = (dwords[7] >> 16) & 0xff;
                let a0 = (hibits | lobits) as i32;
                let utc = UtcData {
                    a1: a1 as f64 / 2f64.powi(50),
                    a0: a0 as f64 / 2f64.powi(30),
                    t_ot: (((dwords[7] >> 8) & 0xff) * 4096) as f64,
                    wn_t: (dwords[7] & 0xff) as u16,
                    dt_ls: sext((dwords[8] >> 16) & 0xff, 8) as i16,
                    wn_lsf: ((dwords[8] >> 8) & 0xff) as u16,
                    dn: (dwords[8] & 0xff) as u16,
                    dt_lsf: sext((dwords[9] >> 16) & 0xff, 8) as i16,
                };
                // the offset to UTC is under 1 us in practice; a huge A0
                // is corrupt data
                if utc.a0.abs() > 1.0e-6 {
                    return;
                }
                self.log.gps_utc = Some(utc);
                self.log.gps_iono = Some(iono);
            },
            5 | 6 | 7 => {}, // almanac
            _ => return,
        }

        if self.gps_eph[sv_id as usize].subframes != 0x07 {
            return;
        }
        let ed = &mut self.gps_eph[sv_id as usize];

        // ICD 20.3.3.4.1 data-cutover rule: IODE in subframes 2 and 3
        // must both match the low 8 bits of IODC
        if ed.f3_iode != ed.iode || (ed.iodc & 0xff) != ed.f3_iode as u16 {
            ed.subframes = 0;
            return;
        }

        // Fence the broadcast week against the transmission week: the
        // resultant week must be within one week of it.
        let t_trans = tow_trans + wn_trans * SECS_PER_DAY as i64 * 7;
        let rollovers = wn_trans / 1024;
        let wn_toe = ed.week_number as i64 + 1024 * rollovers;
        if (wn_toe - wn_trans).abs() > 1 {
            ed.subframes = 0;
            return;
        }
        let t_toe = ed.t_oe as i64 + wn_toe * SECS_PER_DAY as i64 * 7;
        if t_trans - t_toe > 302_400 {
            ed.week_number += 1; // toe is in the next week
        }
        if t_toe - t_trans > 302_400 {
            ed.week_number -= 1; // toe is in the previous week
        }

        let complete = ed.clone();
        if self.log.gps.add(Ephemeris::Gps(complete)) {
            self.gps_eph[sv_id as usize] = GpsEphemeris::default();
        } else {
            // duplicate: keep the buffer for the next broadcast
            self.gps_eph[sv_id as usize].subframes = 0;
        }
    }

    /// Scrubs a partially assembled ephemeris when a new IODnav starts
    /// transmitting mid-collection.
    fn check_gal_iodnav(ed: &mut GalEphemeris, iod_nav: u16) -> bool {
        if ed.subframes & 0x0f == 0 {
            ed.iod_nav = iod_nav;
            true
        } else if iod_nav != ed.iod_nav {
            ed.subframes = 0;
            false
        } else {
            true
        }
    }

    /// Decodes one Galileo INAV page pair (even and odd pages arrive
    /// together, four words each).
    fn read_gal_inav_page(&mut self, sv_id: u8, dwords: &[u32; 10]) {
        let page_type = (dwords[0] >> 30) & 0x01;
        let word_type = (dwords[0] >> 24) & 0x3f;

        if page_type == 0x01 {
            self.alert_pages += 1;
            debug!("E{:02} alert page", sv_id);
            return;
        }
        // 0 is a spare word, 63 means no valid data
        if word_type == 0 || word_type == 63 {
            return;
        }

        let ed = &mut self.gal_eph[sv_id as usize];
        ed.svn = sv_id;

        match word_type {
            1 => {
                let iod_nav = mid(dwords[0], 14, 23) as u16;
                if !Self::check_gal_iodnav(ed, iod_nav) {
                    return;
                }
                // t_0e: 14 bits, scale factor 60
                ed.t_0e = (60 * mid(dwords[0], 0, 13)) as f64;
                // M0: 32 bits signed, 2^-31
                ed.kepler.m0 = ICD_PI * (dwords[1] as i32) as f64 / 2f64.powi(31);
                // e: 32 bits unsigned, 2^-33
                ed.kepler.e = dwords[2] as f64 / 2f64.powi(33);
                // sqrtA: 32 bits unsigned, 2^-19
                let hibits = mid(dwords[3], 14, 31) << 14;
                let lobits = mid(dwords[4], 16, 29);
                ed.kepler.sqrt_a = (hibits | lobits) as f64 / 2f64.powi(19);
                ed.subframes |= 0x01;
            },
            2 => {
                let iod_nav = mid(dwords[0], 14, 23) as u16;
                if !Self::check_gal_iodnav(ed, iod_nav) {
                    return;
                }
                let hibits = (dwords[0] & 0x3fff) << 18;
                let lobits = dwords[1] >> 14;
                ed.kepler.omega0 = ICD_PI * ((hibits | lobits) as i32) as f64 / 2f64.powi(31);

                let hibits = (dwords[1] & 0x3fff) << 18;
                let lobits = dwords[2] >> 14;
                ed.kepler.i0 = ICD_PI * ((hibits | lobits) as i32) as f64 / 2f64.powi(31);

                let hibits = (dwords[2] & 0x3fff) << 18;
                let lobits = dwords[3] >> 14;
                ed.kepler.omega = ICD_PI * ((hibits | lobits) as i32) as f64 / 2f64.powi(31);

                ed.kepler.idot = ICD_PI * sext(mid(dwords[4], 16, 29), 14) as f64 / 2f64.powi(43);
                ed.subframes |= 0x02;
            },
            3 => {
                let iod_nav = mid(dwords[0], 14, 23) as u16;
                if !Self::check_gal_iodnav(ed, iod_nav) {
                    return;
                }
                let hibits = mid(dwords[0], 0, 13) << 10;
                let lobits = mid(dwords[1], 22, 31);
                ed.kepler.omega_dot =
                    ICD_PI * sext(hibits | lobits, 24) as f64 / 2f64.powi(43);

                ed.kepler.delta_n = ICD_PI * sext(mid(dwords[1], 6, 21), 16) as f64 / 2f64.powi(43);

                let hibits = mid(dwords[1], 0, 5) << 10;
                let lobits = mid(dwords[2], 22, 31);
                ed.kepler.c_uc = sext(hibits | lobits, 16) as f64 / 2f64.powi(29);
                ed.kepler.c_us = sext(mid(dwords[2], 6, 21), 16) as f64 / 2f64.powi(29);

                let hibits = mid(dwords[2], 0, 5) << 10;
                let lobits = mid(dwords[3], 22, 31);
                ed.kepler.c_rc = sext(hibits | lobits, 16) as f64 / 32.0;

                let hibits = mid(dwords[3], 14, 21) << 8;
                let lobits = mid(dwords[4], 22, 29);
                ed.kepler.c_rs = sext(hibits | lobits, 16) as f64 / 32.0;

                ed.sisa = galileo::decode_sisa(mid(dwords[4], 14, 21) as u8);
                ed.subframes |= 0x04;
            },
            4 => {
                let iod_nav = mid(dwords[0], 14, 23) as u16;
                if !Self::check_gal_iodnav(ed, iod_nav) {
                    return;
                }
                // out-of-sync pages carry the wrong SV id
                let svid = mid(dwords[0], 8, 13) as u8;
                if svid != sv_id {
                    ed.subframes = 0;
                    return;
                }
                let hibits = mid(dwords[0], 0, 7) << 8;
                let lobits = mid(dwords[1], 24, 31);
                ed.kepler.c_ic = sext(hibits | lobits, 16) as f64 / 2f64.powi(29);
                ed.kepler.c_is = sext(mid(dwords[1], 8, 23), 16) as f64 / 2f64.powi(29);

                let hibits = mid(dwords[1], 0, 7) << 6;
                let lobits = mid(dwords[2], 26, 31);
                ed.t_0c = 60.0 * (hibits | lobits) as f64;

                let hibits = mid(dwords[2], 0, 25) << 5;
                let lobits = mid(dwords[3], 27, 31);
                ed.a_f0 = sext(hibits | lobits, 31) as f64 / 2f64.powi(34);

                let hibits = mid(dwords[3], 14, 26) << 8;
                let lobits = mid(dwords[4], 22, 29);
                ed.a_f1 = sext(hibits | lobits, 21) as f64 / 2f64.powi(46);

                ed.a_f2 = sext(mid(dwords[4], 16, 21), 6) as f64 / 2f64.powi(59);
                ed.subframes |= 0x08;
            },
            5 => {
                // ionospheric correction, BGDs, health and GST
                if self.log.gal_iono.is_none() {
                    let hibits = mid(dwords[0], 0, 1) << 12;
                    let lobits = mid(dwords[1], 20, 31);
                    self.log.gal_iono = Some(crate::ephemeris::GalIonosphereData {
                        ai0: mid(dwords[0], 13, 23) as f64 / 4.0,
                        ai1: sext(mid(dwords[0], 2, 12), 11) as f64 / 2f64.powi(8),
                        ai2: sext(hibits | lobits, 14) as f64 / 2f64.powi(15),
                        sf_flags: mid(dwords[1], 15, 19) as u8,
                    });
                }

                ed.bgd_e1e5a = sext(mid(dwords[1], 5, 14), 10) as f64 / 2f64.powi(32);
                let hibits = mid(dwords[1], 0, 4) << 5;
                let lobits = mid(dwords[2], 27, 31);
                ed.bgd_e1e5b = sext(hibits | lobits, 10) as f64 / 2f64.powi(32);

                ed.sig_flags = mid(dwords[2], 21, 26) as u8;
                ed.wn = mid(dwords[2], 9, 20) as u16;
                let hibits = mid(dwords[2], 0, 8) << 11;
                let lobits = mid(dwords[3], 21, 31);
                ed.tow = (hibits | lobits) as f64;
                ed.subframes |= 0x10;
            },
            6 => {
                // GST-UTC conversion parameters
                if self.log.gal_utc.is_none() {
                    let hibits = mid(dwords[0], 0, 23) << 8;
                    let lobits = mid(dwords[1], 24, 31);
                    let a0 = (hibits | lobits) as i32;
                    let utc = UtcData {
                        a0: a0 as f64 / 2f64.powi(30),
                        a1: sext(mid(dwords[1], 0, 23), 24) as f64 / 2f64.powi(50),
                        dt_ls: sext(mid(dwords[2], 24, 31), 8) as i16,
                        t_ot: (3600 * mid(dwords[2], 16, 23)) as f64,
                        wn_t: mid(dwords[2], 8, 15) as u16,
                        wn_lsf: mid(dwords[2], 0, 7) as u16,
                        dn: mid(dwords[3], 29, 31) as u16,
                        dt_lsf: sext(mid(dwords[3], 21, 28), 8) as i16,
                    };
                    self.log.gal_utc = Some(utc);
                }
            },
            _ => {}, // 7-10: almanac and GST-GPS, not used
        }

        let ed = &mut self.gal_eph[sv_id as usize];
        if ed.subframes == 0x1f {
            // bit 0: I/NAV E1-B; bit 8: clock parameters are E5b,E1
            ed.data_source = 0x01 | 0x0200;
            let complete = ed.clone();
            if self.log.galileo.add(Ephemeris::Gal(complete)) {
                self.gal_eph[sv_id as usize] = GalEphemeris::default();
            } else {
                self.gal_eph[sv_id as usize].subframes = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds raw LNAV words (parity space restored) for subframes 1-3
    /// of a simple consistent ephemeris.
    fn lnav_subframes(svn: u8, week: u16, iode: u8, toc: u32, toe: u32) -> [[u32; 10]; 3] {
        let mut frames = [[0u32; 10]; 3];
        for (i, f) in frames.iter_mut().enumerate() {
            // handover word: subframe id in bits 2-4 (after >> 6)
            f[1] = ((i as u32 + 1) << 2) << 6;
        }
        let _ = svn;
        // subframe 1: week, URA 0, health 0, IODC = iode
        frames[0][2] = (((week as u32) << 14) | 0) << 6;
        frames[0][7] = ((((iode as u32) & 0xff) << 16) | (toc / 16)) << 6;
        // subframe 2: IODE, sqrtA, e, toe
        frames[1][2] = ((iode as u32) << 16) << 6;
        // sqrtA ~ 5153.6: value = round(5153.6 * 2^19) split 8/24
        let sqrt_a = (5153.6f64 * 2f64.powi(19)) as u64;
        frames[1][7] = (((sqrt_a >> 24) & 0xff) as u32) << 6;
        frames[1][8] = ((sqrt_a & 0xffffff) as u32) << 6;
        frames[1][9] = ((toe / 16) << 8) << 6;
        // subframe 3: repeated IODE
        frames[2][9] = ((iode as u32) << 16) << 6;
        frames[2][2] = 0;
        frames[2][8] = 0;
        frames
    }

    #[test]
    fn lnav_assembly_and_cutover_rule() {
        let mut rx = Ublox::new("ZED-F9T");
        let frames = lnav_subframes(5, 877, 87, 7200, 7200);
        let tow = 7500i64;
        let wn = (877 + 1024) as i64;

        rx.read_gps_lnav_subframe(5, &frames[0], tow, wn);
        assert_eq!(rx.log.gps.len(), 0); // incomplete
        rx.read_gps_lnav_subframe(5, &frames[1], tow, wn);
        assert_eq!(rx.log.gps.len(), 0);
        rx.read_gps_lnav_subframe(5, &frames[2], tow, wn);
        assert_eq!(rx.log.gps.len(), 1);

        let eph = rx.log.gps.nearest(5, 7100.0, 16.0).unwrap();
        assert_eq!(eph.iod(), 87);
        assert_eq!(eph.t0e(), 7200.0);
        assert_eq!(eph.t0c(), 7200.0);
        let gps_eph = eph.as_gps().unwrap();
        assert!((gps_eph.kepler.sqrt_a - 5153.6).abs() < 1e-5);
        assert_eq!(gps_eph.week_number, 877);
    }

    #[test]
    fn lnav_iode_mismatch_is_scrubbed() {
        let mut rx = Ublox::new("ZED-F9T");
        let mut frames = lnav_subframes(7, 877, 87, 7200, 7200);
        // corrupt the subframe 3 IODE
        frames[2][9] = (88u32 << 16) << 6;
        let tow = 7500i64;
        let wn = (877 + 1024) as i64;
        rx.read_gps_lnav_subframe(7, &frames[0], tow, wn);
        rx.read_gps_lnav_subframe(7, &frames[1], tow, wn);
        rx.read_gps_lnav_subframe(7, &frames[2], tow, wn);
        assert_eq!(rx.log.gps.len(), 0);
        // buffer was scrubbed for another attempt
        assert_eq!(rx.gps_eph[7].subframes, 0);
    }

    #[test]
    fn lnav_week_fence() {
        let mut rx = Ublox::new("ZED-F9T");
        let frames = lnav_subframes(9, 500, 87, 7200, 7200);
        // transmission week era says week should be ~877
        let tow = 7500i64;
        let wn = (877 + 1024) as i64;
        rx.read_gps_lnav_subframe(9, &frames[0], tow, wn);
        rx.read_gps_lnav_subframe(9, &frames[1], tow, wn);
        rx.read_gps_lnav_subframe(9, &frames[2], tow, wn);
        assert_eq!(rx.log.gps.len(), 0); // bad week rejected
    }

    /// Builds an INAV page pair for the given word type. Only the
    /// IODnav and completion plumbing is exercised here.
    fn inav_page(word_type: u32, iod_nav: u16, sv_id: u8) -> [u32; 10] {
        let mut d = [0u32; 10];
        d[0] = (word_type & 0x3f) << 24 | ((iod_nav as u32) << 14);
        if word_type == 4 {
            d[0] |= (sv_id as u32) << 8;
        }
        d
    }

    #[test]
    fn inav_completion_bitmap() {
        let mut rx = Ublox::new("ZED-F9T");
        for wt in 1..=4 {
            rx.read_gal_inav_page(11, &inav_page(wt, 103, 11));
            assert_eq!(rx.log.galileo.len(), 0);
        }
        // word 5 completes the set
        rx.read_gal_inav_page(11, &inav_page(5, 103, 11));
        assert_eq!(rx.log.galileo.len(), 1);
        let eph = rx.log.galileo.iter().next().unwrap();
        assert_eq!(eph.svn(), 11);
        assert_eq!(eph.iod(), 103);
    }

    #[test]
    fn inav_iodnav_change_scrubs_partial_data() {
        let mut rx = Ublox::new("ZED-F9T");
        rx.read_gal_inav_page(12, &inav_page(1, 103, 12));
        assert_eq!(rx.gal_eph[12].subframes, 0x01);
        // a new issue of data starts transmitting
        rx.read_gal_inav_page(12, &inav_page(2, 104, 12));
        assert_eq!(rx.gal_eph[12].subframes, 0);
    }

    #[test]
    fn inav_alert_page_counted() {
        let mut rx = Ublox::new("ZED-F9T");
        let mut d = inav_page(1, 103, 13);
        d[0] |= 1 << 30; // alert page flag
        rx.read_gal_inav_page(13, &d);
        assert_eq!(rx.alert_pages, 1);
        assert_eq!(rx.gal_eph[13].subframes, 0);
    }

    #[test]
    fn signal_code_mapping() {
        let rx = Ublox::new("ZED-F9T");
        assert_eq!(
            rx.signal_codes(Constellation::GPS, 0),
            Some((ObservationCode::C1C, ObservationCode::L1C))
        );
        assert_eq!(
            rx.signal_codes(Constellation::GPS, 3),
            Some((ObservationCode::C2L, ObservationCode::L2L))
        );
        assert_eq!(
            rx.signal_codes(Constellation::Galileo, 1),
            Some((ObservationCode::C1B, ObservationCode::L1B))
        );
        assert_eq!(rx.signal_codes(Constellation::GPS, 7), None);
    }
}
