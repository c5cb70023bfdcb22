//! End-to-end pipeline check: a synthetic u-blox day through decoding,
//! pairing and RINEX generation.

use std::fmt::Write as _;
use std::io::Write as _;

use timetx::counter::CounterLog;
use timetx::pairing;
use timetx::prelude::*;
use timetx::rinex::{self, Rinex};
use timetx::rx::{ublox::Ublox, Decode, ReceiverInfo};

fn hexstr(bytes: &[u8]) -> String {
    let mut s = String::new();
    for b in bytes {
        write!(s, "{:02x}", b).unwrap();
    }
    s
}

fn pc_time(tod: u32) -> String {
    format!("{:02}:{:02}:{:02}", tod / 3600, (tod % 3600) / 60, tod % 60)
}

/// UBX-RXM-RAWX with one GPS C1C observation.
fn rawx_line(tod: u32, tow: f64, wn: u16, leap: i8, svn: u8, pr_m: f64) -> String {
    let mut p = vec![0u8; 16 + 32 + 2];
    p[0..8].copy_from_slice(&tow.to_le_bytes());
    p[8..10].copy_from_slice(&wn.to_le_bytes());
    p[10] = leap as u8;
    p[11] = 1; // numMeas
    p[12] = 0x01; // leap seconds valid
    p[16..24].copy_from_slice(&pr_m.to_le_bytes()); // pseudorange, m
    p[36] = 0; // gnssId GPS
    p[37] = svn;
    p[38] = 0; // sigId: L1 C/A
    p[46] = 1; // trkStat: pr valid
    format!("0215 {} {}", pc_time(tod), hexstr(&p))
}

/// UBX-TIM-TP sawtooth, ps.
fn tp_line(tod: u32, sawtooth_ps: i32) -> String {
    let mut p = vec![0u8; 18];
    p[8..12].copy_from_slice(&sawtooth_ps.to_le_bytes());
    format!("0d01 {} {}", pc_time(tod), hexstr(&p))
}

/// UBX-NAV-TIMEUTC.
fn timeutc_line(tod: u32, y: u16, mo: u8, d: u8) -> String {
    let mut p = vec![0u8; 22];
    p[12..14].copy_from_slice(&y.to_le_bytes());
    p[14] = mo;
    p[15] = d;
    p[16] = (tod / 3600) as u8;
    p[17] = ((tod % 3600) / 60) as u8;
    p[18] = (tod % 60) as u8;
    p[19] = 0x07; // UTC valid
    format!("0121 {} {}", pc_time(tod), hexstr(&p))
}

/// UBX-NAV-CLOCK.
fn clock_line(tod: u32, bias_ns: i32) -> String {
    let mut p = vec![0u8; 22];
    p[4..8].copy_from_slice(&bias_ns.to_le_bytes());
    format!("0122 {} {}", pc_time(tod), hexstr(&p))
}

/// UBX-AID-HUI ionosphere / UTC parameters.
fn hui_line(tod: u32, leap: i16) -> String {
    let mut p = vec![0u8; 74];
    p[26..28].copy_from_slice(&leap.to_le_bytes()); // utcLS
    p[36..40].copy_from_slice(&1.1176e-8f32.to_le_bytes()); // klobA0
    p[52..56].copy_from_slice(&90_112.0f32.to_le_bytes()); // klobB0
    format!("0b02 {} {}", pc_time(tod), hexstr(&p))
}

/// UBX-RXM-SFRBX wrapper.
fn sfrbx_line(tod: u32, gnss_id: u8, sv_id: u8, words: &[u32]) -> String {
    let mut p = vec![0u8; 8 + 4 * words.len()];
    p[0] = gnss_id;
    p[1] = sv_id;
    p[4] = words.len() as u8;
    for (i, w) in words.iter().enumerate() {
        p[8 + 4 * i..12 + 4 * i].copy_from_slice(&w.to_le_bytes());
    }
    format!("0213 {} {}", pc_time(tod), hexstr(&p))
}

/// GPS LNAV subframes 1-3 for a minimal consistent ephemeris.
fn lnav_frames(week: u16, iode: u8, toc: u32, toe: u32) -> [[u32; 10]; 3] {
    let mut frames = [[0u32; 10]; 3];
    for (i, f) in frames.iter_mut().enumerate() {
        f[1] = ((i as u32 + 1) << 2) << 6;
    }
    frames[0][2] = ((week as u32) << 14) << 6;
    frames[0][7] = ((((iode as u32) & 0xff) << 16) | (toc / 16)) << 6;
    frames[1][2] = ((iode as u32) << 16) << 6;
    let sqrt_a = (5153.6f64 * 2f64.powi(19)) as u64;
    frames[1][7] = (((sqrt_a >> 24) & 0xff) as u32) << 6;
    frames[1][8] = ((sqrt_a & 0xffffff) as u32) << 6;
    frames[1][9] = ((toe / 16) << 8) << 6;
    frames[2][9] = ((iode as u32) << 16) << 6;
    frames
}

/// Galileo INAV word with the IODnav (and SV id for word 4) plumbed in.
fn inav_word(word_type: u32, iod_nav: u16, sv_id: u8) -> [u32; 8] {
    let mut d = [0u32; 8];
    d[0] = (word_type & 0x3f) << 24 | ((iod_nav as u32) << 14);
    if word_type == 4 {
        d[0] |= (sv_id as u32) << 8;
    }
    d
}

#[test]
fn ublox_day_to_rinex() {
    // MJD 57404 = Sunday 2016-01-17, GPS week 1880 (start of week)
    let mjd = 57404;
    let wn: u16 = 1880;
    let leap: i8 = 17;
    let nsecs = 200u32;

    let mut lines: Vec<String> = Vec::new();
    lines.push("# u-blox log".to_string());
    lines.push("@ receiver id annotation".to_string());

    for i in 0..=nsecs {
        let tow = (i as i32 + leap as i32) as f64;
        // a nominal 22000 km range
        lines.push(rawx_line(i, tow, wn, leap, 5, 22.0e6));
        if i == nsecs {
            break; // the closing epoch only needs its 0215
        }
        lines.push(tp_line(i, 1000 + i as i32));
        lines.push(timeutc_line(i, 2016, 1, 17));
        lines.push(clock_line(i, 50));
        if i == 0 {
            lines.push(hui_line(i, leap as i16));
            // broadcast navigation data for GPS SV 5 (truncated week)
            for f in lnav_frames(wn % 1024, 87, 7200, 7200).iter() {
                lines.push(sfrbx_line(i, 0, 5, f));
            }
            // and a complete INAV set for Galileo SV 11
            for wt in 1..=5 {
                lines.push(sfrbx_line(i, 2, 11, &inav_word(wt, 103, 11)));
            }
        }
    }

    let rx_path = std::env::temp_dir().join(format!("ublox-e2e-{}.rx", std::process::id()));
    let mut fd = std::fs::File::create(&rx_path).unwrap();
    for l in &lines {
        writeln!(fd, "{}", l).unwrap();
    }
    drop(fd);

    let tic_path = std::env::temp_dir().join(format!("ublox-e2e-{}.tic", std::process::id()));
    let mut fd = std::fs::File::create(&tic_path).unwrap();
    writeln!(fd, "# TIC log").unwrap();
    for i in 0..nsecs {
        writeln!(fd, "{} 2.5E-6", pc_time(i)).unwrap();
    }
    drop(fd);

    let antenna = Antenna::default().with_ecef(-4_646_844.3, 2_553_749.7, -3_534_466.9);
    let mut rx = Ublox::new("ZED-F9T");
    rx.read_log(rx_path.to_str().unwrap(), mjd, &antenna).unwrap();

    // both broadcast ephemerides were assembled
    assert_eq!(rx.log.gps.len(), 1);
    assert_eq!(rx.log.galileo.len(), 1);
    assert_eq!(rx.log.gps.iter().next().unwrap().svn(), 5);
    assert_eq!(rx.log.galileo.iter().next().unwrap().svn(), 11);

    // one epoch per second, contiguous, so only the first sawtooth
    // correction is unrecoverable
    assert_eq!(rx.log.measurements.len(), nsecs as usize);
    assert_eq!(rx.log.stats.bad_sawtooth_corrections, 1);
    assert_eq!(rx.log.leap_seconds, leap as i32);

    // every epoch kept its observation through the ambiguity fix
    assert!(rx.log.measurements.iter().all(|m| m.svs.len() == 1));

    // pair against the counter log
    let counter = CounterLog::read(tic_path.to_str().unwrap(), false).unwrap();
    let pairs = pairing::pair_measurements(&rx.log.measurements, &counter).unwrap();
    assert_eq!(pairs.iter().filter(|p| p.is_matched()).count(), nsecs as usize);

    // RINEX V3 observation file carries exactly one epoch per second
    let rinex = Rinex::new(&antenna, &ReceiverInfo::default());
    let mut buf = Vec::new();
    rinex
        .write_observation_file(
            &mut buf,
            rinex::Version::V3,
            mjd,
            1,
            &rx.log,
            &counter,
            &pairs,
            &[Constellation::GPS],
        )
        .unwrap();
    let text = String::from_utf8(buf).unwrap();
    let epochs = text.lines().filter(|l| l.starts_with('>')).count();
    assert_eq!(epochs, nsecs as usize);
    assert!(text.lines().filter(|l| l.starts_with("G05")).count() == nsecs as usize);

    // and the navigation file carries the assembled ephemeris
    let mut buf = Vec::new();
    rinex
        .write_navigation_file(&mut buf, rinex::Version::V3, mjd, &rx.log)
        .unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.lines().any(|l| l.starts_with("G05 2016")));

    std::fs::remove_file(rx_path).ok();
    std::fs::remove_file(tic_path).ok();
}
