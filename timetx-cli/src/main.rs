//! Batch production of CGGTTS and RINEX files from one day of GNSS
//! receiver and counter logs.

mod config;

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;

use clap::Parser;
use log::{error, info, warn};

use timetx::cggtts::{self, Cggtts};
use timetx::counter::CounterLog;
use timetx::pairing;
use timetx::prelude::*;
use timetx::rinex::{self, Rinex};
use timetx::rx::{javad::Javad, nvs::Nvs, trimble::Trimble, ublox::Ublox, Decode};
use timetx::utility;

use config::Config;

#[derive(Parser)]
#[command(name = "timetx", version, about = "GNSS time transfer file generator")]
struct Args {
    /// Full path to the configuration file
    #[arg(long, default_value = "etc/gpscv.conf")]
    configuration: String,

    /// MJD to process (default: yesterday)
    #[arg(short, long)]
    mjd: Option<i32>,

    /// Path to counter/timer measurements
    #[arg(long)]
    counter_path: Option<String>,

    /// Path to GNSS receiver logs
    #[arg(long)]
    receiver_path: Option<String>,

    /// Comment for the CGGTTS header
    #[arg(long)]
    comment: Option<String>,

    /// Disable use of sawtooth-corrected TIC measurements
    #[arg(long)]
    disable_tic: bool,

    /// Skip the RINEX navigation file
    #[arg(long)]
    no_navigation: bool,

    /// Write the receiver timing diagnostics file
    #[arg(long)]
    timing_diagnostics: bool,

    /// Write per-SV diagnostics files
    #[arg(long)]
    sv_diagnostics: bool,
}

/// Process log: plain timestamped lines, appended over the run.
struct ProcessLog {
    path: String,
}

impl ProcessLog {
    fn create(path: &str) -> Self {
        // erase any existing log
        let _ = File::create(path);
        Self {
            path: path.to_string(),
        }
    }

    fn message(&self, msg: &str) {
        info!("{}", msg);
        if let Ok(mut fd) = std::fs::OpenOptions::new().append(true).open(&self.path) {
            let _ = writeln!(fd, "{} {}", timestamp(), msg);
        }
    }
}

fn timestamp() -> String {
    let unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let mjd = 40_587 + unix.div_euclid(86_400);
    let tod = unix.rem_euclid(86_400);
    let (y, mo, d, _) = utility::mjd_to_date(mjd as i32);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        y,
        mo,
        d,
        tod / 3600,
        (tod % 3600) / 60,
        tod % 60
    )
}

/// Decompresses `<file>.gz` in place when the plain file is missing.
/// Returns true if the caller should recompress afterwards.
fn decompress(path: &str) -> Result<bool, std::io::Error> {
    if Path::new(path).exists() {
        return Ok(false);
    }
    let gz = format!("{}.gz", path);
    if !Path::new(&gz).exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("can't open {}", path),
        ));
    }
    info!("decompressing {}", gz);
    let mut decoder = flate2::read::GzDecoder::new(File::open(&gz)?);
    let mut content = Vec::new();
    decoder.read_to_end(&mut content)?;
    std::fs::write(path, content)?;
    std::fs::remove_file(&gz)?;
    Ok(true)
}

/// Recompresses a file unwrapped by [decompress]. Best effort: failure
/// is logged but not fatal.
fn compress(path: &str) {
    let run = || -> Result<(), std::io::Error> {
        info!("compressing {}", path);
        let content = std::fs::read(path)?;
        let gz = format!("{}.gz", path);
        let mut encoder =
            flate2::write::GzEncoder::new(File::create(&gz)?, flate2::Compression::default());
        encoder.write_all(&content)?;
        encoder.finish()?;
        std::fs::remove_file(path)?;
        Ok(())
    };
    if let Err(e) = run() {
        warn!("recompression of {} failed: {}", path, e);
    }
}

fn make_receiver(cfg: &Config) -> Option<Box<dyn Decode>> {
    let manufacturer = cfg.rx_manufacturer.as_str();
    if manufacturer.contains("Trimble") {
        Some(Box::new(Trimble::new(&cfg.rx_model, &cfg.rx_version)))
    } else if manufacturer.contains("Javad") {
        Some(Box::new(Javad::new(&cfg.rx_model)))
    } else if manufacturer.contains("NVS") {
        Some(Box::new(Nvs::new(&cfg.rx_model)))
    } else if manufacturer.contains("ublox") || manufacturer.contains("u-blox") {
        Some(Box::new(
            Ublox::new(&cfg.rx_model).with_constellations(&cfg.observations),
        ))
    } else {
        None
    }
}

fn write_timing_diagnostics(
    path: &str,
    pairs: &[pairing::MeasurementPair],
    dataset: &timetx::rx::Dataset,
    counter: &CounterLog,
) -> std::io::Result<()> {
    let mut fd = BufWriter::new(File::create(path)?);
    for pair in pairs.iter().filter(|p| p.is_matched()) {
        let cm = &counter.measurements[pair.counter.unwrap()];
        let rm = &dataset.measurements[pair.receiver.unwrap()];
        writeln!(
            fd,
            "{} {:e} {:e} {:e}",
            cm.tod(),
            cm.rdg,
            rm.sawtooth,
            rm.time_offset
        )?;
    }
    Ok(())
}

fn write_sv_diagnostics(tmp_path: &str, dataset: &timetx::rx::Dataset) -> std::io::Result<()> {
    for prn in 1..=32u8 {
        let path = format!("{}/G{}.dat", tmp_path, prn);
        let mut fd = BufWriter::new(File::create(path)?);
        for m in dataset.measurements.iter() {
            for svm in m.svs.iter() {
                if svm.sv.constellation == Constellation::GPS
                    && svm.sv.prn == prn
                    && svm.code == ObservationCode::C1C
                {
                    writeln!(fd, "{} {:14.3}", m.utc_tod(), svm.meas * timetx::CLIGHT)?;
                }
            }
        }
    }
    Ok(())
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();

    let mut cfg = Config::load(&args.configuration)?;
    if let Some(p) = &args.counter_path {
        cfg.counter_data_path = p.clone();
    }
    if let Some(p) = &args.receiver_path {
        cfg.receiver_data_path = p.clone();
    }
    if let Some(c) = &args.comment {
        cfg.cggtts_comments = c.clone();
    }

    let mjd = args.mjd.unwrap_or_else(|| {
        let unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        (unix / 86_400 + 40_587 - 1) as i32
    });

    let plog = ProcessLog::create(&format!("{}/timetx.log", cfg.processing_log_path));
    plog.message(&format!(
        "timetx version {} run started, MJD {}",
        env!("CARGO_PKG_VERSION"),
        mjd
    ));

    let mut antenna = Antenna::default().with_ecef(cfg.x, cfg.y, cfg.z);
    antenna.marker_name = cfg.marker_name.clone();
    antenna.marker_number = cfg.marker_number.clone();
    antenna.marker_type = cfg.marker_type.clone();
    antenna.antenna_number = cfg.antenna_number.clone();
    antenna.antenna_type = cfg.antenna_type.clone();
    antenna.delta_h = cfg.delta_h;
    antenna.delta_e = cfg.delta_e;
    antenna.delta_n = cfg.delta_n;
    antenna.frame = cfg.frame.clone();

    let mut receiver = make_receiver(&cfg)
        .ok_or_else(|| format!("unknown receiver manufacturer {}", cfg.rx_manufacturer))?;

    let receiver_file = format!("{}/{}.{}", cfg.receiver_data_path, mjd, cfg.rx_extension);
    let counter_file = format!("{}/{}.{}", cfg.counter_data_path, mjd, cfg.counter_extension);

    let recompress = decompress(&receiver_file)?;
    receiver.read_log(&receiver_file, mjd, &antenna)?;
    if recompress {
        compress(&receiver_file);
    }

    let recompress = decompress(&counter_file)?;
    let counter = CounterLog::read(&counter_file, cfg.counter_flip_sign)?;
    if recompress {
        compress(&counter_file);
    }

    let dataset = receiver.dataset();
    plog.message(&format!(
        "read {} lines, {} measurements, {} GPS + {} GAL ephemerides",
        dataset.stats.lines_read,
        dataset.measurements.len(),
        dataset.gps.len(),
        dataset.galileo.len()
    ));
    plog.message(&format!(
        "{} errors, {} bad measurements, {} bad sawtooth corrections",
        dataset.stats.error_count,
        dataset.stats.bad_measurements,
        dataset.stats.bad_sawtooth_corrections
    ));
    for (constellation, dropped) in dataset.stats.ambiguity_drops.iter() {
        plog.message(&format!(
            "dropped {} {} measurements (ms ambiguity failures)",
            dropped, constellation
        ));
    }
    plog.message(&format!(
        "read {} counter measurements",
        counter.measurements.len()
    ));

    let pairs = pairing::pair_measurements(&dataset.measurements, &counter)?;
    plog.message(&format!(
        "{} matched measurements",
        pairs.iter().filter(|p| p.is_matched()).count()
    ));

    let tic_enabled = !args.disable_tic;

    if cfg.create_cggtts {
        for output in &cfg.cggtts_outputs {
            let (code1, code2) =
                match cggtts::select_codes(&output.code, output.constellation) {
                    Some(codes) => codes,
                    None => {
                        error!(
                            "incompatible code {} for {}",
                            output.code, output.constellation
                        );
                        continue;
                    },
                };
            let mut writer = Cggtts::new(&antenna, receiver.info());
            writer.version = cfg.cggtts_version;
            writer.reference = cfg.cggtts_reference.clone();
            writer.lab = cfg.cggtts_lab.clone();
            writer.comments = cfg.cggtts_comments.clone();
            writer.rev_date = cfg.cggtts_rev_date;
            writer.cab_dly = cfg.antenna_cable_delay;
            writer.int_dly = output.internal_delay;
            writer.ref_dly = cfg.ref_cable_delay;
            writer.cal_id = output.cal_id.clone();
            writer.pps_offset = cfg.pps_offset;
            writer.min_track_length = cfg.min_track_length;
            writer.min_elevation = cfg.min_elevation;
            writer.max_dsg = cfg.max_dsg;
            writer.constellation = output.constellation;
            writer.code1 = code1;
            writer.code2 = code2;

            let fname = cggtts::filename(
                cfg.naming_convention,
                &output.path,
                mjd,
                output.constellation,
                &cfg.lab_id,
                &cfg.receiver_id,
            );
            plog.message(&format!("generating CGGTTS file {}", fname));
            let mut fd = BufWriter::new(File::create(&fname)?);
            let stats =
                writer.write_tracks(&mut fd, mjd, dataset, &counter, &pairs, tic_enabled)?;
            plog.message(&format!(
                "{} good tracks, {} low elevation, {} high DSG, {} short",
                stats.good_tracks, stats.low_elevation, stats.high_dsg, stats.short_tracks
            ));
        }
    }

    if cfg.create_rinex {
        let mut rinex = Rinex::new(&antenna, receiver.info());
        rinex.agency = cfg.agency.clone();
        rinex.observer = cfg.observer.clone();

        if !args.no_navigation {
            let fname = format!(
                "{}/{}",
                cfg.rinex_path,
                rinex::nav_filename(&cfg.marker_name, mjd)
            );
            plog.message(&format!("generating RINEX navigation file {}", fname));
            let mut fd = BufWriter::new(File::create(&fname)?);
            rinex.write_navigation_file(&mut fd, cfg.rinex_version, mjd, dataset)?;
        }

        let fname = format!(
            "{}/{}",
            cfg.rinex_path,
            rinex::obs_filename(&cfg.marker_name, mjd)
        );
        plog.message(&format!("generating RINEX observation file {}", fname));
        let mut fd = BufWriter::new(File::create(&fname)?);
        rinex.write_observation_file(
            &mut fd,
            cfg.rinex_version,
            mjd,
            30,
            dataset,
            &counter,
            &pairs,
            receiver.constellations(),
        )?;
    }

    if args.timing_diagnostics {
        write_timing_diagnostics("timing.dat", &pairs, dataset, &counter)?;
    }
    if args.sv_diagnostics {
        write_sv_diagnostics(&cfg.tmp_path, dataset)?;
    }

    plog.message(&format!(
        "run finished, elapsed time {:.1} s",
        started.elapsed().as_secs_f64()
    ));
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
        eprintln!("timetx: {}", e);
        std::process::exit(1);
    }
}
