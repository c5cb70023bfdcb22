//! Configuration loading.
//!
//! The configuration is the conventional section/key/value text file
//! shared with the acquisition scripts:
//!
//! ```text
//! [antenna]
//! marker name = SYDN
//! x = -4646844.302
//! ...
//! ```
//!
//! Keys are case-insensitive. Missing required keys are fatal; missing
//! optional keys fall back to their defaults.

use std::collections::HashMap;
use std::str::FromStr;

use gnss_rs::prelude::Constellation;
use scan_fmt::scan_fmt;
use thiserror::Error;

use timetx::cggtts::{NamingConvention, Version as CggttsVersion};
use timetx::rinex::Version as RinexVersion;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to open the configuration file")]
    Io(#[from] std::io::Error),
    #[error("missing entry for {0}::{1}")]
    MissingKey(&'static str, &'static str),
    #[error("syntax error in {0}::{1}")]
    BadValue(&'static str, String),
    #[error("unknown receiver manufacturer {0}")]
    UnknownManufacturer(String),
    #[error("unknown constellation {0}")]
    UnknownConstellation(String),
}

/// One `[cggtts]` output section: a constellation + code pair written
/// to its own file.
#[derive(Debug, Clone)]
pub struct CggttsOutput {
    pub constellation: Constellation,
    pub code: String,
    pub cal_id: String,
    pub internal_delay: f64,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    // antenna
    pub marker_name: String,
    pub marker_number: String,
    pub marker_type: String,
    pub antenna_number: String,
    pub antenna_type: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub delta_h: f64,
    pub delta_e: f64,
    pub delta_n: f64,
    pub frame: String,

    // receiver
    pub rx_model: String,
    pub rx_manufacturer: String,
    pub observations: Vec<Constellation>,
    pub rx_version: String,
    pub pps_offset: f64,
    pub rx_extension: String,

    // counter
    pub counter_extension: String,
    pub counter_flip_sign: bool,

    // delays
    pub antenna_cable_delay: f64,
    pub ref_cable_delay: f64,

    // rinex
    pub create_rinex: bool,
    pub rinex_version: RinexVersion,
    pub observer: String,
    pub agency: String,

    // cggtts
    pub create_cggtts: bool,
    pub cggtts_version: CggttsVersion,
    pub cggtts_outputs: Vec<CggttsOutput>,
    pub cggtts_reference: String,
    pub cggtts_lab: String,
    pub cggtts_comments: String,
    pub cggtts_rev_date: (u16, u8, u8),
    pub min_track_length: i64,
    pub max_dsg: f64,
    pub min_elevation: f64,
    pub naming_convention: NamingConvention,
    pub lab_id: String,
    pub receiver_id: String,

    // paths
    pub rinex_path: String,
    pub receiver_data_path: String,
    pub counter_data_path: String,
    pub tmp_path: String,
    pub cggtts_path: String,
    pub processing_log_path: String,
}

struct Entries(HashMap<(String, String), String>);

impl Entries {
    fn parse(content: &str) -> Self {
        let mut map = HashMap::new();
        let mut section = String::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_lowercase();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(
                    (section.clone(), key.trim().to_lowercase()),
                    value.trim().to_string(),
                );
            }
        }
        Self(map)
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.0
            .get(&(section.to_lowercase(), key.to_lowercase()))
            .map(|s| s.as_str())
    }

    fn required(&self, section: &'static str, key: &'static str) -> Result<&str, Error> {
        self.get(section, key)
            .ok_or(Error::MissingKey(section, key))
    }

    fn required_f64(&self, section: &'static str, key: &'static str) -> Result<f64, Error> {
        self.required(section, key)?
            .parse()
            .map_err(|_| Error::BadValue(section, key.to_string()))
    }

    fn optional_f64(
        &self,
        section: &'static str,
        key: &'static str,
        default: f64,
    ) -> Result<f64, Error> {
        match self.get(section, key) {
            Some(v) => v
                .parse()
                .map_err(|_| Error::BadValue(section, key.to_string())),
            None => Ok(default),
        }
    }

    fn optional_str(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or(default).to_string()
    }
}

fn parse_constellation(s: &str) -> Result<Constellation, Error> {
    match s.to_uppercase().as_str() {
        "GPS" => Ok(Constellation::GPS),
        "GLONASS" => Ok(Constellation::Glonass),
        "BEIDOU" => Ok(Constellation::BeiDou),
        "GALILEO" => Ok(Constellation::Galileo),
        "QZSS" => Ok(Constellation::QZSS),
        other => Err(Error::UnknownConstellation(other.to_string())),
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str_content(&content)
    }

    fn from_str_content(content: &str) -> Result<Self, Error> {
        let e = Entries::parse(content);

        let create_cggtts = !e
            .optional_str("cggtts", "create", "yes")
            .eq_ignore_ascii_case("no");
        let create_rinex = !e
            .optional_str("rinex", "create", "yes")
            .eq_ignore_ascii_case("no");

        let mut observations = Vec::new();
        let obs = e.required("receiver", "observations")?.to_uppercase();
        for c in ["GPS", "GLONASS", "BEIDOU", "GALILEO", "QZSS"] {
            if obs.contains(c) {
                observations.push(parse_constellation(c)?);
            }
        }

        let mut cggtts_outputs = Vec::new();
        let mut cggtts_version = CggttsVersion::V2E;
        let mut cggtts_rev_date = (2016u16, 1u8, 1u8);
        let mut naming_convention = NamingConvention::Plain;
        if create_cggtts {
            cggtts_version = CggttsVersion::from_str(e.required("cggtts", "version")?)
                .map_err(|_| Error::BadValue("cggtts", "version".to_string()))?;
            let rev = e.required("cggtts", "revision date")?;
            match scan_fmt!(rev, "{d}-{d}-{d}", u16, u8, u8) {
                (Some(y), Some(m), Some(d)) => cggtts_rev_date = (y, m, d),
                _ => return Err(Error::BadValue("cggtts", "revision date".to_string())),
            }
            match e
                .optional_str("cggtts", "naming convention", "Plain")
                .to_uppercase()
                .as_str()
            {
                "BIPM" => naming_convention = NamingConvention::Bipm,
                "PLAIN" => naming_convention = NamingConvention::Plain,
                other => return Err(Error::BadValue("cggtts", format!("naming convention {}", other))),
            }

            for name in e.required("cggtts", "outputs")?.split(',') {
                let section = name.trim().to_lowercase();
                let constellation = parse_constellation(
                    e.0.get(&(section.clone(), "constellation".to_string()))
                        .ok_or(Error::MissingKey("output", "constellation"))?,
                )?;
                let code = e
                    .0
                    .get(&(section.clone(), "code".to_string()))
                    .ok_or(Error::MissingKey("output", "code"))?
                    .to_uppercase();
                let cal_id =
                    e.0.get(&(section.clone(), "bipm cal id".to_string()))
                        .cloned()
                        .unwrap_or_default();
                let internal_delay: f64 =
                    e.0.get(&(section.clone(), "internal delay".to_string()))
                        .ok_or(Error::MissingKey("output", "internal delay"))?
                        .parse()
                        .map_err(|_| Error::BadValue("output", "internal delay".to_string()))?;
                let path =
                    e.0.get(&(section.clone(), "path".to_string()))
                        .ok_or(Error::MissingKey("output", "path"))?
                        .clone();
                cggtts_outputs.push(CggttsOutput {
                    constellation,
                    code,
                    cal_id,
                    internal_delay,
                    path,
                });
            }
        }

        let mut rinex_version = RinexVersion::V2;
        if create_rinex {
            rinex_version = match e.required("rinex", "version")? {
                "2" => RinexVersion::V2,
                "3" => RinexVersion::V3,
                other => return Err(Error::BadValue("rinex", format!("version {}", other))),
            };
        }

        Ok(Self {
            marker_name: e.required("antenna", "marker name")?.to_string(),
            marker_number: e.required("antenna", "marker number")?.to_string(),
            marker_type: e.required("antenna", "marker type")?.to_string(),
            antenna_number: e.required("antenna", "antenna number")?.to_string(),
            antenna_type: e.required("antenna", "antenna type")?.to_string(),
            x: e.required_f64("antenna", "x")?,
            y: e.required_f64("antenna", "y")?,
            z: e.required_f64("antenna", "z")?,
            delta_h: e.optional_f64("antenna", "delta h", 0.0)?,
            delta_e: e.optional_f64("antenna", "delta e", 0.0)?,
            delta_n: e.optional_f64("antenna", "delta n", 0.0)?,
            frame: e.required("antenna", "frame")?.to_string(),

            rx_model: e.required("receiver", "model")?.to_string(),
            rx_manufacturer: e.required("receiver", "manufacturer")?.to_string(),
            observations,
            rx_version: e.optional_str("receiver", "version", ""),
            pps_offset: e.required_f64("receiver", "pps offset")?,
            rx_extension: e.optional_str("receiver", "file extension", "rx"),

            counter_extension: e.optional_str("counter", "file extension", "tic"),
            counter_flip_sign: e
                .optional_str("counter", "flip sign", "no")
                .eq_ignore_ascii_case("yes"),

            antenna_cable_delay: e.required_f64("delays", "antenna cable")?,
            ref_cable_delay: e.required_f64("delays", "reference cable")?,

            create_rinex,
            rinex_version,
            observer: e.optional_str("rinex", "observer", "UNKNOWN"),
            agency: e.optional_str("rinex", "agency", "UNKNOWN"),

            create_cggtts,
            cggtts_version,
            cggtts_outputs,
            cggtts_reference: if create_cggtts {
                e.required("cggtts", "reference")?.to_string()
            } else {
                String::new()
            },
            cggtts_lab: if create_cggtts {
                e.required("cggtts", "lab")?.to_string()
            } else {
                String::new()
            },
            cggtts_comments: e.optional_str("cggtts", "comments", ""),
            cggtts_rev_date,
            min_track_length: e.optional_f64("cggtts", "minimum track length", 390.0)? as i64,
            max_dsg: e.optional_f64("cggtts", "maximum dsg", 10.0)?,
            min_elevation: e.optional_f64("cggtts", "minimum elevation", 10.0)?,
            naming_convention,
            lab_id: e.optional_str("cggtts", "lab id", ""),
            receiver_id: e.optional_str("cggtts", "receiver id", ""),

            rinex_path: e.optional_str("paths", "rinex", "rinex"),
            receiver_data_path: e.optional_str("paths", "receiver data", "raw"),
            counter_data_path: e.optional_str("paths", "counter data", "raw"),
            tmp_path: e.optional_str("paths", "tmp", "tmp"),
            cggtts_path: e.optional_str("paths", "cggtts", "cggtts"),
            processing_log_path: e.optional_str("paths", "processing log", "logs"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"
[antenna]
marker name = SYDN
marker number = 50119M001
marker type = GEODETIC
antenna number = 1
antenna type = ASH700936D_M
x = -4646844.302
y = 2553749.712
z = -3534466.918
frame = ITRF2014

[receiver]
model = ZED-F9T
manufacturer = ublox
observations = GPS,GALILEO
pps offset = 23.0

[counter]
file extension = tic

[delays]
antenna cable = 145.2
reference cable = 2.5

[rinex]
version = 3
observer = tflab
agency = NMI

[cggtts]
version = V2E
outputs = cggtts-gps-c1
reference = UTC(XXX)
lab = XXX
revision date = 2016-01-04
naming convention = BIPM
lab id = AU
receiver id = 01

[cggtts-gps-c1]
constellation = GPS
code = C1
internal delay = 11.0
path = cggtts
"#;

    #[test]
    fn loads_complete_configuration() {
        let cfg = Config::from_str_content(GOOD).unwrap();
        assert_eq!(cfg.marker_name, "SYDN");
        assert!((cfg.x + 4_646_844.302).abs() < 1e-6);
        assert_eq!(cfg.rx_manufacturer, "ublox");
        assert_eq!(
            cfg.observations,
            vec![Constellation::GPS, Constellation::Galileo]
        );
        assert_eq!(cfg.cggtts_version, CggttsVersion::V2E);
        assert_eq!(cfg.cggtts_rev_date, (2016, 1, 4));
        assert_eq!(cfg.naming_convention, NamingConvention::Bipm);
        assert_eq!(cfg.cggtts_outputs.len(), 1);
        assert_eq!(cfg.cggtts_outputs[0].code, "C1");
        assert!((cfg.cggtts_outputs[0].internal_delay - 11.0).abs() < 1e-12);
        assert_eq!(cfg.rinex_version, RinexVersion::V3);
        // defaults
        assert_eq!(cfg.min_track_length, 390);
        assert!((cfg.max_dsg - 10.0).abs() < 1e-12);
        assert!(!cfg.counter_flip_sign);
    }

    #[test]
    fn missing_required_key_is_fatal() {
        let broken = GOOD.replace("pps offset = 23.0", "");
        assert!(matches!(
            Config::from_str_content(&broken),
            Err(Error::MissingKey("receiver", "pps offset"))
        ));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let shouty = GOOD.replace("marker name = SYDN", "MARKER NAME = SYDN");
        let cfg = Config::from_str_content(&shouty).unwrap();
        assert_eq!(cfg.marker_name, "SYDN");
    }
}
