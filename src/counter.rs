//! Time-interval counter log loading.

use log::info;
use scan_fmt::scan_fmt;
use thiserror::Error;

/// Safety cap on the number of readings: a 1 Hz counter cannot produce
/// much more than a day of data.
const MAX_READINGS: usize = 90_000;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to open counter log")]
    Io(#[from] std::io::Error),
    #[error("counter log is too large (more than {MAX_READINGS} readings)")]
    TooLarge,
}

/// One 1 Hz reading of (receiver 1 PPS - reference 1 PPS).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterMeasurement {
    pub hh: u8,
    pub mm: u8,
    pub ss: u8,
    /// Counter reading, s. Signed: may be negative after a sign flip.
    pub rdg: f64,
}

impl CounterMeasurement {
    /// Reading timestamp as seconds of day
    pub fn tod(&self) -> u32 {
        self.hh as u32 * 3600 + self.mm as u32 * 60 + self.ss as u32
    }
}

/// A day of counter readings.
#[derive(Debug, Clone, Default)]
pub struct CounterLog {
    pub measurements: Vec<CounterMeasurement>,
}

impl CounterLog {
    /// Loads a counter log. Lines are `HH:MM:SS reading_in_seconds`;
    /// `#` and `%` lines are comments. Unparseable lines are skipped.
    /// `flip_sign` negates every reading, for counters wired with the
    /// start/stop channels swapped.
    pub fn read(path: &str, flip_sign: bool) -> Result<Self, Error> {
        let sign = if flip_sign { -1.0 } else { 1.0 };
        let content = std::fs::read_to_string(path)?;

        let mut measurements = Vec::new();
        for line in content.lines() {
            if line.starts_with('#') || line.starts_with('%') {
                continue;
            }
            if let (Some(hh), Some(mm), Some(ss), Some(rdg)) =
                scan_fmt!(line, "{d}:{d}:{d} {}", u8, u8, u8, f64)
            {
                measurements.push(CounterMeasurement {
                    hh,
                    mm,
                    ss,
                    rdg: sign * rdg,
                });
            }
            if measurements.len() > MAX_READINGS {
                return Err(Error::TooLarge);
            }
        }

        info!("read {} counter measurements from {}", measurements.len(), path);
        Ok(Self { measurements })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(name: &str, content: &str) -> String {
        let path = std::env::temp_dir().join(format!("tic-{}-{}.log", std::process::id(), name));
        let mut fd = std::fs::File::create(&path).unwrap();
        write!(fd, "{}", content).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn parses_readings_and_comments() {
        let path = write_log(
            "basic",
            "# TIC log\n\
             00:00:00 2.5E-6\n\
             00:00:01 2.6E-6\n\
             % trailer\n\
             junk line\n\
             00:00:02 -3.0E-7\n",
        );
        let log = CounterLog::read(&path, false).unwrap();
        assert_eq!(log.measurements.len(), 3);
        assert_eq!(log.measurements[0].tod(), 0);
        assert!((log.measurements[2].rdg + 3.0e-7).abs() < 1e-20);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn sign_flip() {
        let path = write_log("flip", "12:30:45 1.0E-6\n");
        let log = CounterLog::read(&path, true).unwrap();
        assert!((log.measurements[0].rdg + 1.0e-6).abs() < 1e-20);
        assert_eq!(log.measurements[0].tod(), 45045);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(CounterLog::read("/nonexistent/57000.tic", false).is_err());
    }
}
