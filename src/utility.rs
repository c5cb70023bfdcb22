//! Small numerical helpers shared across the pipeline: calendar
//! conversions, least-squares fits and Lagrange interpolation.

use polyfit_rs::polyfit_rs::polyfit;

/// Result of a linear least-squares fit evaluated at a chosen abscissa.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinearFit {
    /// Fitted value at the requested abscissa
    pub value: f64,
    /// Intercept of the fit
    pub intercept: f64,
    /// Slope of the fit
    pub slope: f64,
    /// RMS of the fit residuals
    pub rms: f64,
}

/// Fits y = a + b x and evaluates the fit at `xc`.
/// Returns None with fewer than 2 points or on a degenerate system.
pub fn linear_fit(x: &[f64], y: &[f64], xc: f64) -> Option<LinearFit> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let coeffs = polyfit(x, y, 1).ok()?;
    let (a, b) = (coeffs[0], coeffs[1]);
    let mut ss = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let r = yi - (a + b * xi);
        ss += r * r;
    }
    Some(LinearFit {
        value: a + b * xc,
        intercept: a,
        slope: b,
        rms: (ss / x.len() as f64).sqrt(),
    })
}

/// Fits y = a + b x + c x² and evaluates the fit at `xc`.
/// Returns None with fewer than 3 points or on a degenerate system.
pub fn quad_fit(x: &[f64], y: &[f64], xc: f64) -> Option<f64> {
    if x.len() < 3 || x.len() != y.len() {
        return None;
    }
    // Centre the abscissa before solving: seconds-of-day values are large
    // enough that the raw normal equations lose precision in a quadratic.
    let x0 = x[0];
    let xs: Vec<f64> = x.iter().map(|&xi| xi - x0).collect();
    let coeffs = polyfit(&xs, y, 2).ok()?;
    let dx = xc - x0;
    Some(coeffs[0] + coeffs[1] * dx + coeffs[2] * dx * dx)
}

/// Three-point Lagrange interpolation through (x1,y1), (x2,y2), (x3,y3),
/// evaluated at `x`.
pub fn lagrange3(x: f64, x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) -> f64 {
    y1 * (x - x2) * (x - x3) / ((x1 - x2) * (x1 - x3))
        + y2 * (x - x1) * (x - x3) / ((x2 - x1) * (x2 - x3))
        + y3 * (x - x1) * (x - x2) / ((x3 - x1) * (x3 - x2))
}

/// Converts an MJD to (year, month, day-of-month, day-of-year).
pub fn mjd_to_date(mjd: i32) -> (i32, u8, u8, u16) {
    // Fliegel & Van Flandern, via the Julian day number
    let jd = mjd as i64 + 2_400_001; // JD at noon of that MJD
    let l = jd + 68_569;
    let n = 4 * l / 146_097;
    let l = l - (146_097 * n + 3) / 4;
    let i = 4000 * (l + 1) / 1_461_001;
    let l = l - 1461 * i / 4 + 31;
    let j = 80 * l / 2447;
    let day = (l - 2447 * j / 80) as u8;
    let l = j / 11;
    let month = (j + 2 - 12 * l) as u8;
    let year = (100 * (n - 49) + i + l) as i32;
    let yday = (mjd - date_to_mjd(year, 1, 1) + 1) as u16;
    (year, month, day, yday)
}

/// Converts a calendar date to MJD.
pub fn date_to_mjd(year: i32, month: u8, day: u8) -> i32 {
    let (y, m) = if month <= 2 {
        (year - 1, month as i32 + 12)
    } else {
        (year, month as i32)
    };
    let a = y / 100;
    let b = 2 - a + a / 4;
    let jd = (365.25 * (y as f64 + 4716.0)).floor() as i64
        + (30.6001 * (m as f64 + 1.0)).floor() as i64
        + day as i64
        + b as i64
        - 1524;
    (jd - 2_400_001) as i32
}

/// Civil seconds of an epoch since the GPS origin (MJD 44244,
/// 1980-01-06 00:00:00), counted on an 86400 s day with no leap-second
/// accounting. This is the timestamp arithmetic the receiver logs and
/// the GPS week/TOW bookkeeping are defined on.
pub fn naive_gps_secs(e: hifitime::Epoch) -> i64 {
    let (y, mo, d, h, mi, s, _) = e.to_gregorian_utc();
    (date_to_mjd(y, mo, d) as i64 - 44244) * 86400
        + h as i64 * 3600
        + mi as i64 * 60
        + s as i64
}

/// Inverse of [naive_gps_secs]: builds the epoch at `t` civil seconds
/// past the GPS origin.
pub fn epoch_from_naive_gps_secs(t: i64) -> hifitime::Epoch {
    let mjd = 44244 + t.div_euclid(86400);
    let tod = t.rem_euclid(86400);
    let (y, mo, d, _) = mjd_to_date(mjd as i32);
    hifitime::Epoch::from_gregorian_utc(
        y,
        mo,
        d,
        (tod / 3600) as u8,
        ((tod % 3600) / 60) as u8,
        (tod % 60) as u8,
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naive_secs_at_origin() {
        let e = hifitime::Epoch::from_gregorian_utc(1980, 1, 6, 0, 0, 0, 0);
        assert_eq!(naive_gps_secs(e), 0);
        let e = hifitime::Epoch::from_gregorian_utc(1980, 1, 7, 0, 0, 30, 0);
        assert_eq!(naive_gps_secs(e), 86430);
    }

    #[test]
    fn mjd_round_trips() {
        // GPS epoch: 6 Jan 1980 is MJD 44244
        assert_eq!(date_to_mjd(1980, 1, 6), 44244);
        let (y, m, d, yday) = mjd_to_date(44244);
        assert_eq!((y, m, d), (1980, 1, 6));
        assert_eq!(yday, 6);

        assert_eq!(date_to_mjd(2016, 1, 17), 57404);
        let (y, m, d, _) = mjd_to_date(57404);
        assert_eq!((y, m, d), (2016, 1, 17));

        // leap year day-of-year
        let (_, _, _, yday) = mjd_to_date(date_to_mjd(2020, 12, 31));
        assert_eq!(yday, 366);
    }

    #[test]
    fn linear_fit_recovers_line() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 30.0).collect();
        let y: Vec<f64> = x.iter().map(|xi| 5.0 + 0.25 * xi).collect();
        let fit = linear_fit(&x, &y, 135.0).unwrap();
        assert!((fit.slope - 0.25).abs() < 1e-9);
        assert!((fit.value - (5.0 + 0.25 * 135.0)).abs() < 1e-9);
        assert!(fit.rms < 1e-9);
    }

    #[test]
    fn quad_fit_recovers_parabola() {
        let x: Vec<f64> = (0..15).map(|i| 3600.0 + i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|xi| {
                let t = xi - 3600.0;
                1.0 + 2.0 * t + 0.5 * t * t
            })
            .collect();
        let v = quad_fit(&x, &y, 3607.0).unwrap();
        assert!((v - (1.0 + 2.0 * 7.0 + 0.5 * 49.0)).abs() < 1e-6);
    }

    #[test]
    fn lagrange_exact_on_quadratic() {
        // y = x^2 passes exactly through a 3-point Lagrange form
        let y = lagrange3(2.5, 1.0, 1.0, 2.0, 4.0, 3.0, 9.0);
        assert!((y - 6.25).abs() < 1e-12);
    }
}
