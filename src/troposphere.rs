//! Modelled tropospheric delay.

/// Tropospheric delay in ns for a satellite at `elevation` degrees, seen
/// from an antenna at ellipsoidal height `height` metres.
///
/// Two-term cosecant mapping with an exponential height scaling, the
/// standard single-frequency model of common-view time transfer.
pub fn delay(elevation_deg: f64, height_m: f64) -> f64 {
    let e = elevation_deg.to_radians();
    let d = 2.312 / (e * e + 1.904e-3).sqrt().sin() + 0.084 / (e * e + 0.6854e-3).sqrt().sin();
    d * (-0.1332e-3 * height_m).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zenith_delay_is_smallest() {
        let d90 = delay(90.0, 0.0);
        let d45 = delay(45.0, 0.0);
        let d10 = delay(10.0, 0.0);
        assert!(d90 < d45 && d45 < d10);
        // zenith delay of order 2.4 ns / ~8 ns of two-way is the usual scale
        assert!(d90 > 2.0 && d90 < 3.0);
    }

    #[test]
    fn altitude_thins_the_troposphere() {
        assert!(delay(45.0, 2000.0) < delay(45.0, 0.0));
    }
}
