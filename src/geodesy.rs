//! ECEF / geodetic conversions and satellite look angles.

/// WGS84 semi-major axis, m
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Converts ECEF coordinates (m) to geodetic latitude (deg), longitude
/// (deg) and ellipsoidal height (m).
///
/// Iterative solution on the reduced latitude; converges to well below
/// a micrometre in a handful of iterations for terrestrial points.
pub fn ecef_to_lla(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let p = (x * x + y * y).sqrt();
    let lon = y.atan2(x);

    let mut lat = (z / (p * (1.0 - e2))).atan();
    let mut height = 0.0;
    for _ in 0..10 {
        let sl = lat.sin();
        let n = WGS84_A / (1.0 - e2 * sl * sl).sqrt();
        height = p / lat.cos() - n;
        let lat_next = (z / (p * (1.0 - e2 * n / (n + height)))).atan();
        if (lat_next - lat).abs() < 1e-13 {
            lat = lat_next;
            break;
        }
        lat = lat_next;
    }

    (lat.to_degrees(), lon.to_degrees(), height)
}

/// Converts geodetic coordinates (deg, deg, m) to ECEF (m).
pub fn lla_to_ecef(lat_deg: f64, lon_deg: f64, height: f64) -> (f64, f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let sl = lat.sin();
    let n = WGS84_A / (1.0 - e2 * sl * sl).sqrt();
    (
        (n + height) * lat.cos() * lon.cos(),
        (n + height) * lat.cos() * lon.sin(),
        (n * (1.0 - e2) + height) * sl,
    )
}

/// Azimuth and elevation (deg) of a satellite at ECEF position `sat`,
/// seen from an antenna at ECEF `ant` with geodetic latitude/longitude
/// `lat_deg`/`lon_deg`.
///
/// Azimuth is normalised to [0, 360); an elevation below the horizon is
/// clamped to zero.
pub fn sat_az_el(sat: [f64; 3], ant: [f64; 3], lat_deg: f64, lon_deg: f64) -> (f64, f64) {
    let slat = lat_deg.to_radians().sin();
    let clat = lat_deg.to_radians().cos();
    let slon = lon_deg.to_radians().sin();
    let clon = lon_deg.to_radians().cos();

    let dx = sat[0] - ant[0];
    let dy = sat[1] - ant[1];
    let dz = sat[2] - ant[2];

    let r_s = -slat * clon * dx - slat * slon * dy + clat * dz; // north
    let r_e = -slon * dx + clon * dy; // east
    let r_z = clat * clon * dx + clat * slon * dy + slat * dz; // up

    let range = (dx * dx + dy * dy + dz * dz).sqrt();
    let mut az = r_e.atan2(r_s).to_degrees();
    let mut el = (r_z / range).asin().to_degrees();

    if az < 0.0 {
        az += 360.0;
    }
    if el < 0.0 {
        el = 0.0;
    }
    (az, el)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lla_closure() {
        // Sydney-ish antenna
        let (x, y, z) = (-4_646_844.3, 2_553_749.7, -3_534_466.9);
        let (lat, lon, h) = ecef_to_lla(x, y, z);
        let (x2, y2, z2) = lla_to_ecef(lat, lon, h);
        assert!((x - x2).abs() < 1e-6);
        assert!((y - y2).abs() < 1e-6);
        assert!((z - z2).abs() < 1e-6);
    }

    #[test]
    fn equator_prime_meridian() {
        let (lat, lon, h) = ecef_to_lla(WGS84_A, 0.0, 0.0);
        assert!(lat.abs() < 1e-9);
        assert!(lon.abs() < 1e-9);
        assert!(h.abs() < 1e-6);
    }

    #[test]
    fn zenith_satellite() {
        // satellite straight up from an equatorial antenna: el = 90
        let ant = [WGS84_A, 0.0, 0.0];
        let sat = [WGS84_A + 20.0e6, 0.0, 0.0];
        let (_, el) = sat_az_el(sat, ant, 0.0, 0.0);
        assert!((el - 90.0).abs() < 1e-6);
    }

    #[test]
    fn below_horizon_clamped() {
        let ant = [WGS84_A, 0.0, 0.0];
        let sat = [-WGS84_A - 20.0e6, 0.0, 0.0];
        let (_, el) = sat_az_el(sat, ant, 0.0, 0.0);
        assert_eq!(el, 0.0);
    }
}
