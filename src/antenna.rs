//! Antenna and marker description, fixed at configuration time.

use crate::geodesy;

/// Antenna / marker description. ECEF coordinates come from the
/// configuration file; the geodetic coordinates are derived once and
/// read-only thereafter.
#[derive(Debug, Clone, Default)]
pub struct Antenna {
    pub marker_name: String,
    pub marker_number: String,
    pub marker_type: String,
    pub antenna_number: String,
    pub antenna_type: String,
    /// ECEF X coordinate, m
    pub x: f64,
    /// ECEF Y coordinate, m
    pub y: f64,
    /// ECEF Z coordinate, m
    pub z: f64,
    /// Antenna height offset, m
    pub delta_h: f64,
    /// Antenna east offset, m
    pub delta_e: f64,
    /// Antenna north offset, m
    pub delta_n: f64,
    /// Reference frame of the coordinates, eg "ITRF2014"
    pub frame: String,
    /// Geodetic latitude, degrees (derived)
    pub latitude: f64,
    /// Geodetic longitude, degrees (derived)
    pub longitude: f64,
    /// Ellipsoidal height, m (derived)
    pub height: f64,
}

impl Antenna {
    /// Returns Self with the given ECEF coordinates and the geodetic
    /// coordinates derived from them.
    pub fn with_ecef(&self, x: f64, y: f64, z: f64) -> Self {
        let mut a = self.clone();
        a.x = x;
        a.y = y;
        a.z = z;
        let (lat, lon, h) = geodesy::ecef_to_lla(x, y, z);
        a.latitude = lat;
        a.longitude = lon;
        a.height = h;
        a
    }

    /// ECEF position as an array, m
    pub fn ecef(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geodetics_derived() {
        let ant = Antenna::default().with_ecef(-4_646_844.3, 2_553_749.7, -3_534_466.9);
        assert!(ant.latitude < 0.0); // southern hemisphere
        assert!(ant.longitude > 0.0);
        assert!(ant.height.abs() < 9000.0);
    }
}
