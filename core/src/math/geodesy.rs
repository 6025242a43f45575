/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

pub struct Geodesy;

impl Geodesy {
    /// Great-circle distance in meters between two `(lat, lon)` pairs in degrees.
    pub fn haversine_m(from: (f64, f64), to: (f64, f64)) -> f64 {
        let (lat1, lon1) = from;
        let (lat2, lon2) = to;
        let delta_lat = (lat2 - lat1).to_radians();
        let delta_lon = (lon2 - lon1).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.to_radians().cos() * lat2.to_radians().cos() * (delta_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    /// Displacement in whole centimeters.
    pub fn displacement_cm(from: (f64, f64), to: (f64, f64)) -> f64 {
        (Self::haversine_m(from, to) * 100.0).round()
    }
}
