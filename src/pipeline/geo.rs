use crate::constants::CITY_MATCH_THRESHOLD_KM;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// North-American cities that wildfire and storm events are attributed to
pub const MONITORED_CITIES: &[(&str, f64, f64)] = &[
    ("New York", 40.71, -74.00),
    ("Boston", 42.36, -71.06),
    ("Washington DC", 38.90, -77.04),
    ("Miami", 25.76, -80.19),
    ("Tampa", 27.95, -82.46),
    ("New Orleans", 29.95, -90.07),
    ("Houston", 29.76, -95.37),
    ("Los Angeles", 34.05, -118.24),
    ("San Diego", 32.72, -117.16),
    ("San Francisco", 37.77, -122.41),
    ("Seattle", 47.61, -122.33),
    ("Chicago", 41.88, -87.63),
    ("Dallas", 32.78, -96.80),
    ("Atlanta", 33.75, -84.39),
    ("Vancouver", 49.28, -123.12),
    ("Victoria", 48.43, -123.37),
    ("Calgary", 51.05, -114.07),
    ("Edmonton", 53.55, -113.49),
    ("Regina", 50.45, -104.61),
    ("Saskatoon", 52.13, -106.67),
    ("Winnipeg", 49.90, -97.14),
    ("Toronto", 43.65, -79.38),
    ("Ottawa", 45.42, -75.69),
    ("Montreal", 45.50, -73.56),
    ("Quebec City", 46.81, -71.21),
    ("Halifax", 44.65, -63.57),
    ("St. John's", 47.56, -52.71),
];

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (r_lat1, r_lat2) = (lat1.to_radians(), lat2.to_radians());
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + r_lat1.cos() * r_lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Closest monitored city within the match threshold.
pub fn nearest_city(lat: f64, lon: f64) -> Option<&'static str> {
    MONITORED_CITIES
        .iter()
        .map(|(name, c_lat, c_lon)| (*name, haversine_km(lat, lon, *c_lat, *c_lon)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .filter(|(_, d)| *d <= CITY_MATCH_THRESHOLD_KM)
        .map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_matches_known_distance() {
        // New York to Boston is roughly 306 km
        let d = haversine_km(40.71, -74.00, 42.36, -71.06);
        assert!((d - 306.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn assigns_nearest_city() {
        assert_eq!(nearest_city(34.0, -118.0), Some("Los Angeles"));
        assert_eq!(nearest_city(45.6, -73.7), Some("Montreal"));
    }

    #[test]
    fn far_away_points_get_no_city() {
        assert_eq!(nearest_city(-33.9, 151.2), None);
    }
}
