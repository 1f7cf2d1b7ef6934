// Great-circle distance (spherical law of cosines) between two lat/long points in degrees.

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance in kilometers. Always >= 0; identical points give exactly 0.
///
/// The cosine argument is clamped to [-1, 1]: rounding can push it just past 1.0
/// for coincident points (or below -1.0 for antipodal ones), where `acos` is NaN.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    // sin² + cos² can also land just under 1.0, which acos turns into ~1e-4 km.
    if lat1 == lat2 && lon1 == lon2 {
        return 0.0;
    }
    let (lat1, lon1) = (lat1.to_radians(), lon1.to_radians());
    let (lat2, lon2) = (lat2.to_radians(), lon2.to_radians());
    let cos_angle = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * (lon1 - lon2).cos();
    cos_angle.clamp(-1.0, 1.0).acos() * EARTH_RADIUS_KM
}
