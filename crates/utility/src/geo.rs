pub const MAX_LATITUDE: f64 = 90.0;
pub const MAX_LONGITUDE: f64 = 180.0;

pub fn is_valid_latitude(latitude: f64) -> bool {
    latitude.is_finite() && latitude.abs() <= MAX_LATITUDE
}

pub fn is_valid_longitude(longitude: f64) -> bool {
    longitude.is_finite() && longitude.abs() <= MAX_LONGITUDE
}

/// A point fix is usable when both components are finite and in range.
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    is_valid_latitude(latitude) && is_valid_longitude(longitude)
}
