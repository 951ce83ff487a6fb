//! Clear-sky irradiance and a cloud-scaled GHI proxy.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::PI;

use crate::catalog::SamplePoint;

const SOLAR_CONSTANT: f64 = 1361.0;
const BULK_TRANSMITTANCE: f64 = 0.75;

/// Clear-sky global horizontal irradiance (W/m²) at `time` and `point`.
/// Zero when the sun is below the horizon.
pub fn clear_sky_ghi(time: DateTime<Utc>, point: SamplePoint) -> f64 {
    let n = time.ordinal() as f64;
    let eccentricity = 1.0 + 0.033 * (2.0 * PI * n / 365.0).cos();
    let declination = 23.45_f64.to_radians() * (2.0 * PI * (284.0 + n) / 365.0).sin();

    // Local solar time, roughly 4 minutes per degree of longitude.
    let minutes = (time.hour() * 60 + time.minute()) as f64 + point.lon * 4.0;
    let hour_angle = (minutes / 4.0 - 180.0).to_radians();
    let phi = point.lat.to_radians();

    let cos_zenith =
        phi.sin() * declination.sin() + phi.cos() * declination.cos() * hour_angle.cos();
    if cos_zenith <= 0.0 {
        return 0.0;
    }
    (SOLAR_CONSTANT * eccentricity * cos_zenith * BULK_TRANSMITTANCE).max(0.0)
}

/// Clearness index from cloud cover: `1 - 0.75·c^1.1`, kept within [0.05, 1].
pub fn cloud_to_kt(cloud_pct: f64) -> f64 {
    let c = cloud_pct.clamp(0.0, 100.0) / 100.0;
    (1.0 - 0.75 * c.powf(1.1)).clamp(0.05, 1.0)
}

pub fn ghi_proxy(time: DateTime<Utc>, point: SamplePoint, cloud_pct: f64) -> f64 {
    clear_sky_ghi(time, point) * cloud_to_kt(cloud_pct)
}
