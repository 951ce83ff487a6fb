//! Error taxonomy for the forecast pipeline.
//!
//! None of these are fatal for a whole refresh cycle. Provider errors are
//! absorbed by the ensemble, region errors by the driver.

#[derive(Debug, thiserror::Error)]
pub enum BulletinError {
    /// A single provider/point fetch failed: network error, non-2xx status or
    /// a malformed body.
    #[error("provider {provider} unavailable at ({lat}, {lon}): {reason}")]
    ProviderUnavailable {
        provider: String,
        lat: f64,
        lon: f64,
        reason: String,
    },

    #[error("no data for region {region}: {reason}")]
    NoDataForRegion { region: String, reason: String },

    #[error("invalid configuration for region {region}: {reason}")]
    Configuration { region: String, reason: String },
}

impl BulletinError {
    pub fn no_data(region: &str, reason: impl Into<String>) -> Self {
        BulletinError::NoDataForRegion {
            region: region.to_string(),
            reason: reason.into(),
        }
    }

    pub fn configuration(region: &str, reason: impl Into<String>) -> Self {
        BulletinError::Configuration {
            region: region.to_string(),
            reason: reason.into(),
        }
    }
}
