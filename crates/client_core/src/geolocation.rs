use std::time::Duration;

use async_trait::async_trait;
use shared::domain::Coordinates;

use crate::error::LocationError;

pub const DEFAULT_GEOLOCATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the device position a session is anchored to.
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, LocationError>;
}

/// A position known up front (configuration, command line).
pub struct FixedLocation {
    latitude: f64,
    longitude: f64,
}

impl FixedLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[async_trait]
impl GeolocationProvider for FixedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Ok(Coordinates::new(self.latitude, self.longitude)?)
    }
}

/// No position source was granted.
pub struct DeniedLocation;

#[async_trait]
impl GeolocationProvider for DeniedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::PermissionDenied)
    }
}

/// Resolves the provider's position, giving up after `timeout`.
pub async fn resolve_position(
    provider: &dyn GeolocationProvider,
    timeout: Duration,
) -> Result<Coordinates, LocationError> {
    match tokio::time::timeout(timeout, provider.current_position()).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Timeout(timeout.as_secs())),
    }
}
