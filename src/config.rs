//! Scan configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::LAMP_SERVICE_UUID;
use crate::error::{Error, Result};

/// Settings for a timed lamp scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanConfig {
    /// How long a scan runs before it stops on its own.
    pub duration: Duration,
    /// Only devices advertising this service are reported.
    pub service_uuid: Uuid,
    /// Capacity of the scan event channel.
    pub event_capacity: usize,
}

impl ScanConfig {
    /// Default scan duration (10 seconds).
    pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);

    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the service UUID used to filter advertisements.
    pub fn with_service_uuid(mut self, service_uuid: Uuid) -> Self {
        self.service_uuid = service_uuid;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.duration.is_zero() {
            return Err(Error::InvalidParameter {
                name: "duration".to_string(),
                value: format!("{:?}", self.duration),
            });
        }

        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter {
                name: "event_capacity".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            duration: Self::DEFAULT_DURATION,
            service_uuid: LAMP_SERVICE_UUID,
            event_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.duration, Duration::from_secs(10));
        assert_eq!(config.service_uuid, LAMP_SERVICE_UUID);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let other = Uuid::from_u128(1);
        let config = ScanConfig::new()
            .with_duration(Duration::from_secs(3))
            .with_service_uuid(other);
        assert_eq!(config.duration, Duration::from_secs(3));
        assert_eq!(config.service_uuid, other);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = ScanConfig::new().with_duration(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidParameter { ref name, .. }) if name == "duration"
        ));

        let config = ScanConfig {
            event_capacity: 0,
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
