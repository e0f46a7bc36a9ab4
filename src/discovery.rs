//! Endpoint discovery: finds the newest API generation the meter answers on.

use crate::error::DiscoveryError;
use crate::homewizard_api::{DeviceInfo, HomeWizardApi};
use std::fmt;
use tracing::{debug, info};

/// API generations supported by the meter family, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V2,
    V1,
}

impl ApiVersion {
    /// Probe order. Earlier entries are preferred.
    pub const PREFERENCE: [ApiVersion; 2] = [ApiVersion::V2, ApiVersion::V1];

    /// Prefix every data request is built on once this version is selected.
    pub fn base_path(self) -> &'static str {
        match self {
            ApiVersion::V2 => "/api/v2",
            ApiVersion::V1 => "/api/v1",
        }
    }

    /// Paths probed for this version. The oldest generation also answers on bare `/api`.
    fn probe_paths(self) -> &'static [&'static str] {
        match self {
            ApiVersion::V2 => &["/api/v2"],
            ApiVersion::V1 => &["/api/v1", "/api"],
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiVersion::V2 => write!(f, "v2"),
            ApiVersion::V1 => write!(f, "v1"),
        }
    }
}

/// Outcome of a successful discovery. Fixed for the rest of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResult {
    api_version: ApiVersion,
    device: DeviceInfo,
}

impl DiscoveryResult {
    pub fn new(api_version: ApiVersion, device: DeviceInfo) -> Self {
        Self {
            api_version,
            device,
        }
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    pub fn base_path(&self) -> &'static str {
        self.api_version.base_path()
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }
}

/// Probes every candidate path in preference order and returns the first that answers
/// with a JSON object. No retries; the caller decides what a failure means.
pub async fn discover(api: &HomeWizardApi, host: &str) -> Result<DiscoveryResult, DiscoveryError> {
    let mut attempts = Vec::new();

    for version in ApiVersion::PREFERENCE {
        for path in version.probe_paths() {
            match api.read_device_info(host, path).await {
                Ok(device) => {
                    info!(
                        host,
                        api_version = %version,
                        probe = path,
                        model = device.model(),
                        serial = device.serial(),
                        "discovered meter"
                    );
                    return Ok(DiscoveryResult::new(version, device));
                }
                Err(e) => {
                    debug!(host, probe = path, error = %e, "probe failed");
                    attempts.push((path.to_string(), e.to_string()));
                }
            }
        }
    }

    Err(DiscoveryError::DeviceUnreachable {
        host: host.to_string(),
        attempts,
    })
}
