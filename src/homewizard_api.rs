use crate::discovery::DiscoveryResult;
use crate::error::FetchError;
use serde::Deserializer;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Thin HTTP client for the meter's local API. Every request carries the same bounded timeout.
#[derive(Clone)]
pub struct HomeWizardApi {
    client: reqwest::Client,
}

impl HomeWizardApi {
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Reads the device metadata record served at `path` (e.g. `/api/v1`).
    pub async fn read_device_info(&self, host: &str, path: &str) -> Result<DeviceInfo, FetchError> {
        let url = format!("http://{host}{path}");
        let body = self.get_json_object(&url).await?;
        serde_json::from_value(Value::Object(body)).map_err(|e| FetchError::Body {
            url,
            detail: e.to_string(),
        })
    }

    /// Fetches one sample from the data endpoint of the discovered API version.
    pub async fn read_sample(
        &self,
        host: &str,
        discovery: &DiscoveryResult,
    ) -> Result<RawSample, FetchError> {
        let url = format!("http://{host}{}/data", discovery.base_path());
        let body = self.get_json_object(&url).await?;
        Ok(RawSample::from_json(&body))
    }

    async fn get_json_object(&self, url: &str) -> Result<Map<String, Value>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(body)) => Ok(body),
            Ok(other) => Err(FetchError::Body {
                url: url.to_string(),
                detail: format!("expected a JSON object, got {other}"),
            }),
            Err(e) => Err(FetchError::Body {
                url: url.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

/// Metadata record returned by the version probe. Unknown keys are kept in `extra`.
/// Any JSON object decodes: the known keys accept strings or scalars, anything else reads as absent.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, deserialize_with = "lenient_text")]
    pub serial: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub product_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub product_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub firmware_version: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub api_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceInfo {
    /// Model string shown on the accessories.
    pub fn model(&self) -> &str {
        self.product_name
            .as_deref()
            .or(self.product_type.as_deref())
            .unwrap_or("P1 Meter")
    }

    pub fn serial(&self) -> &str {
        self.serial.as_deref().unwrap_or("unknown")
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match <Value as serde::Deserialize>::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    })
}

/// The meter's instantaneous report.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    /// Signed, negative while exporting
    pub active_power_w: f64,
    pub total_import_kwh: f64,
    pub total_export_kwh: f64,
    pub voltage_l1_v: Option<f64>,
}

impl RawSample {
    /// Lenient extraction: missing or non-numeric fields read as zero (voltage as absent).
    /// Falls back to the second-generation field names when the first-generation key is missing.
    pub fn from_json(body: &Map<String, Value>) -> Self {
        Self {
            active_power_w: first_number(body, &["active_power_w", "power_w"]).unwrap_or(0.0),
            total_import_kwh: first_number(body, &["total_power_import_kwh", "energy_import_kwh"])
                .unwrap_or(0.0),
            total_export_kwh: first_number(body, &["total_power_export_kwh", "energy_export_kwh"])
                .unwrap_or(0.0),
            voltage_l1_v: first_number(body, &["active_voltage_l1_v", "voltage_l1_v"]),
        }
    }
}

fn first_number(body: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| body.get(*key).and_then(Value::as_f64))
        .filter(|value| value.is_finite())
}
