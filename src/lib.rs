//! HomeWizard P1 grid bridge
//!
//! Polls a HomeWizard P1 meter's local HTTP API, splits the signed power reading into grid
//! import and grid export, and publishes both as accessory sensors with per-sensor history.

pub mod accessory_host;
pub mod config;
pub mod discovery;
pub mod error;
pub mod history;
pub mod homewizard_api;
pub mod power_sensor;
pub mod reconciler;
pub mod sample_mapper;
pub mod scheduler;
pub mod sensor;

// Re-export commonly used types for easier access
pub use accessory_host::{AccessoryHost, LocalAccessoryStore};
pub use config::{Config, SchedulerConfig};
pub use discovery::{discover, ApiVersion, DiscoveryResult};
pub use history::{FileHistory, HistoryRecorder};
pub use homewizard_api::{HomeWizardApi, RawSample};
pub use scheduler::{PollScheduler, SchedulerHandle, SchedulerState};
pub use sensor::{SensorIdentity, SensorKind};
