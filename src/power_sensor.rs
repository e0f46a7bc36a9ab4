use crate::accessory_host::{AccessoryHost, AccessoryInformation, Characteristic, RestoredAccessory};
use crate::history::{HistoryEntry, HistoryRecorder};
use crate::homewizard_api::DeviceInfo;
use crate::sample_mapper::SensorReading;
use crate::sensor::{SensorIdentity, SensorKind};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lowest value written to the light level characteristic, which rejects zero.
/// Only a protocol floor: history always records the real wattage.
pub const PROTOCOL_FLOOR: f64 = 0.0001;

const MANUFACTURER: &str = "HomeWizard";

/// Vendor characteristics carried by the export accessory only.
const EXPORT_EXTRAS: [Characteristic; 3] = [
    Characteristic::EveConsumption,
    Characteristic::EveTotalConsumption,
    Characteristic::EveVoltage,
];

/// A live sensor bound to a host accessory and its own history log.
pub struct PowerSensor {
    identity: SensorIdentity,
    accessory_uuid: Uuid,
    history_log: String,
    host: Arc<dyn AccessoryHost>,
    history: Arc<dyn HistoryRecorder>,
}

impl PowerSensor {
    /// Configures the accessory's information and characteristics for this sensor kind.
    pub fn attach(
        identity: SensorIdentity,
        accessory: &RestoredAccessory,
        device: &DeviceInfo,
        host: Arc<dyn AccessoryHost>,
        history: Arc<dyn HistoryRecorder>,
    ) -> anyhow::Result<Self> {
        let kind = identity.kind;
        host.set_information(
            &accessory.uuid,
            &AccessoryInformation {
                manufacturer: MANUFACTURER.to_string(),
                model: device.model().to_string(),
                serial_number: format!("{}-{}", device.serial(), kind.serial_suffix()),
                service_name: kind.display_name().to_string(),
            },
        )?;

        if kind == SensorKind::Export {
            for characteristic in EXPORT_EXTRAS {
                host.add_characteristic(&accessory.uuid, characteristic)?;
            }
        }

        Ok(Self {
            identity,
            accessory_uuid: accessory.uuid,
            history_log: identity.history_log_name(),
            host,
            history,
        })
    }

    pub fn kind(&self) -> SensorKind {
        self.identity.kind
    }

    pub fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    /// Publishes one reading. Host and history failures are logged, never returned.
    pub fn beat(&self, reading: &SensorReading) {
        if reading.kind != self.identity.kind {
            warn!(
                sensor = %self.identity.kind,
                reading = %reading.kind,
                "ignoring reading for another sensor"
            );
            return;
        }

        self.publish(
            Characteristic::CurrentAmbientLightLevel,
            reading.instantaneous_w.max(PROTOCOL_FLOOR),
        );

        let energy = match self.identity.kind {
            SensorKind::Import => None,
            SensorKind::Export => {
                self.publish(Characteristic::EveConsumption, reading.instantaneous_w);
                self.publish(Characteristic::EveTotalConsumption, reading.cumulative_kwh);
                self.publish(Characteristic::EveVoltage, reading.voltage_v);
                Some(reading.cumulative_kwh)
            }
        };

        let entry = HistoryEntry {
            time: reading.timestamp_unix_seconds,
            power: reading.instantaneous_w,
            energy,
        };
        if let Err(e) = self.history.append(&self.history_log, &entry) {
            warn!(sensor = %self.identity.kind, error = %e, "failed to append history entry");
        }

        debug!(
            sensor = %self.identity.kind,
            watts = reading.instantaneous_w,
            kwh = reading.cumulative_kwh,
            volts = reading.voltage_v,
            "beat"
        );
    }

    fn publish(&self, characteristic: Characteristic, value: f64) {
        if let Err(e) = self
            .host
            .update_characteristic(&self.accessory_uuid, characteristic, value)
        {
            warn!(
                sensor = %self.identity.kind,
                characteristic = characteristic.name(),
                error = %e,
                "failed to publish characteristic"
            );
        }
    }
}
