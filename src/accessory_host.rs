//! Boundary to the accessory runtime that exposes the sensors, plus a local file-backed host.

use anyhow::{anyhow, bail, Context};
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

pub const EVE_VOLTAGE_UUID: &str = "E863F10A-079E-48FF-8F27-9C2605A29F52";
pub const EVE_AMPERAGE_UUID: &str = "E863F126-079E-48FF-8F27-9C2605A29F52";
pub const EVE_CONSUMPTION_UUID: &str = "E863F10D-079E-48FF-8F27-9C2605A29F52";
pub const EVE_TOTAL_CONSUMPTION_UUID: &str = "E863F10C-079E-48FF-8F27-9C2605A29F52";
const AMBIENT_LIGHT_LEVEL_UUID: &str = "0000006B-0000-1000-8000-0026BB765291";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Float,
    UInt16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    PairedRead,
    Notify,
}

/// Numeric characteristics the bridge publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Characteristic {
    /// Light sensor level, reused to surface watts in stock home apps
    CurrentAmbientLightLevel,
    EveConsumption,
    EveTotalConsumption,
    EveVoltage,
    EveAmperage,
}

impl Characteristic {
    pub fn uuid(self) -> &'static str {
        match self {
            Characteristic::CurrentAmbientLightLevel => AMBIENT_LIGHT_LEVEL_UUID,
            Characteristic::EveConsumption => EVE_CONSUMPTION_UUID,
            Characteristic::EveTotalConsumption => EVE_TOTAL_CONSUMPTION_UUID,
            Characteristic::EveVoltage => EVE_VOLTAGE_UUID,
            Characteristic::EveAmperage => EVE_AMPERAGE_UUID,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Characteristic::CurrentAmbientLightLevel => "Current Ambient Light Level",
            Characteristic::EveConsumption => "Consumption",
            Characteristic::EveTotalConsumption => "Total Consumption",
            Characteristic::EveVoltage => "Voltage",
            Characteristic::EveAmperage => "Amperage",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Characteristic::CurrentAmbientLightLevel => "lux",
            Characteristic::EveConsumption => "W",
            Characteristic::EveTotalConsumption => "kWh",
            Characteristic::EveVoltage => "V",
            Characteristic::EveAmperage => "A",
        }
    }

    pub fn format(self) -> Format {
        match self {
            Characteristic::EveConsumption => Format::UInt16,
            _ => Format::Float,
        }
    }

    pub fn permissions(self) -> [Permission; 2] {
        [Permission::PairedRead, Permission::Notify]
    }

    /// Smallest value the host accepts. The light level rejects zero and below.
    pub fn min_value(self) -> Option<f64> {
        match self {
            Characteristic::CurrentAmbientLightLevel => Some(0.0001),
            _ => None,
        }
    }

    /// Vendor characteristics must be declared on the service before they can be updated.
    pub fn is_custom(self) -> bool {
        !matches!(self, Characteristic::CurrentAmbientLightLevel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryInformation {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub service_name: String,
}

/// An accessory object known to the host, restored from its cache or freshly created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredAccessory {
    pub uuid: Uuid,
    pub display_name: String,
}

/// Operations the bridge needs from the accessory runtime.
pub trait AccessoryHost: Send + Sync {
    /// Accessories the host restored from its cache before startup.
    fn restored_accessories(&self) -> Vec<RestoredAccessory>;

    fn find_restored(&self, uuid: &Uuid) -> Option<RestoredAccessory> {
        self.restored_accessories()
            .into_iter()
            .find(|accessory| &accessory.uuid == uuid)
    }

    fn create_accessory(&self, uuid: Uuid, display_name: &str) -> RestoredAccessory;
    fn register_accessory(&self, accessory: &RestoredAccessory) -> anyhow::Result<()>;
    fn unregister_accessory(&self, uuid: &Uuid) -> anyhow::Result<()>;
    fn set_information(&self, uuid: &Uuid, information: &AccessoryInformation)
        -> anyhow::Result<()>;
    fn add_characteristic(&self, uuid: &Uuid, characteristic: Characteristic)
        -> anyhow::Result<()>;
    fn update_characteristic(
        &self,
        uuid: &Uuid,
        characteristic: Characteristic,
        value: f64,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedAccessory {
    uuid: Uuid,
    display_name: String,
    #[serde(default)]
    information: Option<AccessoryInformation>,
    #[serde(default)]
    characteristics: Vec<Characteristic>,
}

#[derive(Default)]
struct StoreState {
    restored: Vec<RestoredAccessory>,
    registered: BTreeMap<Uuid, CachedAccessory>,
    values: HashMap<(Uuid, Characteristic), f64>,
}

/// Host that keeps registered accessories in `accessories.json` and values in memory.
pub struct LocalAccessoryStore {
    cache_path: PathBuf,
    state: Mutex<StoreState>,
}

impl LocalAccessoryStore {
    pub const CACHE_FILE: &'static str = "accessories.json";

    /// Opens the store, restoring whatever a previous run registered.
    pub fn open(storage_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let cache_path = storage_dir.as_ref().join(Self::CACHE_FILE);
        let cached: Vec<CachedAccessory> = if cache_path.exists() {
            let raw = fs::read_to_string(&cache_path)
                .with_context(|| format!("failed to read {}", cache_path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", cache_path.display()))?
        } else {
            Vec::new()
        };

        info!(
            path = %cache_path.display(),
            restored = cached.len(),
            "opened accessory cache"
        );

        let restored = cached
            .iter()
            .map(|accessory| RestoredAccessory {
                uuid: accessory.uuid,
                display_name: accessory.display_name.clone(),
            })
            .collect();
        let registered = cached
            .into_iter()
            .map(|accessory| (accessory.uuid, accessory))
            .collect();

        Ok(Self {
            cache_path,
            state: Mutex::new(StoreState {
                restored,
                registered,
                values: HashMap::new(),
            }),
        })
    }

    /// Last value published for a characteristic, if any.
    pub fn characteristic(&self, uuid: &Uuid, characteristic: Characteristic) -> Option<f64> {
        self.state().values.get(&(*uuid, characteristic)).copied()
    }

    pub fn information(&self, uuid: &Uuid) -> Option<AccessoryInformation> {
        self.state()
            .registered
            .get(uuid)
            .and_then(|accessory| accessory.information.clone())
    }

    pub fn is_registered(&self, uuid: &Uuid) -> bool {
        self.state().registered.contains_key(uuid)
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &StoreState) -> anyhow::Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let accessories: Vec<&CachedAccessory> = state.registered.values().collect();
        let raw = serde_json::to_string_pretty(&accessories)?;
        fs::write(&self.cache_path, raw)
            .with_context(|| format!("failed to write {}", self.cache_path.display()))
    }
}

impl AccessoryHost for LocalAccessoryStore {
    fn restored_accessories(&self) -> Vec<RestoredAccessory> {
        self.state().restored.clone()
    }

    fn create_accessory(&self, uuid: Uuid, display_name: &str) -> RestoredAccessory {
        RestoredAccessory {
            uuid,
            display_name: display_name.to_string(),
        }
    }

    fn register_accessory(&self, accessory: &RestoredAccessory) -> anyhow::Result<()> {
        let mut state = self.state();
        state.registered.insert(
            accessory.uuid,
            CachedAccessory {
                uuid: accessory.uuid,
                display_name: accessory.display_name.clone(),
                information: None,
                characteristics: Vec::new(),
            },
        );
        self.persist(&state)
    }

    fn unregister_accessory(&self, uuid: &Uuid) -> anyhow::Result<()> {
        let mut state = self.state();
        if state.registered.remove(uuid).is_none() {
            bail!("accessory {uuid} is not registered");
        }
        state.values.retain(|(owner, _), _| owner != uuid);
        self.persist(&state)
    }

    fn set_information(
        &self,
        uuid: &Uuid,
        information: &AccessoryInformation,
    ) -> anyhow::Result<()> {
        let mut state = self.state();
        let accessory = state
            .registered
            .get_mut(uuid)
            .ok_or_else(|| anyhow!("accessory {uuid} is not registered"))?;
        if accessory.information.as_ref() == Some(information) {
            return Ok(());
        }
        accessory.information = Some(information.clone());
        self.persist(&state)
    }

    fn add_characteristic(
        &self,
        uuid: &Uuid,
        characteristic: Characteristic,
    ) -> anyhow::Result<()> {
        let mut state = self.state();
        let accessory = state
            .registered
            .get_mut(uuid)
            .ok_or_else(|| anyhow!("accessory {uuid} is not registered"))?;
        if accessory.characteristics.contains(&characteristic) {
            return Ok(());
        }
        accessory.characteristics.push(characteristic);
        self.persist(&state)
    }

    fn update_characteristic(
        &self,
        uuid: &Uuid,
        characteristic: Characteristic,
        value: f64,
    ) -> anyhow::Result<()> {
        let mut state = self.state();
        let accessory = state
            .registered
            .get(uuid)
            .ok_or_else(|| anyhow!("accessory {uuid} is not registered"))?;
        if characteristic.is_custom() && !accessory.characteristics.contains(&characteristic) {
            bail!(
                "characteristic {} is not declared on {}",
                characteristic.name(),
                accessory.display_name
            );
        }
        if let Some(min) = characteristic.min_value() {
            if value.is_nan() || value < min {
                bail!(
                    "{} rejects {value}, minimum is {min}",
                    characteristic.name()
                );
            }
        }
        debug!(%uuid, characteristic = characteristic.name(), value, "characteristic updated");
        state.values.insert((*uuid, characteristic), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accessory(name: &str) -> RestoredAccessory {
        RestoredAccessory {
            uuid: Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()),
            display_name: name.to_string(),
        }
    }

    #[test]
    fn test_register_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let consumption = accessory("Power Consumption");
        {
            let store = LocalAccessoryStore::open(dir.path()).unwrap();
            assert!(store.restored_accessories().is_empty());
            store.register_accessory(&consumption).unwrap();
        }

        let store = LocalAccessoryStore::open(dir.path()).unwrap();
        assert_eq!(store.restored_accessories(), vec![consumption.clone()]);
        assert_eq!(store.find_restored(&consumption.uuid), Some(consumption));
    }

    #[test]
    fn test_unregister_removes_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let returned = accessory("Power Return");
        {
            let store = LocalAccessoryStore::open(dir.path()).unwrap();
            store.register_accessory(&returned).unwrap();
            store.unregister_accessory(&returned.uuid).unwrap();
            assert!(!store.is_registered(&returned.uuid));
        }

        let store = LocalAccessoryStore::open(dir.path()).unwrap();
        assert!(store.restored_accessories().is_empty());
    }

    #[test]
    fn test_unregister_unknown_accessory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalAccessoryStore::open(dir.path()).unwrap();
        assert!(store
            .unregister_accessory(&accessory("ghost").uuid)
            .is_err());
    }

    #[test]
    fn test_light_level_rejects_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalAccessoryStore::open(dir.path()).unwrap();
        let consumption = accessory("Power Consumption");
        store.register_accessory(&consumption).unwrap();

        assert!(store
            .update_characteristic(&consumption.uuid, Characteristic::CurrentAmbientLightLevel, 0.0)
            .is_err());
        store
            .update_characteristic(
                &consumption.uuid,
                Characteristic::CurrentAmbientLightLevel,
                0.0001,
            )
            .unwrap();
        assert_eq!(
            store.characteristic(&consumption.uuid, Characteristic::CurrentAmbientLightLevel),
            Some(0.0001)
        );
    }

    #[test]
    fn test_custom_characteristic_must_be_declared() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalAccessoryStore::open(dir.path()).unwrap();
        let returned = accessory("Power Return");
        store.register_accessory(&returned).unwrap();

        assert!(store
            .update_characteristic(&returned.uuid, Characteristic::EveVoltage, 230.0)
            .is_err());

        store
            .add_characteristic(&returned.uuid, Characteristic::EveVoltage)
            .unwrap();
        store
            .update_characteristic(&returned.uuid, Characteristic::EveVoltage, 230.0)
            .unwrap();
        assert_eq!(
            store.characteristic(&returned.uuid, Characteristic::EveVoltage),
            Some(230.0)
        );
    }

    #[test]
    fn test_information_persists() {
        let dir = tempfile::tempdir().unwrap();
        let consumption = accessory("Power Consumption");
        let information = AccessoryInformation {
            manufacturer: "HomeWizard".to_string(),
            model: "P1 meter".to_string(),
            serial_number: "abc-consumption".to_string(),
            service_name: "Power Consumption".to_string(),
        };
        {
            let store = LocalAccessoryStore::open(dir.path()).unwrap();
            store.register_accessory(&consumption).unwrap();
            store.set_information(&consumption.uuid, &information).unwrap();
        }

        let store = LocalAccessoryStore::open(dir.path()).unwrap();
        assert_eq!(store.information(&consumption.uuid), Some(information));
    }

    #[test]
    fn test_eve_identifiers() {
        assert_eq!(Characteristic::EveConsumption.uuid(), EVE_CONSUMPTION_UUID);
        assert_eq!(Characteristic::EveConsumption.format(), Format::UInt16);
        assert_eq!(Characteristic::EveTotalConsumption.unit(), "kWh");
        assert_eq!(Characteristic::EveVoltage.unit(), "V");
        assert_eq!(
            Characteristic::EveVoltage.permissions(),
            [Permission::PairedRead, Permission::Notify]
        );
        assert!(!Characteristic::CurrentAmbientLightLevel.is_custom());
    }
}
