//! Decides which accessories to create, bind or remove at startup.

use crate::sensor::{SensorIdentity, SensorKind};

/// What the host restored for one of our identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryRecord {
    pub identity: SensorIdentity,
    pub exists_in_host_store: bool,
    pub is_enabled_by_config: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Create(SensorIdentity),
    BindExisting(SensorIdentity, AccessoryRecord),
    Remove(AccessoryRecord),
}

impl Intent {
    pub fn identity(&self) -> &SensorIdentity {
        match self {
            Intent::Create(identity) | Intent::BindExisting(identity, _) => identity,
            Intent::Remove(record) => &record.identity,
        }
    }
}

/// Pure decision over the desired and restored sets. Intents come out in `SensorKind::ALL`
/// order; restored records outside that universe are ignored. A record's
/// `is_enabled_by_config` must match membership in `desired`.
pub fn reconcile(desired: &[SensorIdentity], restored: &[AccessoryRecord]) -> Vec<Intent> {
    SensorKind::ALL
        .iter()
        .filter_map(|&kind| {
            let identity = SensorIdentity::for_kind(kind);
            let enabled = desired.contains(&identity);
            let record = restored
                .iter()
                .find(|r| r.exists_in_host_store && r.identity.stable_id == identity.stable_id);
            if let Some(record) = record {
                debug_assert_eq!(
                    record.is_enabled_by_config, enabled,
                    "record for {kind} disagrees with the desired set"
                );
            }

            match (enabled, record) {
                (true, Some(record)) => Some(Intent::BindExisting(identity, record.clone())),
                (true, None) => Some(Intent::Create(identity)),
                (false, Some(record)) => Some(Intent::Remove(record.clone())),
                (false, None) => None,
            }
        })
        .collect()
}
