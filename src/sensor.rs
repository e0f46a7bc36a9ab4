use std::fmt;
use uuid::Uuid;

/// The two logical sensors derived from the meter's signed power reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorKind {
    /// Power drawn from the grid
    Import,
    /// Power fed back to the grid
    Export,
}

impl SensorKind {
    /// Every kind in the order intents and dispatch are processed.
    pub const ALL: [SensorKind; 2] = [SensorKind::Import, SensorKind::Export];

    /// Name the stable identifier is generated from. Never change these, restored
    /// accessories are matched on the derived UUID.
    fn identity_name(self) -> &'static str {
        match self {
            SensorKind::Import => "homewizard-power-consumption",
            SensorKind::Export => "homewizard-power-return",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SensorKind::Import => "Power Consumption",
            SensorKind::Export => "Power Return",
        }
    }

    /// Suffix appended to the meter serial for the accessory serial number.
    pub fn serial_suffix(self) -> &'static str {
        match self {
            SensorKind::Import => "consumption",
            SensorKind::Export => "power-return",
        }
    }

    fn history_prefix(self) -> &'static str {
        match self {
            SensorKind::Import => "history_consumption",
            SensorKind::Export => "history_return",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Import => write!(f, "import"),
            SensorKind::Export => write!(f, "export"),
        }
    }
}

/// Identity of a logical sensor. Derived from the kind only, so it survives a meter swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorIdentity {
    pub kind: SensorKind,
    pub stable_id: Uuid,
}

impl SensorIdentity {
    pub fn for_kind(kind: SensorKind) -> Self {
        Self {
            kind,
            stable_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, kind.identity_name().as_bytes()),
        }
    }

    /// File name of this sensor's history log.
    pub fn history_log_name(&self) -> String {
        format!("{}_{}.jsonl", self.kind.history_prefix(), self.stable_id)
    }
}
