// ── Domain model ──
//
// Addressing, per-kind state and the device snapshot handed to consumers.

mod device_id;
mod state;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use device_id::{DeviceId, ParseDeviceIdError};
pub use state::{
    BinarySensorState, CoverMotion, CoverState, DeviceKind, DeviceState, FanState, LightState,
    ScenarioState, SensorState, SwitchState, ThermostatState,
};

/// Immutable snapshot of one device as the store knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    pub kind: DeviceKind,
    /// Name from the installation catalog, if discovery ran.
    pub name: Option<String>,
    pub room: Option<String>,
    pub state: DeviceState,
    /// Learned from a push only and not yet confirmed by a resync or the
    /// catalog; the inferred kind may be wrong.
    pub provisional: bool,
    /// When the state last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Display name, falling back to the wire address.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}
