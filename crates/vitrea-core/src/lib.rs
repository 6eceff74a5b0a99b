// vitrea-core: Live device state and session management on top of vitrea-api.

pub mod catalog;
pub mod command;
pub mod config;
pub mod controller;
pub mod correlator;
pub mod error;
pub mod model;
pub mod probe;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::DeviceCommand;
pub use config::{ControllerConfig, ReconnectConfig};
pub use controller::{Controller, SessionState};
pub use correlator::{CommandCorrelator, CorrelationId};
pub use error::{CommandError, CoreError};
pub use probe::{ControllerInfo, probe};
pub use store::{DeviceStore, StateChange};
pub use stream::{ChangeStream, DeviceStream};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    BinarySensorState, CoverMotion, CoverState, Device, DeviceId, DeviceKind, DeviceState,
    FanState, LightState, ParseDeviceIdError, ScenarioState, SensorState, SwitchState,
    ThermostatState,
};

// Wire-level enums that appear in commands and state.
pub use vitrea_api::{
    AcType, FanSpeed, KeyPress, TemperatureUnit, ThermostatFan, ThermostatMode,
};
