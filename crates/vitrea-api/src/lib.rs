// vitrea-api: wire protocol client for the Vitrea VBox controller

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod parameter;
pub mod request;
pub mod types;

pub use codec::{VboxCodec, decode_all, decode_frame, encode_request};
pub use connection::{Connection, ConnectionConfig, ConnectionEvent, DisconnectReason, Frames};
pub use error::{ConnectError, FrameError, InvalidRequest, WriteError};
pub use frame::{AcStatus, ErrorCode, Frame, KeyStatus, Push, Response};
pub use parameter::{
    AcInfo, KeyInfo, KeypadInfo, ParameterCommand, ParameterReply, ParameterRequest, RoomInfo,
    ScenarioInfo,
};
pub use request::{AcSetting, ReplyClass, Request};
pub use types::{AcType, FanSpeed, KeyPress, KeyType, TemperatureUnit, ThermostatFan, ThermostatMode};
