// ── Device state store ──
//
// Lock-free device storage with push-based change notification.

mod device_store;
mod reconcile;

pub use device_store::{DeviceStore, StateChange};
