//! Device lifecycle and decision engine of the yaha irrigation station.
//!
//! Everything here is synchronous and owns its collaborators explicitly.
//! Hardware is reached through the traits in [`hal`].

pub mod device;
pub mod devices;
pub mod duty;
pub mod error;
pub mod hal;
pub mod irrigation;
pub mod message;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod registry;
pub mod rtc;
pub mod store;

pub use device::{Broadcasts, Broker, Device, FormDescriptor, Priority, SleepPolicy};
pub use duty::{BootOutcome, Controller, Decision, DutySettings};
pub use error::{IrrigationError, LayoutError, StoreError};
pub use message::{ConfigMap, Message};
pub use registry::{Registry, Restore};
