//! Concrete devices of a yaha station.
//!
//! Persisted records, in the order the station registers them:
//!
//! | device     | bytes |
//! |------------|-------|
//! | softap     | 115   |
//! | wlan       | 102   |
//! | broker     | 192   |
//! | battery    | 19    |
//! | irrigation | 16    |
//!
//! The remaining devices keep nothing in the store.

pub mod battery;
pub mod bme280;
pub mod broker;
pub mod digital;
pub mod irrigation;
pub mod motion;
pub mod runtime;
pub mod softap;
pub mod switch;
pub mod wlan;

pub use battery::Battery;
pub use bme280::Bme280;
pub use broker::BrokerProxy;
pub use digital::DigitalSensor;
pub use irrigation::IrrigationController;
pub use motion::Motion;
pub use runtime::Runtime;
pub use softap::SoftAp;
pub use switch::Switch;
pub use wlan::Wlan;
