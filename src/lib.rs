//! Change Sensor Library
//!
//! This library derives how much a Home Assistant entity changed over a
//! wall-clock-aligned period, optionally counting change only while a binary
//! gate entity is on.

pub mod alignment;
pub mod change_sensor;
pub mod config;
pub mod entity_reader;
pub mod flush_scheduler;
pub mod home_assistant;
pub mod reading;
pub mod sensor_coordinator;
pub mod state_publisher;
pub mod state_store;

// Re-export commonly used types for easier access
pub use alignment::{Clock, SystemClock};
pub use change_sensor::{ChangeSensor, ChangeSensorHandle, ReportedState, SensorEvent};
pub use config::SensorConfig;
pub use reading::Reading;
pub use sensor_coordinator::SensorCoordinator;
pub use state_store::StateStore;
