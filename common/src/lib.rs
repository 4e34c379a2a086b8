pub mod acquisition;
pub mod board;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod indicator;
pub mod link;
pub mod multipart;
pub mod persist;
pub mod platform;
pub mod report;
pub mod status;
pub mod templates;
pub mod topics;
pub mod update;
pub mod version;
pub mod web;

#[cfg(test)]
pub(crate) mod fakes;

pub use board::{format_identity, resolve, BoardConfig, PowerMode, Resolution, SensorKind};
pub use config::RuntimeConfig;
pub use controller::{Controller, NodeIo, NextStep, Terminal, UpdateIo};
pub use error::{CycleFailure, LinkError, UpdateError};
pub use persist::PersistentState;
pub use status::{SharedStatus, StatusSnapshot};
pub use topics::TopicSet;
