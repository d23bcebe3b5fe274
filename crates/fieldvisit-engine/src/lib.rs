#![forbid(unsafe_code)]

pub mod compliance;
pub mod geofence;
pub mod state;
pub mod tasks;
pub mod visit;
