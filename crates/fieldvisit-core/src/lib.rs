#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod evidence;
pub mod geo;
pub mod state;
pub mod traits;
pub mod types;
