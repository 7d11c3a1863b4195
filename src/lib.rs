//! Discover Broadlink devices on the local network and drive the switches behind S3 hubs.
extern crate byteorder;

#[macro_use]
extern crate serde_derive;

pub mod capabilities;
pub mod commands;
pub mod datatypes;
pub mod devices;
pub mod discovery;
pub mod error;
mod protocol;

pub use protocol::{DEFAULT_TIMEOUT, PORT};
