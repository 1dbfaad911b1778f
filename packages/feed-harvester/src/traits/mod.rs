//! Capability traits consumed by the harvester.

pub mod driver;
