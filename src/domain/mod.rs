// Domain layer: data model shared by every component, plus the source/sink ports.

pub mod model;
pub mod ports;
