// Domain layer: order model and the ports the workflow engine talks through.

pub mod model;
pub mod ports;
