// Domain layer: core models, billing rules and ports (interfaces).

pub mod billing;
pub mod model;
pub mod ports;
