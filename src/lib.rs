pub mod duplex;
pub mod example;
pub mod state_machine;

/// Address the example server listens on unless `LISTEN_ADDR` is set.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:50052";

/// Address the example client dials unless `SERVER_ADDR` is set.
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:50052";
