mod log;

pub use log::{debug, error, info, trace, warn, LogLevel, Logger};
