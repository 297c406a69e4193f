//! Minimal level-gated logger.
//!
//! The wider repository this server lives in has never pulled in an
//! external logging facade; call sites just use bare `warn!`/`info!`
//! macros backed by one process-global level. This keeps that convention.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> LogLevel {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

pub struct Logger;

impl Logger {
    pub fn set_level(level: LogLevel) {
        CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
    }

    pub fn level() -> LogLevel {
        LogLevel::from_u8(CURRENT_LEVEL.load(Ordering::Relaxed))
    }

    pub fn enabled(level: LogLevel) -> bool {
        level <= Self::level()
    }

    #[doc(hidden)]
    pub fn log(level: LogLevel, args: std::fmt::Arguments) {
        if Self::enabled(level) {
            eprintln!("[{}] {}", level.as_str(), args);
        }
    }
}

macro_rules! error {
    ($($arg:tt)*) => {
        $crate::util::Logger::log($crate::util::LogLevel::Error, format_args!($($arg)*))
    };
}

macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::util::Logger::log($crate::util::LogLevel::Warn, format_args!($($arg)*))
    };
}

macro_rules! info {
    ($($arg:tt)*) => {
        $crate::util::Logger::log($crate::util::LogLevel::Info, format_args!($($arg)*))
    };
}

macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::util::Logger::log($crate::util::LogLevel::Debug, format_args!($($arg)*))
    };
}

macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::util::Logger::log($crate::util::LogLevel::Trace, format_args!($($arg)*))
    };
}

pub use {debug, error, info, trace, warn};
