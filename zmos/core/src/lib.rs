#![no_std]
#![deny(unsafe_code)]

//! # ZMOS Core
//!
//! Shared vocabulary of the ZMOS cooperative kernel: the error type, the task
//! event mask, tick arithmetic and the critical-section nesting counter that
//! every other layer uses to guard state shared with interrupt handlers.

use core::fmt;

pub mod critical;
pub mod events;
pub mod time;

pub use critical::{CriticalNest, CRITICAL};
pub use events::*;
pub use time::*;

/// ZMOS framework version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used throughout the kernel
pub type ZmResult<T> = Result<T, ZmError>;

/// Recoverable error conditions reported by kernel operations.
///
/// Heap corruption is not represented here; it halts the system instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZmError {
    /// Allocator pool exhausted
    OutOfMemory,
    /// Fixed-capacity task, timer or callback table is full
    TableFull,
    /// Invalid parameter (zero event mask, missing callback, ...)
    InvalidParam,
    /// Invalid size for allocation
    InvalidSize,
    /// Task handle does not name a registered task
    InvalidTask,
    /// Referenced timer or slot does not exist
    NotFound,
}

impl fmt::Display for ZmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZmError::OutOfMemory => write!(f, "Memory pool exhausted"),
            ZmError::TableFull => write!(f, "Kernel table is full"),
            ZmError::InvalidParam => write!(f, "Invalid parameter"),
            ZmError::InvalidSize => write!(f, "Invalid size for allocation"),
            ZmError::InvalidTask => write!(f, "Task is not registered"),
            ZmError::NotFound => write!(f, "No such timer"),
        }
    }
}

impl core::error::Error for ZmError {}

#[cfg(feature = "defmt")]
impl defmt::Format for ZmError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            ZmError::OutOfMemory => defmt::write!(fmt, "OutOfMemory"),
            ZmError::TableFull => defmt::write!(fmt, "TableFull"),
            ZmError::InvalidParam => defmt::write!(fmt, "InvalidParam"),
            ZmError::InvalidSize => defmt::write!(fmt, "InvalidSize"),
            ZmError::InvalidTask => defmt::write!(fmt, "InvalidTask"),
            ZmError::NotFound => defmt::write!(fmt, "NotFound"),
        }
    }
}
