//! Hardware capabilities the sensor drivers are written against.
//!
//! The drivers never touch a peripheral directly. On the board they get the
//! ESP-IDF adapters from [`crate::esp`]; in tests they get the scripted
//! adapters from [`crate::scripted`].

use core::fmt;
use std::time::Duration;

/// Logic level on a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

/// Direction of a single-wire line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    /// Push-pull output, the host owns the line.
    Drive,
    /// Input, the line floats to its pull-up unless the device pulls it down.
    Sense,
}

/// One GPIO-like line that can be switched between driving and sensing.
pub trait DigitalLine {
    type Error: fmt::Debug;

    fn set_mode(&mut self, mode: LineMode) -> Result<(), Self::Error>;

    /// Drive the line to `level`. Only meaningful in [`LineMode::Drive`].
    fn write(&mut self, level: Level) -> Result<(), Self::Error>;

    /// Sample the current line level.
    fn read(&mut self) -> Level;
}

/// Resettable monotonic microsecond counter used to time pulses.
///
/// The counter only has to stay monotonic between a `reset` and the reads
/// that follow it; wrap-around across transactions is fine.
pub trait Clock {
    fn reset(&mut self);
    fn elapsed_us(&self) -> u32;
}

/// Failure of a single analog conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleError<E> {
    /// The conversion did not complete within the allowed wait.
    Timeout,
    /// The converter reported a fault.
    Fault(E),
}

impl<E: fmt::Debug> fmt::Display for SampleError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "ADC conversion timed out"),
            Self::Fault(err) => write!(f, "ADC fault: {err:?}"),
        }
    }
}

/// Single-shot analog channel.
pub trait AnalogChannel {
    type Error: fmt::Debug;

    /// Run one conversion and return a sample in `[0, resolution)`,
    /// giving up after `timeout`.
    fn sample(&mut self, timeout: Duration) -> Result<u16, SampleError<Self::Error>>;
}
