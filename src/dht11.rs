//! DHT11 single-wire humidity/temperature decoder.
//!
//! One transaction is: host request pulse, device acknowledgement, 40 data
//! bits whose value is the width of their high phase, then the checksum.

use core::fmt;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use crate::config::{ConfigError, DhtConfig};
use crate::hal::{Clock, DigitalLine, Level, LineMode};

pub const DATA_BITS: usize = 40;

pub mod checksum {
    /// Low byte of the sum of the four data bytes.
    pub fn compute(data: &[u8; 4]) -> u8 {
        data.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
    }

    pub fn verify(packet: &[u8; 5]) -> bool {
        compute(&[packet[0], packet[1], packet[2], packet[3]]) == packet[4]
    }
}

/// The five bytes of one frame: humidity int/frac, temperature int/frac, checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Packet(pub [u8; 5]);

impl Packet {
    pub fn humidity_integer(&self) -> u8 {
        self.0[0]
    }

    pub fn humidity_decimal(&self) -> u8 {
        self.0[1]
    }

    pub fn temperature_integer(&self) -> u8 {
        self.0[2]
    }

    pub fn temperature_decimal(&self) -> u8 {
        self.0[3]
    }

    pub fn checksum(&self) -> u8 {
        self.0[4]
    }

    pub fn checksum_valid(&self) -> bool {
        checksum::verify(&self.0)
    }

    /// Relative humidity in %.
    pub fn humidity(&self) -> f32 {
        f32::from(self.humidity_integer()) + f32::from(self.humidity_decimal()) * 0.1
    }

    /// Temperature in °C.
    pub fn temperature(&self) -> f32 {
        f32::from(self.temperature_integer()) + f32::from(self.temperature_decimal()) * 0.1
    }
}

/// A checksum-verified measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClimateReading {
    pub humidity: f32,
    pub temperature: f32,
    pub packet: Packet,
}

impl ClimateReading {
    fn from_packet(packet: Packet) -> Self {
        Self {
            humidity: packet.humidity(),
            temperature: packet.temperature(),
            packet,
        }
    }

    pub fn temperature_f(&self) -> f32 {
        self.temperature * 1.8 + 32.0
    }
}

/// Bounded wait that expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Device never released its response low.
    AckHigh,
    /// Device never ended its response high.
    AckLow,
    /// Low preamble of data bit `n` never ended.
    BitStart(u8),
    /// High phase of data bit `n` never ended.
    BitHigh(u8),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AckHigh => write!(f, "response high"),
            Self::AckLow => write!(f, "data preamble"),
            Self::BitStart(n) => write!(f, "bit {n} start"),
            Self::BitHigh(n) => write!(f, "bit {n} high"),
        }
    }
}

/// Outcome of the last operation, as reported to the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DhtStatus {
    #[default]
    Ok,
    Timeout,
    ProtocolError,
    ChecksumMismatch,
    InitError,
}

impl DhtStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Timeout => "TIMEOUT",
            Self::ProtocolError => "ERROR",
            Self::ChecksumMismatch => "CHECKSUM MISMATCH",
            Self::InitError => "INIT ERROR",
        }
    }
}

impl fmt::Display for DhtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum DhtError<E> {
    Timeout(Phase),
    /// The line was already high when the host released it.
    NoResponse,
    ChecksumMismatch { computed: u8, received: u8 },
    Line(E),
    InvalidConfig(ConfigError),
}

impl<E> DhtError<E> {
    pub fn status(&self) -> DhtStatus {
        match self {
            Self::Timeout(_) => DhtStatus::Timeout,
            Self::NoResponse | Self::Line(_) => DhtStatus::ProtocolError,
            Self::ChecksumMismatch { .. } => DhtStatus::ChecksumMismatch,
            Self::InvalidConfig(_) => DhtStatus::InitError,
        }
    }
}

impl<E: fmt::Debug> fmt::Display for DhtError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(phase) => write!(f, "DHT11 timeout waiting for {phase}"),
            Self::NoResponse => write!(f, "DHT11 did not pull the line low"),
            Self::ChecksumMismatch { computed, received } => write!(
                f,
                "DHT11 checksum mismatch: computed {computed:02X}, received {received:02X}"
            ),
            Self::Line(err) => write!(f, "DHT11 line error: {err:?}"),
            Self::InvalidConfig(err) => write!(f, "DHT11 config: {err}"),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for DhtError<E> {}

/// What the poller sees between reads.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DhtSnapshot {
    /// Last verified measurement. Failed reads never touch it.
    pub reading: ClimateReading,
    pub status: DhtStatus,
    pub checksum_ok: bool,
}

pub struct Dht11<L, C, D> {
    line: L,
    clock: C,
    delay: D,
    config: DhtConfig,
    snapshot: DhtSnapshot,
}

impl<L, C, D> Dht11<L, C, D>
where
    L: DigitalLine,
    C: Clock,
    D: DelayNs,
{
    pub fn new(line: L, clock: C, delay: D, config: DhtConfig) -> Result<Self, DhtError<L::Error>> {
        config.validate().map_err(DhtError::InvalidConfig)?;
        Ok(Self {
            line,
            clock,
            delay,
            config,
            snapshot: DhtSnapshot::default(),
        })
    }

    pub fn config(&self) -> &DhtConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &DhtSnapshot {
        &self.snapshot
    }

    pub fn status(&self) -> DhtStatus {
        self.snapshot.status
    }

    /// Run one transaction.
    ///
    /// Blocks for the request pulse (about 20 ms) plus the frame itself
    /// (about 5 ms, interrupts masked). Reads from the same sensor should be
    /// at least 1 s apart; there are no retries here.
    pub fn read(&mut self) -> Result<ClimateReading, DhtError<L::Error>> {
        match self.transaction() {
            Ok(reading) => {
                self.snapshot = DhtSnapshot {
                    reading,
                    status: DhtStatus::Ok,
                    checksum_ok: true,
                };
                Ok(reading)
            }
            Err(err) => {
                self.snapshot.status = err.status();
                self.snapshot.checksum_ok = false;
                Err(err)
            }
        }
    }

    /// Give the hardware back.
    pub fn release(self) -> (L, C, D) {
        (self.line, self.clock, self.delay)
    }

    fn transaction(&mut self) -> Result<ClimateReading, DhtError<L::Error>> {
        self.request()?;
        let packet = critical_section::with(|_cs| self.capture())?;
        debug!("DHT11 frame: {:02X?}", packet.0);

        if !packet.checksum_valid() {
            let computed = checksum::compute(&[packet.0[0], packet.0[1], packet.0[2], packet.0[3]]);
            warn!(
                "DHT11 checksum mismatch: computed {:02X}, received {:02X}, frame {:02X?}",
                computed,
                packet.checksum(),
                packet.0
            );
            return Err(DhtError::ChecksumMismatch {
                computed,
                received: packet.checksum(),
            });
        }

        Ok(ClimateReading::from_packet(packet))
    }

    // Start signal: hold low, then drive high briefly before letting go.
    fn request(&mut self) -> Result<(), DhtError<L::Error>> {
        self.line.set_mode(LineMode::Drive).map_err(DhtError::Line)?;
        self.line.write(Level::Low).map_err(DhtError::Line)?;
        self.delay.delay_us(micros(self.config.request_hold));
        self.line.write(Level::High).map_err(DhtError::Line)?;
        self.delay.delay_us(micros(self.config.release_hold));
        Ok(())
    }

    // Must run with preemption excluded: bit widths are tens of microseconds.
    fn capture(&mut self) -> Result<Packet, DhtError<L::Error>> {
        self.line.set_mode(LineMode::Sense).map_err(DhtError::Line)?;
        if self.line.read().is_high() {
            return Err(DhtError::NoResponse);
        }

        let ack = self.config.ack_timeout_us;
        self.wait_for(Level::High, ack, Phase::AckHigh)?;
        self.wait_for(Level::Low, ack, Phase::AckLow)?;

        let mut bytes = [0u8; 5];
        for bit in 0..DATA_BITS {
            let n = bit as u8;
            self.wait_for(Level::High, self.config.bit_timeout_us, Phase::BitStart(n))?;
            let width = self.high_width(Phase::BitHigh(n))?;
            let byte = &mut bytes[bit / 8];
            *byte = (*byte << 1) | u8::from(is_one(width, self.config.bit_threshold_us));
        }

        Ok(Packet(bytes))
    }

    fn wait_for(
        &mut self,
        level: Level,
        timeout_us: u32,
        phase: Phase,
    ) -> Result<(), DhtError<L::Error>> {
        self.clock.reset();
        loop {
            if self.line.read() == level {
                return Ok(());
            }
            if self.clock.elapsed_us() >= timeout_us {
                return Err(DhtError::Timeout(phase));
            }
        }
    }

    fn high_width(&mut self, phase: Phase) -> Result<u32, DhtError<L::Error>> {
        self.clock.reset();
        while self.line.read().is_high() {
            if self.clock.elapsed_us() > self.config.bit_timeout_us {
                return Err(DhtError::Timeout(phase));
            }
        }
        Ok(self.clock.elapsed_us())
    }
}

// High ~26-28 us is a 0, ~70 us is a 1.
fn is_one(width_us: u32, threshold_us: u32) -> bool {
    width_us >= threshold_us
}

fn micros(duration: Duration) -> u32 {
    u32::try_from(duration.as_micros()).unwrap_or(u32::MAX)
}
