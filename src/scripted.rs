//! Deterministic stand-ins for the hardware capabilities.
//!
//! All scripted parts share one [`Timeline`] counted in microseconds. Time
//! only moves when a delay is requested or the line is polled, so a
//! transaction replays identically on every run and every timeout branch
//! can be reached by stretching a segment of the waveform.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;

use crate::hal::{AnalogChannel, Clock, DigitalLine, Level, LineMode, SampleError};

/// Simulated time shared by every scripted part of one bench.
#[derive(Debug, Clone, Default)]
pub struct Timeline(Rc<Cell<u64>>);

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_us(&self) -> u64 {
        self.0.get()
    }

    pub fn advance_us(&self, us: u64) {
        self.0.set(self.0.get() + us);
    }
}

/// Clock and delay over a [`Timeline`].
#[derive(Debug, Clone)]
pub struct SimClock {
    timeline: Timeline,
    origin: u64,
}

impl SimClock {
    pub fn new(timeline: Timeline) -> Self {
        let origin = timeline.now_us();
        Self { timeline, origin }
    }
}

impl Clock for SimClock {
    fn reset(&mut self) {
        self.origin = self.timeline.now_us();
    }

    fn elapsed_us(&self) -> u32 {
        let elapsed = self.timeline.now_us() - self.origin;
        u32::try_from(elapsed).unwrap_or(u32::MAX)
    }
}

impl DelayNs for SimClock {
    fn delay_ns(&mut self, ns: u32) {
        self.timeline.advance_us(u64::from(ns.div_ceil(1_000)));
    }
}

/// Sequence of `(level, duration_us)` segments the device puts on the line
/// once the host releases it. After the last segment the line idles high.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Waveform {
    segments: Vec<(Level, u32)>,
}

impl Waveform {
    /// Response low that the host must see end within the ack budget.
    pub const ACK_LOW: usize = 0;
    /// Response high that the host must see end within the ack budget.
    pub const ACK_HIGH: usize = 1;

    pub const RESPONSE_US: u32 = 80;
    pub const BIT_LOW_US: u32 = 50;
    pub const ZERO_HIGH_US: u32 = 26;
    pub const ONE_HIGH_US: u32 = 70;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, level: Level, duration_us: u32) -> Self {
        self.segments.push((level, duration_us));
        self
    }

    /// A well-formed DHT11 response carrying `packet`, MSB first.
    pub fn dht_frame(packet: [u8; 5]) -> Self {
        let mut wave = Self::new()
            .push(Level::Low, Self::RESPONSE_US)
            .push(Level::High, Self::RESPONSE_US);
        for byte in packet {
            for shift in (0..8).rev() {
                let high = if (byte >> shift) & 1 == 1 {
                    Self::ONE_HIGH_US
                } else {
                    Self::ZERO_HIGH_US
                };
                wave = wave
                    .push(Level::Low, Self::BIT_LOW_US)
                    .push(Level::High, high);
            }
        }
        wave.push(Level::Low, Self::BIT_LOW_US)
    }

    /// Index of the low preamble in front of bit `bit`.
    pub const fn bit_low(bit: usize) -> usize {
        2 + 2 * bit
    }

    /// Index of the high phase carrying bit `bit`.
    pub const fn bit_high(bit: usize) -> usize {
        3 + 2 * bit
    }

    /// Replace the duration of one segment.
    pub fn stretch(mut self, index: usize, duration_us: u32) -> Self {
        if let Some(segment) = self.segments.get_mut(index) {
            segment.1 = duration_us;
        }
        self
    }

    pub fn segments(&self) -> &[(Level, u32)] {
        &self.segments
    }

    /// Level `offset_us` after the line was released.
    pub fn level_at(&self, offset_us: u64) -> Level {
        let mut start = 0u64;
        for &(level, duration) in &self.segments {
            let end = start + u64::from(duration);
            if offset_us < end {
                return level;
            }
            start = end;
        }
        Level::High
    }
}

/// Fault injected into a scripted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineFault;

/// Line that replays a [`Waveform`] from the moment it enters sense mode.
///
/// Every switch from drive to sense starts the next queued waveform; once
/// the queue is empty the last one is replayed again.
#[derive(Debug)]
pub struct ScriptedLine {
    timeline: Timeline,
    waveform: Waveform,
    pending: VecDeque<Waveform>,
    mode: LineMode,
    driven: Level,
    released_at: Option<u64>,
    poll_cost_us: u64,
    fail_writes: bool,
    writes: Vec<(u64, Level)>,
}

impl ScriptedLine {
    pub fn new(timeline: Timeline, waveform: Waveform) -> Self {
        Self {
            timeline,
            waveform: Waveform::new(),
            pending: VecDeque::from([waveform]),
            mode: LineMode::Sense,
            driven: Level::High,
            released_at: None,
            poll_cost_us: 1,
            fail_writes: false,
            writes: Vec::new(),
        }
    }

    /// Simulated time charged for every `read`.
    pub fn with_poll_cost(mut self, us: u64) -> Self {
        self.poll_cost_us = us;
        self
    }

    /// Make every `write` fail.
    pub fn failing(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Queue the response for a later transaction.
    pub fn then(mut self, waveform: Waveform) -> Self {
        self.pending.push_back(waveform);
        self
    }

    pub fn mode(&self) -> LineMode {
        self.mode
    }

    /// Levels the host drove, with the time they were driven.
    pub fn writes(&self) -> &[(u64, Level)] {
        &self.writes
    }
}

impl DigitalLine for ScriptedLine {
    type Error = LineFault;

    fn set_mode(&mut self, mode: LineMode) -> Result<(), LineFault> {
        if mode == LineMode::Sense && self.mode != LineMode::Sense {
            if let Some(next) = self.pending.pop_front() {
                self.waveform = next;
            }
            self.released_at = Some(self.timeline.now_us());
        }
        if mode == LineMode::Drive {
            self.released_at = None;
        }
        self.mode = mode;
        Ok(())
    }

    fn write(&mut self, level: Level) -> Result<(), LineFault> {
        if self.fail_writes {
            return Err(LineFault);
        }
        self.driven = level;
        self.writes.push((self.timeline.now_us(), level));
        Ok(())
    }

    fn read(&mut self) -> Level {
        let now = self.timeline.now_us();
        let level = match (self.mode, self.released_at) {
            (LineMode::Sense, Some(at)) => self.waveform.level_at(now - at),
            (LineMode::Sense, None) => Level::High,
            (LineMode::Drive, _) => self.driven,
        };
        self.timeline.advance_us(self.poll_cost_us);
        level
    }
}

/// Fault injected into a scripted converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcFault;

/// Converter that replays queued outcomes, then repeats its fallback sample.
#[derive(Debug, Default)]
pub struct ScriptedAdc {
    queue: VecDeque<Result<u16, SampleError<AdcFault>>>,
    fallback: Option<u16>,
    conversions: usize,
}

impl ScriptedAdc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converter that always returns `raw`.
    pub fn constant(raw: u16) -> Self {
        Self::new().repeat(raw)
    }

    pub fn then(mut self, raw: u16) -> Self {
        self.queue.push_back(Ok(raw));
        self
    }

    pub fn then_timeout(mut self) -> Self {
        self.queue.push_back(Err(SampleError::Timeout));
        self
    }

    pub fn then_fault(mut self) -> Self {
        self.queue.push_back(Err(SampleError::Fault(AdcFault)));
        self
    }

    /// Sample returned once the queue is drained. Without one, a drained
    /// converter times out.
    pub fn repeat(mut self, raw: u16) -> Self {
        self.fallback = Some(raw);
        self
    }

    /// Number of conversions requested so far.
    pub fn conversions(&self) -> usize {
        self.conversions
    }
}

impl AnalogChannel for ScriptedAdc {
    type Error = AdcFault;

    fn sample(&mut self, _timeout: Duration) -> Result<u16, SampleError<AdcFault>> {
        self.conversions += 1;
        match self.queue.pop_front() {
            Some(outcome) => outcome,
            None => self.fallback.ok_or(SampleError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_has_handshake_and_forty_bits() {
        let wave = Waveform::dht_frame([0x80, 0, 0, 0, 0x80]);
        assert_eq!(wave.segments().len(), 2 + 80 + 1);
        assert_eq!(wave.segments()[Waveform::bit_high(0)].1, Waveform::ONE_HIGH_US);
        assert_eq!(wave.segments()[Waveform::bit_high(1)].1, Waveform::ZERO_HIGH_US);
    }

    #[test]
    fn level_follows_segments_then_idles_high() {
        let wave = Waveform::new().push(Level::Low, 10).push(Level::High, 5).push(Level::Low, 5);
        assert_eq!(wave.level_at(0), Level::Low);
        assert_eq!(wave.level_at(9), Level::Low);
        assert_eq!(wave.level_at(10), Level::High);
        assert_eq!(wave.level_at(15), Level::Low);
        assert_eq!(wave.level_at(20), Level::High);
    }

    #[test]
    fn line_replays_from_release() {
        let timeline = Timeline::new();
        let mut line = ScriptedLine::new(timeline.clone(), Waveform::new().push(Level::Low, 3))
            .then(Waveform::new().push(Level::Low, 1));
        line.set_mode(LineMode::Drive).unwrap();
        line.write(Level::Low).unwrap();
        assert_eq!(line.read(), Level::Low);
        timeline.advance_us(100);
        line.set_mode(LineMode::Sense).unwrap();
        assert_eq!(line.read(), Level::Low);
        assert_eq!(line.read(), Level::Low);
        assert_eq!(line.read(), Level::Low);
        assert_eq!(line.read(), Level::High);

        line.set_mode(LineMode::Drive).unwrap();
        line.set_mode(LineMode::Sense).unwrap();
        assert_eq!(line.read(), Level::Low);
        assert_eq!(line.read(), Level::High);
    }

    #[test]
    fn clock_measures_between_resets() {
        let timeline = Timeline::new();
        let mut clock = SimClock::new(timeline.clone());
        timeline.advance_us(42);
        assert_eq!(clock.elapsed_us(), 42);
        clock.reset();
        clock.delay_us(7);
        assert_eq!(clock.elapsed_us(), 7);
        clock.delay_ns(1);
        assert_eq!(clock.elapsed_us(), 8);
    }

    #[test]
    fn adc_drains_queue_then_falls_back() {
        let mut adc = ScriptedAdc::new().then(1).then_timeout().repeat(9);
        let t = Duration::from_millis(100);
        assert_eq!(adc.sample(t), Ok(1));
        assert_eq!(adc.sample(t), Err(SampleError::Timeout));
        assert_eq!(adc.sample(t), Ok(9));
        assert_eq!(adc.conversions(), 3);
        assert_eq!(ScriptedAdc::new().sample(t), Err(SampleError::Timeout));
    }
}
