//! ESP-IDF implementations of the hardware capabilities.

use std::time::{Duration, Instant};

use esp_idf_hal::adc::attenuation::DB_11;
use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::ADC1;
use esp_idf_hal::gpio::{Gpio0, InputOutput, InputPin, OutputPin, PinDriver, Pull};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::sys::EspError;
use esp_idf_sys as sys;

use crate::hal::{AnalogChannel, Clock, DigitalLine, Level, LineMode, SampleError};

/// DHT data line in open-drain mode with the internal pull-up enabled.
///
/// Open drain means "sense" is simply driving high: the pin lets go and the
/// pull-up (plus the external ~4.7k) holds the line until the sensor pulls it
/// down.
pub struct EspLine<'d, P>
where
    P: InputPin + OutputPin,
{
    pin: PinDriver<'d, P, InputOutput>,
}

impl<'d, P> EspLine<'d, P>
where
    P: InputPin + OutputPin,
{
    pub fn new(pin: impl Peripheral<P = P> + 'd) -> Result<Self, EspError> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        Ok(Self { pin })
    }
}

impl<P> DigitalLine for EspLine<'_, P>
where
    P: InputPin + OutputPin,
{
    type Error = EspError;

    fn set_mode(&mut self, mode: LineMode) -> Result<(), EspError> {
        match mode {
            LineMode::Drive => Ok(()),
            LineMode::Sense => self.pin.set_high(),
        }
    }

    fn write(&mut self, level: Level) -> Result<(), EspError> {
        match level {
            Level::Low => self.pin.set_low(),
            Level::High => self.pin.set_high(),
        }
    }

    fn read(&mut self) -> Level {
        if self.pin.is_high() {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Microsecond clock on top of `esp_timer`.
pub struct EspClock {
    origin: i64,
}

impl EspClock {
    pub fn new() -> Self {
        Self { origin: now_us() }
    }
}

impl Default for EspClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for EspClock {
    fn reset(&mut self) {
        self.origin = now_us();
    }

    fn elapsed_us(&self) -> u32 {
        (now_us() - self.origin) as u32
    }
}

fn now_us() -> i64 {
    unsafe { sys::esp_timer_get_time() }
}

/// MQ-2 analog output on GPIO0 (ADC1 channel 0), full 0..3.3 V range.
pub struct EspAdc<'d> {
    channel: AdcChannelDriver<'d, Gpio0, AdcDriver<'d, ADC1>>,
}

impl<'d> EspAdc<'d> {
    pub fn new(
        adc: impl Peripheral<P = ADC1> + 'd,
        pin: impl Peripheral<P = Gpio0> + 'd,
    ) -> Result<Self, EspError> {
        let adc = AdcDriver::new(adc)?;
        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        let channel = AdcChannelDriver::new(adc, pin, &config)?;
        Ok(Self { channel })
    }
}

impl AnalogChannel for EspAdc<'_> {
    type Error = EspError;

    // The one-shot driver bounds the conversion itself; a conversion that
    // completes later than `timeout` is still reported as a timeout.
    fn sample(&mut self, timeout: Duration) -> Result<u16, SampleError<EspError>> {
        let started = Instant::now();
        match self.channel.read_raw() {
            Ok(_) if started.elapsed() > timeout => Err(SampleError::Timeout),
            Ok(raw) => Ok(raw),
            Err(err) if err.code() == sys::ESP_ERR_TIMEOUT as i32 => Err(SampleError::Timeout),
            Err(err) => Err(SampleError::Fault(err)),
        }
    }
}
