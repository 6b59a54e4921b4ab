use anyhow::Result;
use esp_idf_hal::delay::{Ets, FreeRtos};
use esp_idf_hal::gpio::Gpio4;
use esp_idf_hal::peripherals::Peripherals;

use air_sense::esp::{EspAdc, EspClock, EspLine};
use air_sense::{DhtConfig, Dht11, GasConfig, Mq2};

// DHT11 data on GPIO4 (needs a pull-up), MQ-2 AO on GPIO0 / ADC1.
pub type ClimateSensor = Dht11<EspLine<'static, Gpio4>, EspClock, Ets>;
pub type GasSensor = Mq2<EspAdc<'static>, FreeRtos>;

pub struct Board {
    pub dht11: ClimateSensor,
    pub mq2: GasSensor,
}

impl Board {
    pub fn init(gas: GasConfig) -> Result<Self> {
        let Peripherals { pins, adc1, .. } = Peripherals::take()?;

        let line = EspLine::new(pins.gpio4)?;
        let dht11 = Dht11::new(line, EspClock::new(), Ets, DhtConfig::default())?;

        let adc = EspAdc::new(adc1, pins.gpio0)?;
        let mq2 = Mq2::new(adc, FreeRtos, gas)?;

        Ok(Self { dht11, mq2 })
    }
}
