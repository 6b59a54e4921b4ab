// main.rs
// ESP32-C6 air sensing node: DHT11 (temperature / humidity) + MQ-2 (gas / smoke / LPG)
//
// Pin map:
// DHT11 DATA = GPIO4 (open drain, pull-up)
// MQ-2  AO   = GPIO0 (ADC1 CH0, 11 dB attenuation)
//
// Build-time overrides (read with option_env!, see build.rs):
//   MQ2_R0_KOHM      skip clean-air calibration and use this baseline
//   MQ2_WARNING_PPM  warning threshold on the composite gas reading
//   MQ2_DANGER_PPM   danger threshold on the composite gas reading

#[cfg(target_os = "espidf")]
mod board;

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use std::time::{Duration, Instant};

    use air_sense::config::parse_override;
    use air_sense::{GasConfig, Interval, Tally};
    use esp_idf_svc::log::EspLogger;
    use esp_idf_sys as sys;
    use log::{error, info, warn};

    const DHT_PERIOD: Duration = Duration::from_millis(2000);
    const MQ2_PERIOD: Duration = Duration::from_millis(1000);
    const IDLE: Duration = Duration::from_millis(50);
    const STATS_EVERY: u32 = 60;

    sys::link_patches();
    EspLogger::initialize_default();

    let mut gas = GasConfig::default();
    if let Some(ppm) = parse_override("MQ2_WARNING_PPM", option_env!("MQ2_WARNING_PPM"))? {
        gas.thresholds.warning_ppm = ppm;
    }
    if let Some(ppm) = parse_override("MQ2_DANGER_PPM", option_env!("MQ2_DANGER_PPM"))? {
        gas.thresholds.danger_ppm = ppm;
    }
    gas.validate()?;
    info!(
        "MQ2 thresholds: warning {} ppm, danger {} ppm",
        gas.thresholds.warning_ppm, gas.thresholds.danger_ppm
    );

    let mut board = board::Board::init(gas)?;

    match parse_override("MQ2_R0_KOHM", option_env!("MQ2_R0_KOHM"))? {
        Some(r0) => {
            board.mq2.set_r0(r0)?;
            info!("MQ2 R0 fixed at {} kOhm", r0);
        }
        None => warn!("MQ2 R0 not set; first read calibrates, keep the sensor in clean air"),
    }

    let mut climate_every = Interval::new(DHT_PERIOD);
    let mut gas_every = Interval::new(MQ2_PERIOD);
    let mut climate_tally = Tally::default();
    let mut gas_tally = Tally::default();

    loop {
        let now = Instant::now();

        if climate_every.due(now) {
            let outcome = board.dht11.read();
            climate_tally.record(&outcome);
            match outcome {
                Ok(reading) => info!(
                    "DHT11: {:.1} °C ({:.1} °F), {:.0} %RH",
                    reading.temperature,
                    reading.temperature_f(),
                    reading.humidity
                ),
                Err(err) => error!("DHT11 read error [{}]: {}", err.status(), err),
            }
        }

        if gas_every.due(now) {
            let outcome = board.mq2.read_all();
            gas_tally.record(&outcome);
            match outcome {
                Ok(reading) => info!(
                    "MQ2: {:.1} ppm gas, {:.1} ppm smoke, {:.1} ppm LPG, Rs/R0 {:.2} [{}]",
                    reading.gas_ppm,
                    reading.smoke_ppm,
                    reading.lpg_ppm,
                    reading.ratio,
                    reading.level
                ),
                Err(err) => error!("MQ2 read error [{}]: {}", err.status(), err),
            }

            if gas_tally.reads % STATS_EVERY == 0 {
                info!("poll stats: DHT11 {}, MQ2 {}", climate_tally, gas_tally);
            }
        }

        std::thread::sleep(IDLE);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("air-sense firmware only runs on ESP-IDF targets; the drivers are tested with `cargo test`")
}
