//! MQ-2 gas concentration estimator.
//!
//! The sensor sits in a voltage divider with a load resistor. Its resistance
//! `Rs` is recovered from the ADC sample, normalised against the clean-air
//! baseline `R0`, and pushed through one power-law curve per gas family.

use core::fmt;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::config::{AdcConfig, ConfigError, GasConfig};
use crate::hal::{AnalogChannel, SampleError};

/// Below this output voltage the divider is treated as open.
pub const VOLTAGE_FLOOR: f32 = 0.1;
/// Resistance reported when the output voltage is below [`VOLTAGE_FLOOR`], kΩ.
pub const HIGH_RESISTANCE: f32 = 999_999.0;
/// Baselines below this are not trusted for a ratio.
pub const R0_FLOOR: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GasLevel {
    #[default]
    Normal,
    Warning,
    Danger,
}

impl GasLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Danger => "DANGER",
        }
    }
}

impl fmt::Display for GasLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GasStatus {
    #[default]
    Ok,
    Error,
    AdcTimeout,
    CalibrationError,
}

impl GasStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::AdcTimeout => "ADC TIMEOUT",
            Self::CalibrationError => "CALIBRATION ERROR",
        }
    }
}

impl fmt::Display for GasStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum GasError<E> {
    InvalidConfig(ConfigError),
    AdcTimeout,
    Adc(E),
    /// Too few clean-air samples produced a usable resistance.
    Calibration { valid: u8, required: u8 },
}

impl<E> GasError<E> {
    pub fn status(&self) -> GasStatus {
        match self {
            Self::InvalidConfig(_) | Self::Adc(_) => GasStatus::Error,
            Self::AdcTimeout => GasStatus::AdcTimeout,
            Self::Calibration { .. } => GasStatus::CalibrationError,
        }
    }
}

impl<E> From<SampleError<E>> for GasError<E> {
    fn from(err: SampleError<E>) -> Self {
        match err {
            SampleError::Timeout => Self::AdcTimeout,
            SampleError::Fault(err) => Self::Adc(err),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for GasError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(err) => write!(f, "MQ2 config: {err}"),
            Self::AdcTimeout => write!(f, "MQ2 ADC conversion timed out"),
            Self::Adc(err) => write!(f, "MQ2 ADC error: {err:?}"),
            Self::Calibration { valid, required } => write!(
                f,
                "MQ2 calibration failed: {valid} valid samples, {required} required"
            ),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for GasError<E> {}

/// Sample voltage at the divider output.
pub fn voltage(raw: u16, adc: &AdcConfig) -> f32 {
    (f32::from(raw) / adc.resolution as f32) * adc.reference_voltage
}

/// Sensor resistance `Rs` in kΩ for a raw sample.
///
/// A saturated sample reads as 0 (open circuit) and a near-zero output as
/// [`HIGH_RESISTANCE`].
pub fn resistance(raw: u16, config: &GasConfig) -> f32 {
    if u32::from(raw) >= config.adc.resolution - 1 {
        return 0.0;
    }
    let vout = voltage(raw, &config.adc);
    if vout < VOLTAGE_FLOOR {
        return HIGH_RESISTANCE;
    }
    config.load_resistance * ((config.adc.reference_voltage - vout) / vout)
}

/// `Rs / R0`, or 0 when the baseline is unusable.
pub fn ratio(rs: f32, r0: f32) -> f32 {
    if r0 < R0_FLOOR {
        return 0.0;
    }
    rs / r0
}

/// Everything derived from the last successful read, plus the latest status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasReading {
    pub raw_sample: u16,
    pub voltage: f32,
    /// `Rs`, kΩ.
    pub sensor_resistance: f32,
    /// `R0`, kΩ. Survives failed reads and failed calibrations.
    pub baseline_resistance: f32,
    pub ratio: f32,
    pub gas_ppm: f32,
    pub smoke_ppm: f32,
    pub lpg_ppm: f32,
    pub level: GasLevel,
    pub calibrated: bool,
    pub status: GasStatus,
}

impl GasReading {
    fn new(r0: f32) -> Self {
        Self {
            raw_sample: 0,
            voltage: 0.0,
            sensor_resistance: 0.0,
            baseline_resistance: r0,
            ratio: 0.0,
            gas_ppm: 0.0,
            smoke_ppm: 0.0,
            lpg_ppm: 0.0,
            level: GasLevel::Normal,
            calibrated: false,
            status: GasStatus::Ok,
        }
    }
}

pub struct Mq2<A, D> {
    adc: A,
    delay: D,
    config: GasConfig,
    reading: GasReading,
}

impl<A, D> Mq2<A, D>
where
    A: AnalogChannel,
    D: DelayNs,
{
    pub fn new(adc: A, delay: D, config: GasConfig) -> Result<Self, GasError<A::Error>> {
        config.validate().map_err(GasError::InvalidConfig)?;
        Ok(Self {
            adc,
            delay,
            reading: GasReading::new(config.default_r0),
            config,
        })
    }

    pub fn config(&self) -> &GasConfig {
        &self.config
    }

    pub fn reading(&self) -> &GasReading {
        &self.reading
    }

    pub fn status(&self) -> GasStatus {
        self.reading.status
    }

    pub fn level(&self) -> GasLevel {
        self.reading.level
    }

    pub fn r0(&self) -> f32 {
        self.reading.baseline_resistance
    }

    pub fn is_calibrated(&self) -> bool {
        self.reading.calibrated
    }

    /// Install a known baseline, e.g. one measured on a previous boot.
    pub fn set_r0(&mut self, r0: f32) -> Result<(), GasError<A::Error>> {
        if !(r0.is_finite() && r0 > 0.0) {
            return Err(GasError::InvalidConfig(ConfigError::NonPositive("R0", r0)));
        }
        self.reading.baseline_resistance = r0;
        self.reading.calibrated = true;
        Ok(())
    }

    pub fn read_raw(&mut self) -> Result<u16, GasError<A::Error>> {
        let raw = self.sample()?;
        self.reading.raw_sample = raw;
        Ok(raw)
    }

    pub fn read_voltage(&mut self) -> Result<f32, GasError<A::Error>> {
        let raw = self.sample()?;
        let volts = voltage(raw, &self.config.adc);
        self.reading.raw_sample = raw;
        self.reading.voltage = volts;
        Ok(volts)
    }

    /// Establish `R0` from samples taken in clean air.
    ///
    /// Long-blocking: waits the settle delay after every sample, one second
    /// in total with the default configuration. The sensor should have been
    /// heated for a few minutes first.
    pub fn calibrate(&mut self) -> Result<f32, GasError<A::Error>> {
        let cal = self.config.calibration;
        let mut rs_sum = 0.0f32;
        let mut valid = 0u8;

        for i in 0..cal.samples {
            match self.adc.sample(self.config.adc.timeout) {
                Ok(raw) => {
                    let rs = resistance(raw, &self.config);
                    if rs > 0.0 {
                        rs_sum += rs;
                        valid += 1;
                    } else {
                        debug!("MQ2 calibration sample {i} saturated: raw {raw}");
                    }
                }
                Err(err) => debug!("MQ2 calibration sample {i} lost: {err}"),
            }
            self.delay.delay_us(micros(cal.settle));
        }

        let required = (cal.samples / 2).max(1);
        if valid < required {
            warn!(
                "MQ2 calibration failed: {}/{} valid samples, need {}",
                valid, cal.samples, required
            );
            self.reading.status = GasStatus::CalibrationError;
            return Err(GasError::Calibration { valid, required });
        }

        let rs_avg = rs_sum / f32::from(valid);
        let r0 = rs_avg / cal.clean_air_ratio;
        info!(
            "MQ2 calibrated: Rs avg {:.2} kOhm over {} samples, R0 {:.3} kOhm",
            rs_avg, valid, r0
        );
        self.reading.baseline_resistance = r0;
        self.reading.calibrated = true;
        self.reading.status = GasStatus::Ok;
        Ok(r0)
    }

    /// Sample once and refresh every derived value.
    ///
    /// An uncalibrated estimator calibrates inline first, so the first call
    /// blocks for the whole calibration on top of the conversion.
    pub fn read_concentration(&mut self) -> Result<GasReading, GasError<A::Error>> {
        if !self.reading.calibrated {
            info!("MQ2 not calibrated, calibrating before first read");
            self.calibrate()?;
        }

        let raw = self.sample()?;
        let volts = voltage(raw, &self.config.adc);
        let rs = resistance(raw, &self.config);
        let rs_r0 = ratio(rs, self.reading.baseline_resistance);
        let curves = &self.config.curves;
        let gas_ppm = curves.gas.ppm(rs_r0);

        let reading = &mut self.reading;
        reading.raw_sample = raw;
        reading.voltage = volts;
        reading.sensor_resistance = rs;
        reading.ratio = rs_r0;
        reading.gas_ppm = gas_ppm;
        reading.smoke_ppm = curves.smoke.ppm(rs_r0);
        reading.lpg_ppm = curves.lpg.ppm(rs_r0);
        reading.level = self.config.thresholds.classify(gas_ppm);

        debug!(
            "MQ2 raw {} ({:.3} V) Rs {:.2} ratio {:.3} gas {:.1} ppm",
            raw, volts, rs, rs_r0, gas_ppm
        );
        Ok(self.reading)
    }

    pub fn read_all(&mut self) -> Result<GasReading, GasError<A::Error>> {
        self.read_concentration()
    }

    pub fn smoke_ppm(&mut self) -> Result<f32, GasError<A::Error>> {
        self.read_concentration().map(|r| r.smoke_ppm)
    }

    pub fn lpg_ppm(&mut self) -> Result<f32, GasError<A::Error>> {
        self.read_concentration().map(|r| r.lpg_ppm)
    }

    /// Give the hardware back.
    pub fn release(self) -> (A, D) {
        (self.adc, self.delay)
    }

    // Records the outcome in `status` either way.
    fn sample(&mut self) -> Result<u16, GasError<A::Error>> {
        match self.adc.sample(self.config.adc.timeout) {
            Ok(raw) => {
                self.reading.status = GasStatus::Ok;
                Ok(raw)
            }
            Err(err) => {
                let err = GasError::from(err);
                self.reading.status = err.status();
                Err(err)
            }
        }
    }
}

fn micros(duration: Duration) -> u32 {
    u32::try_from(duration.as_micros()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::scripted::{AdcFault, ScriptedAdc, SimClock, Timeline};

    fn estimator(adc: ScriptedAdc) -> (Mq2<ScriptedAdc, SimClock>, Timeline) {
        estimator_with(adc, GasConfig::default())
    }

    fn estimator_with(adc: ScriptedAdc, config: GasConfig) -> (Mq2<ScriptedAdc, SimClock>, Timeline) {
        let timeline = Timeline::new();
        let mq2 = Mq2::new(adc, SimClock::new(timeline.clone()), config).unwrap();
        (mq2, timeline)
    }

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() <= expected.abs() * 1e-5 + 1e-6,
            "{actual} != {expected}"
        );
    }

    #[test]
    fn mid_scale_sample_converts() {
        let config = GasConfig::default();
        assert_close(voltage(2048, &config.adc), 1.65);
        assert_close(resistance(2048, &config), 5.0);
        assert_close(ratio(5.0, 10.0), 0.5);
        assert_close(
            config.curves.gas.ppm(0.5),
            658.31 * 0.5f32.powf(-2.07),
        );
    }

    #[test]
    fn resistance_guards() {
        let config = GasConfig::default();
        assert_eq!(resistance(4095, &config), 0.0);
        assert!(resistance(4094, &config) > 0.0);
        assert_eq!(resistance(0, &config), HIGH_RESISTANCE);
        // 124 / 4096 * 3.3 is just under 0.1 V
        assert_eq!(resistance(124, &config), HIGH_RESISTANCE);
        assert!(resistance(125, &config) < HIGH_RESISTANCE);
        assert_eq!(ratio(5.0, 0.05), 0.0);
    }

    #[test]
    fn calibration_averages_valid_samples() {
        let mut adc = ScriptedAdc::new();
        for _ in 0..5 {
            adc = adc.then(2048).then(1024);
        }
        let (mut mq2, timeline) = estimator(adc);

        let rs_avg = (resistance(2048, mq2.config()) + resistance(1024, mq2.config())) / 2.0;
        let r0 = mq2.calibrate().unwrap();

        assert_close(r0, rs_avg / 9.83);
        assert_eq!(mq2.r0(), r0);
        assert!(mq2.is_calibrated());
        assert_eq!(mq2.status(), GasStatus::Ok);
        assert_eq!(timeline.now_us(), 10 * 100_000);
    }

    #[test]
    fn calibration_with_too_few_valid_samples_keeps_r0() {
        let mut adc = ScriptedAdc::new();
        for _ in 0..4 {
            adc = adc.then(2048);
        }
        for _ in 0..3 {
            adc = adc.then(4095).then_timeout();
        }
        let (mut mq2, _) = estimator(adc);
        let before = mq2.r0().to_bits();

        let err = mq2.calibrate().unwrap_err();
        assert!(matches!(
            err,
            GasError::Calibration {
                valid: 4,
                required: 5
            }
        ));
        assert_eq!(mq2.r0().to_bits(), before);
        assert!(!mq2.is_calibrated());
        assert_eq!(mq2.status(), GasStatus::CalibrationError);
    }

    #[test]
    fn calibration_accepts_exactly_half() {
        let mut adc = ScriptedAdc::new();
        for _ in 0..5 {
            adc = adc.then(2048).then_timeout();
        }
        let (mut mq2, _) = estimator(adc);
        let r0 = mq2.calibrate().unwrap();
        assert_close(r0, 5.0 / 9.83);
    }

    #[test]
    fn first_read_calibrates_inline() {
        let (mut mq2, timeline) = estimator(ScriptedAdc::constant(2048));

        let reading = mq2.read_all().unwrap();
        assert!(reading.calibrated);
        assert_close(reading.baseline_resistance, 5.0 / 9.83);
        assert_close(reading.ratio, 9.83);
        assert_eq!(timeline.now_us(), 1_000_000);

        mq2.read_all().unwrap();
        let (adc, _) = mq2.release();
        assert_eq!(adc.conversions(), 12);
        assert_eq!(timeline.now_us(), 1_000_000);
    }

    #[test]
    fn read_with_installed_baseline() {
        let (mut mq2, _) = estimator(ScriptedAdc::constant(2048));
        mq2.set_r0(10.0).unwrap();

        let reading = mq2.read_all().unwrap();
        let curves = mq2.config().curves;
        assert_eq!(reading.raw_sample, 2048);
        assert_close(reading.voltage, 1.65);
        assert_close(reading.sensor_resistance, 5.0);
        assert_close(reading.ratio, 0.5);
        assert_close(reading.gas_ppm, 658.31 * 0.5f32.powf(-2.07));
        assert_eq!(reading.smoke_ppm, curves.smoke.ppm(reading.ratio));
        assert_eq!(reading.lpg_ppm, curves.lpg.ppm(reading.ratio));
        assert_eq!(reading.level, GasLevel::Danger);
        assert_eq!(mq2.status(), GasStatus::Ok);
    }

    #[test]
    fn level_boundaries_are_inclusive() {
        let rs = resistance(2048, &GasConfig::default());
        let ppm = GasConfig::default().curves.gas.ppm(ratio(rs, 10.0));

        for (thresholds, expected) in [
            (Thresholds { warning_ppm: ppm / 2.0, danger_ppm: ppm }, GasLevel::Danger),
            (Thresholds { warning_ppm: ppm, danger_ppm: ppm * 2.0 }, GasLevel::Warning),
            (Thresholds { warning_ppm: ppm * 2.0, danger_ppm: ppm * 3.0 }, GasLevel::Normal),
        ] {
            let config = GasConfig {
                thresholds,
                ..GasConfig::default()
            };
            let (mut mq2, _) = estimator_with(ScriptedAdc::constant(2048), config);
            mq2.set_r0(10.0).unwrap();
            assert_eq!(mq2.read_all().unwrap().level, expected);
            assert_eq!(mq2.level(), expected);
        }
    }

    #[test]
    fn failed_reads_keep_derived_values() {
        let adc = ScriptedAdc::new().then(2048).then_timeout().then_fault();
        let (mut mq2, _) = estimator(adc);
        mq2.set_r0(10.0).unwrap();
        let good = mq2.read_all().unwrap();

        assert!(matches!(mq2.read_all(), Err(GasError::AdcTimeout)));
        assert_eq!(mq2.status(), GasStatus::AdcTimeout);
        assert_eq!(mq2.reading().gas_ppm, good.gas_ppm);
        assert_eq!(mq2.reading().ratio, good.ratio);

        assert!(matches!(mq2.read_all(), Err(GasError::Adc(AdcFault))));
        assert_eq!(mq2.status(), GasStatus::Error);
        assert_eq!(mq2.r0(), 10.0);
        assert_eq!(mq2.reading().smoke_ppm, good.smoke_ppm);
    }

    #[test]
    fn failed_auto_calibration_blocks_the_read() {
        let (mut mq2, _) = estimator(ScriptedAdc::new());
        let err = mq2.read_all().unwrap_err();
        assert!(matches!(err, GasError::Calibration { valid: 0, .. }));
        assert_eq!(mq2.status(), GasStatus::CalibrationError);
        assert_eq!(mq2.r0(), 10.0);
        assert_eq!(mq2.reading().gas_ppm, 0.0);
    }

    #[test]
    fn set_r0_rejects_non_positive() {
        let (mut mq2, _) = estimator(ScriptedAdc::constant(2048));
        assert!(matches!(mq2.set_r0(0.0), Err(GasError::InvalidConfig(_))));
        assert!(matches!(mq2.set_r0(f32::NAN), Err(GasError::InvalidConfig(_))));
        assert_eq!(mq2.r0(), 10.0);
        assert!(!mq2.is_calibrated());
    }

    #[test]
    fn raw_and_voltage_reads_update_their_fields() {
        let (mut mq2, _) = estimator(ScriptedAdc::new().then(1000).then(2048));
        assert_eq!(mq2.read_raw().unwrap(), 1000);
        assert_eq!(mq2.reading().raw_sample, 1000);
        assert_close(mq2.read_voltage().unwrap(), 1.65);
        assert_eq!(mq2.reading().raw_sample, 2048);
        assert_eq!(mq2.reading().gas_ppm, 0.0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = GasConfig {
            load_resistance: -1.0,
            ..GasConfig::default()
        };
        let timeline = Timeline::new();
        match Mq2::new(ScriptedAdc::new(), SimClock::new(timeline), config) {
            Err(err) => assert_eq!(err.status(), GasStatus::Error),
            Ok(_) => panic!("negative load resistance accepted"),
        }
    }

    #[test]
    fn messages() {
        assert_eq!(GasStatus::AdcTimeout.to_string(), "ADC TIMEOUT");
        assert_eq!(GasStatus::CalibrationError.as_str(), "CALIBRATION ERROR");
        assert_eq!(GasLevel::Warning.to_string(), "WARNING");
        assert_eq!(GasLevel::default(), GasLevel::Normal);
    }
}
