use core::fmt;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::mq2::GasLevel;

/// Rejected configuration value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    /// The request pulse is shorter than the sensor accepts.
    RequestTooShort(Duration),
    /// A bounded wait was configured with no budget.
    ZeroTimeout(&'static str),
    /// The bit threshold can never be reached before the bit times out.
    ThresholdBeyondTimeout { threshold_us: u32, timeout_us: u32 },
    /// ADC resolution must be a power of two of at least 2.
    Resolution(u32),
    /// A physical quantity must be finite and strictly positive.
    NonPositive(&'static str, f32),
    /// Calibration needs at least one sample.
    NoCalibrationSamples,
    /// A curve coefficient is unusable.
    Curve(&'static str),
    /// Thresholds are negative or out of order.
    Thresholds { warning_ppm: f32, danger_ppm: f32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestTooShort(hold) => {
                write!(f, "request pulse of {hold:?} is below the 18 ms minimum")
            }
            Self::ZeroTimeout(name) => write!(f, "{name} must be non-zero"),
            Self::ThresholdBeyondTimeout {
                threshold_us,
                timeout_us,
            } => write!(
                f,
                "bit threshold {threshold_us} us must be below the bit timeout {timeout_us} us"
            ),
            Self::Resolution(res) => write!(f, "ADC resolution {res} is not a power of two >= 2"),
            Self::NonPositive(name, value) => write!(f, "{name} must be positive, got {value}"),
            Self::NoCalibrationSamples => write!(f, "calibration sample count must be non-zero"),
            Self::Curve(name) => write!(f, "invalid {name} curve coefficients"),
            Self::Thresholds {
                warning_ppm,
                danger_ppm,
            } => write!(
                f,
                "thresholds out of order: warning {warning_ppm} ppm, danger {danger_ppm} ppm"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive(name, value))
    }
}

/// Timing of the DHT11 transaction. All durations follow the datasheet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DhtConfig {
    /// How long the host holds the line low to request a frame.
    pub request_hold: Duration,
    /// How long the host drives the line high before releasing it.
    pub release_hold: Duration,
    /// Budget for each of the two acknowledgement edges.
    pub ack_timeout_us: u32,
    /// Budget for each bit's low preamble and for its high phase.
    pub bit_timeout_us: u32,
    /// High phases at or above this width decode as 1.
    pub bit_threshold_us: u32,
}

impl DhtConfig {
    pub const MIN_REQUEST_HOLD: Duration = Duration::from_millis(18);

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_hold < Self::MIN_REQUEST_HOLD {
            return Err(ConfigError::RequestTooShort(self.request_hold));
        }
        if self.ack_timeout_us == 0 {
            return Err(ConfigError::ZeroTimeout("ack timeout"));
        }
        if self.bit_timeout_us == 0 {
            return Err(ConfigError::ZeroTimeout("bit timeout"));
        }
        if self.bit_threshold_us >= self.bit_timeout_us {
            return Err(ConfigError::ThresholdBeyondTimeout {
                threshold_us: self.bit_threshold_us,
                timeout_us: self.bit_timeout_us,
            });
        }
        Ok(())
    }
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            request_hold: Duration::from_millis(20),
            release_hold: Duration::from_micros(40),
            ack_timeout_us: 100,
            bit_timeout_us: 100,
            bit_threshold_us: 50,
        }
    }
}

/// Converter characteristics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdcConfig {
    /// Number of distinct codes, e.g. 4096 for a 12-bit converter.
    pub resolution: u32,
    /// Full-scale voltage.
    pub reference_voltage: f32,
    /// Upper bound on a single conversion.
    pub timeout: Duration,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            resolution: 4096,
            reference_voltage: 3.3,
            timeout: Duration::from_millis(100),
        }
    }
}

/// Clean-air baseline procedure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationConfig {
    pub samples: u8,
    /// Wait after every sample. `samples * settle` is the blocking cost of a calibration.
    pub settle: Duration,
    /// Expected `Rs/R0` in clean air.
    pub clean_air_ratio: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            samples: 10,
            settle: Duration::from_millis(100),
            clean_air_ratio: 9.83,
        }
    }
}

/// Power-law model `ppm = a * ratio^b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curve {
    pub a: f32,
    pub b: f32,
}

impl Curve {
    pub const fn new(a: f32, b: f32) -> Self {
        Self { a, b }
    }

    /// Concentration for a resistance ratio. Non-positive ratios read as 0 ppm.
    pub fn ppm(&self, ratio: f32) -> f32 {
        if ratio <= 0.0 {
            return 0.0;
        }
        self.a * ratio.powf(self.b)
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.a.is_finite() && self.a > 0.0 && self.b.is_finite() {
            Ok(())
        } else {
            Err(ConfigError::Curve(name))
        }
    }
}

/// One curve per gas family the MQ-2 responds to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasCurves {
    pub gas: Curve,
    pub smoke: Curve,
    pub lpg: Curve,
}

impl Default for GasCurves {
    fn default() -> Self {
        Self {
            gas: Curve::new(658.31, -2.07),
            smoke: Curve::new(776.56, -2.23),
            lpg: Curve::new(591.87, -1.95),
        }
    }
}

/// Alarm thresholds on the composite gas concentration, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub warning_ppm: f32,
    pub danger_ppm: f32,
}

impl Thresholds {
    pub fn classify(&self, ppm: f32) -> GasLevel {
        if ppm >= self.danger_ppm {
            GasLevel::Danger
        } else if ppm >= self.warning_ppm {
            GasLevel::Warning
        } else {
            GasLevel::Normal
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.warning_ppm.is_finite()
            && self.danger_ppm.is_finite()
            && self.warning_ppm >= 0.0
            && self.warning_ppm <= self.danger_ppm;
        if ordered {
            Ok(())
        } else {
            Err(ConfigError::Thresholds {
                warning_ppm: self.warning_ppm,
                danger_ppm: self.danger_ppm,
            })
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_ppm: 300.0,
            danger_ppm: 700.0,
        }
    }
}

/// Everything the MQ-2 estimator needs besides hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasConfig {
    pub adc: AdcConfig,
    /// Load resistor in the divider, kΩ.
    pub load_resistance: f32,
    /// Placeholder baseline used until a calibration or override, kΩ.
    pub default_r0: f32,
    pub calibration: CalibrationConfig,
    pub curves: GasCurves,
    pub thresholds: Thresholds,
}

impl GasConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let resolution = self.adc.resolution;
        if resolution < 2 || !resolution.is_power_of_two() {
            return Err(ConfigError::Resolution(resolution));
        }
        if self.adc.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("ADC timeout"));
        }
        positive("reference voltage", self.adc.reference_voltage)?;
        positive("load resistance", self.load_resistance)?;
        positive("default R0", self.default_r0)?;
        positive("clean-air ratio", self.calibration.clean_air_ratio)?;
        if self.calibration.samples == 0 {
            return Err(ConfigError::NoCalibrationSamples);
        }
        self.curves.gas.validate("gas")?;
        self.curves.smoke.validate("smoke")?;
        self.curves.lpg.validate("LPG")?;
        self.thresholds.validate()
    }
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            adc: AdcConfig::default(),
            load_resistance: 5.0,
            default_r0: 10.0,
            calibration: CalibrationConfig::default(),
            curves: GasCurves::default(),
            thresholds: Thresholds::default(),
        }
    }
}

/// Parse a numeric override baked in with `option_env!`.
///
/// An unset or blank variable is `None`.
pub fn parse_override(name: &str, value: Option<&str>) -> Result<Option<f32>> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<f32>()
        .with_context(|| format!("{name}={raw:?} is not a number"))?;
    Ok(Some(parsed))
}
