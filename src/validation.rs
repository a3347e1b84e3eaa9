//! Value validation for configuration writes.
//!
//! Every write is checked here before it reaches the device, so a rejected
//! value never costs a device round-trip.

use crate::traits::{Bounds, CameraError, ConfigEntry, ConfigKind, ConfigValue, Result, Setting};

/// Tolerance, in steps, for float values that should sit on a step boundary.
const STEP_TOLERANCE: f32 = 1e-3;

/// Validates that `value` may be written to the setting described by `entry`.
///
/// # Arguments
///
/// * `setting` - Path of the setting, used in error messages
/// * `entry` - The setting as last reported by the device
/// * `value` - The value to write
///
/// # Errors
///
/// Returns:
/// - `InvalidValueForKind` if the value's kind differs from the setting's
/// - `ReadOnlySetting` if the device refuses writes to the setting
/// - `OutOfRange` if a range value violates the bounds or step, or a choice
///   is not among the accepted ones
pub fn validate_value(setting: &str, entry: &ConfigEntry, value: &ConfigValue) -> Result<()> {
    let expected = entry.setting.kind();
    if value.kind() != expected {
        return Err(CameraError::InvalidValueForKind {
            setting: setting.to_owned(),
            expected,
            found: value.kind(),
        });
    }
    if entry.readonly {
        return Err(CameraError::ReadOnlySetting(setting.to_owned()));
    }

    match (&entry.setting, value) {
        (Setting::Range { bounds, .. }, ConfigValue::Range(number)) => {
            validate_range(*number, bounds).map_err(|reason| CameraError::OutOfRange {
                setting: setting.to_owned(),
                reason,
            })
        }
        (Setting::Choice { choices, .. }, ConfigValue::Choice(choice)) => {
            if choices.iter().any(|c| c == choice) {
                Ok(())
            } else {
                Err(CameraError::OutOfRange {
                    setting: setting.to_owned(),
                    reason: format!("{choice:?} is not one of {choices:?}"),
                })
            }
        }
        _ => Ok(()),
    }
}

/// Builds a typed value for the setting from its textual form.
///
/// Toggles accept `on/off`, `true/false`, `yes/no` and `1/0`; dates are
/// seconds since the Unix epoch.
pub fn parse_value(setting: &str, entry: &ConfigEntry, text: &str) -> Result<ConfigValue> {
    let mismatch = |expected| CameraError::InvalidValueForKind {
        setting: setting.to_owned(),
        expected,
        found: ConfigKind::Text,
    };

    match entry.setting {
        Setting::Section => Err(mismatch(ConfigKind::Section)),
        Setting::Choice { .. } => Ok(ConfigValue::Choice(text.to_owned())),
        Setting::Text(_) => Ok(ConfigValue::Text(text.to_owned())),
        Setting::Range { .. } => text
            .trim()
            .parse()
            .map(ConfigValue::Range)
            .map_err(|_| mismatch(ConfigKind::Range)),
        Setting::Toggle(_) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "on" | "true" | "yes" => Ok(ConfigValue::Toggle(true)),
            "0" | "off" | "false" | "no" => Ok(ConfigValue::Toggle(false)),
            _ => Err(mismatch(ConfigKind::Toggle)),
        },
        Setting::Date(_) => text
            .trim()
            .parse()
            .map(ConfigValue::Date)
            .map_err(|_| mismatch(ConfigKind::Date)),
    }
}

/// Checks a number against range bounds, returning a reason on failure.
fn validate_range(value: f32, bounds: &Bounds) -> std::result::Result<(), String> {
    if !value.is_finite() {
        return Err(format!("{value} is not a finite number"));
    }
    if value < bounds.min || value > bounds.max {
        return Err(format!(
            "{value} exceeds valid range ({}-{})",
            bounds.min, bounds.max
        ));
    }
    if !on_step(value, bounds) {
        return Err(format!(
            "{value} can only be changed in steps of {}",
            bounds.step
        ));
    }
    Ok(())
}

/// Whether `value` lies on a step boundary counted from `bounds.min`.
fn on_step(value: f32, bounds: &Bounds) -> bool {
    if bounds.step <= 0.0 {
        return true;
    }
    let steps = (value - bounds.min) / bounds.step;
    (steps - steps.round()).abs() <= STEP_TOLERANCE
}
