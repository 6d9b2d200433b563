//! Telemetry sample decoding.
//!
//! Maps the raw variable table delivered by the link onto a [`TelemetrySample`]
//! using the configured `(group, name) -> (field, unit)` mapping. Angles
//! reported in degrees are converted to radians, the bus's native unit.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flybridge_common::{BusMessage, Frame, VehicleState};

use crate::error::DecodeWarning;
use crate::link::{TocItem, VariableTable};

/// Field of a [`TelemetrySample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleField {
    X,
    Y,
    Z,
    Roll,
    Pitch,
    Yaw,
    BatteryVoltage,
}

/// Unit a variable is reported in by the vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Passed through unchanged (metres, volts, radians).
    #[default]
    Native,
    /// Converted to radians.
    Degrees,
}

/// Mapping of one vehicle variable onto a sample field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMapping {
    pub group: String,
    pub name: String,
    pub field: SampleField,
    #[serde(default)]
    pub unit: Unit,
}

impl VariableMapping {
    pub fn new(group: &str, name: &str, field: SampleField, unit: Unit) -> Self {
        Self {
            group: group.to_string(),
            name: name.to_string(),
            field,
            unit,
        }
    }

    pub fn item(&self) -> TocItem {
        TocItem::new(&self.group, &self.name)
    }
}

/// State estimate position, stabilizer attitude and battery voltage.
pub fn default_variables() -> Vec<VariableMapping> {
    vec![
        VariableMapping::new("stateEstimate", "x", SampleField::X, Unit::Native),
        VariableMapping::new("stateEstimate", "y", SampleField::Y, Unit::Native),
        VariableMapping::new("stateEstimate", "z", SampleField::Z, Unit::Native),
        VariableMapping::new("stabilizer", "roll", SampleField::Roll, Unit::Degrees),
        VariableMapping::new("stabilizer", "pitch", SampleField::Pitch, Unit::Degrees),
        VariableMapping::new("stabilizer", "yaw", SampleField::Yaw, Unit::Degrees),
        VariableMapping::new("pm", "vbat", SampleField::BatteryVoltage, Unit::Native),
    ]
}

/// `radians = degrees * π / 180`
pub fn degrees_to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

/// One decoded telemetry sample, in bus units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySample {
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub battery_voltage: Option<f64>,
}

impl TelemetrySample {
    fn set(&mut self, field: SampleField, value: f64) {
        let slot = match field {
            SampleField::X => &mut self.x,
            SampleField::Y => &mut self.y,
            SampleField::Z => &mut self.z,
            SampleField::Roll => &mut self.roll,
            SampleField::Pitch => &mut self.pitch,
            SampleField::Yaw => &mut self.yaw,
            SampleField::BatteryVoltage => &mut self.battery_voltage,
        };
        *slot = Some(value);
    }

    pub fn frame(&self) -> Frame {
        Frame {
            x: self.x,
            y: self.y,
            z: self.z,
            roll: self.roll,
            pitch: self.pitch,
            yaw: self.yaw,
        }
    }

    pub fn vehicle_state(&self) -> VehicleState {
        VehicleState {
            battery_voltage: self.battery_voltage,
            yaw: self.yaw,
        }
    }

    /// The bus messages published for this sample.
    pub fn messages(&self) -> [BusMessage; 2] {
        [
            BusMessage::Frame(self.frame()),
            BusMessage::VehicleState(self.vehicle_state()),
        ]
    }
}

/// Decoder for the variable tables of one telemetry stream.
#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    mapping: HashMap<TocItem, (SampleField, Unit)>,
    /// Unknown variables already reported at warn level.
    reported: HashSet<TocItem>,
}

impl TelemetryDecoder {
    pub fn new(variables: &[VariableMapping]) -> Self {
        let mapping = variables
            .iter()
            .map(|v| (v.item(), (v.field, v.unit)))
            .collect();

        Self {
            mapping,
            reported: HashSet::new(),
        }
    }

    /// Decode one table.
    ///
    /// Variables without a mapping yield a [`DecodeWarning`] and leave the
    /// sample untouched.
    pub fn decode(
        &mut self,
        table: &VariableTable,
        timestamp: i64,
    ) -> (TelemetrySample, Vec<DecodeWarning>) {
        let mut sample = TelemetrySample {
            timestamp,
            ..Default::default()
        };
        let mut warnings = Vec::new();

        for (item, value) in table {
            match self.mapping.get(item) {
                Some(&(field, unit)) => {
                    let raw = value.as_f64();
                    let converted = match unit {
                        Unit::Native => raw,
                        Unit::Degrees => degrees_to_radians(raw),
                    };
                    sample.set(field, converted);
                }
                None => {
                    if self.reported.insert(item.clone()) {
                        warn!(variable = %item, "Ignoring unknown telemetry variable");
                    } else {
                        debug!(variable = %item, "Ignoring unknown telemetry variable");
                    }
                    warnings.push(DecodeWarning {
                        group: item.group.clone(),
                        name: item.name.clone(),
                    });
                }
            }
        }

        (sample, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::VariableValue;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn table(entries: &[(&str, &str, VariableValue)]) -> VariableTable {
        entries
            .iter()
            .map(|(g, n, v)| (TocItem::new(*g, *n), *v))
            .collect()
    }

    #[test]
    fn test_ninety_degrees_is_half_pi() {
        assert!((degrees_to_radians(90.0) - FRAC_PI_2).abs() <= f64::EPSILON);
        assert!((degrees_to_radians(-180.0) + PI).abs() <= f64::EPSILON);
        assert_eq!(degrees_to_radians(0.0), 0.0);
    }

    #[test]
    fn test_decode_full_table() {
        let mut decoder = TelemetryDecoder::new(&default_variables());
        let table = table(&[
            ("stateEstimate", "x", VariableValue::F32(0.5)),
            ("stateEstimate", "y", VariableValue::F32(-1.25)),
            ("stateEstimate", "z", VariableValue::F32(1.0)),
            ("stabilizer", "roll", VariableValue::F32(0.0)),
            ("stabilizer", "pitch", VariableValue::F32(-90.0)),
            ("stabilizer", "yaw", VariableValue::F32(90.0)),
            ("pm", "vbat", VariableValue::F32(3.75)),
        ]);

        let (sample, warnings) = decoder.decode(&table, 1234);

        assert!(warnings.is_empty());
        assert_eq!(sample.timestamp, 1234);
        assert_eq!(sample.x, Some(0.5));
        assert_eq!(sample.y, Some(-1.25));
        assert_eq!(sample.z, Some(1.0));
        assert_eq!(sample.roll, Some(0.0));
        assert!((sample.pitch.unwrap() + FRAC_PI_2).abs() <= f64::EPSILON);
        assert!((sample.yaw.unwrap() - FRAC_PI_2).abs() <= f64::EPSILON);
        assert_eq!(sample.battery_voltage, Some(3.75));
    }

    #[test]
    fn test_unknown_variable_is_omitted_with_warning() {
        let mut decoder = TelemetryDecoder::new(&default_variables());
        let table = table(&[
            ("stateEstimate", "x", VariableValue::F32(2.0)),
            ("pm", "chargeCurrent", VariableValue::U16(120)),
        ]);

        let (sample, warnings) = decoder.decode(&table, 0);

        assert_eq!(sample.x, Some(2.0));
        assert_eq!(sample.battery_voltage, None);
        assert_eq!(
            warnings,
            vec![DecodeWarning {
                group: "pm".to_string(),
                name: "chargeCurrent".to_string(),
            }]
        );

        // Reported again on every sample, only logged loudly once.
        let (_, again) = decoder.decode(&table, 1);
        assert_eq!(again.len(), 1);
        assert_eq!(decoder.reported.len(), 1);
    }

    #[test]
    fn test_missing_variables_stay_none() {
        let mut decoder = TelemetryDecoder::new(&default_variables());
        let (sample, warnings) = decoder.decode(&VariableTable::new(), 0);

        assert!(warnings.is_empty());
        assert_eq!(sample.frame(), Frame::default());
        assert_eq!(sample.vehicle_state(), VehicleState::default());
    }

    #[test]
    fn test_messages_carry_yaw_in_both() {
        let sample = TelemetrySample {
            yaw: Some(1.0),
            battery_voltage: Some(4.0),
            ..Default::default()
        };

        let [frame, state] = sample.messages();
        assert_eq!(
            frame,
            BusMessage::Frame(Frame {
                yaw: Some(1.0),
                ..Default::default()
            })
        );
        assert_eq!(
            state,
            BusMessage::VehicleState(VehicleState {
                battery_voltage: Some(4.0),
                yaw: Some(1.0),
            })
        );
    }

    #[test]
    fn test_integer_values_are_widened() {
        let variables = vec![VariableMapping::new(
            "stabilizer",
            "yaw",
            SampleField::Yaw,
            Unit::Degrees,
        )];
        let mut decoder = TelemetryDecoder::new(&variables);
        let table = table(&[("stabilizer", "yaw", VariableValue::I16(180))]);
        let (sample, _) = decoder.decode(&table, 0);

        assert!((sample.yaw.unwrap() - PI).abs() <= f64::EPSILON);
    }
}
