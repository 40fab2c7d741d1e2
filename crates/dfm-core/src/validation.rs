//! Field-level validation of incoming drone, medication and load payloads.
//!
//! Every function here is pure: it looks at a JSON candidate and either
//! returns a typed value or the complete set of field errors. Nothing in
//! this module touches the store.

use serde_json::{Map, Value};

use crate::errors::FieldErrors;
use crate::types::{
    Drone, DroneModel, DronePatch, DroneState, LoadRequest, Medication, MedicationPatch,
    MAX_BATTERY_CAPACITY, MAX_SERIAL_LEN, MAX_WEIGHT_LIMIT,
};

pub const MISSING: &str = "Missing data for required field.";
pub const UNKNOWN: &str = "Unknown field.";
pub const NOT_A_STRING: &str = "Not a valid string.";
pub const NOT_A_NUMBER: &str = "Not a valid number.";
pub const NULL: &str = "Field may not be null.";
pub const IMMUTABLE: &str = "Field cannot be changed.";
pub const INVALID_INPUT: &str = "Invalid input type.";

/// Key used for errors that concern the payload as a whole.
pub const SCHEMA_FIELD: &str = "_schema";

const DRONE_FIELDS: &[&str] = &[
    "serial_number",
    "model",
    "weight_limit",
    "battery_capacity",
    "state",
];
const MEDICATION_FIELDS: &[&str] = &["name", "weight", "code", "image"];

/// Require the payload to be a JSON object.
pub fn as_object(candidate: &Value) -> Result<&Map<String, Value>, FieldErrors> {
    candidate.as_object().ok_or_else(|| {
        let mut errors = FieldErrors::new();
        errors.add(SCHEMA_FIELD, INVALID_INPUT);
        errors
    })
}

/// Validate a full drone for creation. Every field is required.
pub fn validate_new_drone(candidate: &Map<String, Value>) -> Result<Drone, FieldErrors> {
    let mut errors = FieldErrors::new();
    reject_unknown(candidate, DRONE_FIELDS, &mut errors);

    let serial_number = required(candidate, "serial_number", &mut errors, check_serial_number);
    let model = required(candidate, "model", &mut errors, check_model);
    let weight_limit = required(candidate, "weight_limit", &mut errors, check_weight_limit);
    let battery_capacity =
        required(candidate, "battery_capacity", &mut errors, check_battery_capacity);
    let state = required(candidate, "state", &mut errors, check_state);

    match (serial_number, model, weight_limit, battery_capacity, state) {
        (Some(serial_number), Some(model), Some(weight_limit), Some(battery_capacity), Some(state))
            if errors.is_empty() =>
        {
            Ok(Drone {
                serial_number,
                model,
                weight_limit,
                battery_capacity,
                state,
            })
        }
        _ => Err(errors),
    }
}

/// Validate a partial drone update addressed at `serial_number`.
///
/// Only supplied fields are checked. The serial number may be repeated in
/// the payload but never changed.
pub fn validate_drone_patch(
    serial_number: &str,
    candidate: &Map<String, Value>,
) -> Result<DronePatch, FieldErrors> {
    let mut errors = FieldErrors::new();
    reject_unknown(candidate, DRONE_FIELDS, &mut errors);

    if let Some(serial) = optional(candidate, "serial_number", &mut errors, check_serial_number) {
        if serial != serial_number {
            errors.add("serial_number", IMMUTABLE);
        }
    }

    let patch = DronePatch {
        model: optional(candidate, "model", &mut errors, check_model),
        weight_limit: optional(candidate, "weight_limit", &mut errors, check_weight_limit),
        battery_capacity: optional(
            candidate,
            "battery_capacity",
            &mut errors,
            check_battery_capacity,
        ),
        state: optional(candidate, "state", &mut errors, check_state),
    };

    errors.into_result(patch)
}

/// Validate a full medication for creation.
pub fn validate_new_medication(candidate: &Map<String, Value>) -> Result<Medication, FieldErrors> {
    let mut errors = FieldErrors::new();
    reject_unknown(candidate, MEDICATION_FIELDS, &mut errors);

    let name = required(candidate, "name", &mut errors, check_name);
    let weight = required(candidate, "weight", &mut errors, check_weight);
    let code = required(candidate, "code", &mut errors, check_code);
    let image = required(candidate, "image", &mut errors, check_image);

    match (name, weight, code, image) {
        (Some(name), Some(weight), Some(code), Some(image)) if errors.is_empty() => Ok(Medication {
            name,
            weight,
            code,
            image,
        }),
        _ => Err(errors),
    }
}

/// Validate a partial medication update addressed at `code`.
pub fn validate_medication_patch(
    code: &str,
    candidate: &Map<String, Value>,
) -> Result<MedicationPatch, FieldErrors> {
    let mut errors = FieldErrors::new();
    reject_unknown(candidate, MEDICATION_FIELDS, &mut errors);

    if let Some(supplied) = optional(candidate, "code", &mut errors, check_code) {
        if supplied != code {
            errors.add("code", IMMUTABLE);
        }
    }

    let patch = MedicationPatch {
        name: optional(candidate, "name", &mut errors, check_name),
        weight: optional(candidate, "weight", &mut errors, check_weight),
        image: optional(candidate, "image", &mut errors, check_image),
    };

    errors.into_result(patch)
}

/// Validate `{"drone": {"serial_number": ..}, "medication_codes": [..]}`.
///
/// A missing code list is treated as empty; repeated codes collapse to
/// their first occurrence.
pub fn validate_load_request(candidate: &Map<String, Value>) -> Result<LoadRequest, FieldErrors> {
    let mut errors = FieldErrors::new();

    let serial_number = match candidate.get("drone") {
        None => {
            errors.add("drone", MISSING);
            None
        }
        Some(Value::Object(drone)) => match drone.get("serial_number") {
            Some(Value::String(serial)) => Some(serial.clone()),
            Some(_) => {
                errors.add("drone.serial_number", NOT_A_STRING);
                None
            }
            None => {
                errors.add("drone.serial_number", MISSING);
                None
            }
        },
        Some(_) => {
            errors.add("drone", INVALID_INPUT);
            None
        }
    };

    let mut medication_codes: Vec<String> = Vec::new();
    match candidate.get("medication_codes") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(code) => {
                        if !medication_codes.contains(code) {
                            medication_codes.push(code.clone());
                        }
                    }
                    _ => {
                        errors.add("medication_codes", NOT_A_STRING);
                        break;
                    }
                }
            }
        }
        Some(_) => errors.add("medication_codes", "Not a valid list."),
    }

    match serial_number {
        Some(serial_number) if errors.is_empty() => Ok(LoadRequest {
            serial_number,
            medication_codes,
        }),
        _ => Err(errors),
    }
}

// ---------------------------------------------------------------------------
// Field rules
// ---------------------------------------------------------------------------

fn check_serial_number(value: &Value) -> Result<String, String> {
    let serial = as_string(value)?;
    let len = serial.chars().count();
    if len == 0 || len > MAX_SERIAL_LEN {
        return Err(format!("Length must be between 1 and {}.", MAX_SERIAL_LEN));
    }
    Ok(serial)
}

fn check_model(value: &Value) -> Result<DroneModel, String> {
    as_string(value)?.parse().map_err(|_| {
        let names: Vec<&str> = DroneModel::ALL.iter().map(DroneModel::as_str).collect();
        format!("Must be one of: {}.", names.join(", "))
    })
}

fn check_state(value: &Value) -> Result<DroneState, String> {
    as_string(value)?.parse().map_err(|_| {
        let names: Vec<&str> = DroneState::ALL.iter().map(DroneState::as_str).collect();
        format!("Must be one of: {}.", names.join(", "))
    })
}

fn check_weight_limit(value: &Value) -> Result<f64, String> {
    in_range(as_number(value)?, 0.0, MAX_WEIGHT_LIMIT)
}

fn check_battery_capacity(value: &Value) -> Result<f64, String> {
    in_range(as_number(value)?, 0.0, MAX_BATTERY_CAPACITY)
}

fn check_weight(value: &Value) -> Result<f64, String> {
    let weight = as_number(value)?;
    if weight < 0.0 {
        return Err("Must be greater than or equal to 0.".to_string());
    }
    Ok(weight)
}

fn check_name(value: &Value) -> Result<String, String> {
    let name = as_string(value)?;
    if is_valid_name(&name) {
        Ok(name)
    } else {
        Err("Only letters, digits, '-' and '_' are allowed.".to_string())
    }
}

fn check_code(value: &Value) -> Result<String, String> {
    let code = as_string(value)?;
    if is_valid_code(&code) {
        Ok(code)
    } else {
        Err("Must be uppercase, digits only, or contain '_'.".to_string())
    }
}

fn check_image(value: &Value) -> Result<String, String> {
    as_string(value)
}

/// Alphanumeric throughout, or containing a dash or underscore anywhere.
pub fn is_valid_name(name: &str) -> bool {
    let alphanumeric = !name.is_empty() && name.chars().all(char::is_alphanumeric);
    alphanumeric || name.contains('-') || name.contains('_')
}

/// Uppercase (at least one cased letter, none lowercase), all digits (any
/// script), or containing an underscore.
pub fn is_valid_code(code: &str) -> bool {
    let has_cased = code.chars().any(|c| c.is_uppercase() || c.is_lowercase());
    let uppercase = has_cased && !code.chars().any(char::is_lowercase);
    let digits = !code.is_empty() && code.chars().all(char::is_numeric);
    uppercase || digits || code.contains('_')
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn as_string(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        _ => Err(NOT_A_STRING.to_string()),
    }
}

fn as_number(value: &Value) -> Result<f64, String> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() => Ok(n),
        Some(_) => Err("Special numeric values (nan or infinity) are not permitted.".to_string()),
        None => Err(NOT_A_NUMBER.to_string()),
    }
}

fn in_range(value: f64, min: f64, max: f64) -> Result<f64, String> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(format!("Must be between {} and {}.", min, max))
    }
}

fn reject_unknown(candidate: &Map<String, Value>, known: &[&str], errors: &mut FieldErrors) {
    for key in candidate.keys() {
        if !known.contains(&key.as_str()) {
            errors.add(key.clone(), UNKNOWN);
        }
    }
}

fn required<T>(
    candidate: &Map<String, Value>,
    field: &str,
    errors: &mut FieldErrors,
    check: impl Fn(&Value) -> Result<T, String>,
) -> Option<T> {
    match candidate.get(field) {
        None => {
            errors.add(field, MISSING);
            None
        }
        Some(_) => optional(candidate, field, errors, check),
    }
}

fn optional<T>(
    candidate: &Map<String, Value>,
    field: &str,
    errors: &mut FieldErrors,
    check: impl Fn(&Value) -> Result<T, String>,
) -> Option<T> {
    match candidate.get(field)? {
        Value::Null => {
            errors.add(field, NULL);
            None
        }
        value => match check(value) {
            Ok(v) => Some(v),
            Err(reason) => {
                errors.add(field, reason);
                None
            }
        },
    }
}
