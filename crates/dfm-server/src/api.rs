//! HTTP API endpoints

use std::sync::Arc;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, Router},
    Json,
};
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use dfm_core::validation::{self, SCHEMA_FIELD};
use dfm_core::{Entity, FieldErrors, FleetError, FleetService};

const BATTERY_GATE_MESSAGE: &str = "Drone cannot be in LOADING state with battery level up 25%";

#[derive(Clone)]
pub struct ApiState {
    pub fleet: Arc<FleetService>,
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/drones", get(list_drones).post(create_drone))
        .route("/drones/with-medications", post(load_medications))
        .route(
            "/drones/:serial_number",
            get(get_drone).put(update_drone).delete(delete_drone),
        )
        .route("/drones/service/:action", get(service_action))
        .route("/drones/service/:action/:serial_number", get(service_action_for))
        .route("/medications", get(list_medications).post(create_medication))
        .route(
            "/medications/:code",
            get(get_medication).put(update_medication).delete(delete_medication),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

// =============================================================================
// Error mapping
// =============================================================================

/// A fleet error on its way to becoming an HTTP reply.
#[derive(Debug)]
pub struct ApiError(pub FleetError);

impl From<FleetError> for ApiError {
    fn from(e: FleetError) -> Self {
        ApiError(e)
    }
}

impl From<FieldErrors> for ApiError {
    fn from(e: FieldErrors) -> Self {
        ApiError(FleetError::Validation(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            FleetError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": "Validation error", "errors": errors })),
            )
                .into_response(),
            FleetError::Conflict { entity: Entity::Drone, .. } => {
                message(StatusCode::BAD_REQUEST, "There is already a drone with this serial number")
            }
            FleetError::Conflict { entity: Entity::Medication, .. } => {
                message(StatusCode::BAD_REQUEST, "There is already a Medication with this code")
            }
            FleetError::NotFound { entity: Entity::Drone, .. } => {
                message(StatusCode::NOT_FOUND, "Drone not found")
            }
            FleetError::NotFound { entity: Entity::Medication, .. } => {
                message(StatusCode::NOT_FOUND, "Medication not found")
            }
            FleetError::MedicationsNotFound(codes) => message(
                StatusCode::NOT_FOUND,
                format!("The following medication codes do not exist: {}", codes.join(", ")),
            ),
            FleetError::BatteryGate => message(StatusCode::BAD_REQUEST, BATTERY_GATE_MESSAGE),
            FleetError::AlreadyAssociated(names) => {
                let reasons: Vec<String> = names
                    .iter()
                    .map(|name| format!("The medication {} is already associated with the drone", name))
                    .collect();
                (StatusCode::BAD_REQUEST, Json(json!({ "message": reasons }))).into_response()
            }
            FleetError::CapacityExceeded { .. } => {
                message(StatusCode::BAD_REQUEST, "Weight of medications exceeds drone limit")
            }
            FleetError::Store(e) => {
                error!("Store error: {}", e);
                message(StatusCode::INTERNAL_SERVER_ERROR, "Internal storage error")
            }
        }
    }
}

type ApiResult = Result<Response, ApiError>;

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(json!({ "message": text.into() }))).into_response()
}

/// Parse a request body into a JSON object. Anything else is reported under
/// `_schema` the same way field errors are.
fn json_object(body: &Bytes) -> Result<Map<String, Value>, FieldErrors> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        warn!("Rejected malformed JSON body: {}", e);
        let mut errors = FieldErrors::new();
        errors.add(SCHEMA_FIELD, validation::INVALID_INPUT);
        errors
    })?;
    validation::as_object(&value).cloned()
}

// =============================================================================
// Drones
// =============================================================================

/// GET /drones
async fn list_drones(State(state): State<ApiState>) -> ApiResult {
    let drones = state.fleet.list_drones().await?;
    if drones.is_empty() {
        return Ok(message(StatusCode::OK, "There are no drones in the database"));
    }
    Ok(Json(json!({ "drones": drones })).into_response())
}

/// GET /drones/{serial_number}
async fn get_drone(
    State(state): State<ApiState>,
    Path(serial_number): Path<String>,
) -> ApiResult {
    let drone = state.fleet.get_drone(&serial_number).await?;
    Ok(Json(drone).into_response())
}

/// POST /drones
async fn create_drone(State(state): State<ApiState>, body: Bytes) -> ApiResult {
    let candidate = json_object(&body)?;
    let drone = validation::validate_new_drone(&candidate)?;
    state.fleet.create_drone(drone).await?;
    Ok(message(StatusCode::CREATED, "Drone successfully created"))
}

/// PUT /drones/{serial_number}
async fn update_drone(
    State(state): State<ApiState>,
    Path(serial_number): Path<String>,
    body: Bytes,
) -> ApiResult {
    let candidate = json_object(&body)?;
    let patch = validation::validate_drone_patch(&serial_number, &candidate)?;
    state.fleet.update_drone(&serial_number, patch).await?;
    Ok(message(StatusCode::OK, "Drone updated successfully"))
}

/// DELETE /drones/{serial_number}
async fn delete_drone(
    State(state): State<ApiState>,
    Path(serial_number): Path<String>,
) -> ApiResult {
    state.fleet.delete_drone(&serial_number).await?;
    Ok(message(StatusCode::OK, "Drone deleted successfully"))
}

/// POST /drones/with-medications
async fn load_medications(State(state): State<ApiState>, body: Bytes) -> ApiResult {
    let candidate = json_object(&body)?;
    let request = validation::validate_load_request(&candidate)?;
    match state.fleet.load_medications(request).await {
        Ok(_) => Ok(message(StatusCode::CREATED, "Drone with medications created successfully")),
        Err(FleetError::NotFound { entity: Entity::Drone, .. }) => Ok(message(
            StatusCode::NOT_FOUND,
            "Drone not found with the given serial number",
        )),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Service queries
// =============================================================================

/// GET /drones/service/{action}
async fn service_action(
    State(state): State<ApiState>,
    Path(action): Path<String>,
) -> ApiResult {
    run_service_action(&state, &action, None).await
}

/// GET /drones/service/{action}/{serial_number}
async fn service_action_for(
    State(state): State<ApiState>,
    Path((action, serial_number)): Path<(String, String)>,
) -> ApiResult {
    run_service_action(&state, &action, Some(&serial_number)).await
}

async fn run_service_action(
    state: &ApiState,
    action: &str,
    serial_number: Option<&str>,
) -> ApiResult {
    match action {
        "loaded-medications" => {
            let serial_number = serial_number.ok_or_else(|| drone_not_found(""))?;
            let medications = state.fleet.loaded_medications(serial_number).await?;
            Ok(Json(json!({ "loaded_medications": medications })).into_response())
        }
        // A trailing serial number is ignored here.
        "available-drones" => {
            let drones = state.fleet.available_drones().await?;
            Ok(Json(json!({ "available_drones": drones })).into_response())
        }
        "battery-level" => {
            let serial_number = serial_number.ok_or_else(|| drone_not_found(""))?;
            let level = state.fleet.battery_level(serial_number).await?;
            Ok(Json(level).into_response())
        }
        _ => Ok(message(StatusCode::BAD_REQUEST, "Invalid action")),
    }
}

fn drone_not_found(serial_number: &str) -> ApiError {
    ApiError(FleetError::NotFound {
        entity: Entity::Drone,
        key: serial_number.to_string(),
    })
}

// =============================================================================
// Medications
// =============================================================================

/// GET /medications
async fn list_medications(State(state): State<ApiState>) -> ApiResult {
    let medications = state.fleet.list_medications().await?;
    if medications.is_empty() {
        return Ok(message(StatusCode::OK, "There are no medications in the database"));
    }
    Ok(Json(json!({ "medications": medications })).into_response())
}

/// GET /medications/{code}
async fn get_medication(State(state): State<ApiState>, Path(code): Path<String>) -> ApiResult {
    let medication = state.fleet.get_medication(&code).await?;
    Ok(Json(medication).into_response())
}

/// POST /medications
async fn create_medication(State(state): State<ApiState>, body: Bytes) -> ApiResult {
    let candidate = json_object(&body)?;
    let medication = validation::validate_new_medication(&candidate)?;
    state.fleet.create_medication(medication).await?;
    Ok(message(StatusCode::CREATED, "Medication created successfully"))
}

/// PUT /medications/{code}
async fn update_medication(
    State(state): State<ApiState>,
    Path(code): Path<String>,
    body: Bytes,
) -> ApiResult {
    let candidate = json_object(&body)?;
    let patch = validation::validate_medication_patch(&code, &candidate)?;
    state.fleet.update_medication(&code, patch).await?;
    Ok(message(StatusCode::OK, "Medication updated successfully"))
}

/// DELETE /medications/{code}
async fn delete_medication(State(state): State<ApiState>, Path(code): Path<String>) -> ApiResult {
    state.fleet.delete_medication(&code).await?;
    Ok(message(StatusCode::OK, "Medication deleted successfully"))
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_body_reported_under_schema() {
        let errors = json_object(&Bytes::from_static(b"{not json")).unwrap_err();
        assert_eq!(errors.get(SCHEMA_FIELD).unwrap(), [validation::INVALID_INPUT]);

        let errors = json_object(&Bytes::from_static(b"[1, 2]")).unwrap_err();
        assert!(errors.get(SCHEMA_FIELD).is_some());
    }

    #[test]
    fn test_error_statuses() {
        let cases = [
            (FleetError::BatteryGate, StatusCode::BAD_REQUEST),
            (FleetError::MedicationsNotFound(vec!["X".into()]), StatusCode::NOT_FOUND),
            (FleetError::CapacityExceeded { total: 11.0, limit: 10.0 }, StatusCode::BAD_REQUEST),
            (
                FleetError::Store(dfm_core::StoreError::OperationFailed("disk".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }
}
