//! # Custom Extractors & Validation
//!
//! Provides the [`Validate`] trait for request bodies and a helper to
//! extract and validate JSON in handlers.
//!
//! Shape problems become [`AppError::BadRequest`]. Rules that carry a
//! stable domain code (policy and bundle names) return the catalog's own
//! [`PlaneError`] so clients see the same code whichever layer rejects.

use axum::extract::rejection::JsonRejection;
use axum::Json;
use pecp_core::{
    validate_bundle_name, validate_policy_fields, NewBinding, NewBundle, NewEntitlement,
    NewPolicy, NewResourceType, PolicyUpdate,
};

use crate::error::AppError;

/// Request types that check rules serde cannot express.
pub trait Validate {
    /// Returns the rejection on failure.
    fn validate(&self) -> Result<(), AppError>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate()?;
    Ok(value)
}

fn bad_request(msg: &str) -> AppError {
    AppError::BadRequest(msg.to_string())
}

impl Validate for NewPolicy {
    fn validate(&self) -> Result<(), AppError> {
        validate_policy_fields(&self.name, self.filename.as_deref())?;
        Ok(())
    }
}

impl Validate for PolicyUpdate {
    fn validate(&self) -> Result<(), AppError> {
        if self.name.is_none()
            && self.filename.is_none()
            && self.content.is_none()
            && self.status.is_none()
        {
            return Err(bad_request("update must change at least one field"));
        }
        Ok(())
    }
}

impl Validate for NewBinding {
    fn validate(&self) -> Result<(), AppError> {
        if self.resource_type.trim().is_empty() {
            return Err(bad_request("resourceType must not be empty"));
        }
        Ok(())
    }
}

impl Validate for NewBundle {
    fn validate(&self) -> Result<(), AppError> {
        validate_bundle_name(&self.name)?;
        Ok(())
    }
}

impl Validate for NewEntitlement {
    fn validate(&self) -> Result<(), AppError> {
        if self.resource_type.trim().is_empty() || self.subject_id.trim().is_empty() {
            return Err(bad_request("resourceType and subjectId must not be empty"));
        }
        Ok(())
    }
}

impl Validate for NewResourceType {
    fn validate(&self) -> Result<(), AppError> {
        if self.key.trim().is_empty() || self.name.trim().is_empty() {
            return Err(bad_request("name and key must not be empty"));
        }
        Ok(())
    }
}
