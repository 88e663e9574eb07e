use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const DEFAULT_WEIGHT: f32 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub id: i64,
    pub user_id: i64,
    pub description: String,
    pub weight: f32,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

/// Partial edit of a preference; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct PreferenceUpdate {
    pub description: Option<String>,
    pub weight: Option<f32>,
}

impl Preference {
    /// Trims the description and checks it is non-empty.
    pub fn validate_description(description: &str) -> Result<String> {
        let trimmed = description.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "preference description must not be empty".to_string(),
            ));
        }
        Ok(trimmed.to_string())
    }

    pub fn validate_weight(weight: f32) -> Result<f32> {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(AppError::Validation(format!(
                "preference weight must be a positive number, got {}",
                weight
            )));
        }
        Ok(weight)
    }
}
