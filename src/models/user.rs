use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The credential is opaque here; hashing happens in the auth layer.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub credential: String,
    pub email: Option<String>,
}

/// What a user deletion removes.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DeletionStats {
    pub preferences: u64,
    pub interactions: u64,
}
