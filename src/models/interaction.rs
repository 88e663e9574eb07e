use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Viewed,
    Clicked,
    Dismissed,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Viewed => "viewed",
            ActionKind::Clicked => "clicked",
            ActionKind::Dismissed => "dismissed",
        }
    }

    /// Viewed and clicked both count as engagement for the feedback penalty.
    pub fn is_engagement(self) -> bool {
        matches!(self, ActionKind::Viewed | ActionKind::Clicked)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewed" | "read" => Ok(ActionKind::Viewed),
            "clicked" => Ok(ActionKind::Clicked),
            "dismissed" => Ok(ActionKind::Dismissed),
            other => Err(AppError::Validation(format!(
                "unknown action '{}', expected viewed, clicked or dismissed",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: i64,
    pub article_url: String,
    pub action: ActionKind,
    pub occurred_at: DateTime<Utc>,
}

/// Reading history row joined with the article it refers to.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub article_url: String,
    pub title: Option<String>,
    pub source: Option<String>,
    pub action: ActionKind,
    pub occurred_at: DateTime<Utc>,
}
