// src/models/user.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A learner profile. Profile fields are free-form and kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    /// Everything the UI stores about the learner (name, phone number,
    /// subscription level, goals ...).
    #[serde(flatten)]
    pub profile: Map<String, Value>,

    #[serde(rename = "lastModified", default = "Utc::now")]
    pub last_modified: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, profile: Map<String, Value>) -> Self {
        let mut profile = profile;
        // Reserved keys belong to the record itself, not the profile.
        profile.remove("id");
        profile.remove("lastModified");
        Self {
            id: id.into(),
            profile,
            last_modified: Utc::now(),
        }
    }
}
