//! The campaign every ad set of a batch is created under.

use serde::{Deserialize, Serialize};

/// Where a batch's ad sets go: a campaign created for the batch, or one
/// that already exists on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignTarget {
    Create { name: String },
    Existing { id: String },
}

impl CampaignTarget {
    /// Pick the target from the upload form. An id wins over a name, so a
    /// client re-submitting into an existing campaign never creates a new one.
    pub fn from_form(id: Option<&str>, name: Option<&str>) -> Option<Self> {
        let id = id.map(str::trim).filter(|id| !id.is_empty());
        let name = name.map(str::trim).filter(|name| !name.is_empty());
        match (id, name) {
            (Some(id), _) => Some(Self::Existing { id: id.to_string() }),
            (None, Some(name)) => Some(Self::Create {
                name: name.to_string(),
            }),
            (None, None) => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Self::Create { name } => name.trim().is_empty(),
            Self::Existing { id } => id.trim().is_empty(),
        }
    }
}
