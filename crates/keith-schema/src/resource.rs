use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on secondary categories attached to one resource.
pub const MAX_SECONDARY_CATEGORIES: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub service_area: Option<String>,
}

/// A referral target owned by the resource catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub description: String,
    #[serde(default)]
    pub secondary_categories: Vec<String>,
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub contact_info: ContactInfo,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub const UNCATEGORIZED: &'static str = "uncategorized";

    /// Primary category as seen by consumers; a missing tag reads as `uncategorized`.
    pub fn category_or_default(&self) -> &str {
        self.category
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(Self::UNCATEGORIZED)
    }

    /// Primary category followed by the secondary ones.
    pub fn all_categories(&self) -> Vec<&str> {
        let mut cats = vec![self.category_or_default()];
        cats.extend(self.secondary_categories.iter().map(String::as_str));
        cats
    }

    pub fn service_area(&self) -> &str {
        self.contact_info
            .service_area
            .as_deref()
            .unwrap_or("Unspecified")
    }
}
