//! Assignment lookup
//!
//! The engine only needs two facts per assignment: which schema the learner's
//! query runs against and what output counts as correct. Stores are
//! read-only from the engine's point of view.

use crate::config::types::{QueryboxError, Result, SchemaContext};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Assignment as seen by the submission engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "postgresSchema")]
    pub schema: SchemaContext,
    /// Raw descriptor; parsed at grading time so a bad one only fails grading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<serde_json::Value>,
    #[serde(rename = "isPublished", default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool {
    true
}

/// Read-only assignment source
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Published assignment with this id, if any
    async fn lookup(&self, assignment_id: &str) -> Result<Option<Assignment>>;
}

/// In-memory catalog, typically loaded once at startup
#[derive(Debug, Default, Clone)]
pub struct AssignmentCatalog {
    assignments: HashMap<String, Assignment>,
}

impl AssignmentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of assignment entries
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            QueryboxError::Catalog(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_json(&content)?;
        info!(
            "Loaded {} assignments from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let entries: Vec<Assignment> = serde_json::from_str(content)
            .map_err(|e| QueryboxError::Catalog(format!("Invalid assignment catalog: {}", e)))?;

        let mut catalog = Self::new();
        for assignment in entries {
            if assignment.id.trim().is_empty() {
                return Err(QueryboxError::Catalog(
                    "Assignment entry with empty id".to_string(),
                ));
            }
            if catalog.assignments.contains_key(&assignment.id) {
                return Err(QueryboxError::Catalog(format!(
                    "Duplicate assignment id {:?}",
                    assignment.id
                )));
            }
            if assignment.expected_output.is_none() && assignment.published {
                warn!(
                    "Assignment {} has no expected output; submissions can never be correct",
                    assignment.id
                );
            }
            catalog.insert(assignment);
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, assignment: Assignment) {
        self.assignments.insert(assignment.id.clone(), assignment);
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

#[async_trait]
impl AssignmentStore for AssignmentCatalog {
    async fn lookup(&self, assignment_id: &str) -> Result<Option<Assignment>> {
        Ok(self
            .assignments
            .get(assignment_id)
            .filter(|a| a.published)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"[
        {
            "id": "a1",
            "title": "Basic SELECT and Filtering",
            "difficulty": "easy",
            "postgresSchema": "assignment_1_schema",
            "expectedOutput": { "type": "count", "value": 3 },
            "isPublished": true
        },
        {
            "id": "draft",
            "postgresSchema": "assignment_2_schema",
            "isPublished": false
        },
        {
            "id": "a3",
            "postgresSchema": "assignment_3_schema"
        }
    ]"#;

    #[tokio::test]
    async fn test_lookup_filters_unpublished() {
        let catalog = AssignmentCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.len(), 3);

        let a1 = catalog.lookup("a1").await.unwrap().unwrap();
        assert_eq!(a1.schema.name(), "assignment_1_schema");
        assert_eq!(a1.title.as_deref(), Some("Basic SELECT and Filtering"));
        assert!(a1.expected_output.is_some());

        assert!(catalog.lookup("draft").await.unwrap().is_none());
        assert!(catalog.lookup("missing").await.unwrap().is_none());

        let a3 = catalog.lookup("a3").await.unwrap().unwrap();
        assert!(a3.published);
        assert!(a3.expected_output.is_none());
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let json = r#"[{ "id": "x", "postgresSchema": "public; DROP TABLE t" }]"#;
        assert!(matches!(
            AssignmentCatalog::from_json(json),
            Err(QueryboxError::Catalog(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let json = r#"[
            { "id": "x", "postgresSchema": "s1" },
            { "id": "x", "postgresSchema": "s2" }
        ]"#;
        let err = AssignmentCatalog::from_json(json).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let catalog = AssignmentCatalog::from_file(file.path()).unwrap();
        assert!(!catalog.is_empty());

        let missing = AssignmentCatalog::from_file(Path::new("/nonexistent/catalog.json"));
        assert!(missing.is_err());
    }
}
