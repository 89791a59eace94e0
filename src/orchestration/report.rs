//! Machine-readable summary of a publish run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::core::config::PipelineOptions;
use crate::core::state_machine::{PublishState, StateTransition};

/// Outcome of one run, written by the CLI with `--report`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub run_id: Uuid,
    pub repository: String,
    pub distribution: String,
    pub state: PublishState,
    pub success: bool,
    pub options: PipelineOptions,

    /// Filenames of the artifacts added
    pub added: Vec<String>,

    /// Identities removed by the prune step
    pub removed: Vec<String>,

    /// Non-fatal problems, e.g. failed removals
    pub warnings: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub transitions: Vec<StateTransition>,
    pub duration_ms: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl PublishReport {
    /// Write as pretty JSON via a temporary sibling file and a rename
    pub async fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut temp_name = path.as_os_str().to_os_string();
        temp_name.push(".tmp");
        let temp_path = Path::new(&temp_name);

        tokio::fs::write(temp_path, json).await?;
        tokio::fs::rename(temp_path, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AbortReason;
    use tempfile::TempDir;

    fn report(state: PublishState) -> PublishReport {
        PublishReport {
            run_id: Uuid::new_v4(),
            repository: "r1".to_string(),
            distribution: "stable".to_string(),
            state,
            success: state == PublishState::Published,
            options: PipelineOptions::default(),
            added: vec!["a_1.0_amd64.deb".to_string()],
            removed: Vec::new(),
            warnings: Vec::new(),
            error_code: None,
            error: None,
            transitions: Vec::new(),
            duration_ms: 12,
            published_at: None,
        }
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(report(PublishState::Published)).unwrap();

        assert_eq!(json["repository"], "r1");
        assert_eq!(json["state"], "PUBLISHED");
        assert_eq!(json["durationMs"], 12);
        assert_eq!(json["options"]["removeOldPackages"], false);
        assert!(json.get("errorCode").is_none());
    }

    #[test]
    fn test_aborted_state_in_json() {
        let mut aborted = report(PublishState::Aborted(AbortReason::PublishFailed));
        aborted.error_code = Some("PUBLISH_FAILED".to_string());

        let json = serde_json::to_value(&aborted).unwrap();
        assert_eq!(json["state"]["ABORTED"], "publish-failed");
        assert_eq!(json["errorCode"], "PUBLISH_FAILED");
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn test_write_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reports").join("publish.json");

        report(PublishState::Published).write_json(&path).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: PublishReport = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.added, vec!["a_1.0_amd64.deb"]);
        assert!(!temp_dir.path().join("reports").join("publish.json.tmp").exists());
    }
}
