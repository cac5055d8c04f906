//! Typed view of Kanister `ActionSet` resources.
//!
//! Backups and deletion requests are both `ActionSet`s. Incoming resources are
//! decoded into these types once, at the store boundary, and converted into
//! [`BackupRecord`]s or [`DeletionState`]s. Outgoing deletion requests are
//! encoded from [`DeletionRequest`].

use crate::models::{BackupRecord, BackupStatus, DeletionRequest, DeletionState};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API version of the `ActionSet` resource.
pub const API_VERSION: &str = "cr.kanister.io/v1alpha1";

/// Kind of the `ActionSet` resource.
pub const KIND: &str = "ActionSet";

/// Action option naming the schedule a backup belongs to.
pub const SCHEDULE_OPTION: &str = "backup-schedule";

/// Artifact holding the backup location.
pub const CLOUD_OBJECT_ARTIFACT: &str = "cloudObject";

/// Key of the backup location inside the artifact.
pub const BACKUP_LOCATION_KEY: &str = "backupLocation";

/// A Kanister `ActionSet`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSet {
    /// API version.
    #[serde(default)]
    pub api_version: String,
    /// Resource kind.
    #[serde(default)]
    pub kind: String,
    /// Object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Requested actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<ActionSetSpec>,
    /// Executor-reported status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionSetStatus>,
}

/// Subset of Kubernetes object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Resource namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// RFC 3339 creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

/// `ActionSet` spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSetSpec {
    /// Actions to run.
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// One requested action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action name, e.g. `backup` or `delete`.
    #[serde(default)]
    pub name: String,
    /// Blueprint implementing the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint: Option<String>,
    /// Object the action runs against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectReference>,
    /// Input artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<String, Artifact>>,
    /// Location profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ObjectReference>,
    /// Free-form options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BTreeMap<String, String>>,
}

/// Reference to another cluster object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    /// Object kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Object name.
    #[serde(default)]
    pub name: String,
    /// Object namespace.
    #[serde(default)]
    pub namespace: String,
}

/// An artifact passed between actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Key/value payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_value: Option<BTreeMap<String, String>>,
}

/// `ActionSet` status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSetStatus {
    /// Overall state.
    #[serde(default)]
    pub state: Option<String>,
    /// Per-action status.
    #[serde(default)]
    pub actions: Vec<ActionStatus>,
    /// Error reported on failure.
    #[serde(default)]
    pub error: Option<ErrorStatus>,
}

/// Per-action status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStatus {
    /// Action name.
    #[serde(default)]
    pub name: Option<String>,
    /// Output artifacts.
    #[serde(default)]
    pub artifacts: Option<BTreeMap<String, Artifact>>,
}

/// Error detail on a failed `ActionSet`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStatus {
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// A list response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionSetList {
    /// Listed items.
    #[serde(default)]
    pub items: Vec<ActionSet>,
}

impl ActionSet {
    /// Resource name, if set.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    fn first_action(&self) -> Option<&ActionSpec> {
        self.spec.as_ref().and_then(|spec| spec.actions.first())
    }

    fn state(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|status| status.state.as_deref())
            .unwrap_or_default()
    }

    /// Converts a backup `ActionSet` into a [`BackupRecord`].
    ///
    /// Returns `Ok(None)` for `ActionSet`s that are not scheduled backups: the
    /// first action's name must start with `backup` and carry a
    /// `backup-schedule` option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if a scheduled backup has no name.
    pub fn to_backup_record(&self) -> Result<Option<BackupRecord>> {
        let Some(action) = self.first_action() else {
            return Ok(None);
        };
        if !action.name.starts_with("backup") {
            return Ok(None);
        }
        let Some(schedule) = action
            .options
            .as_ref()
            .and_then(|options| options.get(SCHEDULE_OPTION))
        else {
            return Ok(None);
        };

        let name = self.name().ok_or_else(|| Error::Decode {
            field: "metadata.name".to_string(),
            cause: format!("backup for schedule '{schedule}' has no name"),
        })?;

        let created_at = self
            .metadata
            .creation_timestamp
            .as_deref()
            .map_or(DateTime::<Utc>::UNIX_EPOCH, parse_timestamp);

        let record = BackupRecord::new(
            name,
            schedule.as_str(),
            BackupStatus::parse(self.state()),
            created_at,
        )
        .with_storage_location(self.backup_location().unwrap_or_default());

        Ok(Some(record))
    }

    fn backup_location(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .actions
            .first()?
            .artifacts
            .as_ref()?
            .get(CLOUD_OBJECT_ARTIFACT)?
            .key_value
            .as_ref()?
            .get(BACKUP_LOCATION_KEY)
            .map(String::as_str)
    }

    /// Observed state of a deletion request.
    #[must_use]
    pub fn deletion_state(&self) -> DeletionState {
        let message = self
            .status
            .as_ref()
            .and_then(|status| status.error.as_ref())
            .map(|error| error.message.clone())
            .filter(|message| !message.is_empty());
        DeletionState::from_parts(self.state(), message)
    }
}

impl From<&DeletionRequest> for ActionSet {
    fn from(request: &DeletionRequest) -> Self {
        let artifacts = request.storage_location_key.as_ref().map(|location| {
            let key_value = BTreeMap::from([(BACKUP_LOCATION_KEY.to_string(), location.clone())]);
            BTreeMap::from([(
                CLOUD_OBJECT_ARTIFACT.to_string(),
                Artifact {
                    key_value: Some(key_value),
                },
            )])
        });

        let profile = request.profile.as_ref().map(|profile| ObjectReference {
            kind: None,
            name: profile.clone(),
            namespace: request.namespace.clone(),
        });

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ObjectMeta {
                name: Some(request.name.clone()),
                namespace: Some(request.namespace.clone()),
                creation_timestamp: None,
            },
            spec: Some(ActionSetSpec {
                actions: vec![ActionSpec {
                    name: "delete".to_string(),
                    blueprint: Some(request.blueprint.clone()),
                    object: Some(ObjectReference {
                        kind: Some("namespace".to_string()),
                        name: request.namespace.clone(),
                        namespace: request.namespace.clone(),
                    }),
                    artifacts,
                    profile,
                    options: None,
                }],
            }),
            status: None,
        }
    }
}

/// Parses an RFC 3339 timestamp, falling back to the Unix epoch.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).map_or_else(
        |e| {
            tracing::debug!(timestamp = raw, error = %e, "Unparsable creation timestamp");
            DateTime::<Utc>::UNIX_EPOCH
        },
        |ts| ts.with_timezone(&Utc),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backup_json(name: serde_json::Value, action: &str, state: &str) -> serde_json::Value {
        json!({
            "apiVersion": API_VERSION,
            "kind": KIND,
            "metadata": {
                "name": name,
                "namespace": "kanister",
                "creationTimestamp": "2024-03-01T10:00:00Z"
            },
            "spec": {
                "actions": [{
                    "name": action,
                    "blueprint": "pg-blueprint",
                    "options": { "backup-schedule": "daily" }
                }]
            },
            "status": {
                "state": state,
                "actions": [{
                    "name": action,
                    "artifacts": {
                        "cloudObject": { "keyValue": { "backupLocation": "s3://b/daily/1" } }
                    }
                }]
            }
        })
    }

    fn decode(value: serde_json::Value) -> ActionSet {
        serde_json::from_value(value).expect("valid actionset")
    }

    #[test]
    fn test_backup_record_decoded() {
        let actionset = decode(backup_json(json!("backup-abc"), "backup", "complete"));
        let record = actionset
            .to_backup_record()
            .expect("decodes")
            .expect("is a backup");

        assert_eq!(record.name, "backup-abc");
        assert_eq!(record.schedule_name, "daily");
        assert_eq!(record.status, BackupStatus::Complete);
        assert_eq!(record.created_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert_eq!(record.storage_location_key.as_deref(), Some("s3://b/daily/1"));
        assert!(!record.in_use);
    }

    #[test]
    fn test_backup_prefix_match() {
        let actionset = decode(backup_json(json!("b"), "backup-pg", "running"));
        assert!(actionset.to_backup_record().expect("decodes").is_some());

        let actionset = decode(backup_json(json!("b"), "delete", "running"));
        assert!(actionset.to_backup_record().expect("decodes").is_none());
    }

    #[test]
    fn test_missing_schedule_is_skipped() {
        let mut value = backup_json(json!("b"), "backup", "complete");
        value["spec"]["actions"][0]["options"] = json!({});
        assert!(decode(value).to_backup_record().expect("decodes").is_none());
    }

    #[test]
    fn test_missing_name_is_field_error() {
        let mut value = backup_json(json!("b"), "backup", "complete");
        value["metadata"]
            .as_object_mut()
            .expect("object")
            .remove("name");
        let err = decode(value).to_backup_record().expect_err("name required");
        assert!(matches!(err, Error::Decode { ref field, .. } if field == "metadata.name"));
    }

    #[test]
    fn test_bad_timestamp_and_missing_status_fall_back() {
        let mut value = backup_json(json!("b"), "backup", "complete");
        value["metadata"]["creationTimestamp"] = json!("yesterday");
        value.as_object_mut().expect("object").remove("status");

        let record = decode(value)
            .to_backup_record()
            .expect("decodes")
            .expect("is a backup");
        assert_eq!(record.created_at, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(record.status, BackupStatus::Other(String::new()));
        assert!(record.storage_location_key.is_none());
    }

    #[test]
    fn test_deletion_state_reads_error_message() {
        let actionset = decode(json!({
            "metadata": { "name": "delete-b" },
            "status": { "state": "failed", "error": { "message": "bucket gone" } }
        }));
        assert_eq!(
            actionset.deletion_state(),
            DeletionState::Failed {
                message: Some("bucket gone".to_string())
            }
        );
    }

    #[test]
    fn test_deletion_request_encoding() {
        let request = DeletionRequest {
            name: "delete-b".to_string(),
            namespace: "kanister".to_string(),
            backup_name: "b".to_string(),
            blueprint: "pg-blueprint".to_string(),
            storage_location_key: Some("s3://b/k".to_string()),
            profile: None,
        };
        let encoded = serde_json::to_value(ActionSet::from(&request)).expect("serializes");

        assert_eq!(encoded["apiVersion"], API_VERSION);
        assert_eq!(encoded["kind"], KIND);
        assert_eq!(encoded["metadata"]["name"], "delete-b");
        let action = &encoded["spec"]["actions"][0];
        assert_eq!(action["name"], "delete");
        assert_eq!(action["blueprint"], "pg-blueprint");
        assert_eq!(action["object"]["kind"], "namespace");
        assert_eq!(action["object"]["name"], "kanister");
        assert_eq!(
            action["artifacts"]["cloudObject"]["keyValue"]["backupLocation"],
            "s3://b/k"
        );
        assert!(action.get("profile").is_none());
        assert!(encoded.get("status").is_none());
    }
}
