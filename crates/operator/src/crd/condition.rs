use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Overall readiness of a record.
pub const AVAILABLE: &str = "Available";
/// Whether the bucket a Policy points at exists.
pub const BUCKET_EXISTS: &str = "BucketExists";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A status condition, shaped like the Kubernetes `metav1.Condition`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// RFC3339 timestamp of the last status change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(
        r#type: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: r#type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: None,
            observed_generation: None,
        }
    }

    pub fn observed(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// Insert or update the condition of the same type.
///
/// The transition time only moves when the status changes.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    let now = || Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    match conditions
        .iter_mut()
        .find(|existing| existing.r#type == condition.r#type)
    {
        Some(existing) => {
            if existing.status != condition.status {
                existing.status = condition.status;
                existing.last_transition_time =
                    Some(condition.last_transition_time.unwrap_or_else(now));
            }
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
        }
        None => {
            if condition.last_transition_time.is_none() {
                condition.last_transition_time = Some(now());
            }
            conditions.push(condition);
        }
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_inserts_with_timestamp() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new(
                AVAILABLE,
                ConditionStatus::Unknown,
                "Reconciling",
                "Starting reconciliation",
            ),
        );

        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].last_transition_time.is_some());
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let mut conditions = vec![Condition {
            last_transition_time: Some("2025-01-01T00:00:00Z".to_string()),
            ..Condition::new(AVAILABLE, ConditionStatus::True, "Reconciling", "old")
        }];

        set_condition(
            &mut conditions,
            Condition::new(AVAILABLE, ConditionStatus::True, "Reconciling", "new")
                .observed(Some(3)),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].message, "new");
        assert_eq!(conditions[0].observed_generation, Some(3));
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_set_condition_moves_transition_time_on_status_change() {
        let mut conditions = vec![Condition {
            last_transition_time: Some("2025-01-01T00:00:00Z".to_string()),
            ..Condition::new(AVAILABLE, ConditionStatus::Unknown, "Reconciling", "")
        }];

        set_condition(
            &mut conditions,
            Condition::new(AVAILABLE, ConditionStatus::False, "InvalidSpec", "bad"),
        );

        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_ne!(
            conditions[0].last_transition_time.as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_types_are_independent() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new(AVAILABLE, ConditionStatus::True, "Reconciling", ""),
        );
        set_condition(
            &mut conditions,
            Condition::new(BUCKET_EXISTS, ConditionStatus::False, "BucketDoesNotExist", ""),
        );

        assert_eq!(conditions.len(), 2);
        assert_eq!(
            find_condition(&conditions, BUCKET_EXISTS).map(|c| c.status),
            Some(ConditionStatus::False)
        );
    }
}
