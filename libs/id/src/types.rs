//! Typed ID definitions for cluster-manager objects.

use crate::define_id;

define_id!(FrameworkId);
define_id!(AgentId);
define_id!(OfferId);
define_id!(TaskId);

impl TaskId {
    /// Generates a fresh task ID of the form `{prefix}.{uuid}`.
    ///
    /// The prefix is usually the framework name plus the tier, which keeps
    /// task IDs readable in the cluster manager's UI.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}.{}", prefix, uuid::Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_task_id_generate_is_unique() {
        let a = TaskId::generate("tierd.server");
        let b = TaskId::generate("tierd.server");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("tierd.server."));
    }

    #[test]
    fn test_generated_task_id_parses() {
        let id = TaskId::generate("tierd.agent");
        let parsed: TaskId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_empty_id_rejected() {
        let result: Result<AgentId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_whitespace_rejected() {
        let result: Result<OfferId, _> = "offer 1".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidCharacter {
                character: ' ',
                position: 5
            }
        ));
    }

    #[test]
    fn test_wire_shape() {
        let id = AgentId::parse("20240101-0000-S3").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#"{"value":"20240101-0000-S3"}"#);
    }

    #[test]
    fn test_deserialize_wire_shape() {
        let id: FrameworkId = serde_json::from_str(r#"{"value":"fw-1"}"#).unwrap();
        assert_eq!(id.as_str(), "fw-1");
    }

    #[test]
    fn test_deserialize_rejects_empty_value() {
        let result: Result<TaskId, _> = serde_json::from_str(r#"{"value":""}"#);
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn parse_never_panics(s in ".*") {
            let _ = TaskId::parse(&s);
        }

        #[test]
        fn printable_ids_survive_json(s in "[A-Za-z0-9._:-]{1,64}") {
            let id = TaskId::parse(&s).unwrap();
            let json = serde_json::to_string(&id).unwrap();
            let back: TaskId = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(id, back);
        }
    }
}
