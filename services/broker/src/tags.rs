//! Resource tagging.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;

/// Tag key present on every provider resource the broker creates.
pub const BROKER_TAG_KEY: &str = "broker";

/// Keys written by [`BrokerTagManager`]. Requests and plans may not set them.
pub const RESERVED_TAG_KEYS: &[&str] = &[
    BROKER_TAG_KEY,
    "environment",
    "Instance GUID",
    "Space GUID",
    "Organization GUID",
    "Service offering name",
    "Service plan name",
    "Created at",
    "Updated at",
];

#[derive(Debug, Error)]
pub enum TagError {
    #[error("missing resource identifier: {0}")]
    MissingIdentifier(&'static str),

    #[error("tag key {0:?} is reserved for broker-generated tags")]
    ReservedKey(String),
}

/// Operation the tags are generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOperation {
    Create,
    Update,
}

/// Platform identifiers of the resource being tagged.
#[derive(Debug, Clone, Default)]
pub struct ResourceGuids {
    pub instance_guid: String,
    pub space_guid: String,
    pub organization_guid: String,
}

/// Produces the tag set applied to provider resources.
pub trait TagManager: Send + Sync {
    fn generate_tags(
        &self,
        operation: TagOperation,
        service_name: &str,
        plan_name: &str,
        resource: &ResourceGuids,
        is_update: bool,
    ) -> Result<BTreeMap<String, String>, TagError>;
}

/// Default tag policy.
#[derive(Debug, Clone)]
pub struct BrokerTagManager {
    broker_name: String,
    environment: String,
}

impl BrokerTagManager {
    pub fn new(broker_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            broker_name: broker_name.into(),
            environment: environment.into(),
        }
    }
}

impl TagManager for BrokerTagManager {
    fn generate_tags(
        &self,
        operation: TagOperation,
        service_name: &str,
        plan_name: &str,
        resource: &ResourceGuids,
        is_update: bool,
    ) -> Result<BTreeMap<String, String>, TagError> {
        if resource.instance_guid.is_empty() {
            return Err(TagError::MissingIdentifier("instance guid"));
        }

        let mut tags = BTreeMap::new();
        tags.insert(BROKER_TAG_KEY.to_string(), self.broker_name.clone());
        tags.insert("environment".to_string(), self.environment.clone());
        tags.insert("Instance GUID".to_string(), resource.instance_guid.clone());
        if !resource.space_guid.is_empty() {
            tags.insert("Space GUID".to_string(), resource.space_guid.clone());
        }
        if !resource.organization_guid.is_empty() {
            tags.insert(
                "Organization GUID".to_string(),
                resource.organization_guid.clone(),
            );
        }
        if !service_name.is_empty() {
            tags.insert("Service offering name".to_string(), service_name.to_string());
        }
        if !plan_name.is_empty() {
            tags.insert("Service plan name".to_string(), plan_name.to_string());
        }

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        match (operation, is_update) {
            (TagOperation::Create, false) => tags.insert("Created at".to_string(), now),
            _ => tags.insert("Updated at".to_string(), now),
        };

        Ok(tags)
    }
}

/// Reject caller-supplied tags that use a generated key.
pub fn check_reserved(tags: &BTreeMap<String, String>) -> Result<(), TagError> {
    match tags
        .keys()
        .find(|key| RESERVED_TAG_KEYS.contains(&key.as_str()))
    {
        Some(key) => Err(TagError::ReservedKey(key.clone())),
        None => Ok(()),
    }
}

/// Merge plan-level and request-level tags; request tags win on collision.
pub fn merge_tags(
    plan_tags: &BTreeMap<String, String>,
    request_tags: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = plan_tags.clone();
    merged.extend(request_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_request_tags_win() {
        let merged = merge_tags(&map(&[("a", "1")]), &map(&[("a", "2"), ("b", "3")]));
        assert_eq!(merged, map(&[("a", "2"), ("b", "3")]));
    }

    #[test]
    fn test_reserved_keys_are_rejected() {
        let err = check_reserved(&map(&[("team", "data"), ("environment", "prod")])).unwrap_err();
        assert!(matches!(err, TagError::ReservedKey(ref key) if key == "environment"));
        assert!(err.to_string().contains("environment"));

        assert!(check_reserved(&map(&[("team", "data"), ("Environment", "prod")])).is_ok());
        assert!(check_reserved(&BTreeMap::new()).is_ok());
    }

    #[test]
    fn test_generated_keys_are_all_reserved() {
        let manager = BrokerTagManager::new("stratus", "test");
        let guids = ResourceGuids {
            instance_guid: "inst-1".to_string(),
            space_guid: "space".to_string(),
            organization_guid: "org".to_string(),
        };
        for (operation, is_update) in [(TagOperation::Create, false), (TagOperation::Update, true)] {
            let tags = manager
                .generate_tags(operation, "svc", "plan", &guids, is_update)
                .unwrap();
            assert!(check_reserved(&tags).is_err());
            for key in tags.keys() {
                assert!(RESERVED_TAG_KEYS.contains(&key.as_str()), "{key}");
            }
        }
    }

    #[test]
    fn test_plan_tags_survive_without_collision() {
        let merged = merge_tags(&map(&[("plan-tag-1", "foo")]), &map(&[("tag-1", "bar")]));
        assert_eq!(merged, map(&[("plan-tag-1", "foo"), ("tag-1", "bar")]));
    }

    #[test]
    fn test_generate_create_tags() {
        let manager = BrokerTagManager::new("Stratus Broker", "staging");
        let tags = manager
            .generate_tags(
                TagOperation::Create,
                "aws-rds",
                "micro-psql",
                &ResourceGuids {
                    instance_guid: "inst-1".to_string(),
                    space_guid: "space-1".to_string(),
                    organization_guid: "org-1".to_string(),
                },
                false,
            )
            .unwrap();

        assert_eq!(tags[BROKER_TAG_KEY], "Stratus Broker");
        assert_eq!(tags["Instance GUID"], "inst-1");
        assert_eq!(tags["Service plan name"], "micro-psql");
        assert!(tags.contains_key("Created at"));
        assert!(!tags.contains_key("Updated at"));
    }

    #[test]
    fn test_generate_requires_instance_guid() {
        let manager = BrokerTagManager::new("Stratus Broker", "staging");
        let result = manager.generate_tags(
            TagOperation::Update,
            "aws-rds",
            "micro-psql",
            &ResourceGuids::default(),
            true,
        );
        assert!(result.is_err());
    }
}
