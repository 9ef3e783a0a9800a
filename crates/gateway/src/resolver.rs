use std::sync::Arc;

use cloudpilot_core::domain::instance::{InstanceDescriptor, InstanceId};

use crate::provider::{ComputeProvider, ProviderError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Found(InstanceId),
    NotFound,
}

/// Maps a user-supplied reference (native id, `Name` tag, private or public
/// address) onto a provider instance id.
#[derive(Clone)]
pub struct IdentifierResolver {
    provider: Arc<dyn ComputeProvider>,
}

impl IdentifierResolver {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self { provider }
    }

    pub async fn resolve(&self, identifier: &str) -> Result<Resolution, ProviderError> {
        let identifier = identifier.trim();
        if InstanceId::looks_native(identifier) {
            return Ok(Resolution::Found(InstanceId(identifier.to_string())));
        }
        if identifier.is_empty() {
            return Ok(Resolution::NotFound);
        }

        let inventory = self.provider.describe_instances().await?;
        let found = inventory.iter().find(|instance| matches_identifier(instance, identifier));
        Ok(match found {
            Some(instance) => Resolution::Found(instance.instance_id.clone()),
            None => Resolution::NotFound,
        })
    }
}

fn matches_identifier(instance: &InstanceDescriptor, identifier: &str) -> bool {
    [
        instance.name(),
        instance.private_ip.as_deref(),
        instance.public_ip.as_deref(),
        Some(instance.instance_id.as_str()),
    ]
    .into_iter()
    .flatten()
    .any(|candidate| candidate == identifier)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::Utc;
    use cloudpilot_core::domain::instance::{InstanceDescriptor, InstanceId, InstanceState};

    use crate::memory::InMemoryComputeProvider;
    use crate::resolver::{IdentifierResolver, Resolution};

    fn instance(id: &str, name: Option<&str>, private_ip: &str, public_ip: Option<&str>) -> InstanceDescriptor {
        let mut tags = BTreeMap::new();
        if let Some(name) = name {
            tags.insert("Name".to_string(), name.to_string());
        }
        InstanceDescriptor {
            instance_id: InstanceId(id.to_string()),
            state: InstanceState::Running,
            instance_type: "t2.micro".to_string(),
            private_ip: Some(private_ip.to_string()),
            public_ip: public_ip.map(str::to_string),
            launch_time: Utc::now(),
            security_groups: vec!["default".to_string()],
            volumes: Vec::new(),
            tags,
        }
    }

    async fn provider() -> Arc<InMemoryComputeProvider> {
        let provider = Arc::new(InMemoryComputeProvider::default());
        provider.insert_instance(instance("i-0aaa", Some("web1"), "10.0.0.12", Some("3.3.3.3"))).await;
        provider.insert_instance(instance("i-0bbb", Some("db1"), "10.0.0.13", None)).await;
        provider.insert_instance(instance("i-0ccc", None, "10.0.0.14", Some("web1"))).await;
        provider
    }

    #[tokio::test]
    async fn native_id_short_circuits_inventory_scan() {
        let provider = provider().await;
        let resolver = IdentifierResolver::new(provider.clone());

        let resolution = resolver.resolve("i-0123").await.expect("resolve");

        assert_eq!(resolution, Resolution::Found(InstanceId("i-0123".to_string())));
        assert_eq!(provider.inventory_scans(), 0);
    }

    #[tokio::test]
    async fn name_tag_and_addresses_resolve_to_instance_ids() {
        let provider = provider().await;
        let resolver = IdentifierResolver::new(provider.clone());

        assert_eq!(
            resolver.resolve("db1").await.expect("name"),
            Resolution::Found(InstanceId("i-0bbb".to_string()))
        );
        assert_eq!(
            resolver.resolve("10.0.0.14").await.expect("private ip"),
            Resolution::Found(InstanceId("i-0ccc".to_string()))
        );
        assert_eq!(
            resolver.resolve("3.3.3.3").await.expect("public ip"),
            Resolution::Found(InstanceId("i-0aaa".to_string()))
        );
        assert_eq!(provider.inventory_scans(), 3);
    }

    #[tokio::test]
    async fn first_matching_record_wins() {
        let resolver = IdentifierResolver::new(provider().await);
        assert_eq!(
            resolver.resolve("web1").await.expect("resolve"),
            Resolution::Found(InstanceId("i-0aaa".to_string()))
        );
    }

    #[tokio::test]
    async fn unknown_identifier_is_not_found() {
        let resolver = IdentifierResolver::new(provider().await);
        assert_eq!(resolver.resolve("nope").await.expect("resolve"), Resolution::NotFound);
        assert_eq!(resolver.resolve("   ").await.expect("resolve"), Resolution::NotFound);
    }

    #[tokio::test]
    async fn unavailable_provider_propagates() {
        let provider = provider().await;
        provider.set_unavailable(Some("timeout")).await;
        let resolver = IdentifierResolver::new(provider);

        let error = resolver.resolve("web1").await.expect_err("provider down");
        assert!(error.is_unavailable());
    }
}
