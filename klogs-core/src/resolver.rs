use std::collections::HashSet;
use tracing::debug;

use crate::error::{ProviderError, ResolveError};
use crate::provider::{InstanceInfo, LogSourceProvider};
use crate::source::{SelectionRequest, SourceDescriptor, Target};

/// Turns a subscription request into the concrete list of sources to tail
pub struct Resolver<'a> {
    provider: &'a dyn LogSourceProvider,
}

impl<'a> Resolver<'a> {
    pub fn new(provider: &'a dyn LogSourceProvider) -> Self {
        Self { provider }
    }

    /// Resolve `request` once. The result is ordered as the provider listed
    /// the instances, containers in declaration order, without duplicates.
    pub async fn resolve(
        &self,
        request: &SelectionRequest,
    ) -> Result<Vec<SourceDescriptor>, ResolveError> {
        let instances = match &request.target {
            Target::Instance(name) => self
                .provider
                .get_instance(&request.namespace, name)
                .await?
                .into_iter()
                .collect::<Vec<_>>(),
            Target::Selector(selector) => {
                self.provider
                    .list_instances(&request.namespace, selector)
                    .await?
            }
        };
        debug!(
            "Resolved {} instance(s) for {} in {}",
            instances.len(),
            request.target,
            request.namespace
        );

        let sources = expand(&request.namespace, instances, request.sub_component.as_deref())?;
        if sources.is_empty() {
            return Err(ResolveError::NoSourcesFound {
                namespace: request.namespace.clone(),
                target: match &request.sub_component {
                    Some(container) => format!("{} (container {})", request.target, container),
                    None => request.target.to_string(),
                },
            });
        }
        Ok(sources)
    }
}

fn expand(
    namespace: &str,
    instances: Vec<InstanceInfo>,
    only: Option<&str>,
) -> Result<Vec<SourceDescriptor>, ResolveError> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for instance in instances {
        if instance.name.is_empty() {
            return Err(ProviderError::Malformed("instance without a name".to_string()).into());
        }
        for sub_component in instance.sub_components {
            if only.is_some_and(|wanted| wanted != sub_component) {
                continue;
            }
            let source = SourceDescriptor::new(namespace, instance.name.clone(), sub_component);
            if seen.insert(source.clone()) {
                sources.push(source);
            }
        }
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryInstance, MemoryProvider, Script};
    use crate::source::LabelSelector;

    fn provider() -> MemoryProvider {
        MemoryProvider::new()
            .with_instance(
                MemoryInstance::new("ns1", "pod-a")
                    .label("app", "web")
                    .sub_component("app", Script::silent())
                    .sub_component("proxy", Script::silent()),
            )
            .with_instance(
                MemoryInstance::new("ns1", "pod-b")
                    .label("app", "web")
                    .sub_component("app", Script::silent()),
            )
            .with_instance(
                MemoryInstance::new("ns1", "db-0")
                    .label("app", "db")
                    .sub_component("postgres", Script::silent()),
            )
    }

    #[tokio::test]
    async fn selector_yields_instance_container_cross_product() {
        let provider = provider();
        let selector: LabelSelector = [("app", "web")].into_iter().collect();
        let sources = Resolver::new(&provider)
            .resolve(&SelectionRequest::selector("ns1", selector))
            .await
            .unwrap();
        assert_eq!(
            sources,
            vec![
                SourceDescriptor::new("ns1", "pod-a", "app"),
                SourceDescriptor::new("ns1", "pod-a", "proxy"),
                SourceDescriptor::new("ns1", "pod-b", "app"),
            ]
        );
    }

    #[tokio::test]
    async fn empty_selector_matches_whole_namespace() {
        let provider = provider();
        let sources = Resolver::new(&provider)
            .resolve(&SelectionRequest::selector("ns1", LabelSelector::everything()))
            .await
            .unwrap();
        assert_eq!(sources.len(), 4);
    }

    #[tokio::test]
    async fn explicit_instance_yields_all_its_containers() {
        let provider = provider();
        let sources = Resolver::new(&provider)
            .resolve(&SelectionRequest::instance("ns1", "pod-a"))
            .await
            .unwrap();
        assert_eq!(
            sources,
            vec![
                SourceDescriptor::new("ns1", "pod-a", "app"),
                SourceDescriptor::new("ns1", "pod-a", "proxy"),
            ]
        );
    }

    #[tokio::test]
    async fn container_filter_narrows_sources() {
        let provider = provider();
        let request = SelectionRequest::instance("ns1", "pod-a").with_sub_component("proxy");
        let sources = Resolver::new(&provider).resolve(&request).await.unwrap();
        assert_eq!(sources, vec![SourceDescriptor::new("ns1", "pod-a", "proxy")]);

        let request = SelectionRequest::instance("ns1", "pod-a").with_sub_component("nope");
        assert!(matches!(
            Resolver::new(&provider).resolve(&request).await,
            Err(ResolveError::NoSourcesFound { .. })
        ));
    }

    #[tokio::test]
    async fn no_match_is_no_sources_found() {
        let provider = provider();
        let resolver = Resolver::new(&provider);

        let empty_ns = SelectionRequest::selector("ns-empty", LabelSelector::everything());
        assert!(matches!(
            resolver.resolve(&empty_ns).await,
            Err(ResolveError::NoSourcesFound { .. })
        ));

        let missing_pod = SelectionRequest::instance("ns1", "pod-z");
        assert!(matches!(
            resolver.resolve(&missing_pod).await,
            Err(ResolveError::NoSourcesFound { .. })
        ));
    }

    #[tokio::test]
    async fn instance_without_containers_is_no_sources_found() {
        let provider = MemoryProvider::new().with_instance(MemoryInstance::new("ns1", "bare"));
        assert!(matches!(
            Resolver::new(&provider)
                .resolve(&SelectionRequest::instance("ns1", "bare"))
                .await,
            Err(ResolveError::NoSourcesFound { .. })
        ));
    }

    #[tokio::test]
    async fn provider_failure_is_discovery_error() {
        let provider = provider().failing_discovery("connection refused");
        let result = Resolver::new(&provider)
            .resolve(&SelectionRequest::instance("ns1", "pod-a"))
            .await;
        assert!(matches!(result, Err(ResolveError::Discovery(_))));
        assert_eq!(provider.open_count(), 0);
    }

    #[test]
    fn duplicate_containers_are_collapsed() {
        let instances = vec![
            InstanceInfo::new("pod-a", ["app", "app"]),
            InstanceInfo::new("pod-a", ["app"]),
        ];
        let sources = expand("ns1", instances, None).unwrap();
        assert_eq!(sources, vec![SourceDescriptor::new("ns1", "pod-a", "app")]);
    }

    #[test]
    fn nameless_instance_is_malformed() {
        let instances = vec![InstanceInfo::new("", ["app"])];
        assert!(matches!(
            expand("ns1", instances, None),
            Err(ResolveError::Discovery(ProviderError::Malformed(_)))
        ));
    }
}
