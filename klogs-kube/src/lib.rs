//! Kubernetes-backed [`LogSourceProvider`](klogs_core::LogSourceProvider):
//! pods are instances, their containers are sub-components.

mod provider;

pub use provider::KubeProvider;
