//! Resource handlers
//!
//! Each resource type implements [`Resource`]; the provider looks handlers
//! up by type name with [`lookup`].

pub mod chart;
pub mod repository;
pub mod tiller;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::data::ResourceData;
use crate::error::{ProviderError, Result};
use crate::meta::Meta;
use crate::schema::Schema;

pub use chart::ChartResource;
pub use repository::RepositoryResource;
pub use tiller::TillerResource;

/// CRUD for one resource type
#[async_trait]
pub trait Resource: Send + Sync {
    /// Type name as used in configurations
    fn name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    async fn create(&self, d: &mut ResourceData, meta: &Meta) -> Result<()>;

    /// Refresh `d` from the real object; clearing the id marks it gone
    async fn read(&self, d: &mut ResourceData, meta: &Meta) -> Result<()>;

    async fn update(&self, d: &mut ResourceData, meta: &Meta) -> Result<()>;

    async fn delete(&self, d: &mut ResourceData, meta: &Meta) -> Result<()>;

    /// Whether the object behind the id is still there; checked before `read`
    async fn exists(&self, d: &ResourceData, meta: &Meta) -> Result<bool>;

    /// State for an existing object identified by `id`
    async fn import(&self, id: &str, meta: &Meta) -> Result<ResourceData> {
        let mut d = ResourceData::new(self.name(), Map::new());
        d.set_id(id);
        d.set("name", Value::String(id.to_string()));
        self.read(&mut d, meta).await?;
        if d.id().is_none() {
            return Err(ProviderError::config(format!(
                "cannot import non-existent {} {:?}",
                self.name(),
                id
            )));
        }
        Ok(d)
    }
}

/// Every served resource type
pub fn all() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(ChartResource),
        Box::new(RepositoryResource),
        Box::new(TillerResource),
    ]
}

/// Handler for a resource type name
pub fn lookup(name: &str) -> Result<Box<dyn Resource>> {
    all()
        .into_iter()
        .find(|r| r.name() == name)
        .ok_or_else(|| ProviderError::UnknownResource {
            name: name.to_string(),
        })
}

/// `metadata` block holding one object
pub(crate) fn metadata_block(fields: Map<String, Value>) -> Value {
    Value::Array(vec![Value::Object(fields)])
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::helm::MockHelmClient;
    use crate::meta::Meta;
    use crate::settings::Settings;

    pub fn settings(home: &std::path::Path) -> Settings {
        Settings {
            tiller_host: "localhost:44134".to_string(),
            tiller_namespace: "kube-system".to_string(),
            home: tfhelm_repo::HelmHome::new(home.to_string_lossy()),
            debug: false,
            plugins_disable: true,
            insecure: false,
            client_key: String::new(),
            client_certificate: String::new(),
            ca_certificate: String::new(),
            kubernetes: Default::default(),
        }
    }

    pub fn meta(home: &std::path::Path, helm: MockHelmClient) -> Meta {
        Meta::with_client(settings(home), Arc::new(helm), None)
    }

    /// Meta whose Kubernetes client talks to `api_server`
    pub async fn cluster_meta(home: &std::path::Path, api_server: &str) -> Meta {
        let resolver = tfhelm_kube::KubeConfig::new(
            tfhelm_kube::KubernetesSettings {
                host: Some(api_server.to_string()),
                ..Default::default()
            },
            None,
        );
        let cluster = tfhelm_kube::build_client(&resolver).await.unwrap();
        Meta::with_client(settings(home), Arc::new(MockHelmClient::new()), Some(cluster))
    }
}
