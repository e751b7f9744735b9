//! `helm_tiller`: the Tiller deployment itself

use async_trait::async_trait;
use serde_json::{Map, Value};
use tfhelm_kube::{
    DEFAULT_TILLER_IMAGE, DEFAULT_TILLER_NAMESPACE, TillerManager, TillerOptions, TillerStatus,
};
use tracing::debug;

use super::{Resource, metadata_block};
use crate::data::ResourceData;
use crate::error::{ProviderError, Result};
use crate::meta::Meta;
use crate::schema::{AttrType, Attribute, Schema};

pub struct TillerResource;

impl TillerResource {
    fn options(d: &ResourceData) -> TillerOptions {
        let defaults = TillerOptions::default();
        TillerOptions {
            namespace: d
                .get_str_ok("namespace")
                .map(String::from)
                .unwrap_or(defaults.namespace),
            service_account: d
                .get_str_ok("service_account")
                .map(String::from)
                .unwrap_or(defaults.service_account),
            image: d
                .get_str_ok("tiller_image")
                .map(String::from)
                .unwrap_or(defaults.image),
            max_history: d.get_i64("max_history"),
        }
    }

    fn manager(meta: &Meta) -> Result<TillerManager> {
        Ok(TillerManager::new(meta.cluster()?.client.clone()))
    }
}

fn set_metadata(d: &mut ResourceData, status: &TillerStatus) {
    let mut fields = Map::new();
    fields.insert("name".to_string(), Value::String(status.name.clone()));
    fields.insert("namespace".to_string(), Value::String(status.namespace.clone()));
    fields.insert("generation".to_string(), Value::from(status.generation));
    fields.insert(
        "resource_version".to_string(),
        Value::String(status.resource_version.clone()),
    );
    fields.insert("uid".to_string(), Value::String(status.uid.clone()));
    d.set("metadata", metadata_block(fields));
}

#[async_trait]
impl Resource for TillerResource {
    fn name(&self) -> &'static str {
        "helm_tiller"
    }

    fn schema(&self) -> Schema {
        let metadata = Schema::new()
            .attr("name", Attribute::computed(AttrType::String))
            .attr("namespace", Attribute::computed(AttrType::String))
            .attr("generation", Attribute::computed(AttrType::Int))
            .attr("resource_version", Attribute::computed(AttrType::String))
            .attr("uid", Attribute::computed(AttrType::String));

        Schema::new()
            .attr(
                "namespace",
                Attribute::optional(AttrType::String)
                    .with_default(DEFAULT_TILLER_NAMESPACE)
                    .force_new()
                    .describe("Namespace to install Tiller into."),
            )
            .attr(
                "service_account",
                Attribute::optional(AttrType::String)
                    .with_default("default")
                    .describe("Service account Tiller runs as."),
            )
            .attr(
                "tiller_image",
                Attribute::optional(AttrType::String)
                    .with_default(DEFAULT_TILLER_IMAGE)
                    .describe("Tiller container image."),
            )
            .attr(
                "max_history",
                Attribute::optional(AttrType::Int)
                    .with_default(0)
                    .describe("Maximum number of release versions kept per release, 0 for no limit."),
            )
            .attr(
                "metadata",
                Attribute::computed_block(metadata).describe("Status of the Tiller deployment."),
            )
    }

    async fn create(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        let opts = Self::options(d);
        let status = Self::manager(meta)?.install(&opts).await?;
        d.set_id(opts.namespace.clone());
        set_metadata(d, &status);
        Ok(())
    }

    async fn read(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        let Some(namespace) = d.id().map(String::from) else {
            return Ok(());
        };
        match Self::manager(meta)?.get(&namespace).await? {
            Some(status) if !status.deleting => {
                d.set("namespace", status.namespace.clone());
                set_metadata(d, &status);
            }
            _ => {
                debug!(namespace = %namespace, "tiller deployment is gone");
                d.clear_id();
            }
        }
        Ok(())
    }

    async fn update(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        let opts = Self::options(d);
        let status = Self::manager(meta)?.upgrade(&opts).await?;
        set_metadata(d, &status);
        Ok(())
    }

    async fn delete(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        let opts = Self::options(d);
        Self::manager(meta)?.uninstall(&opts.namespace).await?;
        d.clear_id();
        Ok(())
    }

    async fn exists(&self, d: &ResourceData, meta: &Meta) -> Result<bool> {
        let Some(namespace) = d.id() else {
            return Ok(false);
        };
        Ok(Self::manager(meta)?
            .get(namespace)
            .await?
            .is_some_and(|s| !s.deleting))
    }

    async fn import(&self, id: &str, meta: &Meta) -> Result<ResourceData> {
        let manager = Self::manager(meta)?;
        let deployment = manager.deployment(id).await?.ok_or_else(|| {
            ProviderError::config(format!("cannot import non-existent helm_tiller {:?}", id))
        })?;

        let mut d = ResourceData::new(self.name(), Map::new());
        d.set_id(id);
        d.set("namespace", id);
        let container = deployment
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref());
        if let Some(spec) = container {
            if let Some(sa) = &spec.service_account_name {
                d.set("service_account", sa.clone());
            }
            if let Some(image) = spec.containers.first().and_then(|c| c.image.clone()) {
                d.set("tiller_image", image);
            }
        }
        set_metadata(&mut d, &TillerStatus::from_deployment(&deployment));
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::MockHelmClient;
    use crate::resources::testing;
    use crate::schema::process_env;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DEPLOYMENT_PATH: &str = "/apis/apps/v1/namespaces/kube-system/deployments/tiller-deploy";

    fn deployment(generation: i64) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "tiller-deploy",
                "namespace": "kube-system",
                "generation": generation,
                "resourceVersion": "311",
                "uid": "0e5f-tiller",
            },
            "spec": {
                "selector": {"matchLabels": {"app": "helm", "name": "tiller"}},
                "template": {
                    "spec": {
                        "serviceAccountName": "tiller",
                        "containers": [{"name": "tiller", "image": "gcr.io/kubernetes-helm/tiller:v2.10.0"}]
                    }
                }
            }
        })
    }

    fn not_found() -> ResponseTemplate {
        ResponseTemplate::new(404).set_body_json(json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "reason": "NotFound",
            "code": 404,
        }))
    }

    fn data(value: Value) -> ResourceData {
        let config = TillerResource
            .schema()
            .apply_defaults("helm_tiller", &value, &process_env)
            .unwrap();
        ResourceData::new("helm_tiller", config)
    }

    #[test]
    fn test_options_defaults() {
        let opts = TillerResource::options(&data(json!({})));
        assert_eq!(opts, TillerOptions::default());
    }

    #[test]
    fn test_options_from_config() {
        let opts = TillerResource::options(&data(json!({
            "namespace": "tiller",
            "service_account": "tiller",
            "max_history": 10,
        })));
        assert_eq!(opts.namespace, "tiller");
        assert_eq!(opts.service_account, "tiller");
        assert_eq!(opts.image, DEFAULT_TILLER_IMAGE);
        assert_eq!(opts.max_history, 10);
    }

    #[test]
    fn test_metadata() {
        let mut d = data(json!({}));
        set_metadata(
            &mut d,
            &TillerStatus {
                name: "tiller-deploy".to_string(),
                namespace: "kube-system".to_string(),
                generation: 1,
                resource_version: "42".to_string(),
                uid: "abc".to_string(),
                deleting: false,
            },
        );
        assert_eq!(d.get_str("metadata.0.name"), Some("tiller-deploy"));
        assert_eq!(d.get_i64("metadata.0.generation"), 1);
    }

    #[test]
    fn test_namespace_forces_replacement() {
        let schema = TillerResource.schema();
        let prior = data(json!({"namespace": "kube-system"})).into_values();
        let proposed = data(json!({"namespace": "tiller"})).into_values();
        assert!(schema.diff(&prior, &proposed).requires_replace());

        let proposed = data(json!({"max_history": 5})).into_values();
        let diff = schema.diff(&prior, &proposed);
        assert_eq!(diff.changed, vec!["max_history"]);
        assert!(!diff.requires_replace());
    }

    #[tokio::test]
    async fn test_create_read_delete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/kube-system"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": "kube-system"},
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/apis/apps/v1/namespaces/kube-system/deployments"))
            .and(body_partial_json(json!({
                "spec": {"template": {"spec": {"serviceAccountName": "tiller"}}},
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(deployment(1)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/kube-system/services"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {"name": "tiller-deploy", "namespace": "kube-system"},
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(deployment(2)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(deployment(2)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/kube-system/services/tiller-deploy"))
            .respond_with(not_found())
            .expect(1)
            .mount(&server)
            .await;

        let home = tempfile::tempdir().unwrap();
        let meta = testing::cluster_meta(home.path(), &server.uri()).await;
        let resource = TillerResource;

        let mut d = data(json!({"service_account": "tiller"}));
        resource.create(&mut d, &meta).await.unwrap();
        assert_eq!(d.id(), Some("kube-system"));
        assert_eq!(d.get_i64("metadata.0.generation"), 1);
        assert_eq!(d.get_str("metadata.0.uid"), Some("0e5f-tiller"));

        resource.read(&mut d, &meta).await.unwrap();
        assert_eq!(d.id(), Some("kube-system"));
        assert_eq!(d.get_i64("metadata.0.generation"), 2);

        resource.delete(&mut d, &meta).await.unwrap();
        assert!(d.id().is_none());

        Mock::given(method("GET"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(not_found())
            .mount(&server)
            .await;
        let mut gone = data(json!({}));
        gone.set_id("kube-system");
        assert!(!resource.exists(&gone, &meta).await.unwrap());
        resource.read(&mut gone, &meta).await.unwrap();
        assert!(gone.id().is_none());
    }

    #[tokio::test]
    async fn test_import_reads_deployment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(deployment(5)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/apis/apps/v1/namespaces/tiller/deployments/tiller-deploy"))
            .respond_with(not_found())
            .mount(&server)
            .await;

        let home = tempfile::tempdir().unwrap();
        let meta = testing::cluster_meta(home.path(), &server.uri()).await;

        let d = TillerResource.import("kube-system", &meta).await.unwrap();
        assert_eq!(d.get_str("service_account"), Some("tiller"));
        assert_eq!(
            d.get_str("tiller_image"),
            Some("gcr.io/kubernetes-helm/tiller:v2.10.0")
        );
        assert_eq!(d.get_i64("metadata.0.generation"), 5);

        let err = TillerResource.import("tiller", &meta).await.unwrap_err();
        assert_eq!(err.code(), "config");
    }

    #[tokio::test]
    async fn test_requires_cluster() {
        let home = tempfile::tempdir().unwrap();
        let meta = testing::meta(home.path(), MockHelmClient::new());
        let mut d = data(json!({}));
        let err = TillerResource.create(&mut d, &meta).await.unwrap_err();
        assert_eq!(err.code(), "config");
        assert!(d.id().is_none());
    }
}
