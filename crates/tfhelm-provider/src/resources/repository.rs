//! `helm_repository`: a chart repository registered in the Helm home

use async_trait::async_trait;
use serde_json::{Map, Value};
use tfhelm_repo::{ChartRepository, Repository, RepositoryFile};
use tracing::{debug, info};

use super::{Resource, metadata_block};
use crate::content::read_path_or_contents;
use crate::data::ResourceData;
use crate::error::Result;
use crate::meta::Meta;
use crate::schema::{AttrType, Attribute, Schema};
use crate::tls::{TlsConfig, ca_client_config};

pub struct RepositoryResource;

impl RepositoryResource {
    fn entry(d: &ResourceData) -> Result<Repository> {
        let mut repo = Repository::new(d.require_str("name")?, d.require_str("url")?)?;
        repo.username = d.string("username");
        repo.password = d.string("password");
        repo.key_file = d.string("key_file");
        repo.cert_file = d.string("cert_file");
        repo.ca_file = d.string("ca_file");
        Ok(repo)
    }

    /// TLS for the index download: a client key pair, custom roots, or both
    fn tls(repo: &Repository) -> Result<Option<rustls::ClientConfig>> {
        let read = |value: &str| -> Result<Option<String>> {
            let (content, _) = read_path_or_contents(value)?;
            Ok(Some(content).filter(|c| !c.is_empty()))
        };
        let ca = read(&repo.ca_file)?;
        match TlsConfig::from_pem(read(&repo.key_file)?, read(&repo.cert_file)?, ca.clone(), false)? {
            Some(tls) => tls.client_config().map(Some),
            None => ca.as_deref().map(ca_client_config).transpose(),
        }
    }

    async fn add(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        let repo = Self::entry(d)?;
        let tls = Self::tls(&repo)?;
        let home = &meta.settings.home;

        let mut client = ChartRepository::new(repo, tls)?;
        let index = client.download_index_file(home).await?;
        let repo = client.into_repository();

        let path = home.repository_file();
        let mut file = RepositoryFile::load_or_default(&path)?;
        file.update(repo.clone());
        file.save_to(&path)?;

        info!(name = %repo.name, url = %repo.url, charts = index.len(), "\"{}\" has been added to your repositories", repo.name);

        d.set_id(repo.name.clone());
        set_metadata(d, &repo);
        Ok(())
    }
}

fn set_metadata(d: &mut ResourceData, repo: &Repository) {
    let mut fields = Map::new();
    fields.insert("name".to_string(), Value::String(repo.name.clone()));
    fields.insert("url".to_string(), Value::String(repo.url.clone()));
    d.set("metadata", metadata_block(fields));
}

#[async_trait]
impl Resource for RepositoryResource {
    fn name(&self) -> &'static str {
        "helm_repository"
    }

    fn schema(&self) -> Schema {
        let metadata = Schema::new()
            .attr("name", Attribute::computed(AttrType::String))
            .attr("url", Attribute::computed(AttrType::String));

        Schema::new()
            .attr(
                "name",
                Attribute::required(AttrType::String)
                    .force_new()
                    .describe("Chart repository name."),
            )
            .attr(
                "url",
                Attribute::required(AttrType::String).describe("Chart repository URL."),
            )
            .attr(
                "key_file",
                Attribute::optional(AttrType::String)
                    .describe("Identify HTTPS client using this SSL key file."),
            )
            .attr(
                "cert_file",
                Attribute::optional(AttrType::String)
                    .describe("Identify HTTPS client using this SSL certificate file."),
            )
            .attr(
                "ca_file",
                Attribute::optional(AttrType::String)
                    .describe("Verify certificates of HTTPS-enabled servers using this CA bundle."),
            )
            .attr(
                "username",
                Attribute::optional(AttrType::String).describe("Username for HTTP basic authentication."),
            )
            .attr(
                "password",
                Attribute::optional(AttrType::String)
                    .sensitive()
                    .describe("Password for HTTP basic authentication."),
            )
            .attr(
                "metadata",
                Attribute::computed_block(metadata).describe("Repository as registered."),
            )
    }

    async fn create(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        self.add(d, meta).await
    }

    async fn read(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        let Some(name) = d.id().map(String::from) else {
            return Ok(());
        };
        let file = RepositoryFile::load_or_default(&meta.settings.home.repository_file())?;
        match file.get(&name) {
            Some(repo) => {
                let repo = repo.clone();
                d.set("name", repo.name.clone());
                d.set("url", repo.url.clone());
                set_metadata(d, &repo);
            }
            None => {
                debug!(name = %name, "repository is gone");
                d.clear_id();
            }
        }
        Ok(())
    }

    async fn update(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        self.add(d, meta).await
    }

    async fn delete(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        let name = d.require_str("name")?.to_string();
        let home = &meta.settings.home;
        let path = home.repository_file();

        let mut file = RepositoryFile::load_or_default(&path)?;
        match file.remove(&name) {
            Ok(_) => file.save_to(&path)?,
            Err(e) if e.is_not_found() => debug!(name = %name, "repository already removed"),
            Err(e) => return Err(e.into()),
        }

        match std::fs::remove_file(home.cache_index(&name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(name = %name, "\"{}\" has been removed from your repositories", name);
        d.clear_id();
        Ok(())
    }

    async fn exists(&self, d: &ResourceData, meta: &Meta) -> Result<bool> {
        let Some(name) = d.id() else {
            return Ok(false);
        };
        let file = RepositoryFile::load_or_default(&meta.settings.home.repository_file())?;
        Ok(file.has(name))
    }
}
