//! Helm v2 client that drives the `helm` binary
//!
//! Every call runs `helm` with the Tiller host, Tiller namespace and Helm
//! home pinned by flags. TLS material is written into a private temporary
//! directory owned by the client; values documents live in temporary files
//! removed once the command finishes.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::{NamedTempFile, TempDir};
use tokio::process::Command;
use tracing::debug;

use super::{
    HelmClient, ListFilter, Release, ReleaseRequest, ReleaseStatus, split_chart_version,
};
use crate::error::{ProviderError, Result};
use crate::settings::Settings;
use crate::tls::TlsConfig;

/// Env var overriding the helm binary
pub const HELM_BIN_ENV: &str = "HELM_BIN";

const DEFAULT_HELM_BIN: &str = "helm";

#[derive(Debug, Clone, PartialEq, Eq)]
struct TlsFiles {
    cert: PathBuf,
    key: PathBuf,
    ca: Option<PathBuf>,
    verify: bool,
}

/// Helm client bound to one Tiller host
#[derive(Debug)]
pub struct TillerClient {
    binary: PathBuf,
    host: String,
    tiller_namespace: String,
    home: PathBuf,
    debug: bool,
    plugins_disable: bool,
    tls: Option<TlsFiles>,
    workdir: TempDir,
}

impl TillerClient {
    /// Create a client for `host`, writing TLS material to a private directory
    pub fn new(settings: &Settings, host: &str, tls: Option<&TlsConfig>) -> Result<Self> {
        let binary = std::env::var(HELM_BIN_ENV)
            .ok()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_HELM_BIN.to_string());

        let workdir = tempfile::Builder::new().prefix("tfhelm-").tempdir()?;
        let tls = match tls {
            Some(tls) => Some(write_tls_files(workdir.path(), tls)?),
            None => None,
        };

        debug!(host, binary = %binary, tls = tls.is_some(), "configured helm client");

        Ok(Self {
            binary: PathBuf::from(binary),
            host: host.to_string(),
            tiller_namespace: settings.tiller_namespace.clone(),
            home: settings.home.path().to_path_buf(),
            debug: settings.debug,
            plugins_disable: settings.plugins_disable,
            tls,
            workdir,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether calls are made over TLS
    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Flags shared by every command
    fn global_args(&self) -> Vec<String> {
        let mut args = vec![
            "--host".to_string(),
            self.host.clone(),
            "--tiller-namespace".to_string(),
            self.tiller_namespace.clone(),
            "--home".to_string(),
            self.home.to_string_lossy().into_owned(),
        ];
        if self.debug {
            args.push("--debug".to_string());
        }
        args
    }

    fn tls_args(&self) -> Vec<String> {
        let Some(tls) = &self.tls else {
            return Vec::new();
        };
        let mut args = vec![
            "--tls".to_string(),
            "--tls-cert".to_string(),
            tls.cert.to_string_lossy().into_owned(),
            "--tls-key".to_string(),
            tls.key.to_string_lossy().into_owned(),
        ];
        if let Some(ca) = &tls.ca {
            args.push("--tls-ca-cert".to_string());
            args.push(ca.to_string_lossy().into_owned());
        }
        if tls.verify {
            args.push("--tls-verify".to_string());
        }
        args
    }

    /// Write each values document to its own file, deleted on drop
    fn write_values(&self, values: &[String]) -> Result<Vec<NamedTempFile>> {
        values
            .iter()
            .map(|doc| {
                let mut file = tempfile::Builder::new()
                    .prefix("values-")
                    .suffix(".yaml")
                    .tempfile_in(self.workdir.path())?;
                file.write_all(doc.as_bytes())?;
                file.flush()?;
                Ok(file)
            })
            .collect()
    }

    async fn run(&self, subcommand: &str, args: Vec<String>) -> Result<String> {
        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .args(self.global_args())
            .args(self.tls_args())
            .env("HELM_HOME", &self.home)
            .kill_on_drop(true);
        if self.plugins_disable {
            command.env("HELM_NO_PLUGINS", "1");
        }

        debug!(subcommand, ?args, "running helm");
        let output = command
            .output()
            .await
            .map_err(|e| ProviderError::helm(subcommand, format!("failed to run helm: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim().trim_start_matches("Error: ").to_string();
            return Err(ProviderError::helm(subcommand, message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn write_tls_files(dir: &Path, tls: &TlsConfig) -> Result<TlsFiles> {
    let pem = tls.pem();
    let cert = dir.join("cert.pem");
    let key = dir.join("key.pem");
    std::fs::write(&cert, &pem.cert)?;
    std::fs::write(&key, &pem.key)?;

    let ca = match (&pem.ca, tls.root_pool.is_some()) {
        (Some(ca_pem), true) => {
            let path = dir.join("ca.pem");
            std::fs::write(&path, ca_pem)?;
            Some(path)
        }
        _ => None,
    };

    Ok(TlsFiles {
        cert,
        key,
        ca,
        verify: !tls.insecure_skip_verify,
    })
}

fn chart_args(req: &ReleaseRequest, args: &mut Vec<String>) {
    if let Some(repo) = &req.chart.repo_url {
        args.extend(["--repo".to_string(), repo.clone()]);
    }
    if let Some(version) = req.chart.version.as_ref().filter(|v| !v.is_empty()) {
        args.extend(["--version".to_string(), version.clone()]);
    }
    if req.devel {
        args.push("--devel".to_string());
    }
    if req.verify {
        args.push("--verify".to_string());
    }
    if let Some(keyring) = &req.keyring {
        args.extend(["--keyring".to_string(), keyring.clone()]);
    }
}

fn temp_paths(files: &[NamedTempFile]) -> Vec<PathBuf> {
    files.iter().map(|f| f.path().to_path_buf()).collect()
}

fn common_release_args(req: &ReleaseRequest, values: &[PathBuf], args: &mut Vec<String>) {
    for path in values {
        args.extend(["--values".to_string(), path.to_string_lossy().into_owned()]);
    }
    for (name, value) in &req.set {
        args.extend(["--set".to_string(), format!("{}={}", name, value)]);
    }
    if req.timeout > 0 {
        args.extend(["--timeout".to_string(), req.timeout.to_string()]);
    }
    if req.wait {
        args.push("--wait".to_string());
    }
    if req.disable_hooks {
        args.push("--no-hooks".to_string());
    }
}

/// `helm install` arguments
pub(crate) fn install_args(req: &ReleaseRequest, values: &[PathBuf]) -> Vec<String> {
    let mut args = vec![
        "install".to_string(),
        req.chart.chart.clone(),
        "--name".to_string(),
        req.name.clone(),
        "--namespace".to_string(),
        req.namespace.clone(),
    ];
    chart_args(req, &mut args);
    common_release_args(req, values, &mut args);
    args
}

/// `helm upgrade` arguments
pub(crate) fn upgrade_args(req: &ReleaseRequest, values: &[PathBuf]) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        req.name.clone(),
        req.chart.chart.clone(),
    ];
    chart_args(req, &mut args);
    common_release_args(req, values, &mut args);
    if req.reuse_values {
        args.push("--reuse-values".to_string());
    } else {
        args.push("--reset-values".to_string());
    }
    if req.force {
        args.push("--force".to_string());
    }
    if req.recreate_pods {
        args.push("--recreate-pods".to_string());
    }
    args
}

/// `helm list` arguments
pub(crate) fn list_args(filter: &ListFilter) -> Vec<String> {
    let mut args = vec!["list".to_string()];
    if let Some(f) = &filter.filter {
        args.push(f.clone());
    }
    if let Some(ns) = &filter.namespace {
        args.extend(["--namespace".to_string(), ns.clone()]);
    }
    if filter.all {
        args.push("--all".to_string());
    }
    args.extend(["--output".to_string(), "json".to_string()]);
    args
}

#[derive(Debug, Default, Deserialize)]
struct ListOutput {
    #[serde(rename = "Releases", default)]
    releases: Vec<ListedRelease>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListedRelease {
    name: String,
    revision: i64,
    updated: String,
    status: String,
    chart: String,
    app_version: String,
    namespace: String,
}

impl From<ListedRelease> for Release {
    fn from(r: ListedRelease) -> Self {
        let (chart, version) = split_chart_version(&r.chart);
        Self {
            chart: chart.to_string(),
            version: version.to_string(),
            status: r.status.parse().unwrap_or(ReleaseStatus::Unknown),
            name: r.name,
            namespace: r.namespace,
            revision: r.revision,
            app_version: r.app_version,
            updated: r.updated,
        }
    }
}

/// Parse `helm list --output json`; helm prints nothing when there are no releases
pub(crate) fn parse_list_output(stdout: &str) -> Result<Vec<Release>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let output: ListOutput = serde_json::from_str(stdout)?;
    Ok(output.releases.into_iter().map(Release::from).collect())
}

#[async_trait]
impl HelmClient for TillerClient {
    async fn install(&self, req: &ReleaseRequest) -> Result<Release> {
        let files = self.write_values(&req.values)?;
        let values = temp_paths(&files);
        self.run("install", install_args(req, &values)).await?;
        drop(files);
        self.release_status(&req.name).await
    }

    async fn upgrade(&self, req: &ReleaseRequest) -> Result<Release> {
        let files = self.write_values(&req.values)?;
        let values = temp_paths(&files);
        self.run("upgrade", upgrade_args(req, &values)).await?;
        drop(files);
        self.release_status(&req.name).await
    }

    async fn release_status(&self, name: &str) -> Result<Release> {
        self.list_releases(&ListFilter::exact(name))
            .await?
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| ProviderError::ReleaseNotFound {
                name: name.to_string(),
            })
    }

    async fn release_values(&self, name: &str) -> Result<String> {
        self.run(
            "get values",
            vec!["get".to_string(), "values".to_string(), name.to_string()],
        )
        .await
        .map_err(|e| release_not_found(e, name))
    }

    async fn list_releases(&self, filter: &ListFilter) -> Result<Vec<Release>> {
        let stdout = self.run("list", list_args(filter)).await?;
        parse_list_output(&stdout)
    }

    async fn delete_release(&self, name: &str, purge: bool) -> Result<()> {
        let mut args = vec!["delete".to_string(), name.to_string()];
        if purge {
            args.push("--purge".to_string());
        }
        self.run("delete", args)
            .await
            .map(|_| ())
            .map_err(|e| release_not_found(e, name))
    }
}

/// Map a helm "not found" failure onto [`ProviderError::ReleaseNotFound`]
fn release_not_found(err: ProviderError, name: &str) -> ProviderError {
    match err {
        ProviderError::Helm { message, .. } if message.contains("not found") => {
            ProviderError::ReleaseNotFound {
                name: name.to_string(),
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::ChartRef;

    fn request() -> ReleaseRequest {
        ReleaseRequest {
            name: "web".to_string(),
            namespace: "apps".to_string(),
            chart: ChartRef {
                chart: "stable/nginx".to_string(),
                repo_url: None,
                version: Some("1.0.0".to_string()),
            },
            set: vec![("replicas".to_string(), "2".to_string())],
            timeout: 300,
            wait: true,
            ..Default::default()
        }
    }

    fn settings(home: &Path) -> Settings {
        Settings {
            tiller_host: String::new(),
            tiller_namespace: "tiller".to_string(),
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

    #[test]
    fn test_install_args() {
        let args = install_args(&request(), &[PathBuf::from("/tmp/v0.yaml")]);
        assert_eq!(
            args,
            vec![
                "install", "stable/nginx", "--name", "web", "--namespace", "apps", "--version",
                "1.0.0", "--values", "/tmp/v0.yaml", "--set", "replicas=2", "--timeout", "300",
                "--wait",
            ]
        );
    }

    #[test]
    fn test_upgrade_args() {
        let req = ReleaseRequest {
            chart: ChartRef {
                chart: "nginx".to_string(),
                repo_url: Some("https://charts.example.com".to_string()),
                version: None,
            },
            reuse_values: true,
            recreate_pods: true,
            wait: false,
            ..request()
        };
        let args = upgrade_args(&req, &[]);
        assert_eq!(&args[..3], ["upgrade", "web", "nginx"]);
        assert!(args.windows(2).any(|w| w == ["--repo", "https://charts.example.com"]));
        assert!(args.contains(&"--reuse-values".to_string()));
        assert!(args.contains(&"--recreate-pods".to_string()));
        assert!(!args.contains(&"--wait".to_string()));
    }

    #[test]
    fn test_list_args() {
        assert_eq!(
            list_args(&ListFilter::exact("web")),
            vec!["list", "^web$", "--all", "--output", "json"]
        );
    }

    #[test]
    fn test_parse_list_output() {
        let stdout = r#"{"Next":"","Releases":[{"Name":"web","Revision":3,"Updated":"Mon Oct  1 10:00:00 2018","Status":"DEPLOYED","Chart":"nginx-ingress-0.31.0","AppVersion":"0.20.0","Namespace":"apps"}]}"#;
        let releases = parse_list_output(stdout).unwrap();
        assert_eq!(releases.len(), 1);
        let r = &releases[0];
        assert_eq!(r.chart, "nginx-ingress");
        assert_eq!(r.version, "0.31.0");
        assert_eq!(r.revision, 3);
        assert_eq!(r.status, ReleaseStatus::Deployed);

        assert!(parse_list_output("\n").unwrap().is_empty());
    }

    #[test]
    fn test_release_not_found_mapping() {
        let err = release_not_found(
            ProviderError::helm("delete", "release: \"web\" not found"),
            "web",
        );
        assert!(matches!(err, ProviderError::ReleaseNotFound { ref name } if name == "web"));

        let err = release_not_found(ProviderError::helm("delete", "transport is closing"), "web");
        assert!(matches!(err, ProviderError::Helm { .. }));
    }

    #[test]
    fn test_global_and_tls_args() {
        let home = tempfile::tempdir().unwrap();
        let client = TillerClient::new(&settings(home.path()), "localhost:40000", None).unwrap();
        let args = client.global_args();
        assert_eq!(&args[..4], ["--host", "localhost:40000", "--tiller-namespace", "tiller"]);
        assert!(client.tls_args().is_empty());
        assert!(!client.uses_tls());
    }

    #[test]
    fn test_values_files_removed_on_drop() {
        let home = tempfile::tempdir().unwrap();
        let client = TillerClient::new(&settings(home.path()), "localhost:1", None).unwrap();
        let files = client
            .write_values(&["a: 1\n".to_string(), "b: 2\n".to_string()])
            .unwrap();
        let paths = temp_paths(&files);
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);
        assert!(paths[0].starts_with(client.workdir.path()));
        assert_eq!(std::fs::read_to_string(&paths[1]).unwrap(), "b: 2\n");

        drop(files);
        assert!(paths.iter().all(|p| !p.exists()));
    }
}
