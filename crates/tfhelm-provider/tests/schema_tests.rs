//! Schema snapshots

use serde_json::json;
use tfhelm::Provider;
use tfhelm::resources::{Resource, RepositoryResource};

#[test]
fn test_repository_schema_snapshot() {
    insta::assert_json_snapshot!(RepositoryResource.schema(), @r#"
    {
      "ca_file": {
        "type": "string",
        "optional": true,
        "description": "Verify certificates of HTTPS-enabled servers using this CA bundle."
      },
      "cert_file": {
        "type": "string",
        "optional": true,
        "description": "Identify HTTPS client using this SSL certificate file."
      },
      "key_file": {
        "type": "string",
        "optional": true,
        "description": "Identify HTTPS client using this SSL key file."
      },
      "metadata": {
        "type": {
          "block": {
            "name": {
              "type": "string",
              "computed": true
            },
            "url": {
              "type": "string",
              "computed": true
            }
          }
        },
        "computed": true,
        "max_items": 1,
        "description": "Repository as registered."
      },
      "name": {
        "type": "string",
        "required": true,
        "force_new": true,
        "description": "Chart repository name."
      },
      "password": {
        "type": "string",
        "optional": true,
        "sensitive": true,
        "description": "Password for HTTP basic authentication."
      },
      "url": {
        "type": "string",
        "required": true,
        "description": "Chart repository URL."
      },
      "username": {
        "type": "string",
        "optional": true,
        "description": "Username for HTTP basic authentication."
      }
    }
    "#);
}

#[test]
fn test_provider_env_fallbacks() {
    let schema = serde_json::to_value(Provider::new().schema()).unwrap();
    let provider = &schema["provider"];

    assert_eq!(provider["host"]["env"], json!(["HELM_HOST"]));
    assert_eq!(provider["home"]["default"], "~/.helm");
    assert_eq!(provider["plugins_disable"]["default"], true);
    assert_eq!(provider["client_key"]["default"], "$HELM_HOME/key.pem");

    let kubernetes = &provider["kubernetes"]["type"]["block"];
    assert_eq!(kubernetes["config_path"]["env"], json!(["KUBE_CONFIG", "KUBECONFIG"]));
    assert_eq!(kubernetes["config_path"]["default"], "~/.kube/config");
    assert_eq!(kubernetes["insecure"]["env"], json!(["KUBE_INSECURE"]));
    assert_eq!(provider["kubernetes"]["max_items"], 1);
}

#[test]
fn test_chart_defaults() {
    let schema = serde_json::to_value(Provider::new().schema()).unwrap();
    let chart = &schema["resources"]["helm_chart"];

    assert_eq!(chart["namespace"]["default"], "default");
    assert_eq!(chart["namespace"]["force_new"], true);
    assert_eq!(chart["timeout"]["default"], 300);
    assert_eq!(chart["wait"]["default"], true);
    assert_eq!(chart["name"]["force_new"], true);

    let tiller = &schema["resources"]["helm_tiller"];
    assert_eq!(tiller["namespace"]["default"], "kube-system");
    assert_eq!(tiller["max_history"]["default"], 0);
}
