//! Integration tests for the plugin binary

use std::io::Write;
use std::process::{Command, Output, Stdio};

/// Run the plugin with `args`, feeding `input` on stdin
fn plugin(args: &[&str], input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_terraform-provider-helm"))
        .args(args)
        .env_remove("TFHELM_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to execute terraform-provider-helm");

    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(input.as_bytes())
        .expect("Failed to write requests");

    child.wait_with_output().expect("Failed to wait for plugin")
}

fn responses(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| serde_json::from_str(l).expect("Each line should be JSON"))
        .collect()
}

mod schema_command {
    use super::*;

    #[test]
    fn test_schema_prints_json() {
        let output = plugin(&["schema"], "");
        assert!(output.status.success());

        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("Output should be valid JSON");
        assert!(json["provider"]["host"].is_object());
        assert!(json["resources"]["helm_repository"].is_object());
        assert!(json["resources"]["helm_tiller"].is_object());
    }

    #[test]
    fn test_help() {
        let output = plugin(&["--help"], "");
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("schema"));
        assert!(stdout.contains("serve"));
    }
}

mod serve_command {
    use super::*;

    #[test]
    fn test_serve_answers_each_line() {
        let input = concat!(
            r#"{"id":1,"method":"schema"}"#,
            "\n",
            r#"{"id":2,"method":"plan","params":{"resource":"helm_repository","config":{"name":"stable","url":"https://charts.example.com"}}}"#,
            "\n",
            r#"{"id":3,"method":"import","params":{"resource":"helm_chart","id":"web"}}"#,
            "\n",
        );
        let output = plugin(&[], input);
        assert!(output.status.success());

        let responses = responses(&output);
        assert_eq!(responses.len(), 3);
        assert!(responses[0]["result"]["provider"].is_object());
        assert_eq!(responses[1]["result"]["action"], "create");
        assert_eq!(responses[2]["error"]["code"], "not_configured");
    }

    #[test]
    fn test_serve_rejects_garbage() {
        let output = plugin(&["serve"], "{oops\n");
        assert!(output.status.success());

        let responses = responses(&output);
        assert_eq!(responses[0]["error"]["code"], "protocol");
    }

    #[test]
    fn test_logs_stay_off_stdout() {
        let output = plugin(&["--debug", "serve"], "{\"id\":1,\"method\":\"schema\"}\n");
        assert!(output.status.success());
        assert_eq!(responses(&output).len(), 1);
    }
}
