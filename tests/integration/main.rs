//! Integration tests for gocache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn gocache() -> Command {
        cargo_bin_cmd!("gocache")
    }

    #[test]
    fn help_displays() {
        gocache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("External build cache helper"))
            .stdout(predicate::str::contains("--s3-bucket"));
    }

    #[test]
    fn version_displays() {
        gocache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("gocache"));
    }

    #[test]
    fn two_buckets_are_rejected() {
        gocache()
            .args(["--s3-bucket", "a", "--gcs-bucket", "b"])
            .assert()
            .failure();
    }
}

mod protocol_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use predicates::prelude::*;
    use serde_json::{json, Value};
    use std::path::Path;
    use tempfile::TempDir;

    /// Helper isolated from the user's config and remote settings
    fn gocache(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("gocache");
        cmd.env("GOCACHEPROG_CONFIG", temp.path().join("config.toml"))
            .env_remove("GOCACHEPROG_S3_BUCKET")
            .env_remove("GOCACHEPROG_GCS_BUCKET")
            .env_remove("GOCACHEPROG_DIR")
            .env_remove("RUST_LOG")
            .arg("--dir")
            .arg(cache_dir(temp));
        cmd
    }

    fn cache_dir(temp: &TempDir) -> std::path::PathBuf {
        temp.path().join("cache")
    }

    fn responses(stdout: &[u8]) -> Vec<Value> {
        serde_json::Deserializer::from_slice(stdout)
            .into_iter::<Value>()
            .map(|v| v.unwrap())
            .collect()
    }

    fn by_id(responses: &[Value], id: i64) -> &Value {
        responses
            .iter()
            .find(|r| r["ID"] == json!(id) && r.get("KnownCommands").is_none())
            .unwrap()
    }

    fn put_request(id: i64, action: &[u8], output: &[u8], body: &[u8]) -> String {
        format!(
            "{}\n{}\n",
            json!({
                "ID": id,
                "Command": "put",
                "ActionID": STANDARD.encode(action),
                "OutputID": STANDARD.encode(output),
                "BodySize": body.len(),
            }),
            json!(STANDARD.encode(body))
        )
    }

    fn get_request(id: i64, action: &[u8]) -> String {
        format!(
            "{}\n",
            json!({"ID": id, "Command": "get", "ActionID": STANDARD.encode(action)})
        )
    }

    #[test]
    fn handshake_on_empty_input() {
        let temp = TempDir::new().unwrap();
        gocache(&temp)
            .write_stdin("")
            .assert()
            .success()
            .stdout(predicate::eq(
                "{\"ID\":0,\"KnownCommands\":[\"get\",\"put\",\"close\"]}\n",
            ));
    }

    #[test]
    fn put_then_get() {
        let temp = TempDir::new().unwrap();

        let output = gocache(&temp)
            .write_stdin(put_request(1, &[0x12, 0x34], &[0xab, 0xcd], b"hello world"))
            .output()
            .unwrap();
        assert!(output.status.success());
        let put = responses(&output.stdout);
        let stored = by_id(&put, 1);
        assert!(stored.get("Err").is_none());
        let object = Path::new(stored["DiskPath"].as_str().unwrap());
        assert_eq!(object, cache_dir(&temp).join("o-abcd"));
        assert_eq!(std::fs::read(object).unwrap(), b"hello world");

        let output = gocache(&temp)
            .write_stdin(get_request(2, &[0x12, 0x34]))
            .output()
            .unwrap();
        assert!(output.status.success());
        let get = responses(&output.stdout);
        let hit = by_id(&get, 2);
        assert_eq!(hit["OutputID"], json!(STANDARD.encode([0xab, 0xcd])));
        assert_eq!(hit["Size"], json!(11));
        assert!(hit.get("Miss").is_none());
    }

    #[test]
    fn index_entry_layout() {
        let temp = TempDir::new().unwrap();
        gocache(&temp)
            .write_stdin(put_request(1, &[0x01], &[0x02], b"abc"))
            .assert()
            .success();

        let raw = std::fs::read_to_string(cache_dir(&temp).join("a-01")).unwrap();
        let entry: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry["v"], json!(1));
        assert_eq!(entry["o"], json!("02"));
        assert_eq!(entry["n"], json!(3));
        assert!(entry["t"].as_i64().unwrap() > 0);
    }

    #[test]
    fn miss_for_unknown_action() {
        let temp = TempDir::new().unwrap();
        let output = gocache(&temp)
            .write_stdin(get_request(5, &[0xee]))
            .output()
            .unwrap();

        assert!(output.status.success());
        assert_eq!(by_id(&responses(&output.stdout), 5)["Miss"], json!(true));
    }

    #[test]
    fn unknown_command_does_not_end_session() {
        let temp = TempDir::new().unwrap();
        let input = format!(
            "{}\n{}",
            json!({"ID": 1, "Command": "stat"}),
            get_request(2, &[0xee])
        );

        let output = gocache(&temp).write_stdin(input).output().unwrap();

        assert!(output.status.success());
        let all = responses(&output.stdout);
        assert!(by_id(&all, 1)["Err"]
            .as_str()
            .unwrap()
            .contains("unknown command"));
        assert_eq!(by_id(&all, 2)["Miss"], json!(true));
    }

    #[test]
    fn body_length_mismatch_fails_process() {
        let temp = TempDir::new().unwrap();
        let input = format!(
            "{}\n{}\n",
            json!({"ID": 1, "Command": "put", "ActionID": "qg==", "OutputID": "uw==", "BodySize": 10}),
            json!(STANDARD.encode(b"short"))
        );

        gocache(&temp)
            .write_stdin(input)
            .assert()
            .failure()
            .stderr(predicate::str::contains("only got 5 bytes of declared 10"));
        assert!(!cache_dir(&temp).join("a-aa").exists());
    }

    #[test]
    fn close_is_acknowledged() {
        let temp = TempDir::new().unwrap();
        let output = gocache(&temp)
            .write_stdin(format!("{}\n", json!({"ID": 9, "Command": "close"})))
            .output()
            .unwrap();

        assert!(output.status.success());
        let resps = responses(&output.stdout);
        let close = by_id(&resps, 9);
        assert!(close.get("Err").is_none());
    }

    #[test]
    fn verbose_summary_goes_to_stderr() {
        let temp = TempDir::new().unwrap();
        gocache(&temp)
            .arg("-v")
            .write_stdin(get_request(1, &[0xee]))
            .assert()
            .success()
            .stderr(predicate::str::contains("[disk] 1 gets, 0 hits, 1 misses"));
    }
}
