use lorebook_sync::{LorebookConfig, RemoteConfig};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

#[test]
fn empty_json_uses_defaults() {
    let config = LorebookConfig::from_json("{}").unwrap();
    assert_eq!(config, LorebookConfig::default());
    assert_eq!(config.remote.kind(), "directory");
    assert_eq!(
        config.database_path(),
        PathBuf::from("lorebook-data").join("lorebook.duckdb")
    );
}

#[test]
fn remote_kind_selects_variant() {
    let config = LorebookConfig::from_json(
        r#"{"data_dir": "/tmp/lb", "remote": {"kind": "git", "owner": "me", "repo": "wiki"}}"#,
    )
    .unwrap();
    let RemoteConfig::Git(git) = &config.remote else {
        panic!("expected git remote");
    };
    assert_eq!(git.owner, "me");
    assert_eq!(git.branch, "main");
    assert_eq!(git.api_base_url, "https://api.github.com");

    let http = LorebookConfig::from_json(
        r#"{"remote": {"kind": "http", "base_url": "https://wiki.example/api"}}"#,
    )
    .unwrap();
    assert_eq!(http.remote.kind(), "http");
}

#[test]
fn unknown_kind_is_rejected() {
    assert!(LorebookConfig::from_json(r#"{"remote": {"kind": "ftp"}}"#).is_err());
}

#[test]
fn token_override_applies_when_present() {
    let config = LorebookConfig::from_json(r#"{"remote": {"kind": "http"}}"#)
        .unwrap()
        .with_token_override(Some("secret".to_string()));
    let RemoteConfig::Http(http) = &config.remote else {
        panic!("expected http remote");
    };
    assert_eq!(http.token.as_deref(), Some("secret"));

    let untouched = LorebookConfig::from_json(r#"{"remote": {"kind": "git", "token": "keep"}}"#)
        .unwrap()
        .with_token_override(Some(String::new()));
    let RemoteConfig::Git(git) = &untouched.remote else {
        panic!("expected git remote");
    };
    assert_eq!(git.token, "keep");
}

#[tokio::test]
async fn load_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = LorebookConfig::load(&dir.path().join("absent.json"))
        .await
        .unwrap();
    assert_eq!(config, LorebookConfig::default());
}

#[tokio::test]
async fn load_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lorebook.json");
    tokio::fs::write(&path, r#"{"remote": {"kind": "directory", "root": "/srv/wiki"}}"#)
        .await
        .unwrap();

    let config = LorebookConfig::load(&path).await.unwrap();
    assert_eq!(
        config.remote,
        RemoteConfig::Directory(lorebook_sync::DirectoryBackendConfig {
            root: PathBuf::from("/srv/wiki"),
        })
    );
}

#[test]
fn directory_remote_builds_a_backend() {
    assert!(RemoteConfig::default().build_backend().is_ok());
}
