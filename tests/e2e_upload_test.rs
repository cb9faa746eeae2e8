//! End-to-End Upload Tests
//!
//! Full stack: [`Uploader`] with the configured HTTP transport, files on
//! disk, and a file-backed checkpoint store, against a mock server.

mod common;

use common::{Recorder, Seen};
use resumable_uploadr::{Config, Uploader};
use std::io::Write;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SUCCESS: &str = r#"{"success":true}"#;

fn write_file(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(data).unwrap();
    path
}

fn param(request: &Request, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn chunked_config(server: &MockServer, dir: &tempfile::TempDir) -> Config {
    let mut config = Config::with_endpoint(format!("{}/files/", server.uri()));
    config.chunking.enabled = true;
    config.chunking.part_size = 4;
    config.resume.enabled = true;
    config.resume.store_path = Some(dir.path().join("checkpoints.json"));
    config
}

#[tokio::test]
async fn test_chunked_upload_from_disk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SUCCESS))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = write_file(&dir, "log.txt", b"0123456789");
    let recorder = Recorder::new();
    let uploader = Uploader::builder(chunked_config(&server, &dir))
        .callbacks(recorder.clone())
        .build()
        .unwrap();

    let ids = uploader.add_paths([&file]).await.unwrap();
    uploader.wait_idle().await.unwrap();
    assert_eq!(recorder.completions(ids[0]), vec![true]);

    let requests = server.received_requests().await.unwrap();
    let parts: Vec<String> = requests
        .iter()
        .map(|r| param(r, "qqpartindex").unwrap())
        .collect();
    assert_eq!(parts, vec!["0", "1", "2"]);
    assert_eq!(param(&requests[2], "qqchunksize").as_deref(), Some("2"));
    assert_eq!(param(&requests[0], "qqfilename").as_deref(), Some("log.txt"));
    assert!(uploader.get_resumable_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(&dir, "archive.zip", b"0123456789");

    // First run: the server rejects the second chunk
    let server = MockServer::start().await;
    Mock::given(query_param("qqpartindex", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"success":false,"error":"gone"}"#),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SUCCESS))
        .mount(&server)
        .await;

    let recorder = Recorder::new();
    let uploader = Uploader::builder(chunked_config(&server, &dir))
        .callbacks(recorder.clone())
        .build()
        .unwrap();
    let id = uploader.add_paths([&file]).await.unwrap()[0];
    let uuid = uploader.get_uuid(id).await.unwrap().unwrap();
    uploader.wait_idle().await.unwrap();
    assert_eq!(recorder.completions(id), vec![false]);
    drop(uploader);

    // Second run, new process state, same checkpoint file
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SUCCESS))
        .mount(&server)
        .await;

    let recorder = Recorder::new();
    let uploader = Uploader::builder(chunked_config(&server, &dir))
        .callbacks(recorder.clone())
        .build()
        .unwrap();

    let resumable = uploader.get_resumable_files().await.unwrap();
    assert_eq!(resumable.len(), 1);
    assert_eq!(resumable[0].name, "archive.zip");
    assert_eq!(resumable[0].part_index, 1);

    let id = uploader.add_paths([&file]).await.unwrap()[0];
    uploader.wait_idle().await.unwrap();
    assert!(recorder.seen().contains(&Seen::Resume(id, 1)));
    assert_eq!(recorder.completions(id), vec![true]);

    let requests = server.received_requests().await.unwrap();
    let parts: Vec<String> = requests
        .iter()
        .map(|r| param(r, "qqpartindex").unwrap())
        .collect();
    assert_eq!(parts, vec!["1", "2"]);
    assert_eq!(param(&requests[0], "qqresume").as_deref(), Some("true"));
    assert_eq!(param(&requests[1], "qqresume"), None);
    assert!(requests
        .iter()
        .all(|r| param(r, "qquuid").as_deref() == Some(uuid.as_str())));
    assert!(uploader.get_resumable_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_server_fails_the_file() {
    let server = MockServer::start().await;
    let endpoint = format!("{}/files/", server.uri());
    drop(server);

    let recorder = Recorder::new();
    let uploader = Uploader::builder(Config::with_endpoint(endpoint))
        .callbacks(recorder.clone())
        .build()
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let file = write_file(&dir, "a.txt", b"abc");
    let id = uploader.add_paths([&file]).await.unwrap()[0];
    uploader.wait_idle().await.unwrap();

    assert_eq!(recorder.completions(id), vec![false]);
    assert_eq!(recorder.errors().len(), 1);
}
