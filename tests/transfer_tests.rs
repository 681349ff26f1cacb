mod support;

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lockdrive_protocol::crypto::buffer_to_hash;
use lockdrive_protocol::error::ProtocolError;
use lockdrive_protocol::events::ProgressKind;
use lockdrive_protocol::pause::TransferSource;
use lockdrive_protocol::store::ConfigStore;
use lockdrive_protocol::types::*;

use support::*;

fn upload_params() -> UploadParams {
    UploadParams {
        uuid: "f-uuid".into(),
        index: 0,
        parent: "p-uuid".into(),
        upload_key: "ukey".into(),
    }
}

fn chunk_data() -> Bytes {
    Bytes::from(vec![7u8; 150_000])
}

fn sync_source() -> TransferSource {
    TransferSource::Sync { location: None }
}

async fn mount_upload_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v3/upload"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body(json!({ "bucket": "b1", "region": "r1" }))),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn upload_chunk_sends_hash_and_checksum() {
    let server = MockServer::start().await;
    mount_upload_ok(&server).await;

    let harness = harness(&server);
    let data = chunk_data();
    let mut rx = harness.events.subscribe();

    let result = harness
        .engine
        .upload_chunk(&upload_params(), data.clone(), sync_source())
        .await
        .unwrap();
    assert_eq!(result.bucket, "b1");

    let requests = requests_to(&server, "/v3/upload").await;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let pairs: BTreeMap<String, String> = request
        .url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let chunk_hash = buffer_to_hash(&data);
    assert_eq!(pairs["hash"], chunk_hash);
    assert_eq!(pairs["uuid"], "f-uuid");
    assert_eq!(pairs["index"], "0");
    assert_eq!(pairs["parent"], "p-uuid");
    assert_eq!(pairs["uploadKey"], "ukey");

    // Checksum header covers the canonical JSON of the query parameters.
    let expected = buffer_to_hash(&serde_json::to_vec(&pairs).unwrap());
    assert_eq!(
        request.headers.get("Checksum").unwrap().to_str().unwrap(),
        expected
    );
    assert_eq!(
        request.headers.get("Authorization").unwrap().to_str().unwrap(),
        format!("Bearer {API_KEY}")
    );
    assert_eq!(request.body.len(), data.len());

    // Progress deltas add up to the chunk size.
    let mut total = 0;
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.kind, ProgressKind::UploadProgress);
        assert_eq!(event.uuid, "f-uuid");
        assert_eq!(event.from, "sync");
        total += event.bytes;
    }
    assert_eq!(total, data.len() as u64);
}

#[tokio::test]
async fn non_sync_upload_emits_seperate_events() {
    let server = MockServer::start().await;
    mount_upload_ok(&server).await;

    let harness = harness(&server);
    let mut rx = harness.events.subscribe();
    harness
        .engine
        .upload_chunk(&upload_params(), Bytes::from(vec![1u8; 1000]), TransferSource::Other)
        .await
        .unwrap();

    let event = rx.try_recv().unwrap();
    assert_eq!(event.kind, ProgressKind::UploadProgressSeperate);
    assert_eq!(event.from, "other");
}

#[tokio::test]
async fn upload_retries_bad_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/upload"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_upload_ok(&server).await;

    let harness = harness(&server);
    harness
        .engine
        .upload_chunk(&upload_params(), chunk_data(), sync_source())
        .await
        .unwrap();
    assert_eq!(requests_to(&server, "/v3/upload").await.len(), 2);
}

#[tokio::test]
async fn upload_storage_exhaustion_pauses_and_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/upload"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(err_body("limit", "Your storage limit has been reached")),
        )
        .mount(&server)
        .await;

    let harness = harness(&server);
    let err = harness
        .engine
        .upload_chunk(&upload_params(), chunk_data(), sync_source())
        .await
        .unwrap_err();

    match err {
        ProtocolError::MaxStorageReached(message) => {
            assert!(message.contains("storage limit"));
        }
        other => panic!("expected MaxStorageReached, got {other:?}"),
    }
    assert!(harness.store.paused());
    assert!(harness.store.max_storage_reached());
}

#[tokio::test]
async fn upload_refused_when_quota_flag_already_set() {
    let server = MockServer::start().await;
    mount_upload_ok(&server).await;

    let harness = harness(&server);
    harness.store.set_max_storage_reached(true);
    let err = harness
        .engine
        .upload_chunk(&upload_params(), chunk_data(), sync_source())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::MaxStorageReached(_)));
    assert!(requests_to(&server, "/v3/upload").await.is_empty());
}

#[tokio::test]
async fn paused_upload_waits_and_resumes() {
    let server = MockServer::start().await;
    mount_upload_ok(&server).await;

    let harness = harness(&server);
    harness.store.set_paused(true);

    let engine = harness.engine.clone();
    let pending = tokio::spawn(async move {
        engine
            .upload_chunk(&upload_params(), chunk_data(), sync_source())
            .await
    });

    // While the flag is set, no request may be issued.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!pending.is_finished());
    assert!(requests_to(&server, "/v3/upload").await.is_empty());

    harness.store.set_paused(false);
    pending.await.unwrap().unwrap();
    assert_eq!(requests_to(&server, "/v3/upload").await.len(), 1);
}

#[tokio::test]
async fn download_chunk_returns_ciphertext() {
    let server = MockServer::start().await;
    let payload = vec![42u8; 130_000];
    Mock::given(method("GET"))
        .and(path("/r1/b1/ch-uuid/0"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let harness = harness(&server);
    let mut rx = harness.events.subscribe();
    let address = ChunkAddress {
        region: "r1".into(),
        bucket: "b1".into(),
        uuid: "ch-uuid".into(),
        index: 0,
    };
    let bytes = harness
        .engine
        .download_chunk(&address, sync_source())
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), payload.as_slice());

    let mut total = 0;
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.kind, ProgressKind::DownloadProgress);
        assert_eq!(event.uuid, "ch-uuid");
        total += event.bytes;
    }
    assert_eq!(total, payload.len() as u64);
}

#[tokio::test]
async fn download_retries_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r1/b1/ch-uuid/3"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r1/b1/ch-uuid/3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"cipher".to_vec()))
        .mount(&server)
        .await;

    let harness = harness(&server);
    let address = ChunkAddress {
        region: "r1".into(),
        bucket: "b1".into(),
        uuid: "ch-uuid".into(),
        index: 3,
    };
    let bytes = harness
        .engine
        .download_chunk(&address, TransferSource::Download)
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), b"cipher");
    assert_eq!(requests_to(&server, "/r1/b1/ch-uuid/3").await.len(), 2);
}

#[tokio::test]
async fn download_fails_with_path_identifying_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r1/b1/ch-uuid/9"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = harness(&server);
    let address = ChunkAddress {
        region: "r1".into(),
        bucket: "b1".into(),
        uuid: "ch-uuid".into(),
        index: 9,
    };
    let err = harness
        .engine
        .download_chunk(&address, TransferSource::Download)
        .await
        .unwrap_err();
    match err {
        ProtocolError::MaxRetries {
            endpoint, attempts, ..
        } => {
            assert_eq!(endpoint, "/r1/b1/ch-uuid/9");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected MaxRetries, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_create_folder_converges_on_existing_uuid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/dir/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": false,
            "code": "folder_exists",
            "message": "Folder with the same name already exists",
            "data": { "existsUUID": "X" }
        })))
        .mount(&server)
        .await;

    let harness = harness(&server);
    let mut tasks = Vec::new();
    for i in 0..10 {
        let engine = harness.engine.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .create_folder(&format!("cand-{i}"), "Docs", "P")
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "X");
    }
    assert_eq!(requests_to(&server, "/v3/dir/create").await.len(), 10);
}

#[tokio::test]
async fn create_folder_encrypts_name_and_hash() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/dir/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({}))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/dir/shared"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({ "sharing": false }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/dir/linked"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body(json!({ "link": false, "links": [] }))),
        )
        .mount(&server)
        .await;

    let harness = harness(&server);
    let uuid = harness
        .engine
        .create_folder("d-new", "Docs", "P")
        .await
        .unwrap();
    assert_eq!(uuid, "d-new");

    let requests = requests_to(&server, "/v3/dir/create").await;
    let body = body_json(&requests[0]);
    assert_eq!(body["uuid"], "d-new");
    assert_eq!(body["parent"], "P");
    assert_eq!(
        body["name"],
        sym_encrypt(MASTER_CURRENT, r#"{"name":"Docs"}"#).as_str()
    );
    assert_eq!(
        body["nameHashed"],
        buffer_to_hash(b"docs")[..64].to_string().as_str()
    );

    // Propagation probed both fan-out sides of the parent.
    assert_eq!(requests_to(&server, "/v3/dir/shared").await.len(), 1);
    assert_eq!(requests_to(&server, "/v3/dir/linked").await.len(), 1);
}

#[tokio::test]
async fn trash_is_idempotent_on_absent_items() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/dir/trash"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(err_body("folder_not_found", "Folder not found")),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/file/trash"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(err_body("file_not_found", "File not found")),
        )
        .mount(&server)
        .await;

    let harness = harness(&server);
    harness
        .engine
        .trash_item(ItemKind::Folder, "gone-1")
        .await
        .unwrap();
    harness
        .engine
        .trash_item(ItemKind::File, "gone-2")
        .await
        .unwrap();
}

#[tokio::test]
async fn mark_upload_done_returns_summary() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/upload/done"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body(json!({ "chunks": 3, "size": 999 }))),
        )
        .mount(&server)
        .await;

    let harness = harness(&server);
    let done = harness
        .engine
        .mark_upload_done(&UploadDoneRequest {
            uuid: "f-uuid".into(),
            upload_key: "ukey".into(),
        })
        .await
        .unwrap();
    assert_eq!(done.chunks, 3);
    assert_eq!(done.size, 999);
}

#[tokio::test]
async fn rename_file_sends_per_key_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/file/rename"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({}))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/item/shared"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({ "sharing": false }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/item/linked"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body(json!({ "link": false, "links": [] }))),
        )
        .mount(&server)
        .await;

    let harness = harness(&server);
    let meta = FileMeta {
        name: "New.txt".into(),
        size: 10,
        mime: "text/plain".into(),
        key: "file-key".into(),
        last_modified: 1700000000,
    };
    harness.engine.rename_file("f-1", &meta).await.unwrap();

    let requests = requests_to(&server, "/v3/file/rename").await;
    let body = body_json(&requests[0]);
    // Visible name under the file's content key, full record under the
    // current master key.
    assert_eq!(body["name"], sym_encrypt("file-key", "New.txt").as_str());
    assert_eq!(
        body["metadata"],
        sym_encrypt(
            MASTER_CURRENT,
            &serde_json::to_string(&Metadata::File(meta)).unwrap()
        )
        .as_str()
    );
    assert_eq!(
        body["nameHashed"],
        buffer_to_hash(b"new.txt")[..64].to_string().as_str()
    );
}

#[tokio::test]
async fn move_file_targets_new_parent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/file/move"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({}))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/dir/shared"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({ "sharing": false }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/dir/linked"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body(json!({ "link": false, "links": [] }))),
        )
        .mount(&server)
        .await;

    let harness = harness(&server);
    let meta = FileMeta {
        name: "a.txt".into(),
        size: 1,
        mime: "text/plain".into(),
        key: "k".into(),
        last_modified: 0,
    };
    harness
        .engine
        .move_file("f-1", "new-parent", &meta)
        .await
        .unwrap();

    let requests = requests_to(&server, "/v3/file/move").await;
    let body = body_json(&requests[0]);
    assert_eq!(body["uuid"], "f-1");
    assert_eq!(body["to"], "new-parent");
    // Propagation ran against the destination parent.
    let shared = requests_to(&server, "/v3/dir/shared").await;
    assert_eq!(body_json(&shared[0])["uuid"], "new-parent");
}

#[tokio::test]
async fn enable_public_link_is_file_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/file/link/edit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({}))))
        .mount(&server)
        .await;

    let harness = harness(&server);
    let err = harness
        .engine
        .enable_public_link(ItemKind::Folder, "d-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Unimplemented(_)));
    assert!(requests_to(&server, "/v3/file/link/edit").await.is_empty());

    let link_uuid = harness
        .engine
        .enable_public_link(ItemKind::File, "f-1")
        .await
        .unwrap();

    let requests = requests_to(&server, "/v3/file/link/edit").await;
    let body = body_json(&requests[0]);
    assert_eq!(body["uuid"], link_uuid.as_str());
    assert_eq!(body["fileUUID"], "f-1");
    assert_eq!(body["type"], "enable");
    assert_eq!(body["password"], "empty");
    assert_eq!(body["expiration"], "never");
    assert_eq!(body["salt"].as_str().unwrap().len(), 32);
}

#[tokio::test]
async fn disable_public_link_uses_existing_link_uuid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/file/link/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body(json!({ "enabled": true, "uuid": "L-1" }))),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/file/link/edit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({}))))
        .mount(&server)
        .await;

    let harness = harness(&server);
    harness
        .engine
        .disable_public_link(ItemKind::File, "f-1")
        .await
        .unwrap();

    let requests = requests_to(&server, "/v3/file/link/edit").await;
    let body = body_json(&requests[0]);
    assert_eq!(body["uuid"], "L-1");
    assert_eq!(body["type"], "disable");
}

#[tokio::test]
async fn disable_public_link_without_link_is_a_noop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/file/link/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({ "enabled": false }))))
        .mount(&server)
        .await;

    let harness = harness(&server);
    harness
        .engine
        .disable_public_link(ItemKind::File, "f-1")
        .await
        .unwrap();
    assert!(requests_to(&server, "/v3/file/link/edit").await.is_empty());
}

#[tokio::test]
async fn disable_folder_link_removes_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/dir/link/remove"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({}))))
        .mount(&server)
        .await;

    let harness = harness(&server);
    harness
        .engine
        .disable_public_link(ItemKind::Folder, "d-1")
        .await
        .unwrap();
    assert_eq!(requests_to(&server, "/v3/dir/link/remove").await.len(), 1);
}
