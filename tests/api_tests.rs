//! End-to-end tests of the HTTP surface against a local backend.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use common::{TestServer, default_peer, upload_request};
use futures::{TryStreamExt, stream};
use serde_json::json;
use std::{io, net::SocketAddr, time::Duration};
use tempdrop::{
    crypto,
    models::file::ScanStatus,
    services::file_repository::NewFile,
};
use uuid::Uuid;

#[tokio::test]
async fn plain_upload_and_download() {
    let server = TestServer::new().await;
    let response = server
        .upload("résumé final.pdf", b"%PDF-1.4 not really", &[])
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let body = response.json();
    let code = body["accessCode"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert_eq!(body["urlPath"], format!("/download/{}", code));

    let download = server.get(&format!("/data/{}", code.to_lowercase())).await;
    assert_eq!(download.status, StatusCode::OK);
    assert_eq!(download.body.as_ref(), b"%PDF-1.4 not really");
    assert_eq!(download.header("content-type"), Some("application/octet-stream"));
    assert_eq!(download.header("content-length"), Some("19"));
    assert_eq!(
        download.header("content-disposition"),
        Some("attachment; filename*=UTF-8''r%C3%A9sum%C3%A9%20final.pdf")
    );

    // Reusable until expiry.
    assert_eq!(server.get(&format!("/data/{}", code)).await.status, StatusCode::OK);
}

#[tokio::test]
async fn bodyless_post_downloads_plaintext_files() {
    let server = TestServer::new().await;
    let code = server.upload_ok("plain.txt", b"no password", &[]).await;
    let uri = format!("/data/{}", code);

    let download = server.send(Request::post(&uri).body(Body::empty()).unwrap()).await;
    assert_eq!(download.status, StatusCode::OK);
    assert_eq!(download.body.as_ref(), b"no password");

    let malformed = server
        .send(Request::post(&uri).body(Body::from("{oops")).unwrap())
        .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wildcard_cors_origin_is_accepted() {
    let server = TestServer::with_config(|cfg| cfg.cors_allowed_origins = vec!["*".into()]).await;
    let response = server
        .send(
            Request::get("/healthz")
                .header("origin", "https://frontend.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("access-control-allow-origin"), Some("*"));
    assert_eq!(response.header("access-control-allow-credentials"), None);
}

#[tokio::test]
async fn metadata_hides_secrets() {
    let server = TestServer::new().await;
    let code = server.upload_ok("notes.txt", b"hello", &[("x-file-expires-in", "120")]).await;

    let meta = server.get(&format!("/api/v1/files/meta/{}", code)).await;
    assert_eq!(meta.status, StatusCode::OK);
    let body = meta.json();
    assert_eq!(body["accessCode"], code.as_str());
    assert_eq!(body["filename"], "notes.txt");
    assert_eq!(body["sizeBytes"], 5);
    assert_eq!(body["isEncrypted"], false);
    // Short-lived uploads are not scanned.
    assert_eq!(body["scanStatus"], "skipped");
    assert!(body.get("storageKey").is_none());
    assert!(body.get("verificationHash").is_none());

    let missing = server.get("/api/v1/files/meta/ZZZZZZ").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.json()["status"], 404);
    assert_eq!(missing.json()["message"], "file not found or expired");
}

#[tokio::test]
async fn expired_files_are_gone_before_the_reaper_runs() {
    let server = TestServer::new().await;
    let now = Utc::now();
    let id = Uuid::new_v4();
    let file = server
        .state
        .repo
        .insert_with_unique_code(&NewFile {
            id,
            filename: "old.txt".into(),
            size_bytes: 3,
            original_size_bytes: 3,
            is_encrypted: false,
            encryption_salt: None,
            verification_hash: None,
            download_once: false,
            storage_key: id.to_string(),
            expires_at: now - ChronoDuration::seconds(1),
            created_at: now - ChronoDuration::hours(1),
            scan_status: ScanStatus::Skipped,
            scan_result: String::new(),
        })
        .await
        .unwrap();

    for uri in [
        format!("/data/{}", file.access_code),
        format!("/api/v1/files/meta/{}", file.access_code),
        format!("/api/v1/preview/{}", file.access_code),
    ] {
        assert_eq!(server.get(&uri).await.status, StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn encrypted_round_trip() {
    let server = TestServer::new().await;
    let password = "correct horse battery staple";
    let salt = crypto::generate_salt();
    let salt_b64 = crypto::encode_salt(&salt);
    let key = crypto::derive_key(password, &salt).unwrap();
    let hash = crypto::verification_hash(password, &salt);

    let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let input = stream::iter(
        plaintext
            .chunks(777)
            .map(|c| Ok::<_, io::Error>(Bytes::copy_from_slice(c)))
            .collect::<Vec<_>>(),
    );
    let frames: Vec<Bytes> = crypto::encrypt_stream(input, &key, 1024)
        .try_collect()
        .await
        .unwrap();
    let ciphertext = frames.concat();
    assert_eq!(
        ciphertext.len() as u64,
        crypto::encrypted_len(plaintext.len() as u64, 1024)
    );

    let original_size = plaintext.len().to_string();
    let code = server
        .upload_ok(
            "secret.bin",
            &ciphertext,
            &[
                ("x-file-encrypted", "true"),
                ("x-file-salt", &salt_b64),
                ("x-file-verification-hash", &hash),
                ("x-file-original-size", &original_size),
            ],
        )
        .await;

    let meta = server.get(&format!("/api/v1/files/meta/{}", code)).await.json();
    assert_eq!(meta["isEncrypted"], true);
    assert_eq!(meta["encryptionSalt"], salt_b64.as_str());
    assert_eq!(meta["originalSizeBytes"], plaintext.len());
    assert_eq!(meta["scanStatus"], "clean");

    let uri = format!("/data/{}", code);
    assert_eq!(server.get(&uri).await.status, StatusCode::METHOD_NOT_ALLOWED);

    let wrong = crypto::verification_hash("wrong", &salt);
    let denied = server.post_json(&uri, json!({ "verificationHash": wrong })).await;
    assert_eq!(denied.status, StatusCode::UNAUTHORIZED);

    let malformed = server
        .send(Request::post(&uri).body(Body::from("not json")).unwrap())
        .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);

    let bodyless = server.send(Request::post(&uri).body(Body::empty()).unwrap()).await;
    assert_eq!(bodyless.status, StatusCode::METHOD_NOT_ALLOWED);

    let download = server
        .post_json(&uri, json!({ "verificationHash": hash.to_uppercase() }))
        .await;
    assert_eq!(download.status, StatusCode::OK);
    assert_eq!(download.body.as_ref(), ciphertext.as_slice());

    let decrypted: Vec<Bytes> =
        crypto::decrypt_stream(stream::iter(vec![Ok::<_, io::Error>(download.body)]), &key)
            .try_collect()
            .await
            .unwrap();
    assert_eq!(decrypted.concat(), plaintext);
}

#[tokio::test]
async fn burn_after_read_is_served_once() {
    let server = TestServer::new().await;
    let code = server
        .upload_ok("once.txt", b"self destruct", &[("x-file-download-once", "1")])
        .await;
    let uri = format!("/data/{}", code);

    let first = server.get(&uri).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body.as_ref(), b"self destruct");

    assert_eq!(server.get(&uri).await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        server.get(&format!("/api/v1/files/meta/{}", code)).await.status,
        StatusCode::NOT_FOUND
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.state.burn.pending(), 0);
    assert_eq!(server.get(&uri).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_validation() {
    let server = TestServer::new().await;

    let no_name = Request::post("/api/v1/uploads/stream-complete")
        .header("x-file-original-size", "3")
        .body(Body::from("abc"))
        .unwrap();
    assert_eq!(server.send(no_name).await.status, StatusCode::BAD_REQUEST);

    let bad_size = server
        .upload("a.txt", b"abc", &[("x-file-original-size", "three")])
        .await;
    assert_eq!(bad_size.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_size.json()["status"], 400);

    let no_salt = server
        .upload(
            "a.txt",
            b"abc",
            &[("x-file-encrypted", "true"), ("x-file-verification-hash", "abcd")],
        )
        .await;
    assert_eq!(no_salt.status, StatusCode::BAD_REQUEST);

    let not_hex = server
        .upload(
            "a.txt",
            b"abc",
            &[
                ("x-file-encrypted", "TRUE"),
                ("x-file-salt", &crypto::encode_salt(&crypto::generate_salt())),
                ("x-file-verification-hash", "not-a-hash"),
            ],
        )
        .await;
    assert_eq!(not_hex.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_uploads_are_rejected() {
    let server = TestServer::new().await;
    let big = vec![0u8; 1024 * 1024 + 1];

    let declared = server.upload("big.bin", &big, &[]).await;
    assert_eq!(declared.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(declared.json()["message"].as_str().unwrap().contains("1 MB"));

    // No Content-Length: the limit trips while streaming.
    let chunks: Vec<io::Result<Bytes>> = big
        .chunks(64 * 1024)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let streamed = Request::post("/api/v1/uploads/stream-complete")
        .header("x-file-name", "big.bin")
        .header("x-file-original-size", big.len().to_string())
        .body(Body::from_stream(stream::iter(chunks)))
        .unwrap();
    let response = server.send(streamed).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);

    let public = server.get("/api/v1/files/public").await.json();
    assert_eq!(public.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn uploads_and_reports_are_rate_limited_per_ip() {
    let server = TestServer::with_config(|cfg| {
        cfg.rate_limit.requests = 2;
        cfg.rate_limit.window = Duration::from_secs(60);
    })
    .await;
    let a = SocketAddr::from(([10, 0, 0, 1], 5000));
    let b = SocketAddr::from(([10, 0, 0, 2], 5000));

    for _ in 0..2 {
        let ok = server.send_from(a, upload_request("x.txt", b"x", &[])).await;
        assert_eq!(ok.status, StatusCode::CREATED);
    }
    let limited = server.send_from(a, upload_request("x.txt", b"x", &[])).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.json()["status"], 429);

    let report = Request::post("/api/v1/report")
        .body(Body::from(json!({ "accessCode": "ABCDEF" }).to_string()))
        .unwrap();
    assert_eq!(
        server.send_from(a, report).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    let other = server.send_from(b, upload_request("x.txt", b"x", &[])).await;
    assert_eq!(other.status, StatusCode::CREATED);

    // Reads are never limited.
    let public = Request::get("/api/v1/files/public").body(Body::empty()).unwrap();
    assert_eq!(server.send_from(a, public).await.status, StatusCode::OK);
}

#[tokio::test]
async fn forwarded_headers_are_honoured_when_trusted() {
    let server = TestServer::with_config(|cfg| {
        cfg.rate_limit.requests = 1;
        cfg.rate_limit.trust_forwarded_headers = true;
    })
    .await;

    let from = |ip: &str| upload_request("x.txt", b"x", &[("x-forwarded-for", ip)]);
    assert_eq!(
        server.send(from("203.0.113.7, 10.0.0.1")).await.status,
        StatusCode::CREATED
    );
    assert_eq!(server.send(from("203.0.113.8")).await.status, StatusCode::CREATED);
    assert_eq!(
        server.send(from("203.0.113.7")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn reports_are_recorded() {
    let server = TestServer::new().await;
    let code = server.upload_ok("spam.txt", b"buy now", &[]).await;

    let response = server
        .post_json(
            "/api/v1/report",
            json!({ "accessCode": code.to_lowercase(), "reason": "spam" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.json()["message"].as_str().is_some());
    assert_eq!(server.state.repo.count_reports(&code).await.unwrap(), 1);

    let missing_code = server.post_json("/api/v1/report", json!({ "reason": "x" })).await;
    assert_eq!(missing_code.status, StatusCode::BAD_REQUEST);
    let blank_code = server
        .post_json("/api/v1/report", json!({ "accessCode": " " }))
        .await;
    assert_eq!(blank_code.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn public_listing_excludes_private_files() {
    let server = TestServer::new().await;
    let public = server.upload_ok("public.txt", b"hi", &[]).await;
    server
        .upload_ok("once.txt", b"hi", &[("x-file-download-once", "true")])
        .await;
    let salt = crypto::generate_salt();
    server
        .upload_ok(
            "enc.bin",
            b"ciphertext",
            &[
                ("x-file-encrypted", "1"),
                ("x-file-salt", &crypto::encode_salt(&salt)),
                ("x-file-verification-hash", &crypto::verification_hash("pw", &salt)),
            ],
        )
        .await;

    let listing = server.get("/api/v1/files/public").await;
    assert_eq!(listing.status, StatusCode::OK);
    let files = listing.json();
    let files = files.as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["accessCode"], public.as_str());
    assert_eq!(files[0]["filename"], "public.txt");
    assert!(files[0].get("storageKey").is_none());
}

#[tokio::test]
async fn previews() {
    let server = TestServer::new().await;
    let code = server.upload_ok("hello.txt", b"hello preview", &[]).await;

    let preview = server.get(&format!("/api/v1/preview/{}", code)).await;
    assert_eq!(preview.status, StatusCode::OK);
    assert_eq!(preview.body.as_ref(), b"hello preview");
    assert_eq!(preview.header("content-type"), Some("text/plain; charset=utf-8"));
    assert_eq!(preview.header("x-content-type-options"), Some("nosniff"));
    assert_eq!(
        preview.header("content-disposition"),
        Some("inline; filename*=UTF-8''hello.txt")
    );

    let data_uri = server.get(&format!("/api/v1/preview/data-uri/{}", code)).await;
    assert_eq!(data_uri.status, StatusCode::OK);
    assert_eq!(
        data_uri.json()["dataUri"],
        "data:text/plain;charset=utf-8;base64,aGVsbG8gcHJldmlldw=="
    );

    let salt = crypto::generate_salt();
    let encrypted = server
        .upload_ok(
            "enc.bin",
            b"ciphertext",
            &[
                ("x-file-encrypted", "true"),
                ("x-file-salt", &crypto::encode_salt(&salt)),
                ("x-file-verification-hash", &crypto::verification_hash("pw", &salt)),
            ],
        )
        .await;
    assert_eq!(
        server.get(&format!("/api/v1/preview/{}", encrypted)).await.status,
        StatusCode::FORBIDDEN
    );

    let big = server.upload_ok("big.txt", &[b'a'; 70 * 1024], &[]).await;
    assert_eq!(
        server.get(&format!("/api/v1/preview/data-uri/{}", big)).await.status,
        StatusCode::PAYLOAD_TOO_LARGE
    );
}

#[tokio::test]
async fn health_endpoints() {
    let server = TestServer::new().await;

    let live = server.get("/healthz").await;
    assert_eq!(live.status, StatusCode::OK);
    assert_eq!(live.json()["status"], "ok");

    let ready = server.get("/readyz").await;
    assert_eq!(ready.status, StatusCode::OK);
    let body = ready.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["local"]["ok"], true);
}

#[tokio::test]
async fn reporter_ip_ignores_untrusted_forwarded_headers() {
    let server = TestServer::new().await;
    let report = Request::post("/api/v1/report")
        .header("x-forwarded-for", "198.51.100.1")
        .body(Body::from(json!({ "accessCode": "ABCDEF", "reason": "x" }).to_string()))
        .unwrap();
    assert_eq!(server.send_from(default_peer(), report).await.status, StatusCode::OK);

    let ip: String = sqlx::query_scalar("SELECT reporter_ip FROM reports")
        .fetch_one(server.state.repo.pool())
        .await
        .unwrap();
    assert_eq!(ip, "127.0.0.1");
}
