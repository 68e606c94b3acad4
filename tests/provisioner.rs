//! Model provisioning against a local HTTP server

use segify::{
    cache::ModelCache, ensure_assets, ModelAsset, ModelFetcher, ModelProvisioner, SegifyConfig,
    SegifyError,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const MODEL_BYTES: &[u8] = b"fake onnx graph bytes";

/// Serves `MODEL_BYTES` for paths ending in `.onnx` and 404 for everything else
async fn spawn_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);

                let request = String::from_utf8_lossy(&request);
                let path = request.split_whitespace().nth(1).unwrap_or("/");
                let response = if path.ends_with(".onnx") {
                    let mut head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        MODEL_BYTES.len()
                    )
                    .into_bytes();
                    head.extend_from_slice(MODEL_BYTES);
                    head
                } else {
                    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_vec()
                };
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, requests)
}

#[tokio::test]
async fn test_download_then_reuse_without_network() {
    let (addr, requests) = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let provisioner = ModelProvisioner::new(false).unwrap();
    let url = format!("http://{addr}/models/sam.onnx");

    let first = provisioner
        .ensure("sam.onnx", &url, dir.path())
        .await
        .unwrap();
    assert!(first.success);
    assert_eq!(first.message, "downloaded");
    assert_eq!(std::fs::read(dir.path().join("sam.onnx")).unwrap(), MODEL_BYTES);
    assert!(!dir.path().join("sam.onnx.part").exists());

    let second = provisioner
        .ensure("sam.onnx", &url, dir.path())
        .await
        .unwrap();
    assert!(second.success);
    assert_eq!(second.message, "already exists");
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_model_is_rejected_without_file() {
    let (addr, _) = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let provisioner = ModelProvisioner::new(false).unwrap();

    let outcome = provisioner
        .ensure("missing.bin", &format!("http://{addr}/missing.bin"), dir.path())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "404 Not Found");
    assert!(!dir.path().join("missing.bin").exists());
    assert!(!dir.path().join("missing.bin.part").exists());
}

#[tokio::test]
async fn test_unreachable_host_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = TempDir::new().unwrap();
    let provisioner = ModelProvisioner::new(false).unwrap();
    let result = provisioner
        .ensure("model.onnx", &format!("http://{addr}/model.onnx"), dir.path())
        .await;
    assert!(result.is_err());
    assert!(!dir.path().join("model.onnx").exists());
}

#[tokio::test]
async fn test_ensure_assets_fetches_every_configured_model() {
    let (addr, _) = spawn_server().await;
    let models = TempDir::new().unwrap();
    let mut builder = SegifyConfig::builder()
        .models_dir(models.path())
        .model_base_url("");
    for asset in ModelAsset::STYLIZATION {
        builder = builder.model_url(asset.id(), format!("http://{addr}/{}", asset.file_name()));
    }
    let config = builder.build().unwrap();
    let cache = ModelCache::new(&config).unwrap();
    let provisioner = ModelProvisioner::new(false).unwrap();

    ensure_assets(&provisioner, &ModelAsset::STYLIZATION, &config, &cache)
        .await
        .unwrap();
    for asset in ModelAsset::STYLIZATION {
        assert!(cache.is_cached(asset.file_name()));
    }

    let err = ensure_assets(&provisioner, &ModelAsset::SEGMENTATION, &config, &cache)
        .await
        .unwrap_err();
    assert!(matches!(err, SegifyError::Provisioning { .. }));
}

#[tokio::test]
async fn test_ensure_assets_fetches_from_base_url() {
    let (addr, requests) = spawn_server().await;
    let models = TempDir::new().unwrap();
    let config = SegifyConfig::builder()
        .models_dir(models.path())
        .model_base_url(format!("http://{addr}/release/"))
        .build()
        .unwrap();
    let cache = ModelCache::new(&config).unwrap();
    let provisioner = ModelProvisioner::new(false).unwrap();

    ensure_assets(&provisioner, &ModelAsset::ALL, &config, &cache)
        .await
        .unwrap();
    for asset in ModelAsset::ALL {
        assert_eq!(
            std::fs::read(cache.model_path(asset.file_name())).unwrap(),
            MODEL_BYTES
        );
    }
    assert_eq!(requests.load(Ordering::SeqCst), ModelAsset::ALL.len());
}
