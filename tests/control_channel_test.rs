//! Observer sessions over the Unix control socket.

use std::fs::OpenOptions;
use std::sync::Arc;

use blockwatch::BlockwatchConfig;
use blockwatch::ControlClient;
use blockwatch::ControlServer;
use blockwatch::DirtyUnit;
use blockwatch::DrainStatus;
use blockwatch::Error;
use blockwatch::ErrorCode;
use blockwatch::FsResolver;
use blockwatch::InstrumentedFiles;
use blockwatch::WatchRegistry;
use tokio::sync::watch;

fn write_config(
    dir: &tempfile::TempDir,
    body: String,
) -> String {
    let path = dir.path().join("blockwatch.toml");
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn session_lifecycle_with_file_config() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("bw.sock");
    let config_path = write_config(
        &dir,
        format!(
            "[tracking]\nmax_ranges_per_watch = 2\nmax_watches_per_observer = 2\n\n[server]\nsocket_path = \"{}\"\n",
            socket_path.display()
        ),
    );
    let config = BlockwatchConfig::default()
        .with_override_config(&config_path)
        .unwrap()
        .validate()
        .unwrap();
    assert_eq!(config.server.socket_path, socket_path);

    let hooks = InstrumentedFiles::new(config.tracking.max_instrumented_files);
    let registry = Arc::new(WatchRegistry::new(
        config.tracking.clone(),
        Arc::new(FsResolver),
        hooks.clone(),
    ));
    let server = ControlServer::bind(&config, registry.clone()).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let running = tokio::spawn(server.run(shutdown_rx));

    let data = dir.path().join("volume.img");
    std::fs::write(&data, vec![0u8; 1 << 20]).unwrap();

    let mut client = ControlClient::connect(&socket_path, &config.protocol)
        .await
        .unwrap();
    let handle = client.monitor(&data, 4096).await.unwrap();
    let second = client.monitor(&data, 65536).await.unwrap();
    assert_eq!((handle, second), (0, 1));
    assert!(matches!(
        client.monitor(&data, 4096).await,
        Err(Error::Rejected(ErrorCode::TooManyWatches))
    ));

    let file = hooks.open(&data, OpenOptions::new().write(true)).unwrap();
    for block in [2u64, 5, 9] {
        file.write_all_at(b"dirty", block * 4096).unwrap();
    }

    // three disjoint runs exceed the two-range bound of the fine watch
    let changes = client.query(handle, 10).await.unwrap();
    assert_eq!(changes.status, DrainStatus::Overflowed);
    assert_eq!(changes.units, vec![DirtyUnit::Range { first: 2, length: 8 }]);

    let coarse = client.query(second, 10).await.unwrap();
    assert_eq!(coarse.status, DrainStatus::Ok);
    assert_eq!(coarse.units, vec![DirtyUnit::Block(0)]);

    client.forget(second).await.unwrap();
    assert!(matches!(
        client.query(second, 10).await,
        Err(Error::Rejected(ErrorCode::BadHandle))
    ));

    shutdown_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
    assert!(!socket_path.exists());
    assert_eq!(registry.tracked_file_count(), 0);
    assert_eq!(hooks.hook_count(), 0);
}

#[tokio::test]
async fn large_drains_are_paged() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BlockwatchConfig::default();
    config.server.socket_path = dir.path().join("bw.sock");
    config.protocol.max_query_items = 3;
    let config = config.validate().unwrap();

    let hooks = InstrumentedFiles::new(16);
    let registry = Arc::new(WatchRegistry::new(
        config.tracking.clone(),
        Arc::new(FsResolver),
        hooks.clone(),
    ));
    let server = ControlServer::bind(&config, registry).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let running = tokio::spawn(server.run(shutdown_rx));

    let data = dir.path().join("table");
    std::fs::write(&data, vec![0u8; 64 * 512]).unwrap();
    let mut client = ControlClient::connect(&config.server.socket_path, &config.protocol)
        .await
        .unwrap();
    let handle = client.monitor(&data, 512).await.unwrap();

    let file = hooks.open(&data, OpenOptions::new().write(true)).unwrap();
    for block in (0..16u64).map(|b| b * 4) {
        file.write_all_at(b"z", block * 512).unwrap();
    }

    let mut seen = Vec::new();
    loop {
        let page = client.query(handle, 100).await.unwrap();
        if page.units.is_empty() {
            break;
        }
        assert!(page.units.len() <= 3);
        seen.extend(page.units);
    }
    let expected: Vec<_> = (0..16u64).map(|b| DirtyUnit::Block(b * 4)).collect();
    assert_eq!(seen, expected);

    shutdown_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
}
