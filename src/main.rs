use std::sync::Arc;
use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use secureshare::channel::{EventChannel, OfflineChannel, WsEventChannel};
use secureshare::config::Config;
use secureshare::utils::format_bytes;
use secureshare::{FileBlob, FilesSnapshot, HttpDirectoryClient, SessionContext, SessionStore, StoreEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let directory = HttpDirectoryClient::with_timeout(&config.api_endpoint, config.request_timeout())?;
    let session = SessionContext::with_state_file(&config.session_file);

    if !session.restore().await.context("Can't restore session")? {
        let (Some(email), Some(password)) = (&config.email, &config.password) else {
            anyhow::bail!("No saved session, set email and password in {}", config_path);
        };
        directory.login_session(&session, email, password).await.context("Login failed")?;
    }

    let mut channel_handle = None;
    let channel: Arc<dyn EventChannel> = match &config.socket_url {
        Some(url) => {
            let handle = WsEventChannel::connect(url, session.clone(), config.reconnect_policy())?;
            let channel = Arc::new(handle.channel.clone());
            channel_handle = Some(handle);
            channel
        }
        None => {
            info!("no socket_url configured, running without real-time events");
            Arc::new(OfflineChannel::new())
        }
    };

    let handle = SessionStore::spawn(Arc::new(directory), channel, session);
    let store = handle.store.clone();
    let mut events = store.subscribe_events();

    let snapshot = store.load_initial_state().await.context("Initial load failed")?;
    print_snapshot(&snapshot);

    for file_id in &config.downloads {
        match store.download_to(file_id, &config.download_dir).await {
            Ok(path) => info!(file_id = %file_id, "downloaded to {}", path.display()),
            Err(err) => warn!(file_id = %file_id, error = %err, "download failed"),
        }
    }

    if let Some(path) = &config.upload_path {
        let blob = FileBlob::from_path(path).await
            .with_context(|| format!("Can't read {}", path.display()))?;
        let upload_id = store.request_upload(blob).await?;

        loop {
            match events.recv().await {
                Ok(StoreEvent::UploadProgress { upload_id: id, progress_percent, .. }) if id == upload_id => {
                    info!(progress_percent, "uploading");
                }
                Ok(StoreEvent::UploadCompleted { upload_id: id, record }) if id == upload_id => {
                    info!(file_id = %record.id, "uploaded {}", record.name);
                    break;
                }
                Ok(StoreEvent::UploadFailed { upload_id: id, error }) if id == upload_id => {
                    warn!(error = %error, "upload failed");
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }

        print_snapshot(&store.snapshot());
    }

    drop(store);
    handle.shutdown().await?;
    if let Some(channel_handle) = channel_handle {
        channel_handle.shutdown().await?;
    }

    Ok(())
}

fn print_snapshot(snapshot: &FilesSnapshot) {
    println!("My files ({}):", snapshot.files.len());
    for file in &snapshot.files {
        println!("  {} {:>12} {}", file.id, format_bytes(file.size_bytes), file.name);
    }

    println!("Shared with me ({}):", snapshot.shared_files.len());
    for file in &snapshot.shared_files {
        println!("  {} {:>12} {} (from {})", file.id, format_bytes(file.size_bytes), file.name, file.shared_by);
    }
}
