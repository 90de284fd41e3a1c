//! Ephemeral static file server for local captures
//!
//! Serves a directory tree over plain HTTP on an OS-assigned port for the
//! lifetime of one capture.

use crate::{CaptureError, ServerSettings};
use axum::Router;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Binds port 0 so the OS picks a free port and hands back the bound listener.
pub async fn allocate_listener(bind_address: IpAddr) -> Result<TcpListener, CaptureError> {
    TcpListener::bind(SocketAddr::new(bind_address, 0))
        .await
        .map_err(|e| CaptureError::ServerBindFailed(format!("{bind_address}: {e}")))
}

pub struct StaticServer {
    addr: SocketAddr,
    root: PathBuf,
    shutdown_grace: Duration,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl StaticServer {
    pub async fn start(root: &Path, settings: &ServerSettings) -> Result<Self, CaptureError> {
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| CaptureError::InvalidRoot(format!("{}: {e}", root.display())))?;

        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| CaptureError::InvalidRoot(format!("{}: {e}", root.display())))?;
        if !metadata.is_dir() {
            return Err(CaptureError::InvalidRoot(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let listener = allocate_listener(settings.bind_address).await?;
        let addr = listener
            .local_addr()
            .map_err(|e| CaptureError::ServerBindFailed(e.to_string()))?;

        let app = Router::new()
            .fallback_service(ServeDir::new(&root))
            .layer(TraceLayer::new_for_http());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!("Serving {} on http://{}", root.display(), addr);

        Ok(Self {
            addr,
            root,
            shutdown_grace: settings.shutdown_grace,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Address a browser should navigate to for the served root.
    pub fn base_url(&self) -> String {
        match self.addr.ip() {
            ip if ip.is_unspecified() => format!("http://localhost:{}/", self.port()),
            IpAddr::V6(ip) => format!("http://[{}]:{}/", ip, self.port()),
            IpAddr::V4(ip) => format!("http://{}:{}/", ip, self.port()),
        }
    }

    /// Stops serving and releases the port.
    ///
    /// Open connections get `shutdown_grace` to finish before the server task
    /// is aborted.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_grace, &mut task).await {
                Ok(Ok(Ok(()))) => debug!("Static server on {} stopped", self.addr),
                Ok(Ok(Err(e))) => warn!("Static server on {} failed: {}", self.addr, e),
                Ok(Err(e)) => warn!("Static server task on {} ended abnormally: {}", self.addr, e),
                Err(_) => {
                    warn!(
                        "Static server on {} did not drain within {:?}, aborting",
                        self.addr, self.shutdown_grace
                    );
                    task.abort();
                    let _ = task.await;
                }
            }
        }
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn settings() -> ServerSettings {
        ServerSettings {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            shutdown_grace: Duration::from_millis(500),
        }
    }

    fn port_is_free(port: u16) -> bool {
        std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
    }

    #[tokio::test]
    async fn test_serves_index_and_releases_port() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hello</h1>").unwrap();
        std::fs::write(dir.path().join("style.css"), "body{}").unwrap();

        let server = StaticServer::start(dir.path(), &settings()).await.unwrap();
        let port = server.port();
        assert_eq!(server.base_url(), format!("http://127.0.0.1:{port}/"));
        assert_eq!(server.root(), dir.path().canonicalize().unwrap());
        assert!(!port_is_free(port));

        {
            let client = reqwest::Client::new();
            let index = client.get(server.base_url()).send().await.unwrap();
            assert!(index.status().is_success());
            assert_eq!(index.text().await.unwrap(), "<h1>hello</h1>");

            let css = client
                .get(format!("{}style.css", server.base_url()))
                .send()
                .await
                .unwrap();
            assert!(css.status().is_success());

            let missing = client
                .get(format!("{}nope.html", server.base_url()))
                .send()
                .await
                .unwrap();
            assert_eq!(missing.status().as_u16(), 404);
        }

        server.stop().await;
        assert!(port_is_free(port));
    }

    #[tokio::test]
    async fn test_drop_releases_port() {
        let dir = tempfile::tempdir().unwrap();
        let server = StaticServer::start(dir.path(), &settings()).await.unwrap();
        let port = server.port();
        drop(server);

        // Abort is asynchronous; give the runtime a moment to drop the listener
        let mut freed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if port_is_free(port) {
                freed = true;
                break;
            }
        }
        assert!(freed);
    }

    #[tokio::test]
    async fn test_rejects_missing_or_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            StaticServer::start(&missing, &settings()).await,
            Err(CaptureError::InvalidRoot(_))
        ));

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            StaticServer::start(&file, &settings()).await,
            Err(CaptureError::InvalidRoot(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_servers_get_distinct_ports() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let settings = settings();
        let (first, second) = tokio::join!(
            StaticServer::start(a.path(), &settings),
            StaticServer::start(b.path(), &settings)
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_ne!(first.port(), second.port());
        first.stop().await;
        second.stop().await;
    }
}
