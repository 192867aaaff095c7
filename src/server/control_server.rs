use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::BlockwatchConfig;
use crate::ControlProtocol;
use crate::Error;
use crate::ErrorCode;
use crate::ObserverId;
use crate::Response;
use crate::Result;
use crate::ServerCodec;
use crate::WatchRegistry;

/// Accepts observer sessions on a Unix socket.
pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
    protocol: ControlProtocol,
    max_frame_size: usize,
}

impl std::fmt::Debug for ControlServer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ControlServer")
            .field("socket_path", &self.socket_path)
            .finish()
    }
}

impl ControlServer {
    /// Binds `config.server.socket_path`, replacing a stale socket file.
    ///
    /// Anything else at that path is left alone and reported as
    /// `AlreadyExists`. Must be called from within a tokio runtime.
    pub fn bind(
        config: &BlockwatchConfig,
        registry: Arc<WatchRegistry>,
    ) -> Result<Self> {
        let socket_path = config.server.socket_path.clone();
        match std::fs::symlink_metadata(&socket_path) {
            Ok(metadata) if metadata.file_type().is_socket() => {
                warn!(?socket_path, "removing stale socket");
                std::fs::remove_file(&socket_path)?;
            }
            Ok(_) => {
                error!(?socket_path, "socket path is taken by a non-socket file");
                return Err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", socket_path.display()),
                )
                .into());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&socket_path)?;
        info!(?socket_path, "control server listening");

        Ok(Self {
            listener,
            socket_path,
            protocol: ControlProtocol::new(registry, config.protocol.clone()),
            max_frame_size: config.protocol.max_frame_size,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        self.protocol.registry()
    }

    /// Serves sessions until `shutdown` fires or its sender is dropped.
    ///
    /// On the way out every session is ended, the socket file removed and
    /// all observers released.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        sessions.spawn(serve_session(
                            self.protocol.clone(),
                            stream,
                            self.max_frame_size,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!("accept failed: {}", e),
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_exit(finished);
                }
                _ = shutdown.changed() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        drop(self.listener);
        while let Some(finished) = sessions.join_next().await {
            log_session_exit(finished);
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(socket_path = ?self.socket_path, "failed to remove socket: {}", e);
            }
        }
        self.protocol.registry().shutdown();
        info!("control server stopped");
        Ok(())
    }
}

async fn serve_session(
    protocol: ControlProtocol,
    stream: UnixStream,
    max_frame_size: usize,
    mut shutdown: watch::Receiver<()>,
) -> Result<()> {
    let observer = protocol.registry().register_observer();
    info!(observer, "session opened");

    let mut framed = Framed::new(stream, ServerCodec::new(max_frame_size));
    let outcome = serve_requests(&protocol, observer, &mut framed, &mut shutdown).await;

    protocol.registry().release_observer(observer);
    info!(observer, "session closed");
    outcome
}

async fn serve_requests(
    protocol: &ControlProtocol,
    observer: ObserverId,
    framed: &mut Framed<UnixStream, ServerCodec>,
    shutdown: &mut watch::Receiver<()>,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            frame = framed.next() => frame,
            _ = shutdown.changed() => return Ok(()),
        };

        match frame {
            Some(Ok(request)) => {
                debug!(observer, ?request, "request");
                let response = protocol.handle(observer, request);
                framed.send(response).await?;
            }
            Some(Err(Error::Protocol(e))) => {
                warn!(observer, "malformed frame, closing session: {}", e);
                framed.send(Response::Invalid(ErrorCode::InvalidRequest)).await?;
                return Ok(());
            }
            Some(Err(e)) => return Err(e),
            None => return Ok(()),
        }
    }
}

fn log_session_exit(finished: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match finished {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("session ended with error: {}", e),
        Err(e) => error!("session task failed: {:?}", e),
    }
}
