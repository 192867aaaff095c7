use std::path::Path;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::ChangeSet;
use crate::ClientCodec;
use crate::Error;
use crate::ProtocolConfig;
use crate::ProtocolError;
use crate::Request;
use crate::Response;
use crate::Result;

/// One observer session against a [`crate::ControlServer`].
///
/// Dropping the client closes the connection, which releases every watch
/// it created.
#[derive(Debug)]
pub struct ControlClient {
    framed: Framed<UnixStream, ClientCodec>,
}

impl ControlClient {
    pub async fn connect(
        socket_path: &Path,
        config: &ProtocolConfig,
    ) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        debug!(?socket_path, "connected to control server");
        Ok(Self {
            framed: Framed::new(stream, ClientCodec::new(config.max_frame_size)),
        })
    }

    /// Starts a watch on `path`; returns its handle.
    pub async fn monitor(
        &mut self,
        path: &Path,
        block_size: i32,
    ) -> Result<i32> {
        let request = Request::Monitor {
            block_size,
            path: path.to_path_buf(),
        };
        match self.call(request).await? {
            Response::Monitor(result) => result.map_err(Error::Rejected),
            other => Err(unexpected("monitor", &other)),
        }
    }

    pub async fn forget(
        &mut self,
        handle: i32,
    ) -> Result<()> {
        match self.call(Request::Forget { handle }).await? {
            Response::Forget(result) => result.map_err(Error::Rejected),
            other => Err(unexpected("forget", &other)),
        }
    }

    /// Drains up to `max_items` dirty units from the watch `handle`.
    pub async fn query(
        &mut self,
        handle: i32,
        max_items: i32,
    ) -> Result<ChangeSet> {
        match self.call(Request::Query { handle, max_items }).await? {
            Response::Query(result) => result.map_err(Error::Rejected),
            other => Err(unexpected("query", &other)),
        }
    }

    /// Sends one request and waits for its reply.
    pub async fn call(
        &mut self,
        request: Request,
    ) -> Result<Response> {
        self.framed.send(request).await?;
        match self.framed.next().await {
            Some(Ok(Response::Invalid(code))) => Err(Error::Rejected(code)),
            Some(response) => response,
            None => Err(ProtocolError::ConnectionClosed.into()),
        }
    }
}

fn unexpected(
    expected: &'static str,
    actual: &Response,
) -> Error {
    ProtocolError::UnexpectedResponse {
        expected,
        actual: actual.kind(),
    }
    .into()
}
