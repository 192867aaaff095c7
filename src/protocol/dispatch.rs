use std::sync::Arc;

use tracing::debug;

use super::ErrorCode;
use super::Request;
use super::Response;
use crate::constants::MAX_WIRE_BLOCK;
use crate::ObserverId;
use crate::ProtocolConfig;
use crate::WatchError;
use crate::WatchHandle;
use crate::WatchRegistry;

/// Maps decoded requests onto registry operations.
///
/// Holds no per-session state; the caller supplies the observer id of the
/// session each request arrived on.
#[derive(Debug, Clone)]
pub struct ControlProtocol {
    registry: Arc<WatchRegistry>,
    config: ProtocolConfig,
}

impl ControlProtocol {
    pub fn new(
        registry: Arc<WatchRegistry>,
        config: ProtocolConfig,
    ) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    pub fn handle(
        &self,
        observer: ObserverId,
        request: Request,
    ) -> Response {
        let response = match request {
            Request::Monitor { block_size, path } => Response::Monitor(
                self.registry
                    .monitor(observer, &path, i64::from(block_size))
                    .map_err(|e| rejection(&e))
                    .and_then(|handle| i32::try_from(handle).map_err(|_| ErrorCode::TooManyWatches)),
            ),
            Request::Forget { handle } => Response::Forget(
                wire_handle(handle)
                    .and_then(|handle| self.registry.forget(observer, handle).map_err(|e| rejection(&e))),
            ),
            Request::Query { handle, max_items } => {
                let max_items = self.clamp_items(max_items);
                Response::Query(wire_handle(handle).and_then(|handle| {
                    self.registry
                        .query_within(observer, handle, max_items, MAX_WIRE_BLOCK)
                        .map_err(|e| rejection(&e))
                }))
            }
        };

        if let Some(code) = response.error_code() {
            debug!(observer, kind = response.kind(), ?code, "request rejected");
        }
        response
    }

    /// Negative counts ask for nothing; large ones are capped.
    fn clamp_items(
        &self,
        max_items: i32,
    ) -> usize {
        usize::try_from(max_items)
            .unwrap_or(0)
            .min(self.config.max_query_items)
    }
}

fn wire_handle(handle: i32) -> Result<WatchHandle, ErrorCode> {
    WatchHandle::try_from(handle).map_err(|_| ErrorCode::BadHandle)
}

fn rejection(e: &WatchError) -> ErrorCode {
    ErrorCode::from(e)
}
