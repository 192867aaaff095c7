use std::path::PathBuf;

use crate::constants::OP_FORGET;
use crate::constants::OP_INVALID;
use crate::constants::OP_MONITOR;
use crate::constants::OP_QUERY;
use crate::ChangeSet;
use crate::WatchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Monitor { block_size: i32, path: PathBuf },
    Forget { handle: i32 },
    Query { handle: i32, max_items: i32 },
}

impl Request {
    pub fn opcode(&self) -> i32 {
        match self {
            Request::Monitor { .. } => OP_MONITOR,
            Request::Forget { .. } => OP_FORGET,
            Request::Query { .. } => OP_QUERY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Monitor(Result<i32, ErrorCode>),
    Forget(Result<(), ErrorCode>),
    Query(Result<ChangeSet, ErrorCode>),
    /// Reply to a frame that could not be decoded; the session ends after it
    Invalid(ErrorCode),
}

impl Response {
    pub fn opcode(&self) -> i32 {
        match self {
            Response::Monitor(_) => OP_MONITOR,
            Response::Forget(_) => OP_FORGET,
            Response::Query(_) => OP_QUERY,
            Response::Invalid(_) => OP_INVALID,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Response::Monitor(_) => "monitor",
            Response::Forget(_) => "forget",
            Response::Query(_) => "query",
            Response::Invalid(_) => "invalid",
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Response::Monitor(Err(code)) | Response::Forget(Err(code)) | Response::Query(Err(code)) => {
                Some(*code)
            }
            Response::Invalid(code) => Some(*code),
            _ => None,
        }
    }
}

/// Wire error codes, negative errno values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// EPERM: the write-interception layer refused the hook
    HookRefused = -1,
    /// ENOENT
    NotFound = -2,
    /// EBADF
    BadHandle = -9,
    /// ENOMEM
    NoMemory = -12,
    /// EACCES
    PermissionDenied = -13,
    /// EINVAL
    InvalidBlockSize = -22,
    /// ENOSPC, as inotify reports an exhausted watch limit
    TooManyWatches = -28,
    /// ENAMETOOLONG
    PathTooLong = -36,
    /// EPROTO: malformed frame or unknown opcode
    InvalidRequest = -71,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let known = [
            ErrorCode::HookRefused,
            ErrorCode::NotFound,
            ErrorCode::BadHandle,
            ErrorCode::NoMemory,
            ErrorCode::PermissionDenied,
            ErrorCode::InvalidBlockSize,
            ErrorCode::TooManyWatches,
            ErrorCode::PathTooLong,
            ErrorCode::InvalidRequest,
        ];
        known.into_iter().find(|c| c.code() == code)
    }
}

impl From<&WatchError> for ErrorCode {
    fn from(e: &WatchError) -> Self {
        match e {
            WatchError::BadHandle { .. } | WatchError::ObserverReleased => ErrorCode::BadHandle,
            WatchError::NotFound { .. } => ErrorCode::NotFound,
            WatchError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            WatchError::InvalidBlockSize(_) => ErrorCode::InvalidBlockSize,
            WatchError::PathTooLong { .. } => ErrorCode::PathTooLong,
            WatchError::TooManyWatches { .. } => ErrorCode::TooManyWatches,
            WatchError::NoMemory(_) => ErrorCode::NoMemory,
            WatchError::HookInstallFailed { .. } => ErrorCode::HookRefused,
        }
    }
}
