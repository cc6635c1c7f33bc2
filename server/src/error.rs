//! Wire error conversions.

use serde_json::json;
use wharf_core::error::WharfError;

use crate::protocol::{
    Reply, ERROR_CONTAINER_NOT_FOUND, ERROR_IMAGE_NOT_FOUND, ERROR_INVALID_PARAMETER,
    ERROR_METHOD_NOT_FOUND, ERROR_OCCURRED,
};

/// Convert a WharfError to a terminal error reply.
///
/// Missing images and containers get their own reply shapes; everything
/// else collapses to `ErrorOccurred` with the error's message.
pub fn error_reply(err: &WharfError) -> Reply {
    match err {
        WharfError::ImageNotFound(id) => Reply::error(
            ERROR_IMAGE_NOT_FOUND,
            json!({ "id": id, "reason": err.to_string() }),
        ),
        WharfError::ContainerNotFound(id) => Reply::error(
            ERROR_CONTAINER_NOT_FOUND,
            json!({ "id": id, "reason": err.to_string() }),
        ),
        other => Reply::error(ERROR_OCCURRED, json!({ "reason": other.to_string() })),
    }
}

pub fn method_not_found(method: &str) -> Reply {
    Reply::error(ERROR_METHOD_NOT_FOUND, json!({ "method": method }))
}

pub fn invalid_parameter(detail: &str) -> Reply {
    Reply::error(ERROR_INVALID_PARAMETER, json!({ "parameter": detail }))
}
