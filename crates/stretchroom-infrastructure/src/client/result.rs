//! Uniform outcome of an outbound HTTP call.

use axum::http::StatusCode;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::ClientError;
use crate::error::{ApiError, ApiResult};
use crate::problem::ProblemDetails;

/// Either the decoded success body or the decoded error body.
///
/// Non-2xx statuses are never transport errors: they land in
/// [`OperationResult::Failure`] with whatever error payload could be decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult<T, E = ProblemDetails> {
    Success { result: T, status: StatusCode },
    Failure { error: Option<E>, status: StatusCode },
}

impl<T, E> OperationResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Success { status, .. } | Self::Failure { status, .. } => *status,
        }
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            Self::Success { result, .. } => Some(result),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => error.as_ref(),
        }
    }

    /// Map the success value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U, E> {
        match self {
            Self::Success { result, status } => OperationResult::Success {
                result: f(result),
                status,
            },
            Self::Failure { error, status } => OperationResult::Failure { error, status },
        }
    }

    /// Build from a raw response, decoding the success body with `decode`.
    ///
    /// Error bodies that do not decode as `E` yield `error: None`.
    pub(crate) fn from_parts(
        status: StatusCode,
        body: Bytes,
        decode: impl FnOnce(Bytes) -> Result<T, ClientError>,
    ) -> Result<Self, ClientError>
    where
        E: DeserializeOwned,
    {
        if status.is_success() {
            Ok(Self::Success {
                result: decode(body)?,
                status,
            })
        } else {
            let error = serde_json::from_slice::<E>(&body).ok();
            Ok(Self::Failure { error, status })
        }
    }
}

impl<T> OperationResult<T, ProblemDetails> {
    /// Convert a failure into an [`ApiError`] carrying the remote problem.
    #[track_caller]
    pub fn into_api_result(self) -> ApiResult<T> {
        match self {
            Self::Success { result, .. } => Ok(result),
            Self::Failure { error, status } => Err(ApiError::from_problem(error, Some(status))),
        }
    }
}

pub(crate) fn decode_json<T: DeserializeOwned>(body: Bytes) -> Result<T, ClientError> {
    serde_json::from_slice(&body).map_err(ClientError::Decode)
}

pub(crate) fn decode_text(body: Bytes) -> Result<String, ClientError> {
    Ok(String::from_utf8_lossy(&body).into_owned())
}

pub(crate) fn decode_unit(_body: Bytes) -> Result<(), ClientError> {
    Ok(())
}

pub(crate) fn decode_raw(body: Bytes) -> Result<Bytes, ClientError> {
    Ok(body)
}
