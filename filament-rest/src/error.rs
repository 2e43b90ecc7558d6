// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use http::{Method, StatusCode};

/// Error taxonomy of the REST surface.
///
/// `Protocol` covers malformed requests and maps to 400; `Status` is an
/// explicit business error carried verbatim in both directions; `Internal`
/// is an unexpected error inside an operation and maps to 500 with a
/// sanitized debug message.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RestError {
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status: StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: message.into(),
        }
    }
}

/// Contract violations detected while registering routes.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("duplicate route {method} {path}")]
    DuplicateRoute { method: Method, path: String },
    #[error("sub-resource getter '{operation}' must not declare parameters")]
    SubResourceWithParams { operation: String },
    #[error(
        "path placeholder ':{placeholder}' of operation '{operation}' has no matching '_{placeholder}' parameter"
    )]
    UnboundPlaceholder {
        operation: String,
        placeholder: String,
    },
    #[error("operation '{operation}' has no handler attached")]
    MissingHandler { operation: String },
}
