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

//! REST binder: projects a service contract, described as a value, onto an
//! HTTP/JSON surface.
//!
//! The server binder walks a contract and registers one route per
//! operation, with method and path derived mechanically from the operation
//! identifier; the client binder implements the same contract by issuing
//! requests built from the same rules, so a bound server and a bound client
//! agree on the wire format by construction.

pub mod client;
pub mod contract;
pub mod error;
pub mod naming;
pub mod server;

pub use client::{RequestFilter, RestClient, RestClientConfig};
pub use contract::{
    OperationDef, OperationHandler, OperationKind, ParamDef, ResultKind, RestService,
    ServiceContract,
};
pub use error::{BindError, RestError};
pub use naming::{adjust_method_style, derive_route, root_path, MethodStyle, RouteSpec};
pub use server::{bind_service, serve, RestApiSettings};

#[cfg(test)]
test_r::enable!();
