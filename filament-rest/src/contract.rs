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

use crate::error::RestError;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// A service contract: the set of named operations a service exposes,
/// described as a value so both the server binder and the client binder can
/// derive the HTTP surface from it at startup.
#[derive(Debug, Clone)]
pub struct ServiceContract {
    pub name: String,
    /// `None` mounts at `/`; an empty string mounts at the stylised
    /// contract name; any other value is normalized to lead and trail with
    /// `/`.
    pub root_path: Option<String>,
    pub operations: Vec<OperationDef>,
}

impl ServiceContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_path: None,
            operations: Vec::new(),
        }
    }

    pub fn root_path(mut self, path: impl Into<String>) -> Self {
        self.root_path = Some(path.into());
        self
    }

    pub fn operation(mut self, operation: OperationDef) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn find_operation(&self, name: &str) -> Option<&OperationDef> {
        self.operations.iter().find(|op| op.name == name)
    }
}

/// How an operation is declared, which drives the default verb derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Method,
    PropertyGet,
    PropertySet,
}

/// What an operation returns: a JSON value, or a nested contract mounted as
/// a sub-resource.
#[derive(Debug, Clone)]
pub enum ResultKind {
    Value,
    SubContract(Arc<ServiceContract>),
}

#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub default: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct OperationDef {
    pub name: String,
    pub kind: OperationKind,
    pub method_override: Option<Method>,
    pub path_override: Option<String>,
    pub params: Vec<ParamDef>,
    pub result: ResultKind,
}

impl OperationDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::Method,
            method_override: None,
            path_override: None,
            params: Vec::new(),
            result: ResultKind::Value,
        }
    }

    /// Marks the operation as a property getter (defaults to GET).
    pub fn property_get(mut self) -> Self {
        self.kind = OperationKind::PropertyGet;
        self
    }

    /// Marks the operation as a property setter (defaults to PUT).
    pub fn property_set(mut self) -> Self {
        self.kind = OperationKind::PropertySet;
        self
    }

    /// Overrides the HTTP method derived from the operation name.
    pub fn method(mut self, method: Method) -> Self {
        self.method_override = Some(method);
        self
    }

    /// Overrides the relative path derived from the operation name. May
    /// contain `:name` placeholders bound to `_name` parameters.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path_override = Some(path.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamDef {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn param_with_default(mut self, name: impl Into<String>, default: Value) -> Self {
        self.params.push(ParamDef {
            name: name.into(),
            default: Some(default),
        });
        self
    }

    /// Declares that this operation returns a sub-resource described by
    /// `contract`.
    pub fn returns_contract(mut self, contract: Arc<ServiceContract>) -> Self {
        self.result = ResultKind::SubContract(contract);
        self
    }
}

/// A registered operation body: takes the extracted parameter values in
/// declaration order and produces the operation result as JSON (`Null` for
/// void operations).
pub type OperationHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RestError>> + Send + Sync>;

/// A contract bound to an implementation: one handler per plain operation,
/// one nested service per sub-resource operation.
pub struct RestService {
    pub(crate) contract: Arc<ServiceContract>,
    pub(crate) handlers: HashMap<String, OperationHandler>,
    pub(crate) children: HashMap<String, RestService>,
}

impl RestService {
    pub fn new(contract: Arc<ServiceContract>) -> Self {
        Self {
            contract,
            handlers: HashMap::new(),
            children: HashMap::new(),
        }
    }

    pub fn contract(&self) -> &Arc<ServiceContract> {
        &self.contract
    }

    /// Attaches the body of a plain operation.
    pub fn handler<F, Fut>(mut self, operation: &str, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RestError>> + Send + 'static,
    {
        self.handlers
            .insert(operation.to_string(), Arc::new(move |args| body(args).boxed()));
        self
    }

    /// Attaches the implementation of a sub-resource operation.
    pub fn child(mut self, operation: &str, service: RestService) -> Self {
        self.children.insert(operation.to_string(), service);
        self
    }
}
