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

use crate::contract::{OperationDef, OperationHandler, ResultKind, RestService};
use crate::error::{BindError, RestError};
use crate::naming::{
    adjust_method_style, derive_route, parse_rest_string, root_path, MethodStyle,
};
use http::{Method, StatusCode};
use percent_encoding::percent_decode_str;
use poem::{Endpoint, Request, Response, Route};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error};

/// Server-side binder settings.
#[derive(Debug, Clone, Default)]
pub struct RestApiSettings {
    pub method_style: MethodStyle,
}

struct BoundOperation {
    operation: OperationDef,
    handler: OperationHandler,
    // first parameter literally named `id`: bound to the legacy `:id`
    // placeholder injected before the operation path
    legacy_id: bool,
}

type PathEndpoints = BTreeMap<String, HashMap<Method, Arc<BoundOperation>>>;

/// Walks the bound service and registers one route per operation, mounted
/// under the contract's root path.
pub fn bind_service(service: RestService, settings: &RestApiSettings) -> Result<Route, BindError> {
    let prefix = root_path(service.contract(), settings.method_style);
    let mut endpoints = PathEndpoints::new();
    collect_routes(service, &prefix, settings.method_style, &mut endpoints)?;
    let mut route = Route::new();
    for (path, methods) in endpoints {
        debug!(path, methods = methods.len(), "registered REST route");
        route = route.at(path, RestEndpoint { methods });
    }
    Ok(route)
}

/// Binds the service and serves it on the given address until the server
/// shuts down.
pub async fn serve(
    service: RestService,
    settings: &RestApiSettings,
    addr: &str,
) -> anyhow::Result<()> {
    let route = bind_service(service, settings)?;
    poem::Server::new(poem::listener::TcpListener::bind(addr.to_string()))
        .run(route)
        .await?;
    Ok(())
}

fn collect_routes(
    service: RestService,
    prefix: &str,
    style: MethodStyle,
    endpoints: &mut PathEndpoints,
) -> Result<(), BindError> {
    let RestService {
        contract,
        mut handlers,
        mut children,
    } = service;
    for operation in &contract.operations {
        let spec = derive_route(operation);
        let relative = if spec.path_overridden {
            spec.relative_path.clone()
        } else {
            adjust_method_style(&spec.relative_path, style)
        };
        match &operation.result {
            ResultKind::SubContract(_) => {
                if !operation.params.is_empty() {
                    return Err(BindError::SubResourceWithParams {
                        operation: operation.name.clone(),
                    });
                }
                let child = children
                    .remove(&operation.name)
                    .ok_or(BindError::MissingHandler {
                        operation: operation.name.clone(),
                    })?;
                let child_prefix = format!("{prefix}{relative}/");
                collect_routes(child, &child_prefix, style, endpoints)?;
            }
            ResultKind::Value => {
                let handler =
                    handlers
                        .remove(&operation.name)
                        .ok_or(BindError::MissingHandler {
                            operation: operation.name.clone(),
                        })?;
                if spec.path_overridden {
                    validate_placeholders(operation, &relative)?;
                }
                let legacy_id = operation
                    .params
                    .first()
                    .is_some_and(|param| param.name == "id");
                let bound = Arc::new(BoundOperation {
                    operation: operation.clone(),
                    handler,
                    legacy_id,
                });
                insert_route(
                    endpoints,
                    format!("{prefix}{relative}"),
                    spec.method.clone(),
                    bound.clone(),
                )?;
                if legacy_id {
                    let legacy_path = if relative.is_empty() {
                        format!("{prefix}:id")
                    } else {
                        format!("{prefix}:id/{relative}")
                    };
                    insert_route(endpoints, legacy_path, spec.method.clone(), bound)?;
                }
            }
        }
    }
    Ok(())
}

fn validate_placeholders(operation: &OperationDef, path: &str) -> Result<(), BindError> {
    for segment in path.split('/') {
        if let Some(placeholder) = segment.strip_prefix(':') {
            let bound = operation
                .params
                .iter()
                .any(|param| param.name.strip_prefix('_') == Some(placeholder));
            if !bound {
                return Err(BindError::UnboundPlaceholder {
                    operation: operation.name.clone(),
                    placeholder: placeholder.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn insert_route(
    endpoints: &mut PathEndpoints,
    path: String,
    method: Method,
    bound: Arc<BoundOperation>,
) -> Result<(), BindError> {
    let methods = endpoints.entry(path.clone()).or_default();
    if methods.insert(method.clone(), bound).is_some() {
        return Err(BindError::DuplicateRoute { method, path });
    }
    Ok(())
}

/// One endpoint per path, dispatching on the HTTP method. Routers reject
/// duplicate path registrations, so operations sharing a path share the
/// endpoint.
struct RestEndpoint {
    methods: HashMap<Method, Arc<BoundOperation>>,
}

impl Endpoint for RestEndpoint {
    type Output = Response;

    async fn call(&self, req: Request) -> poem::Result<Self::Output> {
        let Some(bound) = self.methods.get(req.method()) else {
            let allow = {
                let mut methods: Vec<&str> =
                    self.methods.keys().map(|method| method.as_str()).collect();
                methods.sort_unstable();
                methods.join(", ")
            };
            return Ok(Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header(http::header::ALLOW, allow)
                .finish());
        };
        let bound = bound.clone();
        let response = match invoke_operation(&bound, req).await {
            Ok(value) => {
                let body = if value.is_null() {
                    "{}".to_string()
                } else {
                    value.to_string()
                };
                json_response(StatusCode::OK, body)
            }
            Err(err) => error_response(&bound.operation.name, err),
        };
        Ok(response)
    }
}

async fn invoke_operation(bound: &BoundOperation, mut req: Request) -> Result<Value, RestError> {
    let from_query = matches!(*req.method(), Method::GET | Method::HEAD);
    let query: HashMap<String, String> = match req.uri().query() {
        Some(raw) if from_query => url::form_urlencoded::parse(raw.as_bytes())
            .into_owned()
            .collect(),
        _ => HashMap::new(),
    };
    let mut body: Option<Value> = None;
    let mut args = Vec::with_capacity(bound.operation.params.len());
    for (index, param) in bound.operation.params.iter().enumerate() {
        let value = if index == 0 && bound.legacy_id {
            match req.raw_path_param("id") {
                Some(raw) => parse_rest_string(&percent_decode_str(raw).decode_utf8_lossy()),
                None => {
                    return Err(RestError::Protocol("parameter 'id' not set".to_string()));
                }
            }
        } else if let Some(placeholder) = param.name.strip_prefix('_') {
            match req.raw_path_param(placeholder) {
                Some(raw) => parse_rest_string(&percent_decode_str(raw).decode_utf8_lossy()),
                None => {
                    return Err(RestError::Protocol(format!(
                        "parameter '{placeholder}' not set"
                    )));
                }
            }
        } else if from_query {
            match query.get(&param.name) {
                Some(raw) => parse_rest_string(raw),
                None => match &param.default {
                    Some(default) => default.clone(),
                    None => {
                        return Err(RestError::Protocol(format!(
                            "missing query parameter '{}'",
                            param.name
                        )));
                    }
                },
            }
        } else {
            if body.is_none() {
                body = Some(read_json_body(&mut req).await?);
            }
            let object = body.as_ref().and_then(|value| value.as_object());
            match object.and_then(|object| object.get(&param.name)) {
                Some(value) => value.clone(),
                None => match &param.default {
                    Some(default) => default.clone(),
                    None => {
                        return Err(RestError::Protocol(format!(
                            "missing request body parameter '{}'",
                            param.name
                        )));
                    }
                },
            }
        };
        args.push(value);
    }
    (bound.handler)(args).await
}

async fn read_json_body(req: &mut Request) -> Result<Value, RestError> {
    let json_content_type = req
        .content_type()
        .is_some_and(|ct| ct.starts_with("application/json"));
    if !json_content_type {
        return Err(RestError::Protocol(
            "missing JSON request body: expected Content-Type application/json".to_string(),
        ));
    }
    let bytes = req
        .take_body()
        .into_bytes()
        .await
        .map_err(|err| RestError::Protocol(format!("failed to read request body: {err}")))?;
    if bytes.is_empty() {
        return Err(RestError::Protocol("missing JSON request body".to_string()));
    }
    serde_json::from_slice(&bytes)
        .map_err(|err| RestError::Protocol(format!("malformed JSON request body: {err}")))
}

fn json_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .content_type("application/json")
        .body(body)
}

fn error_response(operation: &str, err: RestError) -> Response {
    match err {
        RestError::Status { status, message } => {
            json_response(status, json!({ "statusMessage": message }).to_string())
        }
        RestError::Protocol(message) => json_response(
            StatusCode::BAD_REQUEST,
            json!({ "statusMessage": message }).to_string(),
        ),
        RestError::Internal(err) => {
            error!(operation, error = %format!("{err:#}"), "operation failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "statusMessage": err.to_string(),
                    "statusDebugMessage": sanitize_debug(&err),
                })
                .to_string(),
            )
        }
    }
}

/// A single-line diagnostic string: the error chain without backtraces.
fn sanitize_debug(err: &anyhow::Error) -> String {
    format!("{err:#}").replace(['\n', '\r'], " ")
}
