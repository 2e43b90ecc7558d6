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

use crate::contract::{ResultKind, ServiceContract};
use crate::error::RestError;
use crate::naming::{adjust_method_style, derive_route, rest_string, root_path, MethodStyle};
use http::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Hook mutating outgoing requests, e.g. to add authentication headers. It
/// is propagated to sub-resource clients.
pub type RequestFilter =
    Arc<dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync>;

#[derive(Clone, Default)]
pub struct RestClientConfig {
    pub method_style: MethodStyle,
    pub request_filter: Option<RequestFilter>,
}

/// A parameter value placed into a query string: scalars render in their
/// compact REST-string form, anything else as its JSON text.
enum EncodedParam {
    Scalar(String),
    Json(Value),
}

impl EncodedParam {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                Self::Scalar(rest_string(value))
            }
            other => Self::Json(other.clone()),
        }
    }

    fn query_text(&self) -> String {
        match self {
            Self::Scalar(text) => text.clone(),
            Self::Json(value) => value.to_string(),
        }
    }
}

/// Client side of the REST binder: implements a contract by issuing
/// HTTP/JSON requests derived from the same naming rules the server binder
/// uses.
pub struct RestClient {
    contract: Arc<ServiceContract>,
    base_url: Url,
    http: reqwest::Client,
    config: RestClientConfig,
}

impl RestClient {
    /// Creates a client for `contract` served at `origin` (scheme, host and
    /// port); the contract's root path is appended per the mounting rules.
    pub fn new(
        contract: Arc<ServiceContract>,
        origin: &str,
        config: RestClientConfig,
    ) -> Result<Self, RestError> {
        let root = root_path(&contract, config.method_style);
        let base = format!("{}{root}", origin.trim_end_matches('/'));
        let base_url = Url::parse(&base)
            .map_err(|err| RestError::Protocol(format!("invalid base URL '{base}': {err}")))?;
        Ok(Self {
            contract,
            base_url,
            http: reqwest::Client::new(),
            config,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Invokes an operation with positional arguments. Trailing arguments
    /// may be omitted when the contract declares defaults for them.
    pub async fn call(&self, operation: &str, args: &[Value]) -> Result<Value, RestError> {
        let op = self.contract.find_operation(operation).ok_or_else(|| {
            RestError::Protocol(format!(
                "operation '{operation}' is not part of contract '{}'",
                self.contract.name
            ))
        })?;
        if matches!(op.result, ResultKind::SubContract(_)) {
            return Err(RestError::Protocol(format!(
                "operation '{operation}' is a sub-resource; use sub_client"
            )));
        }
        if args.len() > op.params.len() {
            return Err(RestError::Protocol(format!(
                "operation '{operation}' takes {} parameter(s), got {}",
                op.params.len(),
                args.len()
            )));
        }

        let spec = derive_route(op);
        let mut placeholders: HashMap<&str, &Value> = HashMap::new();
        let mut legacy_id: Option<&Value> = None;
        let mut payload: Vec<(String, Value)> = Vec::new();
        for (index, param) in op.params.iter().enumerate() {
            let arg = args.get(index);
            if index == 0 && param.name == "id" {
                legacy_id = Some(arg.ok_or_else(|| {
                    RestError::Protocol("missing argument for parameter 'id'".to_string())
                })?);
            } else if let Some(placeholder) = param.name.strip_prefix('_') {
                let arg = arg.ok_or_else(|| {
                    RestError::Protocol(format!(
                        "missing argument for path parameter '{}'",
                        param.name
                    ))
                })?;
                placeholders.insert(placeholder, arg);
            } else if let Some(arg) = arg {
                payload.push((param.name.clone(), arg.clone()));
            }
            // an omitted plain argument relies on the server-side default
        }

        let url = self.build_url(&spec, legacy_id, &placeholders, &payload)?;
        let from_query = matches!(spec.method, Method::GET | Method::HEAD);
        debug!(operation, method = %spec.method, url = %url, "issuing REST request");
        let mut request = self.http.request(spec.method.clone(), url);
        if !from_query {
            let mut object = Map::new();
            for (name, value) in payload {
                object.insert(name, value);
            }
            request = request.json(&Value::Object(object));
        }
        if let Some(filter) = &self.config.request_filter {
            request = filter(request);
        }

        let response = request
            .send()
            .await
            .map_err(|err| RestError::Internal(anyhow::Error::new(err)))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RestError::Internal(anyhow::Error::new(err)))?;
        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|body| {
                    body.get("statusMessage")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("unexpected status")
                        .to_string()
                });
            return Err(RestError::Status { status, message });
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| RestError::Protocol(format!("malformed JSON response: {err}")))
    }

    /// Invokes an operation and deserializes the response into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        operation: &str,
        args: &[Value],
    ) -> Result<T, RestError> {
        let value = self.call(operation, args).await?;
        serde_json::from_value(value)
            .map_err(|err| RestError::Protocol(format!("unexpected response shape: {err}")))
    }

    /// Materializes the client of a sub-resource operation, inheriting this
    /// client's settings and request filter.
    pub fn sub_client(&self, operation: &str) -> Result<RestClient, RestError> {
        let op = self.contract.find_operation(operation).ok_or_else(|| {
            RestError::Protocol(format!(
                "operation '{operation}' is not part of contract '{}'",
                self.contract.name
            ))
        })?;
        let ResultKind::SubContract(child) = &op.result else {
            return Err(RestError::Protocol(format!(
                "operation '{operation}' is not a sub-resource"
            )));
        };
        let spec = derive_route(op);
        let relative = if spec.path_overridden {
            spec.relative_path.clone()
        } else {
            adjust_method_style(&spec.relative_path, self.config.method_style)
        };
        let mut base_url = self.base_url.clone();
        {
            let mut segments = base_url
                .path_segments_mut()
                .map_err(|()| RestError::Protocol("base URL cannot carry a path".to_string()))?;
            segments.pop_if_empty();
            for segment in relative.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
            segments.push(""); // keep the trailing slash of the mount point
        }
        Ok(RestClient {
            contract: child.clone(),
            base_url,
            http: self.http.clone(),
            config: self.config.clone(),
        })
    }

    fn build_url(
        &self,
        spec: &crate::naming::RouteSpec,
        legacy_id: Option<&Value>,
        placeholders: &HashMap<&str, &Value>,
        payload: &[(String, Value)],
    ) -> Result<Url, RestError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| RestError::Protocol("base URL cannot carry a path".to_string()))?;
            segments.pop_if_empty();
            if let Some(id) = legacy_id {
                segments.push(&rest_string(id));
            }
            if spec.path_overridden {
                for segment in spec.relative_path.split('/').filter(|s| !s.is_empty()) {
                    match segment.strip_prefix(':') {
                        Some(placeholder) => {
                            let value = placeholders.get(placeholder).ok_or_else(|| {
                                RestError::Protocol(format!(
                                    "no argument bound to path placeholder ':{placeholder}'"
                                ))
                            })?;
                            segments.push(&rest_string(value));
                        }
                        None => {
                            segments.push(segment);
                        }
                    }
                }
            } else {
                let styled = adjust_method_style(&spec.relative_path, self.config.method_style);
                if !styled.is_empty() {
                    segments.push(&styled);
                }
            }
        }
        if matches!(spec.method, Method::GET | Method::HEAD) && !payload.is_empty() {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (name, value) in payload {
                serializer.append_pair(name, &EncodedParam::from_value(value).query_text());
            }
            url.set_query(Some(&serializer.finish()));
        }
        Ok(url)
    }
}
