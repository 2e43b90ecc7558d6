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

use filament_rest::{
    bind_service, BindError, OperationDef, RestApiSettings, RestError, RestService,
    ServiceContract,
};
use http::{Method, StatusCode};
use poem::test::{TestClient, TestResponse};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use test_r::test;

test_r::enable!();

fn users_contract() -> Arc<ServiceContract> {
    let items = Arc::new(ServiceContract::new("Items").operation(OperationDef::new("getText")));
    Arc::new(
        ServiceContract::new("UserAPI")
            .root_path("api")
            .operation(OperationDef::new("index"))
            .operation(OperationDef::new("getName").param("id"))
            .operation(OperationDef::new("newUser").param("name"))
            .operation(
                OperationDef::new("updateDescription")
                    .param("id")
                    .param("description"),
            )
            .operation(
                OperationDef::new("getGreeting").param_with_default("name", json!("world")),
            )
            .operation(OperationDef::new("getHTMLEntity"))
            .operation(
                OperationDef::new("custom")
                    .method(Method::POST)
                    .path("custom/:token")
                    .param("_token")
                    .param("note"),
            )
            .operation(OperationDef::new("forbidden"))
            .operation(OperationDef::new("boom"))
            .operation(OperationDef::new("items").returns_contract(items)),
    )
}

fn users_service() -> RestService {
    let contract = users_contract();
    let items_contract = match &contract.find_operation("items").unwrap().result {
        filament_rest::ResultKind::SubContract(items) => items.clone(),
        _ => unreachable!(),
    };
    let items_service = RestService::new(items_contract)
        .handler("getText", |_args| async move { Ok(json!("Hello, World")) });
    RestService::new(contract)
        .handler("index", |_args| async move { Ok(json!("root")) })
        .handler("getName", |args: Vec<Value>| async move {
            Ok(json!(format!("<user {}>", args[0])))
        })
        .handler("newUser", |_args| async move { Ok(Value::Null) })
        .handler("updateDescription", |args: Vec<Value>| async move {
            Ok(json!(format!(
                "{}:{}",
                args[0],
                args[1].as_str().unwrap_or_default()
            )))
        })
        .handler("getGreeting", |args: Vec<Value>| async move {
            Ok(json!(format!(
                "Hello, {}",
                args[0].as_str().unwrap_or_default()
            )))
        })
        .handler("getHTMLEntity", |_args| async move { Ok(json!("&amp;")) })
        .handler("custom", |args: Vec<Value>| async move {
            Ok(json!(format!(
                "{}:{}",
                args[0].as_str().unwrap_or_default(),
                args[1].as_str().unwrap_or_default()
            )))
        })
        .handler("forbidden", |_args| async move {
            Err(RestError::status(StatusCode::FORBIDDEN, "no access"))
        })
        .handler("boom", |_args| async move {
            Err(RestError::Internal(anyhow::anyhow!("boom")))
        })
        .child("items", items_service)
}

fn client() -> TestClient<poem::Route> {
    let route = bind_service(users_service(), &RestApiSettings::default()).unwrap();
    TestClient::new(route)
}

async fn json_body(response: TestResponse) -> Value {
    let (_, body) = response.0.into_parts();
    let text = body.into_string().await.unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
async fn legacy_id_parameter_binds_to_an_id_path_segment() {
    let cli = client();
    let response = cli.get("/api/5/name").send().await;
    response.assert_status_is_ok();
    assert_eq!(json_body(response).await, json!("<user 5>"));
}

#[test]
async fn missing_id_placeholder_is_a_protocol_error() {
    let cli = client();
    // the non-legacy route exists too, but without the placeholder the
    // parameter cannot be bound
    let response = cli.get("/api/name").send().await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({ "statusMessage": "parameter 'id' not set" })
    );
}

#[test]
async fn void_operations_respond_with_an_empty_object() {
    let cli = client();
    let response = cli
        .post("/api/new_user")
        .body_json(&json!({ "name": "joe" }))
        .send()
        .await;
    response.assert_status_is_ok();
    assert_eq!(json_body(response).await, json!({}));
}

#[test]
async fn body_operations_require_a_json_body() {
    let cli = client();
    let response = cli.post("/api/new_user").send().await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({
            "statusMessage": "missing JSON request body: expected Content-Type application/json"
        })
    );
}

#[test]
async fn legacy_id_combines_with_body_parameters() {
    let cli = client();
    let response = cli
        .patch("/api/7/description")
        .body_json(&json!({ "description": "likes Rust" }))
        .send()
        .await;
    response.assert_status_is_ok();
    assert_eq!(json_body(response).await, json!("7:likes Rust"));
}

#[test]
async fn query_parameters_fall_back_to_declared_defaults() {
    let cli = client();
    let response = cli.get("/api/greeting").send().await;
    response.assert_status_is_ok();
    assert_eq!(json_body(response).await, json!("Hello, world"));

    let response = cli.get("/api/greeting?name=rust").send().await;
    response.assert_status_is_ok();
    assert_eq!(json_body(response).await, json!("Hello, rust"));
}

#[test]
async fn identifier_style_is_applied_to_derived_paths() {
    let cli = client();
    let response = cli.get("/api/html_entity").send().await;
    response.assert_status_is_ok();
    assert_eq!(json_body(response).await, json!("&amp;"));
}

#[test]
async fn index_mounts_at_the_prefix_root() {
    let cli = client();
    let response = cli.get("/api/").send().await;
    response.assert_status_is_ok();
    assert_eq!(json_body(response).await, json!("root"));
}

#[test]
async fn overridden_paths_bind_underscore_parameters() {
    let cli = client();
    let response = cli
        .post("/api/custom/abc123")
        .body_json(&json!({ "note": "hi" }))
        .send()
        .await;
    response.assert_status_is_ok();
    assert_eq!(json_body(response).await, json!("abc123:hi"));
}

#[test]
async fn unmapped_methods_get_405_with_allow() {
    let cli = client();
    let response = cli.delete("/api/new_user").send().await;
    response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    let allow = response.0.headers().get(http::header::ALLOW).unwrap();
    assert_eq!(allow.to_str().unwrap(), "POST");
}

#[test]
async fn status_errors_map_to_their_status_and_message() {
    let cli = client();
    let response = cli
        .post("/api/forbidden")
        .body_json(&json!({}))
        .send()
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(
        json_body(response).await,
        json!({ "statusMessage": "no access" })
    );
}

#[test]
async fn unexpected_errors_map_to_500_with_a_debug_message() {
    let cli = client();
    let response = cli.post("/api/boom").body_json(&json!({})).send().await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await,
        json!({
            "statusMessage": "boom",
            "statusDebugMessage": "boom"
        })
    );
}

#[test]
async fn sub_resources_mount_under_their_getter_path() {
    let cli = client();
    let response = cli.get("/api/items/text").send().await;
    response.assert_status_is_ok();
    assert_eq!(json_body(response).await, json!("Hello, World"));
}

#[test]
fn sub_resource_getters_must_not_declare_parameters() {
    let items = Arc::new(ServiceContract::new("Items"));
    let contract = Arc::new(ServiceContract::new("API").root_path("api").operation(
        OperationDef::new("items").param("id").returns_contract(items.clone()),
    ));
    let service = RestService::new(contract).child("items", RestService::new(items));
    let err = bind_service(service, &RestApiSettings::default()).err().unwrap();
    assert!(matches!(err, BindError::SubResourceWithParams { .. }));
}

#[test]
fn conflicting_operations_are_rejected_at_bind_time() {
    let contract = Arc::new(
        ServiceContract::new("API")
            .root_path("api")
            .operation(OperationDef::new("getFoo"))
            .operation(OperationDef::new("queryFoo")),
    );
    let service = RestService::new(contract)
        .handler("getFoo", |_args| async move { Ok(Value::Null) })
        .handler("queryFoo", |_args| async move { Ok(Value::Null) });
    let err = bind_service(service, &RestApiSettings::default()).err().unwrap();
    assert!(matches!(err, BindError::DuplicateRoute { .. }));
}

#[test]
fn placeholders_must_be_bound_to_underscore_parameters() {
    let contract = Arc::new(ServiceContract::new("API").root_path("api").operation(
        OperationDef::new("custom").method(Method::POST).path("custom/:token"),
    ));
    let service =
        RestService::new(contract).handler("custom", |_args| async move { Ok(Value::Null) });
    let err = bind_service(service, &RestApiSettings::default()).err().unwrap();
    assert!(matches!(err, BindError::UnboundPlaceholder { .. }));
}
