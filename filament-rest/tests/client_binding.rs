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
    bind_service, OperationDef, RestApiSettings, RestClient, RestClientConfig, RestError,
    RestService, ServiceContract,
};
use http::{Method, StatusCode};
use poem::listener::{Acceptor, Listener};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use test_r::test;

test_r::enable!();

fn users_contract() -> Arc<ServiceContract> {
    let items = Arc::new(ServiceContract::new("Items").operation(OperationDef::new("getText")));
    Arc::new(
        ServiceContract::new("UserAPI")
            .root_path("api")
            .operation(OperationDef::new("getName").param("id"))
            .operation(OperationDef::new("newUser").param("name"))
            .operation(
                OperationDef::new("getGreeting").param_with_default("name", json!("world")),
            )
            .operation(OperationDef::new("queryFind").param("filter"))
            .operation(
                OperationDef::new("custom")
                    .method(Method::POST)
                    .path("custom/:token")
                    .param("_token")
                    .param("note"),
            )
            .operation(OperationDef::new("forbidden"))
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
        .handler("getName", |args: Vec<Value>| async move {
            Ok(json!(format!("<user {}>", args[0])))
        })
        .handler("newUser", |_args| async move { Ok(Value::Null) })
        .handler("getGreeting", |args: Vec<Value>| async move {
            Ok(json!(format!(
                "Hello, {}",
                args[0].as_str().unwrap_or_default()
            )))
        })
        .handler("queryFind", |args: Vec<Value>| async move {
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        })
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
        .child("items", items_service)
}

async fn start_server() -> String {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let route = bind_service(users_service(), &RestApiSettings::default()).unwrap();
    let acceptor = poem::listener::TcpListener::bind("127.0.0.1:0")
        .into_acceptor()
        .await
        .unwrap();
    let port = acceptor.local_addr()[0]
        .as_socket_addr()
        .expect("socket address")
        .port();
    tokio::spawn(async move {
        let _ = poem::Server::new_with_acceptor(acceptor).run(route).await;
    });
    format!("http://127.0.0.1:{port}")
}

fn connect(origin: &str) -> RestClient {
    RestClient::new(users_contract(), origin, RestClientConfig::default()).unwrap()
}

#[test]
async fn typed_calls_round_trip_through_the_server() {
    let origin = start_server().await;
    let client = connect(&origin);

    let name = client.call("getName", &[json!(5)]).await.unwrap();
    assert_eq!(name, json!("<user 5>"));

    let name: String = client.call_as("getName", &[json!(7)]).await.unwrap();
    assert_eq!(name, "<user 7>");
}

#[test]
async fn void_operations_return_an_empty_object() {
    let origin = start_server().await;
    let client = connect(&origin);
    let result = client.call("newUser", &[json!("joe")]).await.unwrap();
    assert_eq!(result, json!({}));
}

#[test]
async fn omitted_arguments_use_server_side_defaults() {
    let origin = start_server().await;
    let client = connect(&origin);

    let greeting = client.call("getGreeting", &[]).await.unwrap();
    assert_eq!(greeting, json!("Hello, world"));

    let greeting = client.call("getGreeting", &[json!("rust")]).await.unwrap();
    assert_eq!(greeting, json!("Hello, rust"));

    // a parameter without a default cannot be omitted
    let err = client.call("getName", &[]).await.unwrap_err();
    assert!(matches!(err, RestError::Protocol(_)));
}

#[test]
async fn complex_query_parameters_travel_as_json_text() {
    let origin = start_server().await;
    let client = connect(&origin);
    let filter = json!({ "age": { "min": 21 }, "active": true });
    let echoed = client.call("queryFind", &[filter.clone()]).await.unwrap();
    assert_eq!(echoed, filter);
}

#[test]
async fn overridden_paths_substitute_and_encode_placeholders() {
    let origin = start_server().await;
    let client = connect(&origin);
    let result = client
        .call("custom", &[json!("a b/c"), json!("hi")])
        .await
        .unwrap();
    assert_eq!(result, json!("a b/c:hi"));
}

#[test]
async fn status_errors_surface_with_their_message() {
    let origin = start_server().await;
    let client = connect(&origin);
    let err = client.call("forbidden", &[]).await.unwrap_err();
    match err {
        RestError::Status { status, message } => {
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(message, "no access");
        }
        other => panic!("expected a status error, got {other:?}"),
    }
}

#[test]
async fn sub_clients_inherit_the_mount_point() {
    let origin = start_server().await;
    let client = connect(&origin);
    let items = client.sub_client("items").unwrap();
    assert!(items.base_url().path().ends_with("/api/items/"));
    let text = items.call("getText", &[]).await.unwrap();
    assert_eq!(text, json!("Hello, World"));
}

#[test]
async fn request_filters_run_before_each_request() {
    let origin = start_server().await;
    let filtered = Arc::new(AtomicBool::new(false));
    let flag = filtered.clone();
    let config = RestClientConfig {
        request_filter: Some(Arc::new(move |request| {
            flag.store(true, Ordering::SeqCst);
            request.header("x-filament-test", "1")
        })),
        ..RestClientConfig::default()
    };
    let client = RestClient::new(users_contract(), &origin, config).unwrap();
    client.call("getGreeting", &[]).await.unwrap();
    assert!(filtered.load(Ordering::SeqCst));
}
