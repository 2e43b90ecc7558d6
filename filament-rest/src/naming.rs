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

use crate::contract::{OperationDef, OperationKind, ServiceContract};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Naming convention applied to operation identifiers when deriving URL
/// path components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MethodStyle {
    Unaltered,
    CamelCase,
    PascalCase,
    LowerCase,
    UpperCase,
    #[default]
    LowerUnderscored,
    UpperUnderscored,
}

/// The `(verb, path)` derived for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    /// True iff an explicit path override was present; overridden paths are
    /// not style-adjusted and may carry `:name` placeholders.
    pub path_overridden: bool,
    pub method: Method,
    pub relative_path: String,
}

const VERB_PREFIXES: [(&str, Method); 12] = [
    ("get", Method::GET),
    ("query", Method::GET),
    ("put", Method::PUT),
    ("set", Method::PUT),
    ("update", Method::PATCH),
    ("patch", Method::PATCH),
    ("add", Method::POST),
    ("create", Method::POST),
    ("post", Method::POST),
    ("remove", Method::DELETE),
    ("erase", Method::DELETE),
    ("delete", Method::DELETE),
];

/// Derives the HTTP method and relative path of an operation from its
/// identifier, kind and overrides.
pub fn derive_route(operation: &OperationDef) -> RouteSpec {
    let (mut method, mut path) = match operation.kind {
        OperationKind::PropertyGet => (Method::GET, operation.name.clone()),
        OperationKind::PropertySet => (Method::PUT, operation.name.clone()),
        OperationKind::Method => derive_from_identifier(&operation.name),
    };
    if let Some(explicit) = &operation.method_override {
        method = explicit.clone();
    }
    let path_overridden = operation.path_override.is_some();
    if let Some(explicit) = &operation.path_override {
        path = explicit.clone();
    }
    RouteSpec {
        path_overridden,
        method,
        relative_path: path,
    }
}

fn derive_from_identifier(name: &str) -> (Method, String) {
    for (prefix, method) in &VERB_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            // "getter" is not a GET of "ter"
            if rest.chars().next().is_none_or(|c| !c.is_lowercase()) {
                return (method.clone(), rest.to_string());
            }
        }
    }
    if name == "index" {
        return (Method::GET, String::new());
    }
    (Method::POST, name.to_string())
}

/// Applies a naming style to an identifier.
///
/// A trailing underscore (the escape for identifiers that collide with
/// keywords) is stripped first. The underscored styles split at transitions
/// into an uppercase letter, treating an uppercase run as a single acronym
/// token.
pub fn adjust_method_style(name: &str, style: MethodStyle) -> String {
    let name = name.strip_suffix('_').unwrap_or(name);
    if name.is_empty() {
        return String::new();
    }
    match style {
        MethodStyle::Unaltered => name.to_string(),
        MethodStyle::LowerCase => name.to_lowercase(),
        MethodStyle::UpperCase => name.to_uppercase(),
        MethodStyle::LowerUnderscored => split_words(name).join("_"),
        MethodStyle::UpperUnderscored => split_words(name)
            .iter()
            .map(|word| word.to_uppercase())
            .collect::<Vec<_>>()
            .join("_"),
        MethodStyle::CamelCase => camel_case(name),
        MethodStyle::PascalCase => {
            let camel = camel_case(name);
            let mut chars = camel.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => camel,
            }
        }
    }
}

/// Splits an identifier into lowercased words at transitions into
/// uppercase. A run of uppercase letters forms one acronym token whose last
/// letter belongs to the following word when it is followed by lowercase
/// (`IDTest` -> `id`, `test`).
fn split_words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();
    for (index, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && !current.is_empty() {
            let after_lower = chars[index - 1].is_lowercase();
            let before_lower = chars.get(index + 1).is_some_and(|next| next.is_lowercase());
            if after_lower || before_lower {
                words.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Lowercases the leading uppercase run, keeping its last letter when the
/// run is longer than one character and followed by lowercase.
fn camel_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let first_lower = chars
        .iter()
        .position(|c| c.is_lowercase())
        .unwrap_or(chars.len());
    if first_lower == 0 {
        return name.to_string();
    }
    if first_lower == chars.len() {
        return name.to_lowercase();
    }
    let lowered = if first_lower == 1 { 1 } else { first_lower - 1 };
    let mut result = String::new();
    for (index, c) in chars.iter().enumerate() {
        if index < lowered {
            result.extend(c.to_lowercase());
        } else {
            result.push(*c);
        }
    }
    result
}

/// The URL prefix a contract mounts at, normalized to lead and trail with
/// `/`.
pub fn root_path(contract: &ServiceContract, style: MethodStyle) -> String {
    match &contract.root_path {
        None => "/".to_string(),
        Some(path) if path.is_empty() => {
            format!("/{}/", adjust_method_style(&contract.name, style))
        }
        Some(path) => {
            let mut normalized = path.clone();
            if !normalized.starts_with('/') {
                normalized.insert(0, '/');
            }
            if !normalized.ends_with('/') {
                normalized.push('/');
            }
            normalized
        }
    }
}

/// Compact REST-string form of a parameter value: bare booleans, decimal
/// numbers and raw (unquoted) strings; any other value renders as its JSON
/// text.
pub fn rest_string(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses a REST-string back into a JSON value, falling back to a plain
/// string when the text is not valid JSON.
pub fn parse_rest_string(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::OperationDef;
    use pretty_assertions::assert_eq;
    use test_r::test;

    #[test]
    fn lower_underscored_splits_acronyms() {
        assert_eq!(
            adjust_method_style("getHTMLEntity", MethodStyle::LowerUnderscored),
            "get_html_entity"
        );
        assert_eq!(adjust_method_style("ID", MethodStyle::LowerUnderscored), "id");
        assert_eq!(
            adjust_method_style("IDTest", MethodStyle::LowerUnderscored),
            "id_test"
        );
        assert_eq!(adjust_method_style("Q", MethodStyle::LowerUnderscored), "q");
        assert_eq!(
            adjust_method_style("newUser", MethodStyle::LowerUnderscored),
            "new_user"
        );
    }

    #[test]
    fn other_styles() {
        assert_eq!(
            adjust_method_style("getHTMLEntity", MethodStyle::UpperUnderscored),
            "GET_HTML_ENTITY"
        );
        assert_eq!(
            adjust_method_style("HTMLEntity", MethodStyle::CamelCase),
            "htmlEntity"
        );
        assert_eq!(adjust_method_style("IDTest", MethodStyle::CamelCase), "idTest");
        assert_eq!(adjust_method_style("Getter", MethodStyle::CamelCase), "getter");
        assert_eq!(
            adjust_method_style("htmlEntity", MethodStyle::PascalCase),
            "HtmlEntity"
        );
        assert_eq!(
            adjust_method_style("HTMLEntity", MethodStyle::LowerCase),
            "htmlentity"
        );
        assert_eq!(
            adjust_method_style("getFoo", MethodStyle::Unaltered),
            "getFoo"
        );
        // trailing underscore is the keyword escape
        assert_eq!(
            adjust_method_style("type_", MethodStyle::LowerUnderscored),
            "type"
        );
    }

    #[test]
    fn style_application_is_idempotent() {
        for name in ["getHTMLEntity", "IDTest", "newUser", "Q"] {
            let styled = adjust_method_style(name, MethodStyle::LowerUnderscored);
            assert_eq!(
                adjust_method_style(&styled, MethodStyle::LowerUnderscored),
                styled
            );
        }
    }

    #[test]
    fn verb_prefixes_derive_methods_and_strip() {
        let spec = derive_route(&OperationDef::new("updateDescription"));
        assert_eq!(spec.method, Method::PATCH);
        assert_eq!(spec.relative_path, "Description");
        assert!(!spec.path_overridden);

        let spec = derive_route(&OperationDef::new("queryUsers"));
        assert_eq!(spec.method, Method::GET);
        assert_eq!(spec.relative_path, "Users");

        let spec = derive_route(&OperationDef::new("removeItem"));
        assert_eq!(spec.method, Method::DELETE);
        assert_eq!(spec.relative_path, "Item");

        // a prefix only counts when it ends the word
        let spec = derive_route(&OperationDef::new("getter"));
        assert_eq!(spec.method, Method::POST);
        assert_eq!(spec.relative_path, "getter");
    }

    #[test]
    fn index_maps_to_the_prefix_root() {
        let spec = derive_route(&OperationDef::new("index"));
        assert_eq!(spec.method, Method::GET);
        assert_eq!(spec.relative_path, "");
    }

    #[test]
    fn overrides_replace_only_their_component() {
        let spec = derive_route(&OperationDef::new("putInfo").method(Method::DELETE));
        assert_eq!(spec.method, Method::DELETE);
        assert_eq!(spec.relative_path, "Info");
        assert!(!spec.path_overridden);

        let spec = derive_route(
            &OperationDef::new("mattersnot")
                .method(Method::POST)
                .path("compound/path"),
        );
        assert_eq!(spec.method, Method::POST);
        assert_eq!(spec.relative_path, "compound/path");
        assert!(spec.path_overridden);
    }

    #[test]
    fn property_accessors_default_to_get_and_put() {
        let spec = derive_route(&OperationDef::new("name").property_get());
        assert_eq!(spec.method, Method::GET);
        assert_eq!(spec.relative_path, "name");

        let spec = derive_route(&OperationDef::new("name").property_set());
        assert_eq!(spec.method, Method::PUT);
        assert_eq!(spec.relative_path, "name");
    }

    #[test]
    fn root_path_rules() {
        let contract = ServiceContract::new("UserAPI");
        assert_eq!(root_path(&contract, MethodStyle::LowerUnderscored), "/");

        let contract = ServiceContract::new("UserAPI").root_path("");
        assert_eq!(
            root_path(&contract, MethodStyle::LowerUnderscored),
            "/user_api/"
        );

        let contract = ServiceContract::new("UserAPI").root_path("api/v1");
        assert_eq!(
            root_path(&contract, MethodStyle::LowerUnderscored),
            "/api/v1/"
        );
    }

    #[test]
    fn rest_strings_round_trip_scalars() {
        assert_eq!(rest_string(&Value::Bool(true)), "true");
        assert_eq!(rest_string(&serde_json::json!(42)), "42");
        assert_eq!(rest_string(&serde_json::json!("plain text")), "plain text");
        assert_eq!(rest_string(&serde_json::json!({"a": 1})), r#"{"a":1}"#);

        assert_eq!(parse_rest_string("42"), serde_json::json!(42));
        assert_eq!(parse_rest_string("true"), serde_json::json!(true));
        assert_eq!(parse_rest_string("plain text"), serde_json::json!("plain text"));
    }
}
