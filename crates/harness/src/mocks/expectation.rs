//! MockServer expectation wire format.
//!
//! `PUT /mockserver/expectation` takes an array of
//! `{ "httpRequest": {...}, "httpResponse": {...} }` objects. Header and
//! query values are lists, delays carry an explicit time unit.

use serde::Serialize;
use std::collections::BTreeMap;

use super::types::MockBehavior;

pub(crate) const CLEAR_PATH: &str = "/mockserver/clear";
pub(crate) const EXPECTATION_PATH: &str = "/mockserver/expectation";

type MultiValue = BTreeMap<String, Vec<String>>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Expectation {
    pub http_request: HttpRequest,
    pub http_response: HttpResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: MultiValue,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub query_string_parameters: MultiValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonBody>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonBody {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub json: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HttpResponse {
    pub status_code: u16,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: MultiValue,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub body: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Delay {
    pub time_unit: &'static str,
    pub value: u64,
}

fn multi(values: &BTreeMap<String, String>) -> MultiValue {
    values
        .iter()
        .map(|(k, v)| (k.clone(), vec![v.clone()]))
        .collect()
}

impl From<&MockBehavior> for Expectation {
    fn from(behavior: &MockBehavior) -> Self {
        let conditions = behavior.conditions.clone().unwrap_or_default();

        let mut response_headers = multi(&behavior.response.headers);
        let has_content_type = response_headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("content-type"));
        if !behavior.response.body.is_null() && !has_content_type {
            response_headers.insert(
                "Content-Type".to_string(),
                vec!["application/json".to_string()],
            );
        }

        Self {
            http_request: HttpRequest {
                method: behavior.method.to_uppercase(),
                path: behavior.endpoint.clone(),
                headers: multi(&conditions.headers),
                query_string_parameters: multi(&conditions.query),
                body: conditions.body.map(|json| JsonBody { kind: "JSON", json }),
            },
            http_response: HttpResponse {
                status_code: behavior.response.status,
                headers: response_headers,
                body: behavior.response.body.clone(),
                delay: (behavior.response.delay_ms > 0).then_some(Delay {
                    time_unit: "MILLISECONDS",
                    value: behavior.response.delay_ms,
                }),
            },
        }
    }
}
