//! Pure construction of transport requests.
//!
//! # Design
//! `TransportRequestBuilder` turns a `ClientRequest` plus the connection
//! settings of the moment (base URL, timeout, token, headers) into an
//! `HttpRequest`. It performs no I/O and holds no state between calls, so
//! the same settings can build any number of requests and the output can
//! be handed to any transport, including a host engine across FFI.

use std::time::Duration;

use crate::config::{CallerConfig, ClientRequestRule};
use crate::error::CallError;
use crate::form::{ParameterType, PathType};
use crate::http::{HeaderList, HttpRequest};
use crate::json_path;
use crate::request::ClientRequest;
use crate::session::SessionState;

/// Snapshot of everything outside the request that shapes the transport call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub access_token: Option<String>,
    pub rule: ClientRequestRule,
    /// Caller-level overrides, applied after the rule's fixed headers.
    pub header_modifications: HeaderList,
}

impl ConnectionSettings {
    pub fn from_config(config: &CallerConfig, session: &SessionState, header_modifications: &HeaderList) -> Self {
        let environment = config.current_environment();
        let access_token = environment
            .and_then(|env| env.override_access_token.clone())
            .or_else(|| session.access_token());
        Self {
            base_url: environment.map(|env| env.base_url.clone()),
            timeout: config.timeout(),
            access_token,
            rule: config.client_request_rule.clone(),
            header_modifications: header_modifications.clone(),
        }
    }
}

pub struct TransportRequestBuilder<'a> {
    settings: &'a ConnectionSettings,
}

impl<'a> TransportRequestBuilder<'a> {
    pub fn new(settings: &'a ConnectionSettings) -> Self {
        Self { settings }
    }

    pub fn build(&self, request: &ClientRequest) -> Result<HttpRequest, CallError> {
        let mut url = self.url_for(request)?;
        let mut headers = self.base_headers();
        let mut body = None;

        if let Some(content) = request.content() {
            match request.parameter_type() {
                ParameterType::None => {}
                ParameterType::Query => {
                    if !content.is_object() {
                        return Err(CallError::InvalidRequest(
                            "query parameters must be a JSON object".to_string(),
                        ));
                    }
                    let pairs = json_path::query_pairs(content);
                    if !pairs.is_empty() {
                        let query = serde_urlencoded::to_string(&pairs)
                            .map_err(|e| CallError::Serialization(e.to_string()))?;
                        url.push(if url.contains('?') { '&' } else { '?' });
                        url.push_str(&query);
                    }
                }
                ParameterType::Body => {
                    let raw = serde_json::to_string(content).map_err(|e| CallError::Serialization(e.to_string()))?;
                    headers.set("Content-Type", "application/json");
                    body = Some(raw);
                }
                ParameterType::Path => match content {
                    serde_json::Value::String(segment) => url.push_str(segment),
                    serde_json::Value::Number(n) => url.push_str(&n.to_string()),
                    _ => {
                        return Err(CallError::InvalidRequest(
                            "path parameter must be a string or number".to_string(),
                        ))
                    }
                },
            }
        }

        headers.extend(request.headers());

        Ok(HttpRequest {
            method: request.verb(),
            url,
            headers,
            body,
            timeout: self.settings.timeout,
        })
    }

    fn url_for(&self, request: &ClientRequest) -> Result<String, CallError> {
        match request.path_type() {
            PathType::FullUrl => Ok(request.path().to_string()),
            PathType::Endpoint => {
                let base = self.settings.base_url.as_deref().ok_or_else(|| {
                    CallError::MissingDependency("no backend environment is selected".to_string())
                })?;
                let base = base.trim_end_matches('/');
                let path = request.path();
                if path.is_empty() || path.starts_with('/') || path.starts_with('?') {
                    Ok(format!("{base}{path}"))
                } else {
                    Ok(format!("{base}/{path}"))
                }
            }
        }
    }

    fn base_headers(&self) -> HeaderList {
        let rule = &self.settings.rule;
        let mut headers = HeaderList::new();
        if let Some(token) = self.settings.access_token.as_deref().filter(|t| !t.is_empty()) {
            headers.set(
                rule.access_token_header.as_str(),
                format!("{}{token}", rule.access_token_prefix),
            );
        }
        headers.extend(&rule.additional_headers);
        headers.extend(&self.settings.header_modifications);
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::RequestForm;
    use crate::http::HttpMethod;
    use serde_json::json;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            base_url: Some("http://localhost:3000".to_string()),
            timeout: Duration::from_secs(10),
            access_token: Some("tok".to_string()),
            rule: ClientRequestRule::default(),
            header_modifications: HeaderList::new(),
        }
    }

    #[test]
    fn get_without_content_produces_plain_request() {
        let settings = settings();
        let req = TransportRequestBuilder::new(&settings)
            .build(&ClientRequest::new(RequestForm::get("/items"), None))
            .unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:3000/items");
        assert!(req.body.is_none());
        assert_eq!(req.headers.get("accessToken"), Some("bearer tok"));
        assert_eq!(req.timeout, Duration::from_secs(10));
    }

    #[test]
    fn body_parameters_become_json() {
        let settings = settings();
        let request = ClientRequest::new(RequestForm::post("/login"), Some(json!({"user": "a", "pass": "b"})));
        let req = TransportRequestBuilder::new(&settings).build(&request).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.headers.get("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"user": "a", "pass": "b"}));
    }

    #[test]
    fn query_parameters_are_encoded() {
        let settings = settings();
        let form = RequestForm::new("/items", HttpMethod::Get, ParameterType::Query);
        let request = ClientRequest::new(form, Some(json!({"page": 2, "q": "sword #1", "skip": null})));
        let req = TransportRequestBuilder::new(&settings).build(&request).unwrap();
        assert_eq!(req.url, "http://localhost:3000/items?page=2&q=sword+%231");
        assert!(req.body.is_none());
    }

    #[test]
    fn query_parameters_must_be_an_object() {
        let settings = settings();
        let form = RequestForm::new("/items", HttpMethod::Get, ParameterType::Query);
        let request = ClientRequest::new(form, Some(json!([1, 2])));
        let err = TransportRequestBuilder::new(&settings).build(&request).unwrap_err();
        assert!(matches!(err, CallError::InvalidRequest(_)));
    }

    #[test]
    fn path_parameters_are_appended() {
        let settings = settings();
        let form = RequestForm::new("/items/", HttpMethod::Delete, ParameterType::Path);
        let req = TransportRequestBuilder::new(&settings)
            .build(&ClientRequest::new(form.clone(), Some(json!(42))))
            .unwrap();
        assert_eq!(req.url, "http://localhost:3000/items/42");
        assert_eq!(req.method, HttpMethod::Delete);
        let req = TransportRequestBuilder::new(&settings)
            .build(&ClientRequest::new(form, Some(json!("abc"))))
            .unwrap();
        assert_eq!(req.url, "http://localhost:3000/items/abc");
    }

    #[test]
    fn full_url_ignores_base() {
        let settings = settings();
        let form = RequestForm::get("https://cdn.example.com/news.json").with_path_type(PathType::FullUrl);
        let req = TransportRequestBuilder::new(&settings)
            .build(&ClientRequest::new(form, None))
            .unwrap();
        assert_eq!(req.url, "https://cdn.example.com/news.json");
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let mut settings = settings();
        settings.base_url = Some("http://localhost:3000/".to_string());
        let req = TransportRequestBuilder::new(&settings)
            .build(&ClientRequest::new(RequestForm::get("items"), None))
            .unwrap();
        assert_eq!(req.url, "http://localhost:3000/items");
    }

    #[test]
    fn endpoint_without_environment_is_missing_dependency() {
        let mut settings = settings();
        settings.base_url = None;
        let err = TransportRequestBuilder::new(&settings)
            .build(&ClientRequest::new(RequestForm::get("/items"), None))
            .unwrap_err();
        assert!(matches!(err, CallError::MissingDependency(_)));
    }

    #[test]
    fn header_layers_are_last_write_wins() {
        let mut settings = settings();
        settings.rule.additional_headers.set("X-Client", "game");
        settings.rule.additional_headers.set("X-Version", "1");
        settings.header_modifications.set("x-version", "2");
        let mut request = ClientRequest::new(RequestForm::get("/items"), None);
        request.set_header("X-CLIENT", "editor");
        let req = TransportRequestBuilder::new(&settings).build(&request).unwrap();
        let headers: Vec<_> = req.headers.iter().collect();
        assert_eq!(
            headers,
            vec![("accessToken", "bearer tok"), ("X-Client", "editor"), ("X-Version", "2")]
        );
    }

    #[test]
    fn empty_token_sends_no_auth_header() {
        let mut settings = settings();
        settings.access_token = Some(String::new());
        let req = TransportRequestBuilder::new(&settings)
            .build(&ClientRequest::new(RequestForm::get("/items"), None))
            .unwrap();
        assert!(req.headers.get("accessToken").is_none());
    }

    #[test]
    fn environment_override_token_wins_over_session() {
        let mut config = CallerConfig::for_base_url("http://localhost:3000");
        config.backends[0].override_access_token = Some("editor".to_string());
        let session = SessionState::new();
        session.set_access_token("player");
        let settings = ConnectionSettings::from_config(&config, &session, &HeaderList::new());
        assert_eq!(settings.access_token.as_deref(), Some("editor"));
    }
}
