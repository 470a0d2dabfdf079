//! Policy-Engine Authorization Integration Tests
//!
//! Tests decision queries against a mock OPA server.

use torii_authgate::authz::opa::OpaAuthorizer;
use torii_authgate::authz::Authorizer;
use torii_authgate::config::OpaConfig;
use torii_authgate::resource::{Action, ResourceDescriptor};
use torii_authgate::session::Identity;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create an authorizer pointed at a mock server
fn create_authorizer(mock_server: &MockServer) -> OpaAuthorizer {
    OpaAuthorizer::new(OpaConfig {
        url: mock_server.uri(),
        package_path: "authgate".into(),
        rule_name: "allow".into(),
        timeout_secs: 5,
    })
}

fn resource(uri: &str, action: Action) -> ResourceDescriptor {
    ResourceDescriptor {
        uri: uri.into(),
        action,
    }
}

mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_allow_decision_returned() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/data/authgate/allow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": true
            })))
            .mount(&mock_server)
            .await;

        let authorizer = create_authorizer(&mock_server);
        let identity = Identity::new("alice", vec!["x".into()], None);

        let result = authorizer
            .authorize(Some(&identity), &resource("/data/file.nc", Action::Read))
            .await;

        assert!(result.is_ok());
        assert!(result.unwrap(), "Expected allow decision");
    }

    #[tokio::test]
    async fn test_deny_decision_returned() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/data/authgate/allow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": false
            })))
            .mount(&mock_server)
            .await;

        let authorizer = create_authorizer(&mock_server);
        let identity = Identity::new("bob", vec![], None);

        let result = authorizer
            .authorize(Some(&identity), &resource("/private/secret", Action::Read))
            .await;

        assert!(result.is_ok());
        assert!(!result.unwrap(), "Expected deny decision");
    }

    #[tokio::test]
    async fn test_missing_result_defaults_to_deny() {
        // The engine may return an empty document when no rule matches
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/data/authgate/allow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&mock_server)
            .await;

        let authorizer = create_authorizer(&mock_server);

        let result = authorizer
            .authorize(None, &resource("/data/file.nc", Action::Read))
            .await;

        assert!(result.is_ok());
        assert!(!result.unwrap(), "Missing result should default to deny");
    }

    #[tokio::test]
    async fn test_null_result_defaults_to_deny() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/data/authgate/allow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": null
            })))
            .mount(&mock_server)
            .await;

        let authorizer = create_authorizer(&mock_server);

        let result = authorizer
            .authorize(None, &resource("/data/file.nc", Action::Read))
            .await;

        assert!(result.is_ok());
        assert!(!result.unwrap(), "Null result should default to deny");
    }

    #[tokio::test]
    async fn test_server_error_is_a_service_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/data/authgate/allow"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        let authorizer = create_authorizer(&mock_server);

        let result = authorizer
            .authorize(None, &resource("/data/file.nc", Action::Read))
            .await;

        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("500"),
            "Error should mention status code: {}",
            err
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_a_service_error() {
        let authorizer = OpaAuthorizer::new(OpaConfig {
            url: "http://127.0.0.1:19998".into(),
            package_path: "authgate".into(),
            rule_name: "allow".into(),
            timeout_secs: 1,
        });

        let result = authorizer
            .authorize(None, &resource("/data/file.nc", Action::Read))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_json_response_is_an_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/data/authgate/allow"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not valid json"))
            .mount(&mock_server)
            .await;

        let authorizer = create_authorizer(&mock_server);

        let result = authorizer
            .authorize(None, &resource("/data/file.nc", Action::Read))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_request_contains_correct_input_structure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/data/authgate/allow"))
            .and(body_json(json!({
                "input": {
                    "resource": "https://data.example.com/file.nc",
                    "subject": {
                        "user": "alice",
                        "groups": ["staff"]
                    },
                    "action": "Write"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": true
            })))
            .mount(&mock_server)
            .await;

        let authorizer = create_authorizer(&mock_server);
        let identity = Identity::new("alice", vec!["staff".into()], None);

        let result = authorizer
            .authorize(
                Some(&identity),
                &resource("https://data.example.com/file.nc", Action::Write),
            )
            .await;

        assert!(result.is_ok());
        assert!(result.unwrap());
    }

    #[tokio::test]
    async fn test_anonymous_subject_is_null() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/data/authgate/allow"))
            .and(body_json(json!({
                "input": {
                    "resource": "/file.nc",
                    "subject": null,
                    "action": "Read"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": false
            })))
            .mount(&mock_server)
            .await;

        let authorizer = create_authorizer(&mock_server);

        let result = authorizer
            .authorize(None, &resource("/file.nc", Action::Read))
            .await;

        assert!(result.is_ok());
        assert!(!result.unwrap());
    }

    #[tokio::test]
    async fn test_no_decision_caching() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let mock_server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        Mock::given(method("POST"))
            .and(path("/v1/data/authgate/allow"))
            .respond_with(move |_: &wiremock::Request| {
                call_count_clone.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(json!({ "result": true }))
            })
            .mount(&mock_server)
            .await;

        let authorizer = create_authorizer(&mock_server);
        let identity = Identity::new("alice", vec![], None);

        // A resource's authorization can change between requests: every
        // call must hit the decision service
        for _ in 0..3 {
            let result = authorizer
                .authorize(Some(&identity), &resource("/data/file.nc", Action::Read))
                .await;
            assert!(result.unwrap());
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }
}
