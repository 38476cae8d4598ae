//! Integration tests for the registry protocol surface and the
//! constraint-resolution pipeline, driven through the crate's public API.
//! Anything requiring a live cluster or cloud credentials stays in unit
//! tests behind mocks; these tests cover the pure pipeline end to end.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use kerrareg::crd::ModuleVersion;
use kerrareg::registry::{router, RegistryState, MODULES_V1_PREFIX};
use kerrareg::versions::{
    latest_version, parse_constraints, resolve_constraints, sanitize_version,
};

fn registry() -> axum::Router {
    router(RegistryState {
        use_bearer_token: false,
    })
}

#[tokio::test]
async fn service_discovery_points_at_the_modules_protocol() {
    let response = registry()
        .oneshot(
            Request::builder()
                .uri("/.well-known/terraform.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/json"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["modules.v1"], MODULES_V1_PREFIX);
}

#[tokio::test]
async fn protocol_routes_require_a_credential() {
    for uri in [
        "/kerrareg/modules/v1/ns/vpc/aws/versions",
        "/kerrareg/modules/v1/ns/vpc/aws/1.0.0/download",
    ] {
        let response = registry()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "uri: {uri}");
    }
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let response = registry()
        .oneshot(
            Request::builder()
                .uri("/kerrareg/providers/v1/ns/aws/versions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn upstream_tags_resolve_to_a_registry_version_set() {
    // The full depot pipeline on realistic upstream tags: constraint
    // expression in, sanitised registry versions out, latest computed over
    // the resulting module spec.
    let upstream: Vec<String> = ["v1.0.0", "v1.0.1", "v1.1.0", "v2.0.0", "v2.0.1", "nightly"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let constraints = parse_constraints(">= 1.0.0, < 2.0.0, != 1.0.1").unwrap();
    let matched = resolve_constraints(&constraints, &upstream);
    assert_eq!(matched, vec!["1.0.0".to_string(), "1.1.0".to_string()]);

    // None of the matched versions leaks a leading 'v' to registry clients
    assert!(matched.iter().all(|v| sanitize_version(v) == v));

    let entries: Vec<ModuleVersion> = matched.into_iter().map(ModuleVersion::entry).collect();
    assert_eq!(latest_version(&entries).as_deref(), Some("1.1.0"));
}

#[test]
fn pessimistic_constraints_track_upstream_patch_releases() {
    let upstream: Vec<String> = ["v1.2.0", "v1.2.1", "v1.2.9", "v1.3.0", "v2.0.0"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let constraints = parse_constraints("~> 1.2.0").unwrap();
    let matched = resolve_constraints(&constraints, &upstream);
    assert_eq!(
        matched,
        vec!["1.2.0".to_string(), "1.2.1".to_string(), "1.2.9".to_string()]
    );
}
