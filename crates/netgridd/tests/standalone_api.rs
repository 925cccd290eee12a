//! Standalone API regression tests.
//!
//! Drives the full axum router of a one-member deployment: create,
//! get (with ETag), update preconditions, rename, delete, leases,
//! state and list filtering.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use netgrid_api::{build_router, AllowAll, Controller, EventBus};
use netgrid_driver::Datapath;
use netgrid_catalog::{Catalog, MemberRecord};
use netgrid_cluster::{ClusterEnv, HttpClientFactory};
use netgrid_driver::{InterfaceKind, MemoryDatapath, MemoryUsage};

fn test_router() -> (Router, Arc<MemoryDatapath>, Catalog) {
    let catalog = Catalog::open_in_memory().unwrap();
    catalog
        .put_member(&MemberRecord {
            name: "standalone".to_string(),
            address: "127.0.0.1:0".to_string(),
            alive: true,
        })
        .unwrap();

    let datapath = Arc::new(MemoryDatapath::new());
    let controller = Controller::new(
        catalog.clone(),
        datapath.clone(),
        Arc::new(MemoryUsage::new()),
        Arc::new(ClusterEnv::new(
            "standalone",
            Arc::new(HttpClientFactory::notifier()),
        )),
        Arc::new(AllowAll),
        EventBus::new(),
    );

    (build_router(controller), datapath, catalog)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn list_networks_empty() {
    let (router, _, _) = test_router();

    let resp = router.oneshot(get("/1.0/networks")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["type"], json!("sync"));
    assert_eq!(body["status"], json!("Success"));
    assert_eq!(body["metadata"], json!([]));
}

#[tokio::test]
async fn create_and_get_network() {
    let (router, datapath, _) = test_router();

    let resp = router
        .clone()
        .oneshot(post_json(
            "/1.0/networks",
            json!({"name": "br0", "type": "bridge"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("location").unwrap().to_str().unwrap(),
        "/1.0/networks/br0"
    );
    assert!(datapath.is_up("br0"));

    let resp = router.oneshot(get("/1.0/networks/br0")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("etag"));

    let body = body_json(resp).await;
    assert_eq!(body["metadata"]["managed"], json!(true));
    assert_eq!(body["metadata"]["status"], json!("Created"));
    assert_eq!(body["metadata"]["type"], json!("bridge"));
}

#[tokio::test]
async fn create_rejects_reserved_names() {
    let (router, _, _) = test_router();

    for name in ["none", "veth0"] {
        let resp = router
            .clone()
            .oneshot(post_json("/1.0/networks", json!({"name": name})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{name:?}");
    }
}

#[tokio::test]
async fn duplicate_create_conflicts() {
    let (router, _, _) = test_router();

    let req = json!({"name": "br0", "type": "bridge"});
    let resp = router
        .clone()
        .oneshot(post_json("/1.0/networks", req.clone()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router.oneshot(post_json("/1.0/networks", req)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn update_enforces_if_match() {
    let (router, _, _) = test_router();

    router
        .clone()
        .oneshot(post_json(
            "/1.0/networks",
            json!({"name": "br0", "type": "bridge"}),
        ))
        .await
        .unwrap();

    let req = Request::builder()
        .method("PUT")
        .uri("/1.0/networks/br0")
        .header("content-type", "application/json")
        .header("if-match", "stale-etag")
        .body(Body::from(json!({"description": "x"}).to_string()))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    // With the current tag the update goes through.
    let resp = router.clone().oneshot(get("/1.0/networks/br0")).await.unwrap();
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let req = Request::builder()
        .method("PUT")
        .uri("/1.0/networks/br0")
        .header("content-type", "application/json")
        .header("if-match", etag)
        .body(Body::from(json!({"description": "lan bridge"}).to_string()))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router.oneshot(get("/1.0/networks/br0")).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["metadata"]["description"], json!("lan bridge"));
}

#[tokio::test]
async fn patch_merges_config() {
    let (router, _, catalog) = test_router();

    router
        .clone()
        .oneshot(post_json(
            "/1.0/networks",
            json!({"name": "br0", "type": "bridge", "config": {"dns.domain": "lan"}}),
        ))
        .await
        .unwrap();

    let req = Request::builder()
        .method("PATCH")
        .uri("/1.0/networks/br0")
        .header("content-type", "application/json")
        .body(Body::from(json!({"config": {"mtu": "9000"}}).to_string()))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let view = catalog
        .get_network_in_any_state("default", "br0", "standalone")
        .unwrap();
    assert_eq!(view.config.get("mtu").map(String::as_str), Some("9000"));
    assert_eq!(view.config.get("dns.domain").map(String::as_str), Some("lan"));
}

#[tokio::test]
async fn rename_moves_network() {
    let (router, _, _) = test_router();

    router
        .clone()
        .oneshot(post_json(
            "/1.0/networks",
            json!({"name": "br0", "type": "bridge"}),
        ))
        .await
        .unwrap();

    let resp = router
        .clone()
        .oneshot(post_json("/1.0/networks/br0", json!({"name": "br1"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("location").unwrap().to_str().unwrap(),
        "/1.0/networks/br1"
    );

    let resp = router.clone().oneshot(get("/1.0/networks/br0")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = router.oneshot(get("/1.0/networks/br1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn delete_network() {
    let (router, datapath, _) = test_router();

    router
        .clone()
        .oneshot(post_json(
            "/1.0/networks",
            json!({"name": "br0", "type": "bridge"}),
        ))
        .await
        .unwrap();

    let req = Request::builder()
        .method("DELETE")
        .uri("/1.0/networks/br0")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!datapath.interface_exists("br0"));

    let resp = router.oneshot(get("/1.0/networks/br0")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn leases_and_state_endpoints() {
    let (router, datapath, _) = test_router();

    router
        .clone()
        .oneshot(post_json(
            "/1.0/networks",
            json!({"name": "br0", "type": "bridge"}),
        ))
        .await
        .unwrap();

    let resp = router
        .clone()
        .oneshot(get("/1.0/networks/br0/leases"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["metadata"], json!([]));

    let resp = router
        .clone()
        .oneshot(get("/1.0/networks/br0/state"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["metadata"]["state"], json!("up"));

    // Unmanaged host interface state comes from the probe.
    datapath.add_host_interface("eth0", InterfaceKind::Physical);
    let resp = router.oneshot(get("/1.0/networks/eth0/state")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn list_with_filter_and_recursion() {
    let (router, datapath, _) = test_router();
    datapath.add_host_interface("eth0", InterfaceKind::Physical);

    router
        .clone()
        .oneshot(post_json(
            "/1.0/networks",
            json!({"name": "br0", "type": "bridge"}),
        ))
        .await
        .unwrap();

    let resp = router
        .clone()
        .oneshot(get("/1.0/networks?recursion=1&filter=type%20eq%20bridge"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let records = body["metadata"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["name"], json!("br0"));

    // Plain listing returns URLs including host interfaces.
    let resp = router.oneshot(get("/1.0/networks")).await.unwrap();
    let body = body_json(resp).await;
    let urls = body["metadata"].as_array().unwrap();
    assert!(urls.contains(&json!("/1.0/networks/br0")));
    assert!(urls.contains(&json!("/1.0/networks/eth0")));
}

#[tokio::test]
async fn rename_missing_body_name_is_rejected() {
    let (router, _, _) = test_router();

    router
        .clone()
        .oneshot(post_json(
            "/1.0/networks",
            json!({"name": "br0", "type": "bridge"}),
        ))
        .await
        .unwrap();

    let resp = router
        .oneshot(post_json("/1.0/networks/br0", json!({"name": ""})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
