//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryPaymentGateway, InMemoryStockGateway};
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: axum::Router,
    stock: InMemoryStockGateway,
    payment: InMemoryPaymentGateway,
}

impl TestApp {
    fn new() -> Self {
        let stock = InMemoryStockGateway::new();
        stock.set_product(1, "Widget", 10);
        stock.set_product(2, "Gadget", 5);
        let payment = InMemoryPaymentGateway::new();

        let state = api::create_in_memory_state(stock.clone(), payment.clone());
        Self {
            router: api::create_app(state, get_metrics_handle()),
            stock,
            payment,
        }
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        user: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("X-User-Id", user.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn place_order(&self, user: i64, quantity: u32) -> i64 {
        let (status, json) = self
            .send(
                "POST",
                "/orders",
                Some(user),
                Some(order_body(1, quantity, 1000)),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        json["order_id"].as_i64().unwrap()
    }
}

fn order_body(product_id: i64, quantity: u32, unit_price_cents: i64) -> Value {
    json!({
        "items": [{
            "product_id": product_id,
            "quantity": quantity,
            "unit_price_cents": unit_price_cents
        }],
        "total_price_cents": unit_price_cents * i64::from(quantity)
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let (status, json) = app.send("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_create_order_returns_payment_url() {
    let app = TestApp::new();

    let (status, json) = app
        .send(
            "POST",
            "/orders",
            Some(7),
            Some(json!({
                "items": [
                    {"product_id": 1, "quantity": 2, "unit_price_cents": 5000},
                    {"product_id": 2, "quantity": 1, "unit_price_cents": 10000}
                ],
                "total_price_cents": 20000
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let order_id = json["order_id"].as_i64().unwrap();
    let payment_url = json["payment_url"].as_str().unwrap();
    assert!(payment_url.ends_with(&format!("/{order_id}")));

    let checkouts = app.payment.checkouts();
    assert_eq!(checkouts.len(), 1);
    assert_eq!(checkouts[0].amount.cents(), 20000);
}

#[tokio::test]
async fn test_create_order_requires_identity() {
    let app = TestApp::new();

    let (status, json) = app
        .send("POST", "/orders", None, Some(order_body(1, 1, 1000)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().unwrap().contains("X-User-Id"));

    let (status, _) = app
        .send("GET", "/orders", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_order_validation_errors() {
    let app = TestApp::new();

    let (status, _) = app
        .send(
            "POST",
            "/orders",
            Some(7),
            Some(json!({"items": [], "total_price_cents": 0})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send("POST", "/orders", Some(7), Some(order_body(1, 0, 1000)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send("POST", "/orders", Some(7), Some(json!({"items": "nope"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.stock.stock_query_count(), 0);
    assert!(app.payment.checkouts().is_empty());
}

#[tokio::test]
async fn test_create_order_insufficient_stock_conflicts() {
    let app = TestApp::new();

    let (status, json) = app
        .send("POST", "/orders", Some(7), Some(order_body(2, 6, 100)))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("Insufficient stock"));
    assert!(app.payment.checkouts().is_empty());
}

#[tokio::test]
async fn test_create_order_unknown_product_not_found() {
    let app = TestApp::new();

    let (status, _) = app
        .send("POST", "/orders", Some(7), Some(order_body(99, 1, 100)))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_gateway_failures_map_to_bad_gateway() {
    let app = TestApp::new();

    app.payment.set_fail_on_checkout(true);
    let (status, _) = app
        .send("POST", "/orders", Some(7), Some(order_body(1, 1, 100)))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    app.payment.set_fail_on_checkout(false);
    app.stock.set_fail_on_get(true);
    let (status, _) = app
        .send("POST", "/orders", Some(7), Some(order_body(1, 1, 100)))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_get_order_checks_ownership() {
    let app = TestApp::new();
    let order_id = app.place_order(7, 2).await;
    let uri = format!("/orders/{order_id}");

    let (status, json) = app.send("GET", &uri, Some(7), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], order_id);
    assert_eq!(json["user_id"], 7);
    assert_eq!(json["status"], "pending");
    assert_eq!(json["total_price_cents"], 2000);
    assert_eq!(json["items"][0]["product_name"], "Widget");
    assert_eq!(json["items"][0]["quantity"], 2);

    let (status, _) = app.send("GET", &uri, Some(8), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.send("GET", "/orders/999", Some(7), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send("GET", "/orders/abc", Some(7), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_orders_returns_only_callers_orders() {
    let app = TestApp::new();
    let first = app.place_order(7, 1).await;
    app.place_order(8, 1).await;
    let second = app.place_order(7, 1).await;

    let (status, json) = app.send("GET", "/orders", Some(7), None).await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![first, second]);

    let (_, json) = app.send("GET", "/orders", Some(9), None).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_order() {
    let app = TestApp::new();
    let order_id = app.place_order(7, 10).await;
    let uri = format!("/orders/{order_id}/cancel");

    let (status, _) = app.send("POST", &uri, Some(8), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = app.send("POST", &uri, Some(7), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "canceled");

    // Cancelling released the reservation, so the full stock is orderable again.
    app.place_order(8, 10).await;

    let (status, _) = app.send("POST", "/orders/999/cancel", Some(7), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_status() {
    let app = TestApp::new();
    let order_id = app.place_order(7, 1).await;
    let uri = format!("/orders/{order_id}/status");

    let (status, json) = app
        .send("PUT", &uri, Some(7), Some(json!({"status": "paid"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "paid");
    assert_eq!(json["changed"], true);

    let (status, json) = app
        .send("PUT", &uri, Some(7), Some(json!({"status": "paid"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["changed"], false);

    let (status, _) = app
        .send("PUT", &uri, Some(7), Some(json!({"status": "bogus"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = app
        .send("PUT", &uri, Some(7), Some(json!({"status": "cancelled"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "canceled");

    let (status, _) = app
        .send("PUT", &uri, Some(7), Some(json!({"status": "shipped"})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send("PUT", "/orders/999/status", Some(7), Some(json!({"status": "paid"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_order() {
    let app = TestApp::new();
    let order_id = app.place_order(7, 1).await;
    let uri = format!("/orders/{order_id}");

    let (status, json) = app.send("DELETE", &uri, Some(7), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(json.is_null());

    let (status, _) = app.send("GET", &uri, Some(7), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send("DELETE", &uri, Some(7), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new();
    app.place_order(7, 1).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("orders_created_total"));
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let app = TestApp::new();

    let (status, json) = app.send("GET", "/nope", None, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "route not found");
}
