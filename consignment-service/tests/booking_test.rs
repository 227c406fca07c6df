mod common;

use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn booking_allocates_lr_and_starts_in_stock() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let body = app.book(&[10, 5]).await;

    assert_eq!(body["status"], "in_stock");
    assert_eq!(body["source"], "regular");
    assert!(body["lr_no"].as_str().unwrap().starts_with("LR-"));
    assert_eq!(body["line_items"].as_array().unwrap().len(), 2);
    // 2 line items at 150.00 each, computed server-side
    assert_eq!(body["total_amount"], "300.00");
}

#[tokio::test]
async fn booking_with_duplicate_lr_is_rejected() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let payload = json!({
        "lr_no": "LR-CUSTOM-1",
        "origin_station": "Nagpur",
        "destination_station": "Pune",
        "sender_name": "Acme Traders",
        "receiver_name": "Bharat Stores",
        "freight_type": "paid",
        "line_items": [{
            "description": "Drums",
            "quantity": 4,
            "actual_weight": "80.000",
            "charge_weight": "85.000",
            "amount": "600.00"
        }]
    });

    let first = app.post("/consignments", &payload).await;
    assert_eq!(201, first.status().as_u16());

    let second = app.post("/consignments", &payload).await;
    assert_eq!(409, second.status().as_u16());
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn booking_without_line_items_is_rejected() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let response = app
        .post(
            "/consignments",
            &json!({
                "origin_station": "Nagpur",
                "destination_station": "Pune",
                "sender_name": "Acme Traders",
                "receiver_name": "Bharat Stores",
                "freight_type": "topay",
                "line_items": []
            }),
        )
        .await;

    assert_eq!(422, response.status().as_u16());
}

#[tokio::test]
async fn booking_writes_history() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let body = app.book(&[3]).await;
    let id = body["consignment_id"].as_str().unwrap();

    let response = app.get(&format!("/consignments/{}/history", id)).await;
    assert_eq!(200, response.status().as_u16());
    let history: serde_json::Value = response.json().await.unwrap();
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "booked");
    assert_eq!(entries[0]["actor"], common::TEST_USER_ID);
}

#[tokio::test]
async fn consignments_are_scoped_by_company() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let body = app.book(&[2]).await;
    let id = body["consignment_id"].as_str().unwrap();

    // Same record id under a different company header is not visible.
    let response = app
        .client
        .get(format!("{}/consignments/{}", app.address, id))
        .header("X-Company-ID", uuid::Uuid::new_v4().to_string())
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn inward_sourced_booking_requires_the_manifested_lr() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    // No lr_no: nothing ties the booking to a manifest row.
    let response = app
        .post(
            "/consignments",
            &json!({
                "origin_station": "Nagpur",
                "destination_station": "Pune",
                "sender_name": "Acme Traders",
                "receiver_name": "Bharat Stores",
                "freight_type": "topay",
                "source": "inward",
                "line_items": [{
                    "description": "Drums",
                    "quantity": 4,
                    "actual_weight": "80.000",
                    "charge_weight": "85.000",
                    "amount": "600.00"
                }]
            }),
        )
        .await;
    assert_eq!(400, response.status().as_u16());
}
