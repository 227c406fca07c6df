mod common;

use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn full_delivery_closes_every_line() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let (consignment, _) = app.book_through_inward(&[10, 4]).await;
    let id = consignment["consignment_id"].as_str().unwrap();
    let lines = consignment["line_items"].as_array().unwrap();

    let allocations: Vec<serde_json::Value> = lines
        .iter()
        .map(|li| {
            json!({
                "line_item_id": li["line_item_id"],
                "delivered_qty": li["quantity"],
                "return_qty": 0
            })
        })
        .collect();

    let response = app
        .post(
            &format!("/consignments/{}/deliver", id),
            &json!({
                "allocations": allocations,
                "received_by": "S. Verma",
                "delivered_date": "2025-03-10",
                "unloading_charge": "120.00"
            }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(body["status"], "delivered");
    assert!(body["delivery_memo_no"].as_str().unwrap().starts_with("DM-"));
    assert_eq!(body["received_by"], "S. Verma");
    for li in body["line_items"].as_array().unwrap() {
        assert_eq!(li["delivered_qty"], li["quantity"]);
        assert_eq!(li["return_qty"], 0);
    }
}

#[tokio::test]
async fn partial_delivery_derives_partially_delivered() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let (consignment, _) = app.book_through_inward(&[10]).await;
    let id = consignment["consignment_id"].as_str().unwrap();
    let line = &consignment["line_items"][0];

    let response = app
        .post(
            &format!("/consignments/{}/deliver", id),
            &json!({
                "allocations": [{
                    "line_item_id": line["line_item_id"],
                    "delivered_qty": 7,
                    "return_qty": 3
                }],
                "received_by": "S. Verma",
                "delivered_date": "2025-03-10"
            }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "partially_delivered");
}

#[tokio::test]
async fn open_allocation_is_rejected_without_commit() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let (consignment, _) = app.book_through_inward(&[10]).await;
    let id = consignment["consignment_id"].as_str().unwrap();
    let line = &consignment["line_items"][0];

    // 6 + 3 != 10: the allocation does not close the line.
    let response = app
        .post(
            &format!("/consignments/{}/deliver", id),
            &json!({
                "allocations": [{
                    "line_item_id": line["line_item_id"],
                    "delivered_qty": 6,
                    "return_qty": 3
                }],
                "received_by": "S. Verma",
                "delivered_date": "2025-03-10"
            }),
        )
        .await;
    assert_eq!(400, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "allocation");

    // Nothing committed.
    assert_eq!("in_stock", app.consignment_status(id).await);
}

#[tokio::test]
async fn delivery_requires_deliverable_state() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    // Still in transit, not at the delivering hub.
    let (consignment, _) = app.book_and_dispatch(&[5]).await;
    let id = consignment["consignment_id"].as_str().unwrap();

    let response = app
        .post(
            &format!("/consignments/{}/mark-delivered", id),
            &json!({ "received_by": "S. Verma", "delivered_date": "2025-03-10" }),
        )
        .await;
    assert_eq!(409, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "status_guard");
}

#[tokio::test]
async fn mark_delivered_quick_path_delivers_in_full() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let (consignment, _) = app.book_through_inward(&[6, 2]).await;
    let id = consignment["consignment_id"].as_str().unwrap();

    let response = app
        .post(
            &format!("/consignments/{}/mark-delivered", id),
            &json!({ "received_by": "S. Verma", "delivered_date": "2025-03-11" }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "delivered");

    let response = app.get(&format!("/consignments/{}/history", id)).await;
    let history: serde_json::Value = response.json().await.unwrap();
    let last = history.as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["action"], "delivered");
}

#[tokio::test]
async fn hold_and_release_round_trip() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let consignment = app.book(&[4]).await;
    let id = consignment["consignment_id"].as_str().unwrap();

    let response = app
        .post(
            &format!("/consignments/{}/hold", id),
            &json!({ "reason": "payment pending" }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    assert_eq!("in_hold", app.consignment_status(id).await);

    // Held consignments cannot be loaded.
    let loading = app
        .post(
            "/challans/loading",
            &json!({
                "from_station": "Nagpur",
                "to_station": "Pune",
                "consignment_ids": [id]
            }),
        )
        .await;
    assert_eq!(409, loading.status().as_u16());

    let response = app
        .post(&format!("/consignments/{}/release", id), &json!({}))
        .await;
    assert_eq!(200, response.status().as_u16());
    assert_eq!("in_stock", app.consignment_status(id).await);
}

#[tokio::test]
async fn cancel_is_terminal() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let consignment = app.book(&[4]).await;
    let id = consignment["consignment_id"].as_str().unwrap();

    let response = app
        .post(
            &format!("/consignments/{}/cancel", id),
            &json!({ "reason": "booked in error" }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    assert_eq!("cancelled", app.consignment_status(id).await);

    // No transitions out of a terminal state.
    let again = app
        .post(&format!("/consignments/{}/hold", id), &json!({}))
        .await;
    assert_eq!(409, again.status().as_u16());
}
