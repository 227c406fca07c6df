mod common;

use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn candidate_validation_distinguishes_failures() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    // Unknown LR.
    let response = app
        .post(
            "/challans/inward/candidate",
            &json!({ "lr_no": "LR-DOES-NOT-EXIST", "working_set": [] }),
        )
        .await;
    assert_eq!(404, response.status().as_u16());

    // Known but not in transit.
    let booked = app.book(&[4]).await;
    let response = app
        .post(
            "/challans/inward/candidate",
            &json!({ "lr_no": booked["lr_no"], "working_set": [] }),
        )
        .await;
    assert_eq!(409, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "status_guard");

    // In transit and valid.
    let (dispatched, _) = app.book_and_dispatch(&[4]).await;
    let lr_no = dispatched["lr_no"].as_str().unwrap();
    let response = app
        .post(
            "/challans/inward/candidate",
            &json!({ "lr_no": lr_no, "working_set": [] }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());

    // Already collected in the working set.
    let response = app
        .post(
            "/challans/inward/candidate",
            &json!({ "lr_no": lr_no, "working_set": [lr_no] }),
        )
        .await;
    assert_eq!(409, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn save_inward_finalizes_and_restocks() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let (consignment, inward) = app.book_through_inward(&[6]).await;
    let id = consignment["consignment_id"].as_str().unwrap();

    assert_eq!(inward["status"], "finalized");
    assert_eq!(inward["challan_type"], "inward");
    assert!(inward["challan_no"].as_str().unwrap().starts_with("IC-"));
    assert_eq!(inward["lr_details"].as_array().unwrap().len(), 1);

    // Multi-leg re-entry: back in stock at the destination hub.
    assert_eq!("in_stock", app.consignment_status(id).await);

    let response = app.get(&format!("/consignments/{}/history", id)).await;
    let history: serde_json::Value = response.json().await.unwrap();
    let actions: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["booked", "loaded", "dispatched", "inwarded"]);
}

#[tokio::test]
async fn save_inward_rejects_non_transit_member() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let (in_transit, _) = app.book_and_dispatch(&[3]).await;
    let in_stock = app.book(&[2]).await;

    let response = app
        .post(
            "/challans/inward",
            &json!({
                "from_station": "Nagpur",
                "to_station": "Pune",
                "lr_nos": [in_transit["lr_no"], in_stock["lr_no"]]
            }),
        )
        .await;
    assert_eq!(409, response.status().as_u16());

    // All-or-nothing: the valid member is still in transit.
    let id = in_transit["consignment_id"].as_str().unwrap();
    assert_eq!("in_transit", app.consignment_status(id).await);
}

#[tokio::test]
async fn edit_in_place_reverts_removed_lrs() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let (first, _) = app.book_and_dispatch(&[5]).await;
    let (second, _) = app.book_and_dispatch(&[9]).await;
    let first_lr = first["lr_no"].as_str().unwrap();
    let second_lr = second["lr_no"].as_str().unwrap();

    let response = app
        .post(
            "/challans/inward",
            &json!({
                "from_station": "Nagpur",
                "to_station": "Pune",
                "lr_nos": [first_lr, second_lr]
            }),
        )
        .await;
    assert_eq!(201, response.status().as_u16());
    let saved: serde_json::Value = response.json().await.unwrap();
    let challan_id = saved["challan_id"].as_str().unwrap();
    assert_eq!(saved["total_lr"], 2);

    // Edit: drop the second LR from the manifest.
    let response = app
        .post(
            "/challans/inward",
            &json!({
                "challan_id": challan_id,
                "from_station": "Nagpur",
                "to_station": "Pune",
                "lr_nos": [first_lr]
            }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let edited: serde_json::Value = response.json().await.unwrap();

    // Same challan number, superseded snapshot set and totals.
    assert_eq!(edited["challan_no"], saved["challan_no"]);
    assert_eq!(edited["total_lr"], 1);
    assert_eq!(edited["lr_details"].as_array().unwrap().len(), 1);

    // The removed consignment is back in transit; the kept one stays put.
    let first_id = first["consignment_id"].as_str().unwrap();
    let second_id = second["consignment_id"].as_str().unwrap();
    assert_eq!("in_stock", app.consignment_status(first_id).await);
    assert_eq!("in_transit", app.consignment_status(second_id).await);

    // The trail records the undone receipt, not a plain transition.
    let response = app
        .get(&format!("/consignments/{}/history", second_id))
        .await;
    let history: serde_json::Value = response.json().await.unwrap();
    let last = history.as_array().unwrap().last().unwrap();
    assert_eq!(last["action"], "returned_to_transit");
}

#[tokio::test]
async fn save_inward_rejects_duplicate_lrs_in_set() {
    let Some(app) = TestApp::try_spawn().await else {
        return;
    };

    let (dispatched, _) = app.book_and_dispatch(&[3]).await;
    let lr_no = dispatched["lr_no"].as_str().unwrap();

    let response = app
        .post(
            "/challans/inward",
            &json!({
                "from_station": "Nagpur",
                "to_station": "Pune",
                "lr_nos": [lr_no, lr_no]
            }),
        )
        .await;
    assert_eq!(409, response.status().as_u16());
}
