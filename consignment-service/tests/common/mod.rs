use consignment_service::config::ConsignmentConfig;
use consignment_service::startup::Application;
use serde_json::{json, Value};
use uuid::Uuid;

pub const TEST_USER_ID: &str = "test_operator";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    /// Fresh company per spawn; company scoping isolates tests sharing one
    /// database.
    pub company_id: Uuid,
    pub client: reqwest::Client,
}

impl TestApp {
    /// Spawn the application against TEST_DATABASE_URL on a random port.
    /// Returns None when the variable is unset so suites skip cleanly on
    /// machines without a test database.
    pub async fn try_spawn() -> Option<Self> {
        let database_url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("TEST_DATABASE_URL not set, skipping database-backed test");
                return None;
            }
        };
        std::env::set_var("DATABASE_URL", &database_url);

        let mut config = ConsignmentConfig::from_env().expect("Failed to load configuration");
        config.common.port = 0; // Random port for testing
        config.database.url = database_url;

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to accept requests.
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        Some(TestApp {
            address,
            port,
            company_id: Uuid::new_v4(),
            client,
        })
    }

    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .header("X-Company-ID", self.company_id.to_string())
            .header("X-User-ID", TEST_USER_ID)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .header("X-Company-ID", self.company_id.to_string())
            .header("X-User-ID", TEST_USER_ID)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Book a consignment with the given line item quantities. Returns the
    /// response body.
    pub async fn book(&self, quantities: &[i32]) -> Value {
        let line_items: Vec<Value> = quantities
            .iter()
            .enumerate()
            .map(|(i, qty)| {
                json!({
                    "description": format!("Carton lot {}", i + 1),
                    "quantity": qty,
                    "actual_weight": "10.500",
                    "charge_weight": "12.000",
                    "amount": "150.00"
                })
            })
            .collect();

        let response = self
            .post(
                "/consignments",
                &json!({
                    "origin_station": "Nagpur",
                    "destination_station": "Pune",
                    "sender_name": "Acme Traders",
                    "receiver_name": "Bharat Stores",
                    "freight_type": "topay",
                    "line_items": line_items
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16(), "booking should succeed");
        response.json().await.expect("Failed to parse booking body")
    }

    /// Book, load, and finalize so the consignment is in transit. Returns
    /// (consignment body, finalized challan body).
    pub async fn book_and_dispatch(&self, quantities: &[i32]) -> (Value, Value) {
        let consignment = self.book(quantities).await;
        let id = consignment["consignment_id"].as_str().unwrap();

        let response = self
            .post(
                "/challans/loading",
                &json!({
                    "from_station": "Nagpur",
                    "to_station": "Pune",
                    "consignment_ids": [id]
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16(), "loading should succeed");
        let challan: Value = response.json().await.unwrap();

        let challan_id = challan["challan_id"].as_str().unwrap();
        let response = self
            .post(
                &format!("/challans/{}/finalize", challan_id),
                &json!({ "vehicle_no": "MH-31-AB-1234", "driver_name": "R. Kumar" }),
            )
            .await;
        assert_eq!(200, response.status().as_u16(), "finalize should succeed");
        let finalized: Value = response.json().await.unwrap();

        (consignment, finalized)
    }

    /// Dispatch and then inward a consignment so it is back in stock at the
    /// destination. Returns (consignment body, inward challan body).
    pub async fn book_through_inward(&self, quantities: &[i32]) -> (Value, Value) {
        let (consignment, _) = self.book_and_dispatch(quantities).await;
        let lr_no = consignment["lr_no"].as_str().unwrap();

        let response = self
            .post(
                "/challans/inward",
                &json!({
                    "from_station": "Nagpur",
                    "to_station": "Pune",
                    "vehicle_no": "MH-31-AB-1234",
                    "lr_nos": [lr_no]
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16(), "inward should succeed");
        let inward: Value = response.json().await.unwrap();

        (consignment, inward)
    }

    pub async fn consignment_status(&self, consignment_id: &str) -> String {
        let response = self.get(&format!("/consignments/{}", consignment_id)).await;
        assert_eq!(200, response.status().as_u16());
        let body: Value = response.json().await.unwrap();
        body["status"].as_str().unwrap().to_string()
    }
}
