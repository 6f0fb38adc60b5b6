mod common;

use chrono::{Duration, Utc};
use common::{create_vehicle, ingest, spawn_server, telemetry_payload, vehicle_payload};

const VIN: &str = "1HGCM82633A004352";

#[tokio::test]
async fn vehicle_crud_lifecycle() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    // Create
    let resp = client
        .post(format!("http://{addr}/vehicles"))
        .json(&vehicle_payload(VIN, "F1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["vin"], VIN);
    assert_eq!(body["fleetId"], "F1");
    assert_eq!(body["ownerOperator"]["name"], "Pat Doyle");

    // Duplicate VIN is rejected
    let resp = client
        .post(format!("http://{addr}/vehicles"))
        .json(&vehicle_payload(VIN, "F2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Fetch
    let resp = client
        .get(format!("http://{addr}/vehicles/{VIN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Filtered list
    create_vehicle(&client, addr, "5YJSA1E26JF000001", "F2").await;
    let body: serde_json::Value = client
        .get(format!("http://{addr}/vehicles?fleetId=F2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["vin"], "5YJSA1E26JF000001");

    // Partial update
    let resp = client
        .put(format!("http://{addr}/vehicles/{VIN}"))
        .json(&serde_json::json!({
            "manufacturer": "Toyota",
            "registrationStatus": "Maintenance",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["manufacturer"], "Toyota");
    assert_eq!(body["registrationStatus"], "Maintenance");
    // Untouched fields survive
    assert_eq!(body["model"], "Accord");

    // Unknown registration status is rejected
    let resp = client
        .put(format!("http://{addr}/vehicles/{VIN}"))
        .json(&serde_json::json!({ "registrationStatus": "Scrapped" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Delete, then 404
    let resp = client
        .delete(format!("http://{addr}/vehicles/{VIN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client
        .get(format!("http://{addr}/vehicles/{VIN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn telemetry_ingest_validation_and_history() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let now = Utc::now();

    // Unknown vehicle
    let resp = client
        .post(format!("http://{addr}/telemetry"))
        .json(&telemetry_payload(VIN, 100.0, 50.0, now))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    create_vehicle(&client, addr, VIN, "F1").await;

    // Out-of-range speed
    let mut bad = telemetry_payload(VIN, 100.0, 50.0, now);
    bad["speed"] = serde_json::json!(400.0);
    let resp = client
        .post(format!("http://{addr}/telemetry"))
        .json(&bad)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Fuel outside 0..=100
    let mut bad = telemetry_payload(VIN, 100.0, 50.0, now);
    bad["fuelBatteryLevel"] = serde_json::json!(120.0);
    let resp = client
        .post(format!("http://{addr}/telemetry"))
        .json(&bad)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Valid readings
    ingest(&client, addr, VIN, 1000.0, 50.0, now - Duration::hours(3)).await;
    ingest(&client, addr, VIN, 1050.0, 45.0, now - Duration::hours(2)).await;
    ingest(&client, addr, VIN, 1100.0, 40.0, now - Duration::hours(1)).await;

    // Latest wins by timestamp
    let body: serde_json::Value = client
        .get(format!("http://{addr}/telemetry/{VIN}/latest"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["odometerReading"], 1100.0);
    assert_eq!(body["fuelBatteryLevel"], 40.0);

    // Full history, newest first
    let body: serde_json::Value = client
        .get(format!("http://{addr}/telemetry/{VIN}/history"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["recordCount"], 3);
    assert_eq!(body["data"][0]["odometerReading"], 1100.0);

    // Bounded history
    let start = (now - Duration::hours(2) - Duration::minutes(30)).to_rfc3339();
    let end = (now - Duration::hours(1) - Duration::minutes(30)).to_rfc3339();
    let body: serde_json::Value = client
        .get(format!(
            "http://{addr}/telemetry/{VIN}/history?startTime={start}&endTime={end}"
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["recordCount"], 1);
    assert_eq!(body["data"][0]["odometerReading"], 1050.0);

    // Bad bounds
    let resp = client
        .get(format!(
            "http://{addr}/telemetry/{VIN}/history?startTime=notadate"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let resp = client
        .get(format!(
            "http://{addr}/telemetry/{VIN}/history?startTime={end}&endTime={start}"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Unknown vehicle has no latest reading
    create_vehicle(&client, addr, "5YJSA1E26JF000001", "F1").await;
    let resp = client
        .get(format!("http://{addr}/telemetry/5YJSA1E26JF000001/latest"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn telemetry_batch_reports_per_record_errors() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let now = Utc::now();

    create_vehicle(&client, addr, VIN, "F1").await;

    let mut invalid = telemetry_payload(VIN, 300.0, 50.0, now);
    invalid["speed"] = serde_json::json!(-5.0);
    let body: serde_json::Value = client
        .post(format!("http://{addr}/telemetry/batch"))
        .json(&serde_json::json!({
            "records": [
                telemetry_payload(VIN, 100.0, 80.0, now - Duration::hours(2)),
                invalid,
                telemetry_payload("ZZZUNKNOWNVIN0000", 10.0, 10.0, now),
                telemetry_payload(VIN, 200.0, 75.0, now - Duration::hours(1)),
            ]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["accepted"], 2);
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["index"], 1);
    assert_eq!(errors[1]["index"], 2);

    // The two valid rows landed
    let body: serde_json::Value = client
        .get(format!("http://{addr}/telemetry/{VIN}/history"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["recordCount"], 2);
}

#[tokio::test]
async fn alert_lifecycle_and_counting() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    // Alerts for unknown vehicles are rejected
    let resp = client
        .post(format!("http://{addr}/alerts"))
        .json(&serde_json::json!({
            "vehicleVin": VIN,
            "alertType": "ENGINE_FAULT",
            "severity": "High",
            "message": "check engine",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    create_vehicle(&client, addr, VIN, "F1").await;

    // Unknown severity is rejected at the body boundary
    let resp = client
        .post(format!("http://{addr}/alerts"))
        .json(&serde_json::json!({
            "vehicleVin": VIN,
            "alertType": "ENGINE_FAULT",
            "severity": "Catastrophic",
            "message": "check engine",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Missing message is rejected
    let resp = client
        .post(format!("http://{addr}/alerts"))
        .json(&serde_json::json!({
            "vehicleVin": VIN,
            "alertType": "ENGINE_FAULT",
            "severity": "High",
            "message": "",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Create and fetch
    let resp = client
        .post(format!("http://{addr}/alerts"))
        .json(&serde_json::json!({
            "vehicleVin": VIN,
            "alertType": "ENGINE_FAULT",
            "severity": "High",
            "message": "check engine",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: serde_json::Value = resp.json().await.unwrap();
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["resolved"], false);
    assert!(created["resolvedAt"].is_null());

    let resp = client
        .get(format!("http://{addr}/alerts/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Resolve stamps the time
    let resp = client
        .post(format!("http://{addr}/alerts/{id}/resolve"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resolved: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(resolved["resolved"], true);
    assert!(resolved["resolvedAt"].is_string());

    // Counts with filters
    let body: serde_json::Value = client
        .get(format!("http://{addr}/alerts/count/total?severity=High"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 1);

    let body: serde_json::Value = client
        .get(format!("http://{addr}/alerts/count/total?resolved=false"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 0);

    // Bad filter values come back with field-level detail
    let resp = client
        .get(format!("http://{addr}/alerts/count/total?severity=Bogus"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["details"][0]["field"], "severity");

    // Unknown alert id
    let resp = client
        .get(format!("http://{addr}/alerts/99999"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
