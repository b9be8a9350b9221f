//! End-to-end detection: catalog document through the engine to the JSONL sink

use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::watch;
use zone_alert::domain::{CatalogHandle, LocationSample, Point, TravelMode, ZoneCatalog};
use zone_alert::infra::{Config, Metrics};
use zone_alert::services::{create_detection_task, create_dispatcher};

const ZONES: &str = r#"{
  "processedZones": [
    {"zoneId": "Z1", "type": "school", "geometry": [[0,0],[0,1],[1,1],[1,0]],
     "car": 80, "pedestrian": 20},
    {"zoneId": 42, "type": "market",
     "geometry": [{"lat": 0.2, "lng": 0.2}, {"lat": 0.2, "lng": 0.8}, {"lat": 0.8, "lng": 0.8}, {"lat": 0.8, "lng": 0.2}],
     "currentRisk": "high"},
    {"zoneId": "broken", "type": "x", "geometry": [[0,0],[1,1]]}
  ]
}"#;

fn read_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn test_enter_exit_enter_reaches_egress() {
    let dir = tempdir().unwrap();
    let egress = dir.path().join("alerts").join("notifications.jsonl");
    let config = Config::default()
        .with_throttle_interval_ms(0)
        .with_travel_mode(TravelMode::Car)
        .with_egress_file(egress.to_str().unwrap());

    let catalog = CatalogHandle::new(ZoneCatalog::from_json(ZONES.as_bytes()).unwrap());
    assert_eq!(catalog.snapshot().len(), 2);
    assert_eq!(catalog.snapshot().rejected(), 1);

    let metrics = Arc::new(Metrics::new());
    let (alert_tx, dispatcher) = create_dispatcher(&config, metrics.clone());
    let dispatcher_handle = tokio::spawn(dispatcher.run());
    let (_sample_tx, mut task) = create_detection_task(&config, catalog, alert_tx, metrics.clone());

    // Radius is 1 km, so samples sit on the Z1 centroid or far away
    task.process(&LocationSample::real(Point::new(0.5, 0.5)));
    task.process(&LocationSample::real(Point::new(5.0, 5.0)));
    task.process(&LocationSample::simulated(Point::new(0.5, 0.5)));
    drop(task);
    dispatcher_handle.await.unwrap();

    let lines = read_lines(&egress);
    let kinds: Vec<&str> = lines.iter().map(|l| l["t"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["entered", "exited", "entered"]);
    assert!(lines.iter().all(|l| l["zone"] == "Z1"));
    assert_eq!(lines[0]["body"], "Entered school zone");
    assert_eq!(lines[0]["risk"], "high");
    assert_eq!(lines[0]["title"], "Zone Alert");
    assert_eq!(lines[2]["src"], "simulated");

    assert_eq!(metrics.zones_entered(), 2);
    assert_eq!(metrics.zones_exited(), 1);
}

#[tokio::test]
async fn test_catalog_refresh_between_cycles() {
    let dir = tempdir().unwrap();
    let egress = dir.path().join("notifications.jsonl");
    let config = Config::default().with_throttle_interval_ms(0).with_egress_file(egress.to_str().unwrap());

    let catalog = CatalogHandle::new(ZoneCatalog::from_json(ZONES.as_bytes()).unwrap());
    let metrics = Arc::new(Metrics::new());
    let (alert_tx, dispatcher) = create_dispatcher(&config, metrics.clone());
    let dispatcher_handle = tokio::spawn(dispatcher.run());
    let (_sample_tx, mut task) = create_detection_task(&config, catalog.clone(), alert_tx, metrics);

    task.process(&LocationSample::real(Point::new(0.5, 0.5)));

    // Z1 vanishes; the exit still fires with the kind remembered at entry
    catalog.replace(ZoneCatalog::from_json(br#"[]"#).unwrap());
    task.process(&LocationSample::real(Point::new(0.5, 0.5)));
    drop(task);
    dispatcher_handle.await.unwrap();

    let lines = read_lines(&egress);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["t"], "exited");
    assert_eq!(lines[1]["body"], "Exited school zone");
}

#[tokio::test]
async fn test_task_runs_from_queue_until_shutdown() {
    let dir = tempdir().unwrap();
    let egress = dir.path().join("notifications.jsonl");
    let config = Config::default().with_egress_file(egress.to_str().unwrap());

    let catalog = CatalogHandle::new(ZoneCatalog::from_json(ZONES.as_bytes()).unwrap());
    let metrics = Arc::new(Metrics::new());
    let (alert_tx, dispatcher) = create_dispatcher(&config, metrics.clone());
    let dispatcher_handle = tokio::spawn(dispatcher.run());
    let (sample_tx, task) = create_detection_task(&config, catalog, alert_tx, metrics.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task_handle = tokio::spawn(task.run(shutdown_rx));

    sample_tx.send(LocationSample::real(Point::new(0.5, 0.5))).await.unwrap();
    // Within the 5 s throttle window
    sample_tx.send(LocationSample::real(Point::new(5.0, 5.0))).await.unwrap();

    for _ in 0..100 {
        if metrics.samples_received() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();
    task_handle.await.unwrap();
    dispatcher_handle.await.unwrap();

    assert_eq!(metrics.samples_throttled(), 1);
    let lines = read_lines(&egress);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["t"], "entered");
}
