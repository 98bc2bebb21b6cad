//! End-to-end sessions: a panel talking to a scripted INDI server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use indi_panel::{CancelToken, PanelError, PathSpec, ReplicaCopy, Store, VectorState, Whitelist};
use indi_panel_indi::IndiError;
use indi_panel_testkit::fixtures::PanelFixture;
use indi_panel_testkit::vectors::{
    del_device, exposure_alert, exposure_busy, exposure_done, log_line, CCD_DEFINITIONS,
};

const CCD: &str = "CCD Simulator";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn defined(fixture: &PanelFixture, ct: &CancelToken) {
    fixture
        .panel
        .wait(ct, false, |tree| tree.device(CCD).vector("CCD_STATUS").exists().then_some(()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_device_tree_replicates_to_client() {
    init_tracing();
    let mut fixture = PanelFixture::new(1);
    let mut driver = fixture.next_driver().await;
    let ct = CancelToken::new();

    let wl = Whitelist::fields([("deviceTree", Whitelist::All)]);
    let (_client, mut diffs) = fixture.panel.attach_client(wl.clone());

    // Deliveries are in order, so the log line is in once the tree is.
    driver.send(&log_line(CCD, "ready")).await;
    driver.send(CCD_DEFINITIONS).await;
    defined(&fixture, &ct).await;
    assert!(fixture.panel.get(&["messages"]).is_some());

    let mut replica = ReplicaCopy::new();
    while let Ok(diff) = diffs.try_recv() {
        replica.apply(&diff).unwrap();
    }
    let expected = fixture.panel.get(&[]).map(|v| wl.filter(&v));
    assert_eq!(replica.value(), expected.as_ref());

    let exposure = fixture.panel.device(CCD).vector("CCD_EXPOSURE");
    assert_eq!(exposure.state(), Some(VectorState::Idle));
    assert_eq!(exposure.property_names(), vec!["CCD_EXPOSURE_VALUE"]);
    assert_eq!(exposure.property_value("CCD_EXPOSURE_VALUE").unwrap(), "1");

    fixture.panel.shutdown().await;
}

#[tokio::test]
async fn test_set_param_completes_when_driver_settles() {
    init_tracing();
    let mut fixture = PanelFixture::new(1);
    let mut driver = fixture.next_driver().await;
    let ct = CancelToken::new();

    driver.send(CCD_DEFINITIONS).await;
    defined(&fixture, &ct).await;

    let panel = Arc::new(fixture.panel);
    let pending = {
        let panel = panel.clone();
        let ct = ct.clone();
        tokio::spawn(async move {
            panel
                .set_param(&ct, CCD, "CCD_EXPOSURE", &[("CCD_EXPOSURE_VALUE", "2")])
                .await
        })
    };

    let command = driver.expect_command().await;
    assert!(command.starts_with(r#"<newNumberVector device="CCD Simulator" name="CCD_EXPOSURE">"#));
    assert!(command.contains(r#"<oneNumber name="CCD_EXPOSURE_VALUE">2</oneNumber>"#));

    driver.send(&exposure_busy(1.5)).await;
    driver.send(&exposure_done()).await;
    pending.await.unwrap().unwrap();

    let state = panel.device(CCD).vector("CCD_EXPOSURE").state();
    assert_eq!(state, Some(VectorState::Ok));
    panel.shutdown().await;
}

#[tokio::test]
async fn test_set_param_reports_alert() {
    let mut fixture = PanelFixture::new(1);
    let mut driver = fixture.next_driver().await;
    let ct = CancelToken::new();

    driver.send(CCD_DEFINITIONS).await;
    defined(&fixture, &ct).await;

    let panel = Arc::new(fixture.panel);
    let pending = {
        let panel = panel.clone();
        let ct = ct.clone();
        tokio::spawn(async move {
            panel
                .set_param(&ct, CCD, "CCD_EXPOSURE", &[("CCD_EXPOSURE_VALUE", "2")])
                .await
        })
    };

    driver.expect_command().await;
    driver.send(&exposure_alert("shutter jammed")).await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(PanelError::Indi(IndiError::Alert { .. }))));

    // The driver's message landed in the log.
    let log = panel.get(&["messages", "byUid"]).unwrap();
    assert!(log
        .as_object()
        .unwrap()
        .values()
        .any(|entry| entry["$message"] == json!("shutter jammed")));
    panel.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_exposure_countdown_is_throttled() {
    let mut fixture = PanelFixture::new(1);
    let mut driver = fixture.next_driver().await;
    let ct = CancelToken::new();

    driver.send(CCD_DEFINITIONS).await;
    defined(&fixture, &ct).await;

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    fixture
        .panel
        .add_synchronizer(
            &PathSpec::keys(["deviceTree", CCD, "CCD_EXPOSURE"]),
            move |_: &mut Store| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            false,
        )
        .unwrap();

    // 50 updates per second for one second.
    let mut last = 0.0;
    for i in 0..50 {
        last = 10.0 - f64::from(i) * 0.02;
        driver.send(&exposure_busy(last)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    let deliveries = fired.load(Ordering::SeqCst);
    assert!((2..=5).contains(&deliveries), "delivered {deliveries}");

    let value = fixture
        .panel
        .device(CCD)
        .vector("CCD_EXPOSURE")
        .property_value("CCD_EXPOSURE_VALUE")
        .unwrap();
    assert_eq!(value.parse::<f64>().unwrap(), last);

    fixture.panel.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_rebuilds_device_tree() {
    let mut fixture = PanelFixture::new(2);
    let mut driver = fixture.next_driver().await;
    let ct = CancelToken::new();

    driver.send(CCD_DEFINITIONS).await;
    defined(&fixture, &ct).await;
    drop(driver);

    fixture
        .panel
        .wait(&ct, true, |tree| (!tree.device(CCD).exists()).then_some(()))
        .await
        .unwrap();
    assert_eq!(fixture.panel.get(&["deviceTree"]), Some(json!({})));

    // The reconnect delay elapses on the paused clock.
    let mut driver = fixture.next_driver().await;
    driver.send(CCD_DEFINITIONS).await;
    defined(&fixture, &ct).await;
    assert!(fixture.panel.connection().is_connected());

    driver.send(&del_device(CCD)).await;
    fixture
        .panel
        .wait(&ct, false, |tree| tree.device_names().is_empty().then_some(()))
        .await
        .unwrap();

    fixture.panel.shutdown().await;
}
