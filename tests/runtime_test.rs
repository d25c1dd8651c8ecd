mod common;

use anyhow::Result;
use common::{current_weather, fast_config, generic_event, quake, FakeSource};
use hazard_ingest::config::Config;
use hazard_ingest::error::RuntimeError;
use hazard_ingest::runtime::{Runtime, RuntimeState};
use hazard_ingest::sources::build_sources;
use hazard_ingest::types::SourceKind;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn start_without_sources_fails() -> Result<()> {
    let dir = tempdir()?;
    let runtime = Runtime::new(&fast_config(dir.path()), vec![])?;

    let err = runtime.start(false).await.unwrap_err();
    assert!(matches!(err, RuntimeError::NoSources));
    assert_eq!(runtime.state(), RuntimeState::Stopped);
    Ok(())
}

#[tokio::test]
async fn single_run_processes_one_cycle_and_stops() -> Result<()> {
    let dir = tempdir()?;
    let sources = vec![
        FakeSource::healthy("usgs", SourceKind::Earthquake, vec![quake("usgs", json!(5.2), "Reno")]).shared(),
        FakeSource::healthy("owm_toronto", SourceKind::Weather, vec![current_weather("owm_toronto", "Toronto", 19.0)])
            .shared(),
        FakeSource::failing("down").shared(),
    ];
    let runtime = Runtime::new(&fast_config(dir.path()), sources)?;

    runtime.start(false).await?;

    assert_eq!(runtime.state(), RuntimeState::Stopped);
    assert_eq!(runtime.cycle_count(), 1);
    assert!(dir.path().join("earthquakes.json").exists());
    assert!(dir.path().join("weather_all.json").exists());

    let status = runtime.get_status().await;
    assert_eq!(status.sources.source_count, 3);
    assert_eq!(status.pipeline.processed_count, 2);
    assert_eq!(status.pipeline.error_count, 0);
    assert!(!status.pipeline.running);
    Ok(())
}

#[tokio::test]
async fn stop_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let runtime = Runtime::new(&fast_config(dir.path()), vec![])?;
    runtime.stop().await;
    runtime.stop().await;
    assert_eq!(runtime.state(), RuntimeState::Stopped);
    Ok(())
}

#[tokio::test]
async fn continuous_mode_runs_until_stopped() -> Result<()> {
    let dir = tempdir()?;
    let runtime = Arc::new(Runtime::new(&fast_config(dir.path()), vec![])?);
    runtime.add_data_source(
        FakeSource::healthy("generic", SourceKind::Generic, vec![generic_event("generic")]).shared(),
    );

    let handle = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.start(true).await })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(runtime.state(), RuntimeState::Running);
    runtime.stop().await;
    runtime.stop().await;

    tokio::time::timeout(Duration::from_secs(5), handle).await???;
    assert_eq!(runtime.state(), RuntimeState::Stopped);
    assert!(runtime.cycle_count() >= 1);
    assert!(dir.path().join("generic_events.json").exists());
    Ok(())
}

#[tokio::test]
async fn file_sources_from_toml_run_end_to_end() -> Result<()> {
    let dir = tempdir()?;
    let fixtures = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures");
    let toml = format!(
        r#"
        [runtime]
        num_consumers = 2
        completion_timeout_secs = 10

        [pipeline]
        poll_interval_ms = 50

        [sources]
        get_events_wait_ms = 0

        [storage]
        data_dir = "{data}"

        [[source]]
        name = "quake_fixture"
        kind = "earthquake"
        tier = "fast"
        driver = "file"
        path = "{fixtures}/earthquakes.json"

        [[source]]
        name = "volcano_fixture"
        kind = "volcano"
        tier = "medium"
        driver = "file"
        path = "{fixtures}/volcanoes.json"
        "#,
        data = dir.path().display(),
    );
    let cfg = Config::from_toml_str(&toml)?;
    cfg.validate()?;

    let runtime = Runtime::new(&cfg, build_sources(&cfg.source_specs)?)?;
    runtime.start(false).await?;

    let quakes: Vec<Value> = serde_json::from_slice(&std::fs::read(dir.path().join("earthquakes.json"))?)?;
    assert_eq!(quakes.len(), 2);
    assert_eq!(quakes[0]["id"], 1);
    assert_eq!(quakes[0]["magnitude"], 6.1);
    assert_eq!(quakes[1]["latitude"], 61.6);

    let volcanoes: Vec<Value> = serde_json::from_slice(&std::fs::read(dir.path().join("volcanoes.json"))?)?;
    assert_eq!(volcanoes[0]["source"], "volcano_fixture");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_racing_start_always_ends_the_run() -> Result<()> {
    let dir = tempdir()?;
    let runtime = Arc::new(Runtime::new(&fast_config(dir.path()), vec![])?);
    runtime.add_data_source(
        FakeSource::healthy("generic", SourceKind::Generic, vec![generic_event("generic")]).shared(),
    );

    for _ in 0..20 {
        let handle = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.start(true).await })
        };
        while runtime.state() == RuntimeState::Stopped {
            tokio::task::yield_now().await;
        }
        runtime.stop().await;

        tokio::time::timeout(Duration::from_secs(5), handle).await???;
        assert_eq!(runtime.state(), RuntimeState::Stopped);
        assert!(!runtime.pipeline().is_running());
    }
    Ok(())
}
