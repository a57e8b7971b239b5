mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use scenario_sensors::{
    CacheError, CameraChannel, Config, InMemoryLogIndex, LidarChannel, LogRecordIndex,
    RemoteBackend, ScenarioSensorAccessor, ScenarioWindow, SensorChannel, SensorError,
    SensorRecordRef, Timestamp, TokenExtractor,
};
use tokio_util::sync::CancellationToken;

use common::*;

const LIDAR: SensorChannel = SensorChannel::Lidar(LidarChannel::MergedPc);
const CAM_F0: SensorChannel = SensorChannel::Camera(CameraChannel::CamF0);
const CAM_L0: SensorChannel = SensorChannel::Camera(CameraChannel::CamL0);

/// Frames 5..=24 lie in [0.5s, 2.5s); every second one is kept
fn half_rate_window() -> ScenarioWindow {
    ScenarioWindow::new(Some(Timestamp::from_micros(0)), 0.5, 2.0, 0.5).expect("valid window")
}

fn window_accessor(scenario: &Scenario) -> ScenarioSensorAccessor {
    ScenarioSensorAccessor::builder()
        .log_index(scenario.log_index())
        .cache(scenario.cache.clone())
        .window(half_rate_window())
        .build()
        .expect("valid accessor")
}

#[tokio::test]
async fn test_iterations_follow_the_window() -> TestResult {
    let scenario = Scenario::new(30, &[]).await;
    let accessor = window_accessor(&scenario);

    assert_eq!(accessor.number_of_iterations().await?, 10);
    assert_eq!(accessor.token_at(0).await?, token(5));
    assert_eq!(accessor.token_at(9).await?, token(23));

    let bundle = accessor.get_sensors_at_iteration(3, None).await?;
    assert_eq!(bundle.token, token(11));
    let cloud = bundle
        .pointclouds
        .get(LidarChannel::MergedPc)
        .expect("default channel is MERGED_PC");
    assert_eq!(cloud.len(), points_in_frame(11));
    assert!(bundle.images.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_iteration_is_a_lookup_error() -> TestResult {
    let scenario = Scenario::new(30, &[]).await;
    let accessor = window_accessor(&scenario);

    let result = accessor.get_sensors_at_iteration(10, None).await;
    assert!(matches!(result, Err(SensorError::Lookup { .. })));
    assert_eq!(scenario.remote.fetch_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_single_instant_mode() -> TestResult {
    let scenario = Scenario::new(10, &[CameraChannel::CamF0]).await;
    let accessor = ScenarioSensorAccessor::builder()
        .log_index(scenario.log_index())
        .cache(scenario.cache.clone())
        .initial_token(token(7))
        .build()?;

    assert_eq!(accessor.number_of_iterations().await?, 1);
    let bundle = accessor
        .get_sensors_at_iteration(0, Some(&[LIDAR, CAM_F0]))
        .await?;
    assert_eq!(bundle.token, token(7));
    assert_eq!(bundle.pointclouds.len(), 1);

    let image = bundle.images.get(CameraChannel::CamF0).expect("camera image");
    assert_eq!((image.width(), image.height()), (4, 3));
    assert_eq!(image.pixel(0, 0), Some([7, 0, 0]));
    Ok(())
}

#[tokio::test]
async fn test_unknown_initial_token_is_a_lookup_error() -> TestResult {
    let scenario = Scenario::new(3, &[]).await;
    let accessor = ScenarioSensorAccessor::builder()
        .log_index(scenario.log_index())
        .cache(scenario.cache.clone())
        .initial_token("not-in-log")
        .build()?;

    let result = accessor.get_sensors_at_iteration(0, None).await;
    assert!(matches!(result, Err(SensorError::Lookup { .. })));
    Ok(())
}

#[tokio::test]
async fn test_missing_camera_blob_is_omitted() -> TestResult {
    let missing = [camera_key(CameraChannel::CamL0, 4)];
    let scenario = Scenario::without_blobs(
        6,
        &[CameraChannel::CamF0, CameraChannel::CamL0],
        &missing,
    )
    .await;
    let accessor = ScenarioSensorAccessor::builder()
        .log_index(scenario.log_index())
        .cache(scenario.cache.clone())
        .initial_token(token(4))
        .build()?;

    let bundle = accessor
        .get_sensors_at_iteration(0, Some(&[LIDAR, CAM_F0, CAM_L0]))
        .await?;
    assert!(bundle.pointclouds.contains(LidarChannel::MergedPc));
    assert!(bundle.images.contains(CameraChannel::CamF0));
    assert!(!bundle.images.contains(CameraChannel::CamL0));
    Ok(())
}

#[tokio::test]
async fn test_missing_lidar_blob_fails_the_call() -> TestResult {
    let scenario =
        Scenario::without_blobs(6, &[CameraChannel::CamF0], &[lidar_key(2)]).await;
    let accessor = ScenarioSensorAccessor::builder()
        .log_index(scenario.log_index())
        .cache(scenario.cache.clone())
        .initial_token(token(2))
        .build()?;

    let result = accessor
        .get_sensors_at_iteration(0, Some(&[LIDAR, CAM_F0]))
        .await;
    assert!(matches!(
        result,
        Err(SensorError::Cache(CacheError::BlobNotFound { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn test_corrupt_payloads_follow_the_error_policy() -> TestResult {
    let scenario = Scenario::new(4, &[CameraChannel::CamF0]).await;
    scenario
        .remote
        .insert(camera_key(CameraChannel::CamF0, 1), b"not an image".to_vec())
        .await;
    scenario
        .remote
        .insert(lidar_key(2), b"not a point cloud".to_vec())
        .await;

    let at = |frame| {
        ScenarioSensorAccessor::builder()
            .log_index(scenario.log_index())
            .cache(scenario.cache.clone())
            .initial_token(token(frame))
            .build()
    };

    let bundle = at(1)?
        .get_sensors_at_iteration(0, Some(&[LIDAR, CAM_F0]))
        .await?;
    assert!(bundle.images.is_empty());
    assert_eq!(bundle.pointclouds.len(), 1);

    let result = at(2)?
        .get_sensors_at_iteration(0, Some(&[LIDAR, CAM_F0]))
        .await;
    assert!(matches!(result, Err(SensorError::Decode(_))));
    Ok(())
}

#[tokio::test]
async fn test_requested_lidar_without_a_record_is_a_lookup_error() -> TestResult {
    let scenario = Scenario::new(1, &[CameraChannel::CamF0]).await;
    // Camera-only log
    let index: Arc<dyn LogRecordIndex> = Arc::new(
        InMemoryLogIndex::builder("camera-only")
            .record(SensorRecordRef {
                token: token(0),
                timestamp: Timestamp::from_micros(0),
                channel: CAM_F0,
                blob_key: camera_key(CameraChannel::CamF0, 0),
            })
            .build()?,
    );
    let accessor = ScenarioSensorAccessor::builder()
        .log_index(index)
        .cache(scenario.cache.clone())
        .initial_token(token(0))
        .build()?;

    let camera_only = accessor.get_sensors_at_iteration(0, Some(&[CAM_F0])).await?;
    assert_eq!(camera_only.images.len(), 1);

    let result = accessor
        .get_sensors_at_iteration(0, Some(&[LIDAR, CAM_F0]))
        .await;
    assert!(matches!(result, Err(SensorError::Lookup { .. })));
    Ok(())
}

#[tokio::test]
async fn test_past_sensors_match_extracted_tokens() -> TestResult {
    let scenario = Scenario::new(30, &[CameraChannel::CamF0]).await;
    let accessor = window_accessor(&scenario);
    let window = half_rate_window();

    let expected = TokenExtractor::new(scenario.log_index())
        .extract(&window)
        .await?;

    let channels = [LIDAR, CAM_F0];
    let bundles: Vec<_> = accessor
        .get_past_sensors(window, Some(&channels))
        .collect()
        .await;

    assert_eq!(bundles.len(), expected.len());
    for (iteration, (bundle, token)) in bundles.into_iter().zip(expected.iter()).enumerate() {
        let bundle = bundle?;
        assert_eq!(&bundle.token, token);
        assert_eq!(bundle.pointclouds.len(), 1);
        assert_eq!(bundle.images.len(), 1);

        // Same decoded content as resolving the token directly
        let direct = accessor.get_sensors_at_token(token, Some(&channels)).await?;
        assert_eq!(bundle, direct);
        assert_eq!(
            bundle.pointclouds.get(LidarChannel::MergedPc),
            direct.pointclouds.get(LidarChannel::MergedPc)
        );
        assert_eq!(
            bundle.images.get(CameraChannel::CamF0).and_then(|image| image.pixel(0, 0)),
            direct.images.get(CameraChannel::CamF0).and_then(|image| image.pixel(0, 0))
        );
        assert_eq!(
            bundle,
            accessor
                .get_sensors_at_iteration(iteration, Some(&channels))
                .await?
        );
    }

    // Restartable: a second stream starts over from the first token
    let mut again = Box::pin(accessor.get_past_sensors(window, None));
    let first = again.next().await.expect("non-empty window")?;
    assert_eq!(Some(&first.token), expected.get(0));
    Ok(())
}

#[tokio::test]
async fn test_past_sensors_stop_at_the_first_error() -> TestResult {
    let scenario = Scenario::without_blobs(30, &[], &[lidar_key(9)]).await;
    let accessor = window_accessor(&scenario);

    let results: Vec<_> = accessor
        .get_past_sensors(half_rate_window(), None)
        .collect()
        .await;

    // Frames 5 and 7 succeed, frame 9 fails, nothing after
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(
        results[2],
        Err(SensorError::Cache(CacheError::BlobNotFound { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn test_slow_remote_hits_the_fetch_timeout() -> TestResult {
    let scenario = Scenario::with_latency(1, &[], Duration::from_millis(500)).await;
    let accessor = ScenarioSensorAccessor::builder()
        .log_index(scenario.log_index())
        .cache(scenario.cache.clone())
        .initial_token(token(0))
        .fetch_timeout(Duration::from_millis(50))
        .build()?;

    let result = accessor.get_sensors_at_iteration(0, None).await;
    assert!(matches!(
        result,
        Err(SensorError::Cache(CacheError::Timeout { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn test_stalled_camera_does_not_hold_back_other_channels() -> TestResult {
    let scenario = Scenario::new(2, &[CameraChannel::CamF0, CameraChannel::CamL0]).await;
    scenario
        .remote
        .stall(camera_key(CameraChannel::CamL0, 1), Duration::from_secs(5))
        .await;
    let accessor = ScenarioSensorAccessor::builder()
        .log_index(scenario.log_index())
        .cache(scenario.cache.clone())
        .initial_token(token(1))
        .fetch_timeout(Duration::from_millis(100))
        .build()?;

    let started = std::time::Instant::now();
    let bundle = accessor
        .get_sensors_at_iteration(0, Some(&[LIDAR, CAM_F0, CAM_L0]))
        .await?;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        bundle.pointclouds.get(LidarChannel::MergedPc).map(|cloud| cloud.len()),
        Some(points_in_frame(1))
    );
    assert_eq!(
        bundle.images.get(CameraChannel::CamF0).and_then(|image| image.pixel(0, 0)),
        Some([1, 0, 0])
    );
    assert!(!bundle.images.contains(CameraChannel::CamL0));
    Ok(())
}

#[tokio::test]
async fn test_cancelled_accessor_fails_fetches() -> TestResult {
    let scenario = Scenario::new(1, &[]).await;
    let cancel = CancellationToken::new();
    let accessor = ScenarioSensorAccessor::builder()
        .log_index(scenario.log_index())
        .cache(scenario.cache.clone())
        .initial_token(token(0))
        .cancellation_token(cancel.clone())
        .build()?;

    cancel.cancel();
    let result = accessor.get_sensors_at_iteration(0, None).await;
    assert!(matches!(
        result,
        Err(SensorError::Cache(CacheError::Cancelled { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn test_configured_directory_backend() -> TestResult {
    let remote_dir = tempfile::tempdir()?;
    let cache_dir = tempfile::tempdir()?;
    tokio::fs::create_dir_all(remote_dir.path().join("lidar")).await?;
    tokio::fs::write(
        remote_dir.path().join("lidar/0.pcd"),
        pcd_bytes(&[(1.0, 0.0, 0.0), (2.0, 0.0, 0.0)]),
    )
    .await?;

    let mut config = Config::default();
    config.storage.cache_path = cache_dir.path().to_path_buf();
    config.fetch.max_parallel_fetches = 2;
    config.remote = Some(RemoteBackend::directory(remote_dir.path()));
    config.validate()?;

    let cache = config.build_cache().await?;
    assert!(cache.has_remote());

    let index: Arc<dyn LogRecordIndex> = Arc::new(
        InMemoryLogIndex::builder("directory-log")
            .records(scenario_records(1, &[]))
            .build()?,
    );
    let accessor = ScenarioSensorAccessor::builder()
        .log_index(index)
        .cache(cache.clone())
        .config(&config)
        .initial_token(token(0))
        .build()?;

    let bundle = accessor.get_sensors_at_iteration(0, None).await?;
    assert_eq!(
        bundle
            .pointclouds
            .get(LidarChannel::MergedPc)
            .map(|cloud| cloud.len()),
        Some(2)
    );
    assert!(cache.local().contains("lidar/0.pcd").await?);
    Ok(())
}
