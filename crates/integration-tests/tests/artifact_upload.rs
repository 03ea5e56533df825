//! Artifact collection and upload coordination over a real directory tree
//!
//! Files come from a temp dir; the backend and the storage are in-memory.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use conveyor_core::application::{
    ArtifactCollector, ArtifactUploadService, RetryConfig, UploadConfig, UploadCoordinator,
};
use conveyor_core::domain::ArtifactState;
use conveyor_core::port::agent_api::mocks::MockAgentApi;
use conveyor_core::port::uploader::mocks::{MockUploader, MockUploaderFactory};
use conveyor_core::port::Destination;
use conveyor_core::AgentError;
use tempfile::TempDir;

fn build_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("pkg/a/deep")).unwrap();
    std::fs::create_dir_all(root.join("pkg/b")).unwrap();
    std::fs::create_dir_all(root.join("reports")).unwrap();

    for (i, name) in ["pkg/a/one.bin", "pkg/a/deep/two.bin", "pkg/b/three.bin"]
        .iter()
        .enumerate()
    {
        std::fs::write(root.join(name), vec![b'x'; i + 1]).unwrap();
    }
    std::fs::write(root.join("reports/junit.xml"), b"<testsuite/>").unwrap();
    dir
}

fn fast_config(concurrency: usize) -> UploadConfig {
    UploadConfig {
        concurrency,
        registration_retry: RetryConfig::new(2, Duration::from_millis(10)),
        upload_retry: RetryConfig::new(2, Duration::from_millis(10)),
        status_retry: RetryConfig::new(2, Duration::from_millis(10)),
        report_interval: Duration::from_millis(20),
    }
}

/// Several patterns, recursive globs and overlapping matches
#[test]
fn test_collect_paths_across_patterns() {
    let dir = build_tree();
    let collector = ArtifactCollector::new(dir.path());

    let artifacts = collector
        .collect("pkg/**/*.bin; reports/*.xml ;pkg/b/*")
        .unwrap();

    let found: Vec<(&str, &str, u64)> = artifacts
        .iter()
        .map(|a| (a.path.as_str(), a.glob_path.as_str(), a.file_size))
        .collect();
    assert_eq!(found.len(), 5);
    assert!(found.contains(&("pkg/a/one.bin", "pkg/**/*.bin", 1)));
    assert!(found.contains(&("pkg/a/deep/two.bin", "pkg/**/*.bin", 2)));
    assert!(found.contains(&("reports/junit.xml", "reports/*.xml", 12)));
    // pkg/b/three.bin matched twice, once per pattern
    assert_eq!(
        found.iter().filter(|(p, _, _)| *p == "pkg/b/three.bin").count(),
        2
    );
    assert!(artifacts.iter().all(|a| a.sha1sum.len() == 40));
}

/// An absolute pattern is reported relative to the filesystem root
#[cfg(unix)]
#[test]
fn test_absolute_pattern() {
    let dir = build_tree();
    let other = tempfile::tempdir().unwrap();
    let pattern = format!("{}/reports/*.xml", dir.path().display());

    let artifacts = ArtifactCollector::new(other.path()).collect(&pattern).unwrap();

    assert_eq!(artifacts.len(), 1);
    let expected = dir.path().join("reports/junit.xml");
    assert_eq!(artifacts[0].absolute_path, expected);
    assert_eq!(
        artifacts[0].path,
        expected.to_string_lossy().trim_start_matches('/')
    );
}

/// Concurrency stays within the pool size and every artifact is reported
#[tokio::test]
async fn test_upload_respects_concurrency() {
    let dir = build_tree();
    let api = Arc::new(MockAgentApi::new());
    let uploader = Arc::new(MockUploader::new().with_delay(Duration::from_millis(50)));
    let factory = Arc::new(MockUploaderFactory::new(uploader.clone()));

    let service = ArtifactUploadService::new(
        ArtifactCollector::new(dir.path()),
        UploadCoordinator::new(api.clone(), factory.clone(), "job-1", fast_config(2)),
    );
    let uploaded = service.upload("pkg/**/*.bin;reports/*", "s3://bucket/ci").await.unwrap();

    assert_eq!(uploaded.len(), 4);
    assert!(uploader.max_in_flight() <= 2);
    assert_eq!(
        factory.requested(),
        vec![Destination::S3 {
            bucket: "bucket".to_string(),
            prefix: "ci".to_string()
        }]
    );

    let ids: HashSet<String> = uploaded.iter().map(|a| a.id().unwrap().to_string()).collect();
    let flushed = api.flushed_states();
    assert_eq!(flushed.len(), 4);
    assert!(ids.iter().all(|id| flushed[id] == ArtifactState::Finished));
    assert!(uploaded
        .iter()
        .all(|a| a.url.as_deref() == Some(&format!("mock://bucket/{}", a.path)[..])));
}

/// One failing file does not stop the others, but the batch fails
#[tokio::test]
async fn test_partial_failure() {
    let dir = build_tree();
    let api = Arc::new(MockAgentApi::new());
    let uploader = Arc::new(MockUploader::failing_for(["pkg/b/three.bin"]));
    let factory = Arc::new(MockUploaderFactory::new(uploader.clone()));

    let service = ArtifactUploadService::new(
        ArtifactCollector::new(dir.path()),
        UploadCoordinator::new(api.clone(), factory, "job-1", fast_config(4)),
    );
    let result = service.upload("pkg/**/*.bin", "").await;

    assert!(matches!(
        result,
        Err(AgentError::PartialUpload { failed: 1, total: 3 })
    ));
    assert_eq!(uploader.attempts("pkg/b/three.bin"), 2);
    assert_eq!(uploader.attempts("pkg/a/one.bin"), 1);

    let mut states: Vec<ArtifactState> = api.flushed_states().into_values().collect();
    states.sort_by_key(|s| s.as_str());
    assert_eq!(
        states,
        vec![
            ArtifactState::Error,
            ArtifactState::Finished,
            ArtifactState::Finished
        ]
    );
}

/// Nothing matched: no backend traffic at all
#[tokio::test]
async fn test_nothing_to_upload() {
    let dir = build_tree();
    let api = Arc::new(MockAgentApi::new());
    let factory = Arc::new(MockUploaderFactory::new(Arc::new(MockUploader::new())));

    let service = ArtifactUploadService::new(
        ArtifactCollector::new(dir.path()),
        UploadCoordinator::new(api.clone(), factory, "job-1", fast_config(2)),
    );

    let uploaded = tokio_test::assert_ok!(service.upload("missing/**/*", "").await);
    assert!(uploaded.is_empty());
    assert_eq!(api.registration_calls(), 0);
    assert_eq!(api.update_calls(), 0);
}
