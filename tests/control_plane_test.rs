mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use common::{EchoAgent, FakeProvider, StubConnector};
use connector_plane::coordination::RatePolicy;
use connector_plane::{
    Account, AdmissionPolicy, BatchParams, ConnectorRegistry, ContextId, ControlError, ControlPlane, ExecutionPath,
    LockKey, MemoryLockStore, Operation, OperationRequest, Platform, RateLimitTable, SessionRegistry,
};
use tokio_test::{assert_err, assert_ok};

fn account() -> Account {
    Account::new("crm", "u1").unwrap()
}

fn plane_with(provider: Arc<FakeProvider>, limits: RateLimitTable, stub: StubConnector) -> ControlPlane {
    let mut connectors = ConnectorRegistry::with_defaults();
    connectors.register(Arc::new(stub));
    ControlPlane::new(Arc::new(MemoryLockStore::new()), limits, provider, Arc::new(EchoAgent))
        .with_connectors(connectors)
}

fn summary_request(urls: &[&str]) -> OperationRequest {
    OperationRequest::ExtractSummary {
        urls: urls.iter().map(|u| u.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_fast_path_failure_falls_back_to_agent() {
    let provider = FakeProvider::new();
    let plane = plane_with(Arc::clone(&provider), RateLimitTable::unlimited(), StubConnector::default());

    let scope = plane.begin_task("task-1", account()).unwrap();
    let reports = assert_ok!(
        scope
            .run(
                Platform::Generic,
                summary_request(&["https://a.example/1", "https://a.example/agent", "https://a.example/broken"]),
                BatchParams::new(2, 2),
                AdmissionPolicy::fail_fast(),
            )
            .await
    );
    scope.finish().await.unwrap();

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].path, Some(ExecutionPath::FastPath));
    assert_eq!(reports[1].path, Some(ExecutionPath::AgentPath));
    assert!(reports[1].success);
    assert!(!reports[2].success);
    assert_eq!(reports[2].error_kind, Some("agent_path_failed"));

    let stats = plane.path_stats();
    assert_eq!((stats.fast_path, stats.agent_path, stats.failed), (1, 1, 1));

    // 每个条目一个会话，全部以不回写方式删除
    assert_eq!(provider.created(), 3);
    let deleted = provider.deleted();
    assert_eq!(deleted.len(), 3);
    assert!(deleted.iter().all(|(_, sync)| !sync));
}

#[tokio::test]
async fn test_unsupported_operation_is_rejected_before_locking() {
    let provider = FakeProvider::new();
    let plane = plane_with(Arc::clone(&provider), RateLimitTable::builtin(), StubConnector::default());
    let scope = plane.begin_task("task-1", account()).unwrap();

    let err = scope
        .run(
            Platform::Wechat,
            OperationRequest::Publish {
                content: "hello".to_string(),
                content_type: Default::default(),
                images: vec![],
                tags: vec![],
            },
            BatchParams::default(),
            AdmissionPolicy::fail_fast(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ControlError::UnsupportedOperation {
            platform: Platform::Wechat,
            operation: Operation::Publish
        }
    ));
    assert_eq!(err.kind(), "unsupported_operation");
    assert!(plane.locks().registry().held_by("task-1").is_empty());
    assert_eq!(provider.created(), 0);
    scope.finish().await.unwrap();
}

#[tokio::test]
async fn test_rate_limited_run_is_rejected() {
    let mut limits = RateLimitTable::unlimited();
    limits.insert(Platform::Generic, Operation::ExtractSummary, RatePolicy::new(1, 60, 30));
    let plane = plane_with(FakeProvider::new(), limits, StubConnector::default());
    let scope = plane.begin_task("task-1", account()).unwrap();

    assert_ok!(
        scope
            .run(
                Platform::Generic,
                summary_request(&["https://a.example/1"]),
                BatchParams::default(),
                AdmissionPolicy::fail_fast(),
            )
            .await
    );
    let err = assert_err!(
        scope
            .run(
                Platform::Generic,
                summary_request(&["https://a.example/2"]),
                BatchParams::default(),
                AdmissionPolicy::fail_fast(),
            )
            .await
    );

    assert!(matches!(err, ControlError::RateLimitExceeded { .. }));
    assert!(err.is_retry_later());
    scope.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_patient_admission_waits_for_window() {
    let mut limits = RateLimitTable::unlimited();
    limits.insert(Platform::Generic, Operation::ExtractSummary, RatePolicy::new(1, 60, 30));
    let plane = plane_with(FakeProvider::new(), limits, StubConnector::default());
    let scope = plane.begin_task("task-1", account()).unwrap();
    let request = || summary_request(&["https://a.example/1"]);

    assert_ok!(
        scope
            .run(Platform::Generic, request(), BatchParams::default(), AdmissionPolicy::fail_fast())
            .await
    );

    let started = tokio::time::Instant::now();
    assert_ok!(
        scope
            .run(
                Platform::Generic,
                request(),
                BatchParams::default(),
                AdmissionPolicy::patient(3, Duration::from_secs(40)),
            )
            .await
    );
    assert!(started.elapsed() >= Duration::from_secs(60));
    scope.finish().await.unwrap();
}

#[tokio::test]
async fn test_same_account_operation_is_mutually_exclusive() {
    let gate = Arc::new(Notify::new());
    let stub = StubConnector {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let entered = Arc::clone(&stub.entered);
    let plane = plane_with(FakeProvider::new(), RateLimitTable::unlimited(), stub);

    let first = plane.begin_task("task-a", account()).unwrap();
    let running = tokio::spawn(async move {
        let result = first
            .run(
                Platform::Generic,
                summary_request(&["https://a.example/1"]),
                BatchParams::default(),
                AdmissionPolicy::fail_fast(),
            )
            .await;
        first.finish().await.unwrap();
        result
    });

    while entered.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    let second = plane.begin_task("task-b", account()).unwrap();
    let err = assert_err!(
        second
            .run(
                Platform::Generic,
                summary_request(&["https://a.example/2"]),
                BatchParams::default(),
                AdmissionPolicy::fail_fast(),
            )
            .await
    );
    assert!(matches!(err, ControlError::LockNotGranted { operation: Operation::ExtractSummary, .. }));
    assert_eq!(err.kind(), "operation_in_progress");

    // 其他账号不受影响
    let other = plane
        .locks()
        .acquire(
            &LockKey::new(&Account::new("crm", "u2").unwrap(), Platform::Generic, Operation::ExtractSummary),
            Duration::from_secs(60),
            "task-c",
        )
        .await
        .unwrap();
    assert!(other);

    gate.notify_waiters();
    assert_ok!(running.await.unwrap());

    // 第一个任务结束后锁已释放
    let key = LockKey::new(&account(), Platform::Generic, Operation::ExtractSummary);
    assert!(plane.locks().registry().held_by("task-a").is_empty());
    assert!(plane.locks().acquire(&key, Duration::from_secs(60), "task-b").await.unwrap());
    second.finish().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_task_id_is_rejected() {
    let plane = plane_with(FakeProvider::new(), RateLimitTable::unlimited(), StubConnector::default());
    let scope = plane.begin_task("task-1", account()).unwrap();

    assert!(plane.begin_task("task-1", account()).is_err());
    assert!(matches!(
        plane.begin_task("", account()),
        Err(ControlError::InvalidIdentifier { field: "task_id", .. })
    ));

    scope.finish().await.unwrap();
    assert!(plane.begin_task("task-1", account()).is_ok());
}

#[tokio::test]
async fn test_dropped_scope_releases_locks_and_sessions() {
    let provider = FakeProvider::new();
    let plane = plane_with(Arc::clone(&provider), RateLimitTable::unlimited(), StubConnector::default());
    let key = LockKey::new(&account(), Platform::Generic, Operation::ExtractSummary);

    let scope = plane.begin_task("task-1", account()).unwrap();
    assert!(plane.locks().acquire(&key, Duration::from_secs(300), "task-1").await.unwrap());
    plane.locks().register_holder("task-1", &key);
    let _session = plane.sessions().create_session("task-1", None).await.unwrap();

    drop(scope);
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(!plane.locks().is_task_active("task-1"));
    assert!(plane.locks().acquire(&key, Duration::from_secs(60), "task-2").await.unwrap());
    assert_eq!(plane.sessions().live_count("task-1"), 0);
    assert_eq!(provider.deleted(), vec![("sess-0".to_string(), false)]);
}

#[tokio::test]
async fn test_sessions_on_same_context_are_independent() {
    let context = ContextId::for_account(Platform::Xiaohongshu, &account());
    let provider = FakeProvider::new().with_context(context.as_str());
    let registry = SessionRegistry::new(provider.clone());

    assert_ok!(registry.require_context(&context).await);
    let first = registry.create_session("task-1", Some(&context)).await.unwrap();
    let second = registry.create_session("task-1", Some(&context)).await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(registry.live_count("task-1"), 2);

    first.close(true).await.unwrap();
    assert_eq!(registry.live_count("task-1"), 1);
    assert_eq!(second.context(), Some(&context));

    assert_eq!(registry.teardown_task("task-1").await, 1);
    second.close(false).await.unwrap();
    assert_eq!(provider.deleted(), vec![("sess-0".to_string(), true), ("sess-1".to_string(), false)]);
}

#[tokio::test]
async fn test_missing_context_is_reported() {
    let registry = SessionRegistry::new(FakeProvider::new());
    let context = ContextId::for_account(Platform::Xiaohongshu, &account());

    let err = registry.require_context(&context).await.unwrap_err();
    assert_eq!(err.kind(), "context_not_found");
    assert_ok!(registry.ensure_context(&context).await);
    assert_ok!(registry.require_context(&context).await);
}
