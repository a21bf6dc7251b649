//! 错误处理集成测试
//!
//! 测试重试退避、永久失败投递、溢出和降级模式

use std::sync::Arc;
use std::time::Duration;

use parley::translation::core::backend::{BackendAdapter, TranslationBackend};
use parley::translation::delivery::MessageState;
use parley::translation::{
    HealthLevel, IncomingMessage, MessageContext, ModelTier, TaskOutcome, TaskPriority,
    TranslationError, TranslationRequest,
};

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{collect_events, roster, start_service, ScriptedBackend, TestConfigBuilder, WAIT};

fn unreachable() -> TranslationError {
    TranslationError::Network("connection refused".to_string())
}

/// 失败两次后第三次成功，重试间隔递增
#[tokio::test]
async fn test_retry_with_increasing_backoff_then_success() {
    let backend = Arc::new(ScriptedBackend::new().failing_first(vec![unreachable(), unreachable()]));
    let config = TestConfigBuilder::new().retries(3, 40).build();
    let service = start_service(config, Arc::clone(&backend));

    let ticket = service
        .request_translation(TranslationRequest::new("m1", "c1", "Try again", "fr").with_source_language("en"))
        .await
        .expect("request accepted");
    let outcome = ticket.wait_timeout(WAIT).await.expect("ticket resolves");

    let translation = outcome.translation().expect("third attempt succeeds");
    assert_eq!(translation.translated_content, "[fr] Try again");

    let calls = backend.calls();
    assert_eq!(calls.len(), 3);
    let first_gap = calls[1].at.duration_since(calls[0].at);
    let second_gap = calls[2].at.duration_since(calls[1].at);
    assert!(first_gap >= Duration::from_millis(40), "first backoff was {:?}", first_gap);
    assert!(second_gap >= Duration::from_millis(80), "second backoff was {:?}", second_gap);

    assert_eq!(service.get_stats().tasks_retried, 2);
    service.shutdown().await.expect("shutdown");
    println!("✅ Retry backoff: gaps {:?} then {:?}", first_gap, second_gap);
}

/// 后端连续三次不可达：任务失败，参与者收到带失败标记的原文
#[tokio::test]
async fn test_unreachable_backend_delivers_original_with_failure_flag() {
    let backend = Arc::new(ScriptedBackend::new().always_failing(unreachable()));
    let config = TestConfigBuilder::new().retries(3, 10).build();
    let service = start_service(config, Arc::clone(&backend));
    let mut events = service.subscribe();

    let members = roster(&[("alice", "en"), ("bruno", "fr"), ("carla", "fr")]);
    let message = IncomingMessage::new("m1", "c1", "alice", "Hello world").with_source_language("en");
    let report = service
        .submit_message(message, &members, MessageContext::default())
        .await
        .expect("submission should succeed");

    let mut tickets = report.tickets;
    assert_eq!(tickets.len(), 1);
    let outcome = tickets.remove(0).wait_timeout(WAIT).await.expect("ticket resolves");
    match outcome {
        TaskOutcome::Failed(failure) => {
            assert_eq!(failure.attempts, 3);
            assert!(matches!(failure.error, TranslationError::Network(_)));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(backend.call_count(), 3);

    let received = collect_events(&mut events, 2, WAIT).await;
    assert_eq!(received.len(), 2);
    for event in &received {
        assert!(event.translation_failed);
        assert_eq!(event.translated_content, "Hello world");
    }

    let view = service.view("bruno", "m1").expect("bruno has a view");
    let entry = view.translation_for("fr").expect("failure entry");
    assert!(entry.translation_failed);
    assert_eq!(entry.content, "Hello world");
    assert_eq!(
        service.message_state("m1"),
        Some(MessageState::Settled { failed: 1 })
    );

    service.shutdown().await.expect("shutdown");
}

/// 校验类错误不重试
#[tokio::test]
async fn test_validation_errors_fail_without_retry() {
    let backend = Arc::new(
        ScriptedBackend::new().always_failing(TranslationError::Validation("bad pair".to_string())),
    );
    let service = start_service(TestConfigBuilder::new().build(), Arc::clone(&backend));

    let outcome = service
        .request_translation(TranslationRequest::new("m1", "c1", "Hi", "ko").with_source_language("en"))
        .await
        .expect("request accepted")
        .wait_timeout(WAIT)
        .await
        .expect("ticket resolves");

    assert!(matches!(outcome, TaskOutcome::Failed(_)));
    assert_eq!(backend.call_count(), 1);
    assert_eq!(service.get_stats().tasks_retried, 0);

    service.shutdown().await.expect("shutdown");
}

/// 失败的键可以再次请求
#[tokio::test]
async fn test_failed_key_can_be_requested_again() {
    let backend = Arc::new(ScriptedBackend::new().failing_first(vec![unreachable()]));
    let config = TestConfigBuilder::new().retries(1, 10).build();
    let service = start_service(config, Arc::clone(&backend));

    let request = TranslationRequest::new("m1", "c1", "Second chance", "it").with_source_language("en");
    let first = service
        .request_translation(request.clone())
        .await
        .expect("accepted")
        .wait_timeout(WAIT)
        .await
        .expect("resolves");
    assert!(matches!(first, TaskOutcome::Failed(_)));

    let second = service
        .request_translation(request)
        .await
        .expect("accepted")
        .wait_timeout(WAIT)
        .await
        .expect("resolves");
    assert!(second.is_completed());
    assert_eq!(backend.call_count(), 2);

    service.shutdown().await.expect("shutdown");
}

/// 队列满时丢弃最旧的 LOW 任务；没有 LOW 任务时拒绝新任务
#[tokio::test]
async fn test_overflow_drops_oldest_low_then_rejects() {
    let backend = Arc::new(ScriptedBackend::new());
    let config = TestConfigBuilder::new().batch(64, 10_000).max_pending(2).build();
    let service = start_service(config, Arc::clone(&backend));

    let request = |message: &str, priority: TaskPriority| {
        TranslationRequest::new(message, "c1", "queued text", "fr")
            .with_source_language("en")
            .with_priority(priority)
    };

    let low_old = service.request_translation(request("m1", TaskPriority::Low)).await.expect("m1");
    let low_new = service.request_translation(request("m2", TaskPriority::Low)).await.expect("m2");
    let normal = service.request_translation(request("m3", TaskPriority::Normal)).await.expect("m3");

    match low_old.wait_timeout(WAIT).await.expect("m1 resolves") {
        TaskOutcome::Failed(failure) => {
            assert!(matches!(failure.error, TranslationError::Overflow(_)))
        }
        other => panic!("expected overflow drop, got {:?}", other),
    }

    let high = service.request_translation(request("m4", TaskPriority::High)).await.expect("m4");
    let rejected = service.request_translation(request("m5", TaskPriority::High)).await.expect("m5");
    match rejected.wait_timeout(WAIT).await.expect("m5 resolves") {
        TaskOutcome::Failed(failure) => {
            assert!(matches!(failure.error, TranslationError::Overflow(_)))
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    let status = service.scheduler_status().await.expect("status");
    assert_eq!(status.queue.total, 2);
    assert_eq!(status.queue.dropped_total, 2);
    assert_eq!(status.queue.rejected_total, 1);
    assert_eq!(service.get_health().overall, HealthLevel::Degraded);

    match low_new.wait_timeout(WAIT).await.expect("m2 resolves") {
        TaskOutcome::Failed(failure) => {
            assert!(matches!(failure.error, TranslationError::Overflow(_)))
        }
        other => panic!("expected overflow drop, got {:?}", other),
    }
    drop(normal);
    drop(high);
    service.shutdown().await.expect("shutdown");
}

/// 工作槽位占满时积压留在车道里，溢出上限照常生效
#[tokio::test]
async fn test_overflow_bounds_backlog_while_workers_are_busy() {
    let backend = Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(100)));
    let config = TestConfigBuilder::new()
        .batch(2, 5_000)
        .concurrency(1)
        .max_pending(4)
        .build();
    let service = start_service(config, Arc::clone(&backend));

    let request = |index: usize, text: &str, priority: TaskPriority| {
        TranslationRequest::new(&format!("m{}", index), "c1", text, "fr")
            .with_source_language("en")
            .with_priority(priority)
    };

    let mut low = Vec::new();
    for index in 0..10 {
        let ticket = service
            .request_translation(request(index, &format!("low {}", index), TaskPriority::Low))
            .await
            .expect("low accepted");
        low.push(ticket);
    }
    let urgent = service
        .request_translation(request(10, "urgent", TaskPriority::High))
        .await
        .expect("urgent accepted");
    let urgent2 = service
        .request_translation(request(11, "urgent2", TaskPriority::High))
        .await
        .expect("urgent2 accepted");

    let status = service.scheduler_status().await.expect("status");
    assert_eq!(status.queue.total, 4, "backlog must never exceed max_pending");
    assert_eq!(status.available_workers, 0);
    assert_eq!(status.queue.dropped_total, 7);

    assert!(urgent.wait_timeout(WAIT).await.expect("urgent resolves").is_completed());
    assert!(urgent2.wait_timeout(WAIT).await.expect("urgent2 resolves").is_completed());

    for (index, ticket) in low.into_iter().enumerate() {
        let outcome = ticket.wait_timeout(WAIT).await.expect("low resolves");
        if (1..=7).contains(&index) {
            match outcome {
                TaskOutcome::Failed(failure) => {
                    assert!(matches!(failure.error, TranslationError::Overflow(_)), "low {}", index)
                }
                other => panic!("low {} should be dropped, got {:?}", index, other),
            }
        } else {
            assert!(outcome.is_completed(), "low {} should complete", index);
        }
    }

    let texts: Vec<String> = backend.calls().into_iter().map(|call| call.text).collect();
    assert_eq!(texts, vec!["low 0", "urgent", "urgent2", "low 8", "low 9"]);
    assert_eq!(service.get_stats().tasks_dropped, 7);

    service.shutdown().await.expect("shutdown");
}

/// 后端不可达时直接翻译返回降级结果
#[tokio::test]
async fn test_direct_translation_falls_back_when_backend_is_down() {
    let backend = Arc::new(ScriptedBackend::new().always_failing(unreachable()));
    let service = start_service(TestConfigBuilder::new().build(), Arc::clone(&backend));

    let translation = service
        .translate_direct("Status update", "en", "fr")
        .await
        .expect("fallback never errors for transient failures");
    assert!(translation.degraded);
    assert_eq!(translation.model_tier, ModelTier::Fallback);
    assert_eq!(translation.translated_text, "Status update");
    assert!(translation.confidence < 0.5);
    assert_eq!(service.get_health().components["backend"], HealthLevel::Degraded);

    service.shutdown().await.expect("shutdown");
}

/// 关闭降级时直接翻译返回错误
#[tokio::test]
async fn test_direct_translation_without_fallback_surfaces_error() {
    let backend = Arc::new(ScriptedBackend::new().always_failing(unreachable()));
    let config = TestConfigBuilder::new().without_fallback().build();
    let service = start_service(config, Arc::clone(&backend));

    let result = service.translate_direct("Status update", "en", "fr").await;
    assert!(matches!(result, Err(TranslationError::Network(_))));
    assert_eq!(service.get_health().overall, HealthLevel::Unhealthy);

    service.shutdown().await.expect("shutdown");
}

/// 后端调用超时视为暂时性错误
#[tokio::test]
async fn test_backend_timeout_is_transient() {
    let backend: Arc<dyn TranslationBackend> =
        Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(200)));
    let adapter = BackendAdapter::new(backend, Duration::from_millis(20), true);

    let error = adapter
        .translate("slow", "en", "fr")
        .await
        .expect_err("call should time out");
    assert!(matches!(error, TranslationError::Timeout(_)));
    assert!(error.is_retryable());

    let fallback = adapter
        .translate_or_fallback("slow", "en", "fr")
        .await
        .expect("fallback result");
    assert!(fallback.degraded);
    assert_eq!(adapter.stats().timeouts, 2);
}
