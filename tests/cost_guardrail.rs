mod common;

use std::sync::Arc;

use common::{MockBackend, ids, planned, service_with, trend_only};
use dossier::report::{APPENDIX, MemoryReportStore};
use dossier::{Config, ErrorKind, ReportStatus, SectionStatus};

fn config(ceiling: u32, hybrid: bool) -> Config {
    let mut config = Config::default();
    config.llm.cost_ceiling = ceiling;
    config.llm.hybrid = hybrid;
    config
}

#[tokio::test]
async fn call_after_ceiling_routes_to_secondary() {
    let primary = MockBackend::metered("cloud");
    let secondary = MockBackend::local("local");
    let service = service_with(
        Arc::new(MemoryReportStore::new()),
        primary.clone(),
        secondary.clone(),
        &config(2, false),
    );
    planned(&service, trend_only()).await;
    let (session, user) = ids();

    // draft + first expansion hit the primary; the rest fall back
    let section = service
        .generate_section(&session, &user, "trend_analysis")
        .await
        .unwrap();
    assert_eq!(section.status, SectionStatus::Review);
    assert_eq!(primary.calls(), 2);
    assert_eq!(secondary.calls(), 2);
    assert!(section.history[0].model.starts_with("local"));

    let state = service.get_state(&session, &user).await.unwrap();
    assert_eq!(state.metrics.cloud_calls, 2);
    assert!(
        state
            .audit_warnings
            .iter()
            .any(|w| w.message.contains("Cost ceiling of 2"))
    );

    // The persisted count carries the ceiling into the next generation
    service
        .submit_review(&session, &user, "trend_analysis", false, None)
        .await
        .unwrap();
    service
        .generate_section(&session, &user, "trend_analysis")
        .await
        .unwrap();
    assert_eq!(primary.calls(), 2);
    let state = service.get_state(&session, &user).await.unwrap();
    assert_eq!(state.metrics.cloud_calls, 2);
}

#[tokio::test]
async fn ceiling_without_fallback_is_a_cost_limit_error() {
    let cloud = MockBackend::metered("cloud");
    let service = service_with(
        Arc::new(MemoryReportStore::new()),
        cloud.clone(),
        cloud.clone(),
        &config(1, false),
    );
    planned(&service, trend_only()).await;
    let (session, user) = ids();

    let err = service
        .generate_section(&session, &user, "trend_analysis")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CostLimit);
    assert_eq!(cloud.calls(), 1);

    let state = service.get_state(&session, &user).await.unwrap();
    let section = state.section("trend_analysis").unwrap();
    assert_eq!(section.status, SectionStatus::Error);
    assert!(section.error_reason.as_deref().unwrap().contains("Cost limit"));
    assert_eq!(state.status, ReportStatus::Failed);
    assert_eq!(state.metrics.cloud_calls, 1);
    assert!(!state.locks.section_locked("trend_analysis"));

    // After recovery the appendix still renders without consulting the guardrail
    service
        .reset_section(&session, &user, "trend_analysis", true)
        .await
        .unwrap();
    let appendix = service
        .generate_section(&session, &user, APPENDIX)
        .await
        .unwrap();
    assert_eq!(appendix.status, SectionStatus::Review);
    assert_eq!(cloud.calls(), 1);
}

#[tokio::test]
async fn primary_failure_retries_once_on_secondary() {
    let primary = MockBackend::failing("cloud");
    let secondary = MockBackend::local("local");
    let service = service_with(
        Arc::new(MemoryReportStore::new()),
        primary.clone(),
        secondary.clone(),
        &config(15, false),
    );
    planned(&service, trend_only()).await;
    let (session, user) = ids();

    let section = service
        .generate_section(&session, &user, "trend_analysis")
        .await
        .unwrap();
    assert_eq!(section.status, SectionStatus::Review);
    assert_eq!(primary.calls(), secondary.calls());

    let state = service.get_state(&session, &user).await.unwrap();
    assert!(
        state
            .audit_warnings
            .iter()
            .any(|w| w.section_id.as_deref() == Some("trend_analysis")
                && w.message.contains("retrying once on secondary"))
    );
}

#[tokio::test]
async fn failure_on_both_backends_marks_section_error() {
    let primary = MockBackend::failing("cloud");
    let secondary = MockBackend::failing("local");
    let service = service_with(
        Arc::new(MemoryReportStore::new()),
        primary.clone(),
        secondary.clone(),
        &config(15, false),
    );
    planned(&service, trend_only()).await;
    let (session, user) = ids();

    let err = service
        .generate_section(&session, &user, "trend_analysis")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert_eq!((primary.calls(), secondary.calls()), (1, 1));

    let state = service.get_state(&session, &user).await.unwrap();
    assert_eq!(state.section("trend_analysis").unwrap().status, SectionStatus::Error);
    assert_eq!(state.status, ReportStatus::Failed);
    assert!(state.audit_warnings.iter().any(|w| w.message.contains("retrying")));
}
