mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{MockBackend, ids, planned, single_backend_service, with_gaps};
use dossier::ai::provider::{GenerationRequest, LlmResponse, SharedProvider};
use dossier::report::{MemoryReportStore, SharedStore};
use dossier::{
    Backends, Config, LlmProvider, PreconditionError, ProviderRouter, ReportService, Result,
    SectionStatus,
};

#[tokio::test]
async fn concurrent_generation_admits_one_section() {
    let service = single_backend_service(MockBackend::slow("slow", Duration::from_millis(30)));
    planned(&service, with_gaps()).await;
    let (session, user) = ids();

    let (trend, gaps) = tokio::join!(
        service.generate_section(&session, &user, "trend_analysis"),
        service.generate_section(&session, &user, "research_gaps"),
    );

    assert!(trend.is_ok());
    let err = gaps.unwrap_err();
    assert!(matches!(
        err.precondition(),
        Some(PreconditionError::Locked { .. })
    ));

    let state = service.get_state(&session, &user).await.unwrap();
    assert_eq!(state.section("trend_analysis").unwrap().status, SectionStatus::Review);
    assert_eq!(state.section("research_gaps").unwrap().status, SectionStatus::Planned);
    assert!(state.locks.sections.values().all(|locked| !locked));
}

#[tokio::test]
async fn same_section_cannot_overlap_itself() {
    let service = single_backend_service(MockBackend::slow("slow", Duration::from_millis(30)));
    planned(&service, with_gaps()).await;
    let (session, user) = ids();

    let (first, second) = tokio::join!(
        service.generate_section(&session, &user, "trend_analysis"),
        service.generate_section(&session, &user, "trend_analysis"),
    );
    assert!(first.is_ok());
    assert!(matches!(
        second.unwrap_err().precondition(),
        Some(PreconditionError::Locked { .. })
    ));
}

/// Counts sections in `generating` status from inside each backend call
struct ObservingBackend {
    store: SharedStore,
    max_generating: AtomicUsize,
}

#[async_trait]
impl LlmProvider for ObservingBackend {
    async fn generate(&self, _request: &GenerationRequest) -> Result<LlmResponse> {
        let (session, user) = ids();
        if let Some(record) = self.store.load(&session, &user)?
            && let Some(report) = record.report
        {
            let generating = report
                .sections
                .iter()
                .filter(|s| s.status == SectionStatus::Generating)
                .count();
            self.max_generating.fetch_max(generating, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        let body: Vec<String> = (0..300).map(|i| format!("obs{i}")).collect();
        Ok(LlmResponse::content_only(body.join(" ")))
    }

    fn name(&self) -> &str {
        "observer"
    }

    fn model(&self) -> &str {
        "observer-1"
    }

    fn is_metered(&self) -> bool {
        false
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_section_generates_at_a_time() {
    let store: SharedStore = Arc::new(MemoryReportStore::new());
    let observer = Arc::new(ObservingBackend {
        store: Arc::clone(&store),
        max_generating: AtomicUsize::new(0),
    });
    let provider: SharedProvider = observer.clone();
    let router = ProviderRouter::new(Backends::new(Arc::clone(&provider), provider), true);
    let service = Arc::new(ReportService::new(store, router, &Config::default()));
    planned(&service, with_gaps()).await;

    let mut handles = Vec::new();
    for section in ["trend_analysis", "research_gaps", "trend_analysis", "research_gaps"] {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let (session, user) = ids();
            service.generate_section(&session, &user, section).await
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await.unwrap() {
            assert!(
                err.precondition().is_some(),
                "only precondition rejections expected, got {err}"
            );
        }
    }
    assert_eq!(observer.max_generating.load(Ordering::SeqCst), 1);

    let (session, user) = ids();
    let state = service.get_state(&session, &user).await.unwrap();
    assert!(state.generating_section().is_none());
    assert!(state.locks.sections.values().all(|locked| !locked));
}

#[tokio::test]
async fn concurrent_initialize_creates_one_plan() {
    let service = single_backend_service(MockBackend::local("local"));
    let (session, user) = ids();
    service.put_analysis(&session, &user, with_gaps()).unwrap();

    let (a, b) = tokio::join!(
        service.initialize(&session, &user, true),
        service.initialize(&session, &user, true),
    );
    assert_eq!(a.unwrap().report_id, b.unwrap().report_id);
}
