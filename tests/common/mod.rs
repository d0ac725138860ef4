#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dossier::ai::provider::{GenerationRequest, LlmResponse, SharedProvider};
use dossier::report::{
    AnalysisSnapshot, KeyTrend, ResearchGap, SharedStore, SourceDocument, TrendData,
};
use dossier::types::{ErrorCategory, LlmError};
use dossier::{
    Backends, Config, DossierError, LlmProvider, MemoryReportStore, ProviderRouter, ReportService,
    Result, SessionId, UserId,
};

/// Scripted backend that records every prompt it receives
pub struct MockBackend {
    name: String,
    metered: bool,
    fail: bool,
    words: usize,
    delay: Option<Duration>,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    fn build(name: &str, metered: bool, fail: bool) -> Self {
        Self {
            name: name.to_string(),
            metered,
            fail,
            words: 300,
            delay: None,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn local(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, false, false))
    }

    pub fn metered(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, true, false))
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, false, true))
    }

    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        let mut backend = Self::build(name, false, false);
        backend.delay = Some(delay);
        Arc::new(backend)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for MockBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<LlmResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(DossierError::Llm(LlmError::with_provider(
                ErrorCategory::Transient,
                "503 service unavailable",
                self.name.clone(),
            )));
        }

        let body: Vec<String> = (0..self.words)
            .map(|i| format!("{}c{}w{}", self.name, call, i))
            .collect();
        Ok(LlmResponse::content_only(body.join(" ")))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock-1"
    }

    fn is_metered(&self) -> bool {
        self.metered
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail)
    }
}

pub fn ids() -> (SessionId, UserId) {
    (SessionId::from("session-1"), UserId::from("researcher"))
}

pub fn trend_only() -> AnalysisSnapshot {
    let mut yearly = BTreeMap::new();
    yearly.insert(2019, 3);
    yearly.insert(2021, 9);
    yearly.insert(2023, 17);
    AnalysisSnapshot::new("sodium-ion batteries").with_trends(TrendData {
        yearly_counts: yearly,
        key_trends: vec![KeyTrend {
            term: "hard carbon anodes".into(),
            growth: 0.6,
            note: Some("fastest growing".into()),
        }],
    })
}

pub fn with_gaps() -> AnalysisSnapshot {
    trend_only().with_gaps(vec![ResearchGap {
        topic: "cycle life at low temperature".into(),
        evidence: "two studies".into(),
        score: Some(0.82),
    }])
}

pub fn with_documents() -> AnalysisSnapshot {
    trend_only().with_documents(vec![SourceDocument {
        id: "doc-1".into(),
        title: "Hard carbon for sodium storage".into(),
        authors: vec!["Lee".into(), "Tanaka".into()],
        year: Some(2022),
        venue: Some("J. Power Sources".into()),
        url: Some("https://example.org/doc-1".into()),
    }])
}

pub fn service_with(
    store: SharedStore,
    primary: Arc<MockBackend>,
    secondary: Arc<MockBackend>,
    config: &Config,
) -> ReportService {
    let primary: SharedProvider = primary;
    let secondary: SharedProvider = secondary;
    let router = ProviderRouter::new(Backends::new(primary, secondary), config.llm.hybrid);
    ReportService::new(store, router, config)
}

/// In-memory service whose primary and secondary are the same backend
pub fn single_backend_service(backend: Arc<MockBackend>) -> ReportService {
    let shared: SharedProvider = backend;
    let router = ProviderRouter::new(Backends::new(Arc::clone(&shared), shared), true);
    ReportService::new(Arc::new(MemoryReportStore::new()), router, &Config::default())
}

pub async fn planned(service: &ReportService, snapshot: AnalysisSnapshot) {
    let (session, user) = ids();
    service.put_analysis(&session, &user, snapshot).unwrap();
    service.initialize(&session, &user, true).await.unwrap();
}

/// Generate then accept each section in order
pub async fn accept_all(service: &ReportService, sections: &[&str]) {
    let (session, user) = ids();
    for id in sections {
        service.generate_section(&session, &user, id).await.unwrap();
        service
            .submit_review(&session, &user, id, true, None)
            .await
            .unwrap();
    }
}
