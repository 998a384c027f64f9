use std::{collections::HashMap, env, error, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use model::{
    incident::EmergencyRequest,
    triage::{TriageRequest, TriageSuggestion},
    WithId,
};
use tokio::sync::RwLock;
use utility::id::Id;

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub enum TriageError {
    /// No reasoning service is configured.
    NotConfigured,
    Timeout(Duration),
    Request(Arc<reqwest::Error>),
    InvalidResponse {
        status: reqwest::StatusCode,
        body: Option<String>,
    },
    Other(String),
}

impl error::Error for TriageError {}

impl fmt::Display for TriageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TriageError::NotConfigured => write!(f, "no triage service configured"),
            TriageError::Timeout(after) => {
                write!(f, "no answer within {} seconds", after.as_secs_f32())
            }
            TriageError::Request(e) => write!(f, "HTTP request error: {}", e),
            TriageError::InvalidResponse { status, body } => match body {
                Some(text) => write!(f, "Invalid Response ({}): {}", status, text),
                None => write!(f, "Invalid Response ({})", status),
            },
            TriageError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl From<reqwest::Error> for TriageError {
    fn from(e: reqwest::Error) -> Self {
        TriageError::Request(Arc::new(e))
    }
}

/// An external reasoning service producing advisory suggestions.
#[async_trait]
pub trait TriageService: Send + Sync {
    async fn suggest(&self, request: &TriageRequest) -> Result<TriageSuggestion, TriageError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriageConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl TriageConfig {
    /// Reads `TRIAGE_API_URL`, `TRIAGE_API_KEY` and `TRIAGE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let timeout = match env::var("TRIAGE_TIMEOUT_SECS") {
            Ok(value) => value.trim().parse::<u64>().unwrap_or_else(|_| {
                log::warn!(
                    "TRIAGE_TIMEOUT_SECS={} is not a number of seconds, using {}",
                    value,
                    DEFAULT_TIMEOUT_SECS
                );
                DEFAULT_TIMEOUT_SECS
            }),
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };
        Self {
            url: env::var("TRIAGE_API_URL").ok().filter(|url| !url.is_empty()),
            api_key: env::var("TRIAGE_API_KEY").ok().filter(|key| !key.is_empty()),
            timeout: Duration::from_secs(timeout),
        }
    }
}

/// Posts the incident as JSON and expects a `TriageSuggestion` back.
pub struct HttpTriageService {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpTriageService {
    pub fn new(url: String, api_key: Option<String>, timeout: Duration) -> Result<Self, TriageError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl TriageService for HttpTriageService {
    async fn suggest(&self, request: &TriageRequest) -> Result<TriageSuggestion, TriageError> {
        log::debug!("requesting triage suggestion from '{}'", self.url);
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        match response.status() {
            reqwest::StatusCode::OK => Ok(response.json().await?),
            other => Err(TriageError::InvalidResponse {
                status: other,
                body: response.text().await.ok(),
            }),
        }
    }
}

/// Stand-in used when no service is configured. Every call fails, so callers
/// see the placeholder suggestion.
pub struct OfflineTriageService;

#[async_trait]
impl TriageService for OfflineTriageService {
    async fn suggest(&self, _request: &TriageRequest) -> Result<TriageSuggestion, TriageError> {
        Err(TriageError::NotConfigured)
    }
}

/// Fetches suggestions for incidents and remembers them for as long as it
/// lives. Only successful suggestions are remembered, so a failed one is
/// requested again next time.
pub struct TriageAdvisor {
    service: Arc<dyn TriageService>,
    cache: RwLock<HashMap<Id<EmergencyRequest>, TriageSuggestion>>,
    timeout: Duration,
}

impl TriageAdvisor {
    pub fn new(service: Arc<dyn TriageService>, timeout: Duration) -> Self {
        Self {
            service,
            cache: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn from_config(config: &TriageConfig) -> Self {
        let service: Arc<dyn TriageService> = match &config.url {
            Some(url) => {
                match HttpTriageService::new(url.clone(), config.api_key.clone(), config.timeout) {
                    Ok(service) => {
                        log::info!("triage suggestions from '{}'", url);
                        Arc::new(service)
                    }
                    Err(why) => {
                        log::error!("could not set up triage client: {}", why);
                        Arc::new(OfflineTriageService)
                    }
                }
            }
            None => {
                log::info!("no triage service configured, suggestions are placeholders");
                Arc::new(OfflineTriageService)
            }
        };
        Self::new(service, config.timeout)
    }

    pub async fn cached(&self, incident: &Id<EmergencyRequest>) -> Option<TriageSuggestion> {
        self.cache.read().await.get(incident).cloned()
    }

    /// Drops the remembered suggestion so the next call asks again.
    pub async fn forget(&self, incident: &Id<EmergencyRequest>) {
        self.cache.write().await.remove(incident);
    }

    pub async fn try_suggest(
        &self,
        incident: &WithId<EmergencyRequest>,
    ) -> Result<TriageSuggestion, TriageError> {
        if let Some(suggestion) = self.cached(&incident.id).await {
            return Ok(suggestion);
        }

        let request = TriageRequest::from(&incident.content);
        let suggestion = tokio::time::timeout(self.timeout, self.service.suggest(&request))
            .await
            .map_err(|_| TriageError::Timeout(self.timeout))??;

        self.cache
            .write()
            .await
            .insert(incident.id.clone(), suggestion.clone());
        Ok(suggestion)
    }

    /// Like `try_suggest`, but degrades to the placeholder suggestion.
    pub async fn suggest(&self, incident: &WithId<EmergencyRequest>) -> TriageSuggestion {
        self.try_suggest(incident).await.unwrap_or_else(|why| {
            log::warn!("no triage suggestion for incident {}: {}", incident.id, why);
            TriageSuggestion::fallback()
        })
    }

    /// Requests the suggestions of all incidents at once. A slow or failing
    /// request only affects its own incident. Keeps the order of `incidents`.
    pub async fn suggest_all(
        &self,
        incidents: &[WithId<EmergencyRequest>],
    ) -> IndexMap<Id<EmergencyRequest>, TriageSuggestion> {
        join_all(
            incidents
                .iter()
                .map(|incident| async move { (incident.id.clone(), self.suggest(incident).await) }),
        )
        .await
        .into_iter()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use model::{incident::ServiceType, ExampleData};
    use tokio::sync::Barrier;

    fn incident(id: &str, patient: &str) -> WithId<EmergencyRequest> {
        WithId::new(
            Id::new(id.to_owned()),
            EmergencyRequest {
                patient_name: patient.to_owned(),
                ..EmergencyRequest::example_data()
            },
        )
    }

    fn suggestion_for(request: &TriageRequest) -> TriageSuggestion {
        TriageSuggestion {
            summary: format!("{} needs help", request.patient_name),
            nearest_hospital: "Kenyatta National Hospital".to_owned(),
            law_enforcement_needed: request.service_type == ServiceType::AirAmbulance,
        }
    }

    /// Answers every request, failing for patients named "fail".
    #[derive(Default)]
    struct Scripted {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TriageService for Scripted {
        async fn suggest(&self, request: &TriageRequest) -> Result<TriageSuggestion, TriageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.patient_name == "fail" {
                Err(TriageError::Other("model overloaded".to_owned()))
            } else {
                Ok(suggestion_for(request))
            }
        }
    }

    /// Only answers once `n` requests are in flight at the same time.
    struct Rendezvous(Barrier);

    #[async_trait]
    impl TriageService for Rendezvous {
        async fn suggest(&self, request: &TriageRequest) -> Result<TriageSuggestion, TriageError> {
            self.0.wait().await;
            Ok(suggestion_for(request))
        }
    }

    struct Stalled;

    #[async_trait]
    impl TriageService for Stalled {
        async fn suggest(&self, _request: &TriageRequest) -> Result<TriageSuggestion, TriageError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(TriageError::Other("unreachable".to_owned()))
        }
    }

    #[tokio::test]
    async fn successful_suggestions_are_cached() {
        let service = Arc::new(Scripted::default());
        let advisor = TriageAdvisor::new(service.clone(), Duration::from_secs(1));
        let incident = incident("i1", "Njeri");

        let first = advisor.suggest(&incident).await;
        let second = advisor.suggest(&incident).await;
        assert_eq!(first, second);
        assert_eq!(first.summary, "Njeri needs help");
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);

        advisor.forget(&incident.id).await;
        advisor.suggest(&incident).await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_degrade_and_are_retried() {
        let service = Arc::new(Scripted::default());
        let advisor = TriageAdvisor::new(service.clone(), Duration::from_secs(1));
        let incident = incident("i1", "fail");

        assert_eq!(advisor.suggest(&incident).await, TriageSuggestion::fallback());
        assert!(advisor.cached(&incident.id).await.is_none());
        advisor.suggest(&incident).await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let advisor = TriageAdvisor::new(Arc::new(Stalled), Duration::from_millis(20));
        let result = advisor.try_suggest(&incident("i1", "Baraka")).await;
        assert!(matches!(result, Err(TriageError::Timeout(_))));
    }

    #[tokio::test]
    async fn offline_advisor_returns_placeholder() {
        let advisor = TriageAdvisor::from_config(&TriageConfig::default());
        let incident = incident("i1", "Baraka");
        assert!(matches!(
            advisor.try_suggest(&incident).await,
            Err(TriageError::NotConfigured)
        ));
        assert_eq!(advisor.suggest(&incident).await, TriageSuggestion::fallback());
    }

    #[tokio::test]
    async fn fan_out_isolates_failures_and_keeps_order() {
        let advisor = TriageAdvisor::new(Arc::new(Scripted::default()), Duration::from_secs(1));
        let incidents = vec![
            incident("c", "Mwangi"),
            incident("a", "fail"),
            incident("b", "Chebet"),
        ];
        let suggestions = advisor.suggest_all(&incidents).await;
        let keys = suggestions.keys().map(|id| id.raw()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["c", "a", "b"]);
        assert_eq!(suggestions[0].summary, "Mwangi needs help");
        assert_eq!(suggestions[1], TriageSuggestion::fallback());
        assert_eq!(suggestions[2].summary, "Chebet needs help");
    }

    #[tokio::test]
    async fn fan_out_requests_run_concurrently() {
        let advisor = TriageAdvisor::new(
            Arc::new(Rendezvous(Barrier::new(3))),
            Duration::from_secs(5),
        );
        let incidents = ["x", "y", "z"]
            .into_iter()
            .map(|id| incident(id, id))
            .collect::<Vec<_>>();
        let suggestions = advisor.suggest_all(&incidents).await;
        assert!(suggestions
            .values()
            .all(|suggestion| *suggestion != TriageSuggestion::fallback()));
    }
}
