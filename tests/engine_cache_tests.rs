mod common;

use common::*;
use octofhir_ig_gateway::*;
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

fn service(sweep_on_request: bool) -> (OrchestrationService, Arc<CountingFactory>) {
    let mut config = config();
    config.cache = CacheConfig::default().with_ttl(TTL);
    config.cache.sweep_on_request = sweep_on_request;

    let factory = Arc::new(CountingFactory::external("validator", Vec::new()));
    let service = OrchestrationService::new(
        &config,
        Arc::new(EngineCache::new(&config.cache)),
        factory.clone(),
        Arc::new(ScriptedInvoker::text("Information: All OK")),
    );
    (service, factory)
}

fn request(session: &str) -> ValidationRequest {
    ValidationRequest::new(PATIENT_JSON, "application/fhir+json")
        .with_session(SessionKey::new(session))
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_is_rebuilt_after_ttl() {
    let (service, factory) = service(false);

    service.validate(request("a")).await.unwrap();
    tokio::time::advance(TTL / 2).await;
    service.validate(request("a")).await.unwrap();
    assert_eq!(factory.builds(), 1);

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    service.validate(request("a")).await.unwrap();
    assert_eq!(factory.builds(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_requests_sweep_other_stale_sessions() {
    let (service, _factory) = service(true);

    service.validate(request("a")).await.unwrap();
    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    service.validate(request("b")).await.unwrap();

    let stats = service.cache().stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_sessions_linger_without_sweeping() {
    let (service, _factory) = service(false);

    service.validate(request("a")).await.unwrap();
    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    service.validate(request("b")).await.unwrap();
    assert_eq!(service.cache().len(), 2);

    assert_eq!(service.cache().remove_expired(), 1);
    assert_eq!(service.cache().len(), 1);
}

#[tokio::test]
async fn test_many_sessions_build_independently() {
    let (service, factory) = service(false);
    let service = Arc::new(service);

    let calls = (0..6).map(|i| {
        let service = service.clone();
        async move { service.validate(request(&format!("session-{i}"))).await }
    });
    for response in futures::future::join_all(calls).await {
        assert!(response.unwrap().issues.is_all_ok());
    }

    assert_eq!(factory.builds(), 6);
    assert_eq!(service.cache().stats().misses, 6);
}
