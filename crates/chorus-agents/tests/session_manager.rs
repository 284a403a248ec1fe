mod common;

use std::sync::Arc;
use std::time::Duration;

use chorus_agents::SessionManager;
use chorus_agents::providers::LlmProvider;
use chorus_agents::session::DEFAULT_SESSION_ID;
use chorus_common::Error;
use chorus_config::{LlmConfigUpdate, SessionConfig};
use chorus_db::{SessionHistory, SessionMetadata, SessionStore};
use chrono::Utc;
use common::{Harness, ScriptedProvider, llm_config};
use futures::future::join_all;

fn harness() -> Harness {
    let alpha: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new("alpha"));
    let beta: Arc<dyn LlmProvider> =
        Arc::new(ScriptedProvider::new("beta").with_model_prefix("beta-"));
    Harness::new(vec![alpha, beta])
}

fn manager(h: &Harness, max_sessions: usize) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        h.services(),
        llm_config("alpha", "alpha-1"),
        SessionConfig {
            max_sessions,
            session_ttl_secs: 3600,
        },
    ))
}

/// Push a session's last activity far enough into the past to be expired.
async fn age_session(store: &SessionStore, id: &str) {
    let mut metadata = store.load(id).await.unwrap().unwrap();
    metadata.last_activity = Utc::now() - chrono::Duration::hours(2);
    store.save(id, &metadata).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_for_one_id_converge() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();

    let creates = (0..16).map(|_| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.create_session(Some("X")).await.unwrap() })
    });
    let sessions: Vec<_> = join_all(creates)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    for session in &sessions {
        assert_eq!(session.id(), "X");
        assert!(Arc::ptr_eq(session, &sessions[0]));
    }
    assert_eq!(manager.list_sessions().await.unwrap(), vec!["X"]);
    assert_eq!(manager.get_session_stats().await.unwrap().in_memory_sessions, 1);
}

#[tokio::test]
async fn eviction_keeps_storage_and_rehydrates() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();
    let store = SessionStore::new(Arc::clone(&h.storage));

    let session = manager.create_session(Some("s1")).await.unwrap();
    session.run("remember the number 42", None, None, false).await.unwrap();
    let before = session.get_history().await.unwrap();
    assert_eq!(before.len(), 2);
    drop(session);

    age_session(&store, "s1").await;
    assert_eq!(manager.cleanup_expired_sessions().await.unwrap(), 1);
    assert!(!manager.is_resident("s1").await);

    assert!(store.load("s1").await.unwrap().is_some());
    let history = SessionHistory::new(Arc::clone(&h.storage), "s1");
    assert_eq!(history.len().await.unwrap(), 2);

    let revived = manager.get_session("s1").await.unwrap().expect("rehydrated");
    assert!(manager.is_resident("s1").await);
    assert_eq!(revived.get_history().await.unwrap(), before);

    let reply = revived.run("what number?", None, None, false).await.unwrap();
    assert_eq!(reply, "reply from alpha");
    assert_eq!(revived.get_history().await.unwrap().len(), 4);

    let metadata = store.load("s1").await.unwrap().unwrap();
    assert!(!metadata.is_expired(Utc::now(), Duration::from_secs(3600)));
}

#[tokio::test]
async fn capacity_is_enforced_until_a_session_ends() {
    let h = harness();
    let manager = manager(&h, 2);
    manager.init().await.unwrap();

    manager.create_session(Some("a")).await.unwrap();
    manager.create_session(Some("b")).await.unwrap();
    let err = manager.create_session(Some("c")).await.unwrap_err();
    assert!(matches!(err, Error::SessionLimitReached { max: 2 }));

    // Re-creating a resident id is a get, not a new session.
    manager.create_session(Some("a")).await.unwrap();

    manager.end_session("a").await.unwrap();
    let c = manager.create_session(Some("c")).await.unwrap();
    assert_eq!(c.id(), "c");
}

#[tokio::test]
async fn expired_sessions_do_not_count_against_capacity() {
    let h = harness();
    let manager = manager(&h, 1);
    manager.init().await.unwrap();
    let store = SessionStore::new(Arc::clone(&h.storage));

    manager.create_session(Some("old")).await.unwrap();
    age_session(&store, "old").await;

    manager.create_session(Some("new")).await.unwrap();
    assert!(!manager.is_resident("old").await);
    assert!(store.load("old").await.unwrap().is_some());
}

#[tokio::test]
async fn end_session_is_destructive() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();

    let session = manager.create_session(Some("gone")).await.unwrap();
    session.run("hello", None, None, false).await.unwrap();

    manager.end_session("gone").await.unwrap();
    assert!(manager.get_session("gone").await.unwrap().is_none());
    assert!(h.storage.get("session:gone").await.unwrap().is_none());
    assert_eq!(h.storage.get_length("messages:gone").await.unwrap(), 0);
    assert!(manager.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_ids_are_not_errors() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();

    assert!(manager.get_session("nobody").await.unwrap().is_none());
    manager.end_session("nobody").await.unwrap();
    assert!(manager.get_session_metadata("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn switch_all_reports_partial_failure() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();

    let a = manager.create_session(Some("A")).await.unwrap();
    let b = manager.create_session(Some("B")).await.unwrap();
    // B runs on a provider that only accepts "beta-*" models.
    b.switch_llm(llm_config("beta", "beta-1")).await.unwrap();

    let result = manager
        .switch_llm_for_all_sessions(&LlmConfigUpdate::model("alpha-2"))
        .await;

    assert!(!result.is_complete());
    assert_eq!(result.failed_sessions, vec!["B"]);
    assert_eq!(result.switched_sessions, vec!["A"]);
    assert!(result.warnings.iter().any(|w| w.starts_with("B:")));
    assert_eq!(a.config().model, "alpha-2");
    assert_eq!(b.config().model, "beta-1");
    assert_eq!(manager.llm_config().model, "alpha-2");
}

#[tokio::test]
async fn switch_all_success_is_complete() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();
    manager.create_session(Some("A")).await.unwrap();

    let result = manager
        .switch_llm_for_all_sessions(&LlmConfigUpdate::provider_and_model("beta", "beta-2"))
        .await;
    assert!(result.is_complete());
    assert!(result.warnings.is_empty());

    // Sessions created later start from the new default.
    let later = manager.create_session(Some("later")).await.unwrap();
    assert_eq!(later.config().provider, "beta");
}

#[tokio::test]
async fn switch_specific_and_default_sessions() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();

    let err = manager
        .switch_llm_for_specific_session("missing", &LlmConfigUpdate::model("alpha-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));

    manager.create_session(Some("s1")).await.unwrap();
    let config = manager
        .switch_llm_for_specific_session("s1", &LlmConfigUpdate::model("alpha-3"))
        .await
        .unwrap();
    assert_eq!(config.model, "alpha-3");

    assert!(manager.get_session(DEFAULT_SESSION_ID).await.unwrap().is_none());
    let config = manager
        .switch_llm_for_default_session(&LlmConfigUpdate::model("alpha-4"))
        .await
        .unwrap();
    assert_eq!(config.model, "alpha-4");
    let default = manager.get_default_session().await.unwrap();
    assert_eq!(default.id(), DEFAULT_SESSION_ID);
    assert_eq!(default.config().model, "alpha-4");

    // The manager default is untouched by single-session switches.
    assert_eq!(manager.llm_config().model, "alpha-1");
}

#[tokio::test]
async fn init_is_idempotent_and_drops_expired_records() {
    let h = harness();
    let store = SessionStore::new(Arc::clone(&h.storage));
    let now = Utc::now();
    store.save("fresh", &SessionMetadata::new(now)).await.unwrap();
    let mut stale = SessionMetadata::new(now - chrono::Duration::hours(3));
    stale.last_activity = now - chrono::Duration::hours(3);
    store.save("stale", &stale).await.unwrap();

    let manager = manager(&h, 10);
    manager.init().await.unwrap();
    assert_eq!(manager.list_sessions().await.unwrap(), vec!["fresh"]);

    // A record that expires after init is not swept by a second init.
    store.save("stale2", &stale).await.unwrap();
    manager.init().await.unwrap();
    assert_eq!(manager.list_sessions().await.unwrap(), vec!["fresh", "stale2"]);

    // Persisted but non-resident sessions rehydrate lazily.
    assert!(!manager.is_resident("fresh").await);
    assert!(manager.get_session("fresh").await.unwrap().is_some());
}

#[tokio::test]
async fn generated_ids_are_unique() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();

    let a = manager.create_session(None).await.unwrap();
    let b = manager.create_session(None).await.unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(a.id().len(), 36);
}

#[tokio::test]
async fn stats_and_message_counts() {
    let h = harness();
    let manager = manager(&h, 5);
    manager.init().await.unwrap();
    let store = SessionStore::new(Arc::clone(&h.storage));

    manager.create_session(Some("a")).await.unwrap();
    manager.create_session(Some("b")).await.unwrap();
    age_session(&store, "b").await;
    manager.cleanup_expired_sessions().await.unwrap();

    let stats = manager.get_session_stats().await.unwrap();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.in_memory_sessions, 1);
    assert_eq!(stats.max_sessions, 5);
    assert_eq!(stats.session_ttl_secs, 3600);

    manager.increment_message_count("a").await.unwrap();
    let metadata = manager.increment_message_count("a").await.unwrap().unwrap();
    assert_eq!(metadata.message_count, 2);
    assert!(manager.increment_message_count("zzz").await.unwrap().is_none());
}

#[tokio::test]
async fn cleanup_interval_is_bounded() {
    let h = harness();
    let cases = [(3600, 900), (120, 30), (2, 1), (100_000, 900)];
    for (ttl, expected) in cases {
        let manager = SessionManager::new(
            h.services(),
            llm_config("alpha", "alpha-1"),
            SessionConfig {
                max_sessions: 1,
                session_ttl_secs: ttl,
            },
        );
        assert_eq!(manager.cleanup_interval(), Duration::from_secs(expected), "ttl {ttl}");
    }
}

#[tokio::test]
async fn manager_cleanup_releases_resident_sessions_only() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();

    let session = manager.create_session(Some("s1")).await.unwrap();
    session.run("hi", None, None, false).await.unwrap();
    manager.cleanup().await;

    assert!(!manager.is_resident("s1").await);
    assert!(session.run("again", None, None, false).await.is_err());
    assert_eq!(manager.list_sessions().await.unwrap(), vec!["s1"]);
    assert_eq!(h.storage.get_length("messages:s1").await.unwrap(), 2);
}

#[tokio::test]
async fn failed_initialization_registers_nothing() {
    let h = harness();
    let manager = Arc::new(SessionManager::new(
        h.services(),
        llm_config("unregistered", "m"),
        SessionConfig::default(),
    ));
    manager.init().await.unwrap();

    let err = manager.create_session(Some("s")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidLlmConfig(_)));
    assert!(!manager.is_resident("s").await);
    assert!(manager.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn rehydration_counts_against_capacity() {
    let h = harness();
    let manager = manager(&h, 1);
    manager.init().await.unwrap();
    let store = SessionStore::new(Arc::clone(&h.storage));
    let now = Utc::now();
    store.save("b", &SessionMetadata::new(now)).await.unwrap();
    store.save("c", &SessionMetadata::new(now)).await.unwrap();

    manager.create_session(Some("a")).await.unwrap();
    let err = manager.get_session("b").await.unwrap_err();
    assert!(matches!(err, Error::SessionLimitReached { max: 1 }));
    assert!(!manager.is_resident("b").await);
    assert_eq!(manager.get_session_stats().await.unwrap().in_memory_sessions, 1);

    // Once "a" has been idle past the TTL, "b" takes its slot.
    age_session(&store, "a").await;
    let b = manager.get_session("b").await.unwrap().expect("rehydrated");
    assert_eq!(b.id(), "b");
    assert!(!manager.is_resident("a").await);
    assert!(matches!(
        manager.get_session("c").await,
        Err(Error::SessionLimitReached { max: 1 })
    ));
    assert_eq!(manager.get_session_stats().await.unwrap().in_memory_sessions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lookups_racing_eviction_return_live_sessions() {
    let h = harness();
    let manager = manager(&h, 4);
    manager.init().await.unwrap();
    let store = SessionStore::new(Arc::clone(&h.storage));

    for round in 0..25 {
        let id = format!("s{round}");
        manager.create_session(Some(&id)).await.unwrap();
        age_session(&store, &id).await;

        let sweeper = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.cleanup_expired_sessions().await.unwrap() })
        };
        let lookup = {
            let manager = Arc::clone(&manager);
            let id = id.clone();
            tokio::spawn(async move { manager.get_session(&id).await.unwrap() })
        };
        sweeper.await.unwrap();
        let session = lookup.await.unwrap().expect("session is persisted");

        // Whichever side won, the handle the caller got must still work.
        session.run("still there?", None, None, false).await.unwrap();
        manager.end_session(&id).await.unwrap();
    }
}

#[tokio::test]
async fn rehydrated_sessions_keep_their_model() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();
    let store = SessionStore::new(Arc::clone(&h.storage));

    manager.create_session(Some("s1")).await.unwrap();
    manager
        .switch_llm_for_specific_session("s1", &LlmConfigUpdate::model("alpha-3"))
        .await
        .unwrap();
    let stored = store.load("s1").await.unwrap().unwrap();
    assert_eq!(stored.llm_config.unwrap()["model"], "alpha-3");

    age_session(&store, "s1").await;
    assert_eq!(manager.cleanup_expired_sessions().await.unwrap(), 1);

    let revived = manager.get_session("s1").await.unwrap().unwrap();
    assert_eq!(revived.config().model, "alpha-3");
    assert_eq!(manager.llm_config().model, "alpha-1");
}

#[tokio::test]
async fn unusable_stored_model_falls_back_to_default() {
    let h = harness();
    let manager = manager(&h, 10);
    manager.init().await.unwrap();
    let store = SessionStore::new(Arc::clone(&h.storage));

    let mut metadata = SessionMetadata::new(Utc::now());
    metadata.llm_config = Some(serde_json::to_value(llm_config("unregistered", "m")).unwrap());
    store.save("odd", &metadata).await.unwrap();

    let session = manager.get_session("odd").await.unwrap().unwrap();
    assert_eq!(session.config().provider, "alpha");
    assert_eq!(session.config().model, "alpha-1");
}
