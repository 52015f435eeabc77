//! Linker subsystem — attach sessions to authoritative customers and contacts
//!
//! One run loads the roster once, then walks every stored session in order:
//! - skips sessions not awaiting linking and sessions from unlinkable sources
//! - resolves the guessed customer through the match cascade
//! - on a customer winner, resolves the guessed contact among its contacts
//! - stamps, logs and saves each processed session whatever the outcome
//!
//! Per-session failures are counted, never propagated. Only a roster that
//! cannot be loaded or is empty aborts the run.

use consolidator_core::config::LinkingConfig;
use consolidator_core::{ChatBackend, ConsolidatorError, Customer, Session, SessionStatus};
use futures::StreamExt;

use super::matcher::{MatchMethod, ResolutionCache};
use super::roster::RosterProvider;
use super::store::SessionStore;

/// Step name recorded in each processed session's `processing_log`.
pub const STEP_NAME: &str = "customer_linker";

/// Counters from one linking run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub scanned: usize,
    pub linked: usize,
    pub errored: usize,
    pub skipped: usize,
    pub linked_exact: usize,
    pub linked_fuzzy: usize,
    pub linked_llm: usize,
    pub contacts_linked: usize,
    pub cache_hits: usize,
    pub save_failures: usize,
}

impl LinkReport {
    fn record_method(&mut self, method: MatchMethod) {
        match method {
            MatchMethod::Exact => self.linked_exact += 1,
            MatchMethod::Fuzzy => self.linked_fuzzy += 1,
            MatchMethod::Llm => self.linked_llm += 1,
            MatchMethod::None => {}
        }
    }
}

/// State that lives for exactly one run.
struct LinkingRun<'a> {
    roster: Vec<Customer>,
    cache: ResolutionCache,
    llm: Option<&'a dyn ChatBackend>,
    config: &'a LinkingConfig,
    report: LinkReport,
}

/// Link every session awaiting linking in `store`.
pub async fn link_sessions(
    store: &dyn SessionStore,
    roster: &dyn RosterProvider,
    llm: Option<&dyn ChatBackend>,
    config: &LinkingConfig,
) -> Result<LinkReport, ConsolidatorError> {
    let customers = roster.load().await.map_err(|e| {
        tracing::error!(error = %e, "Roster unavailable, aborting linking run");
        e
    })?;

    if customers.is_empty() {
        tracing::error!("Roster is empty, aborting linking run");
        return Err(ConsolidatorError::Roster("roster snapshot is empty".to_string()));
    }
    tracing::info!(
        customers = customers.len(),
        llm = llm.map(|l| l.name()).unwrap_or("none"),
        threshold = config.fuzzy_match_threshold,
        "Starting session linking run"
    );

    let mut run = LinkingRun {
        roster: customers,
        cache: ResolutionCache::new(),
        llm,
        config,
        report: LinkReport::default(),
    };

    let mut pending = store.load_all_needing_link().await?;
    while let Some(item) = pending.next().await {
        run.report.scanned += 1;

        let mut session = match item {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "Unreadable session record");
                run.report.errored += 1;
                continue;
            }
        };

        if !run.process(&mut session).await {
            run.report.skipped += 1;
            continue;
        }

        session.touch();
        session.processing_log.push(STEP_NAME.to_string());

        if let Err(e) = store.save(&session).await {
            tracing::error!(session_id = %session.id, error = %e, "Failed to save session");
            run.report.save_failures += 1;
        }
    }

    run.report.cache_hits = run.cache.hits();
    let report = run.report;

    tracing::info!(
        scanned = report.scanned,
        linked = report.linked,
        errored = report.errored,
        skipped = report.skipped,
        exact = report.linked_exact,
        fuzzy = report.linked_fuzzy,
        llm = report.linked_llm,
        contacts = report.contacts_linked,
        cache_hits = report.cache_hits,
        save_failures = report.save_failures,
        "Session linking run complete"
    );

    Ok(report)
}

impl LinkingRun<'_> {
    /// Apply the state transition to one session. Returns `false` when the
    /// session was skipped and must not be touched.
    async fn process(&mut self, session: &mut Session) -> bool {
        if session.status != SessionStatus::NeedsLinking {
            return false;
        }
        if self
            .config
            .unlinkable_sources
            .iter()
            .any(|s| s == &session.source_system)
        {
            tracing::debug!(
                session_id = %session.id,
                source = %session.source_system,
                "Skipping session from unlinkable source"
            );
            return false;
        }

        let Some(guessed) = session.guessed_customer().map(str::to_string) else {
            tracing::warn!(session_id = %session.id, "Session has no guessed customer name");
            session.status = SessionStatus::Error;
            self.report.errored += 1;
            return true;
        };

        let threshold = self.config.fuzzy_match_threshold;
        let resolution = self
            .cache
            .resolve_customer(&guessed, &self.roster, threshold, self.llm)
            .await;

        let Some(customer) = resolution.winner else {
            tracing::warn!(session_id = %session.id, guessed = %guessed, "No customer match");
            session.status = SessionStatus::Error;
            self.report.errored += 1;
            return true;
        };

        tracing::info!(
            session_id = %session.id,
            guessed = %guessed,
            customer = %customer.display_name,
            method = ?resolution.method,
            "Linked session to customer"
        );
        session.customer_id = Some(customer.id);
        session.customer_name = Some(customer.display_name.clone());
        session.status = SessionStatus::Linked;
        self.report.linked += 1;
        self.report.record_method(resolution.method);

        self.link_contact(session, &customer).await;
        true
    }

    async fn link_contact(&mut self, session: &mut Session, customer: &Customer) {
        let Some(guessed) = session.guessed_contact().map(str::to_string) else {
            return;
        };
        if customer.contacts.is_empty() {
            tracing::warn!(
                session_id = %session.id,
                customer = %customer.display_name,
                "Customer has no contacts, contact linking skipped"
            );
            return;
        }

        let resolution = self
            .cache
            .resolve_contact(customer, &guessed, self.config.fuzzy_match_threshold, self.llm)
            .await;

        match resolution.winner {
            Some(contact) => {
                tracing::info!(
                    session_id = %session.id,
                    guessed = %guessed,
                    contact = %contact.display_name,
                    method = ?resolution.method,
                    "Linked session to contact"
                );
                session.contact_id = Some(contact.id);
                session.contact_name = Some(contact.display_name);
                self.report.contacts_linked += 1;
            }
            None => {
                tracing::warn!(session_id = %session.id, guessed = %guessed, "No contact match");
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::builder::SessionBuilder;
    use crate::subsystems::roster::{JsonRosterProvider, MemoryRoster};
    use crate::subsystems::store::{MemorySessionStore, SessionStream};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use consolidator_core::{ChatError, ChatMessage, ChatResponse, Contact, Segment};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingLlm {
        reply: String,
        calls: AtomicUsize,
    }

    impl CountingLlm {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for CountingLlm {
        async fn invoke(&self, _messages: &[ChatMessage]) -> Result<ChatResponse, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse {
                content: self.reply.clone(),
            })
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    /// Store whose saves always fail.
    struct ReadOnlyStore(MemorySessionStore);

    #[async_trait]
    impl SessionStore for ReadOnlyStore {
        async fn load_all_needing_link(&self) -> Result<SessionStream, ConsolidatorError> {
            let corrupt = Err(ConsolidatorError::Store("corrupt record".to_string()));
            let items = self.0.load_all_needing_link().await?;
            Ok(items.chain(futures::stream::iter([corrupt])).boxed())
        }

        async fn save(&self, _session: &Session) -> Result<(), ConsolidatorError> {
            Err(ConsolidatorError::Store("disk full".to_string()))
        }
    }

    fn session(source: &str, customer: Option<&str>, contact: Option<&str>) -> Session {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        SessionBuilder::new(source)
            .customer_name(customer.map(str::to_string))
            .contact_name(contact.map(str::to_string))
            .build(vec![Segment::new("s", start, start, "Note")])
            .unwrap()
    }

    fn roster() -> Vec<Customer> {
        vec![
            Customer {
                id: 1,
                display_name: "Acme Corporation".to_string(),
                contacts: vec![
                    Contact {
                        id: 11,
                        display_name: "Jane Doe".to_string(),
                    },
                    Contact {
                        id: 12,
                        display_name: "John Smith".to_string(),
                    },
                ],
            },
            Customer {
                id: 2,
                display_name: "Northwind Trading".to_string(),
                contacts: Vec::new(),
            },
            Customer {
                id: 3,
                display_name: "Northwind Tradeco".to_string(),
                contacts: Vec::new(),
            },
        ]
    }

    fn config() -> LinkingConfig {
        LinkingConfig::default()
    }

    async fn stored(store: &MemorySessionStore, id: Uuid) -> Session {
        store.get(id).await.unwrap()
    }

    #[tokio::test]
    async fn test_fuzzy_customer_and_contact_link() {
        let s = session("Notes", Some("Acme Corportation"), Some("Jon Smith"));
        let store = MemorySessionStore::new(vec![s.clone()]);

        let report = link_sessions(&store, &MemoryRoster::new(roster()), None, &config())
            .await
            .unwrap();

        let linked = stored(&store, s.id).await;
        assert_eq!(linked.status, SessionStatus::Linked);
        assert_eq!(linked.customer_id, Some(1));
        assert_eq!(linked.customer_name.as_deref(), Some("Acme Corporation"));
        assert_eq!(linked.contact_id, Some(12));
        assert_eq!(linked.contact_name.as_deref(), Some("John Smith"));
        assert_eq!(linked.processing_log, vec![STEP_NAME]);
        assert!(linked.updated_at >= s.updated_at);

        assert_eq!(report.linked, 1);
        assert_eq!(report.linked_fuzzy, 1);
        assert_eq!(report.contacts_linked, 1);
    }

    #[tokio::test]
    async fn test_contact_miss_keeps_customer_link() {
        let s = session("Notes", Some("acme corporation"), Some("Zed Zebulon"));
        let store = MemorySessionStore::new(vec![s.clone()]);

        let report = link_sessions(&store, &MemoryRoster::new(roster()), None, &config())
            .await
            .unwrap();

        let linked = stored(&store, s.id).await;
        assert_eq!(linked.status, SessionStatus::Linked);
        assert_eq!(linked.contact_name.as_deref(), Some("Zed Zebulon"));
        assert!(linked.contact_id.is_none());
        assert_eq!(report.linked_exact, 1);
        assert_eq!(report.contacts_linked, 0);
    }

    #[tokio::test]
    async fn test_missing_guess_and_no_match_become_errors() {
        let blank = session("Notes", Some("   "), None);
        let unknown = session("Notes", Some("Some Random Cafe"), None);
        let store = MemorySessionStore::new(vec![blank.clone(), unknown.clone()]);

        let report = link_sessions(&store, &MemoryRoster::new(roster()), None, &config())
            .await
            .unwrap();

        assert_eq!(report.errored, 2);
        for id in [blank.id, unknown.id] {
            let s = stored(&store, id).await;
            assert_eq!(s.status, SessionStatus::Error);
            assert_eq!(s.processing_log, vec![STEP_NAME]);
        }
        assert_eq!(store.save_log().await.len(), 2);
    }

    #[tokio::test]
    async fn test_skipped_sessions_are_untouched() {
        let roleplay = session("SillyTavern", Some("Acme Corporation"), None);
        let mut done = session("Notes", Some("Acme Corporation"), None);
        done.status = SessionStatus::Complete;
        let store = MemorySessionStore::new(vec![roleplay.clone(), done.clone()]);

        let report = link_sessions(&store, &MemoryRoster::new(roster()), None, &config())
            .await
            .unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.skipped, 2);
        assert!(store.save_log().await.is_empty());
        assert_eq!(stored(&store, roleplay.id).await, roleplay);
        assert_eq!(stored(&store, done.id).await, done);
    }

    #[tokio::test]
    async fn test_repeated_guess_invokes_llm_once() {
        let sessions: Vec<Session> = (0..3)
            .map(|_| session("Notes", Some("Northwind Traders"), None))
            .collect();
        let store = MemorySessionStore::new(sessions);
        let llm = CountingLlm::new("Northwind Tradeco");

        let report = link_sessions(&store, &MemoryRoster::new(roster()), Some(&llm), &config())
            .await
            .unwrap();

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.linked, 3);
        assert_eq!(report.linked_llm, 3);
        assert_eq!(report.cache_hits, 2);
        assert_eq!(store.count_with_status(SessionStatus::Linked).await, 3);
    }

    #[tokio::test]
    async fn test_negative_outcome_is_cached() {
        let sessions: Vec<Session> = (0..2)
            .map(|_| session("Notes", Some("Northwind Traders"), None))
            .collect();
        let store = MemorySessionStore::new(sessions);
        let llm = CountingLlm::new("I am not sure");

        let report = link_sessions(&store, &MemoryRoster::new(roster()), Some(&llm), &config())
            .await
            .unwrap();

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.errored, 2);
        assert_eq!(report.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_unreadable_roster_aborts_before_any_session() {
        let s = session("Notes", Some("Acme Corporation"), None);
        let store = MemorySessionStore::new(vec![s.clone()]);
        let provider = JsonRosterProvider::new("/nonexistent/roster.json");

        let result = link_sessions(&store, &provider, None, &config()).await;

        assert!(matches!(result, Err(ConsolidatorError::Roster(_))));
        assert!(store.save_log().await.is_empty());
        assert_eq!(stored(&store, s.id).await.status, SessionStatus::NeedsLinking);
    }

    #[tokio::test]
    async fn test_empty_roster_aborts_before_any_session() {
        let s = session("Notes", Some("Acme Corporation"), None);
        let store = MemorySessionStore::new(vec![s.clone()]);

        let result = link_sessions(&store, &MemoryRoster::new(Vec::new()), None, &config()).await;

        assert!(matches!(result, Err(ConsolidatorError::Roster(_))));
        assert!(store.save_log().await.is_empty());
        assert_eq!(stored(&store, s.id).await.status, SessionStatus::NeedsLinking);
    }

    #[tokio::test]
    async fn test_save_failures_and_bad_records_are_counted() {
        let store = ReadOnlyStore(MemorySessionStore::new(vec![session(
            "Notes",
            Some("Acme Corporation"),
            None,
        )]));

        let report = link_sessions(&store, &MemoryRoster::new(roster()), None, &config())
            .await
            .unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.linked, 1);
        assert_eq!(report.errored, 1);
        assert_eq!(report.save_failures, 1);
    }
}
