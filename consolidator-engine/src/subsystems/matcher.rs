//! Match cascade — resolves a guessed name to one roster candidate
//!
//! Passes run in a fixed order and each only runs if the previous one could
//! not decide:
//! 1. Exact: a single case-insensitive name match wins outright.
//! 2. Fuzzy: token-set scores, top 5, floor 60. A lone viable candidate at or
//!    above the threshold wins, as does a leader at or above the threshold
//!    that beats the runner-up by more than 10 points.
//! 3. LLM: the viable names go to the chat backend, whose reply must equal
//!    one of them (case-insensitive) to count.
//!
//! `ResolutionCache` memoizes outcomes, including misses, for one run.

use consolidator_core::similarity::token_set_ratio;
use consolidator_core::{Candidate, ChatBackend, ChatMessage, Contact, Customer};
use std::collections::HashMap;

/// Fuzzy scores below this are not considered related at all.
pub const VIABILITY_FLOOR: u8 = 60;

/// Number of best fuzzy scores kept for the decision.
pub const FUZZY_TOP_N: usize = 5;

/// Required lead over the runner-up to accept among several viable matches.
pub const CLEAR_MARGIN: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMethod {
    Exact,
    Fuzzy,
    Llm,
    None,
}

/// What kind of roster entry is being resolved; used in prompts and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Company,
    Contact,
}

impl ItemKind {
    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Company => "company",
            ItemKind::Contact => "contact",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<C> {
    pub winner: Option<C>,
    pub method: MatchMethod,
}

impl<C> Resolution<C> {
    fn found(winner: C, method: MatchMethod) -> Self {
        Self {
            winner: Some(winner),
            method,
        }
    }

    fn none() -> Self {
        Self {
            winner: None,
            method: MatchMethod::None,
        }
    }
}

/// A candidate index with its fuzzy score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scored {
    pub index: usize,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzyDecision {
    Winner(usize),
    /// Viable candidate indexes, best first, that need disambiguation.
    Ambiguous(Vec<usize>),
    NoViable,
}

// ============================================================================
// Cascade
// ============================================================================

/// Resolve `guessed` against `candidates`.
pub async fn resolve<C: Candidate + Clone>(
    guessed: &str,
    candidates: &[C],
    kind: ItemKind,
    fuzzy_accept_threshold: u8,
    llm: Option<&dyn ChatBackend>,
) -> Resolution<C> {
    if let Some(index) = exact_match(guessed, candidates) {
        tracing::info!(
            item = kind.label(),
            guessed,
            winner = candidates[index].display_name(),
            "Single exact match"
        );
        return Resolution::found(candidates[index].clone(), MatchMethod::Exact);
    }

    let scored = fuzzy_scores(guessed, candidates);
    match decide(&scored, fuzzy_accept_threshold) {
        FuzzyDecision::Winner(index) => {
            tracing::info!(
                item = kind.label(),
                guessed,
                winner = candidates[index].display_name(),
                score = scored[0].score,
                "Confident fuzzy match"
            );
            Resolution::found(candidates[index].clone(), MatchMethod::Fuzzy)
        }
        FuzzyDecision::NoViable => {
            tracing::warn!(
                item = kind.label(),
                guessed,
                "No plausible matches (best score below {})",
                VIABILITY_FLOOR
            );
            Resolution::none()
        }
        FuzzyDecision::Ambiguous(viable) => {
            tracing::info!(
                item = kind.label(),
                guessed,
                candidates = viable.len(),
                "Ambiguous matches, attempting LLM disambiguation"
            );
            match llm_pick(guessed, candidates, &viable, kind, llm).await {
                Some(index) => Resolution::found(candidates[index].clone(), MatchMethod::Llm),
                None => Resolution::none(),
            }
        }
    }
}

/// Index of the only candidate whose name equals `guessed` ignoring case.
/// Zero or several such candidates yield `None`.
pub fn exact_match<C: Candidate>(guessed: &str, candidates: &[C]) -> Option<usize> {
    let guessed = guessed.to_lowercase();
    let mut hits = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.display_name().to_lowercase() == guessed)
        .map(|(i, _)| i);

    match (hits.next(), hits.next()) {
        (Some(index), None) => Some(index),
        _ => None,
    }
}

/// Top `FUZZY_TOP_N` candidates by token-set score, best first.
///
/// Candidates without a name are never scored. Ties keep roster order.
pub fn fuzzy_scores<C: Candidate>(guessed: &str, candidates: &[C]) -> Vec<Scored> {
    let mut scored: Vec<Scored> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.display_name().is_empty())
        .map(|(index, c)| Scored {
            index,
            score: token_set_ratio(guessed, c.display_name()),
        })
        .collect();

    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(FUZZY_TOP_N);
    scored
}

/// Apply the floor, threshold and margin rules to pre-sorted scores.
pub fn decide(scored: &[Scored], fuzzy_accept_threshold: u8) -> FuzzyDecision {
    let viable: Vec<Scored> = scored
        .iter()
        .copied()
        .filter(|s| s.score >= VIABILITY_FLOOR)
        .collect();

    let Some(best) = viable.first() else {
        return FuzzyDecision::NoViable;
    };

    if best.score >= fuzzy_accept_threshold {
        match viable.get(1) {
            None => return FuzzyDecision::Winner(best.index),
            Some(second) if best.score - second.score > CLEAR_MARGIN => {
                return FuzzyDecision::Winner(best.index)
            }
            Some(_) => {}
        }
    }

    FuzzyDecision::Ambiguous(viable.iter().map(|s| s.index).collect())
}

async fn llm_pick<C: Candidate>(
    guessed: &str,
    candidates: &[C],
    viable: &[usize],
    kind: ItemKind,
    llm: Option<&dyn ChatBackend>,
) -> Option<usize> {
    let Some(llm) = llm else {
        tracing::warn!(item = kind.label(), guessed, "No LLM available for disambiguation");
        return None;
    };

    let names: Vec<&str> = viable
        .iter()
        .map(|&i| candidates[i].display_name())
        .collect();
    let messages = disambiguation_messages(kind, guessed, &names);

    let response = match llm.invoke(&messages).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(
                item = kind.label(),
                guessed,
                backend = llm.name(),
                error = %e,
                "LLM disambiguation failed"
            );
            return None;
        }
    };

    match match_llm_reply(&response.content, &names) {
        Some(position) => {
            tracing::info!(
                item = kind.label(),
                guessed,
                winner = names[position],
                "LLM selected a candidate"
            );
            Some(viable[position])
        }
        None => {
            tracing::error!(
                item = kind.label(),
                guessed,
                reply = response.content.trim(),
                candidates = ?names,
                "LLM reply did not match any candidate"
            );
            None
        }
    }
}

/// Position in `names` equal to the reply, ignoring case and outer whitespace.
pub fn match_llm_reply(reply: &str, names: &[&str]) -> Option<usize> {
    let reply = reply.trim().to_lowercase();
    names
        .iter()
        .position(|name| name.trim().to_lowercase() == reply)
}

/// Messages asking the model to choose one of `names` verbatim.
pub fn disambiguation_messages(kind: ItemKind, guessed: &str, names: &[&str]) -> Vec<ChatMessage> {
    let item = kind.label();
    let system = format!(
        "You match free-text {item} names to records in a customer database. \
         Reply with exactly one name copied verbatim from the candidate list and nothing else."
    );
    let list: String = names.iter().map(|n| format!("- {n}\n")).collect();
    let user = format!("Guessed {item} name: {guessed}\n\nCandidates:\n{list}");
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

// ============================================================================
// Per-run memoization
// ============================================================================

/// Outcomes of one linking run, keyed by guessed customer name and by
/// (customer id, guessed contact name). Keying contacts by id keeps two
/// customers that share a display name from sharing contact outcomes.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    customers: HashMap<String, Resolution<Customer>>,
    contacts: HashMap<(i64, String), Resolution<Contact>>,
    hits: usize,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lookups answered without running the cascade.
    pub fn hits(&self) -> usize {
        self.hits
    }

    pub async fn resolve_customer(
        &mut self,
        guessed: &str,
        roster: &[Customer],
        threshold: u8,
        llm: Option<&dyn ChatBackend>,
    ) -> Resolution<Customer> {
        if let Some(cached) = self.customers.get(guessed) {
            self.hits += 1;
            tracing::debug!(
                guessed,
                found = cached.winner.is_some(),
                "Using cached customer result"
            );
            return cached.clone();
        }

        let resolution = resolve(guessed, roster, ItemKind::Company, threshold, llm).await;
        self.customers.insert(guessed.to_string(), resolution.clone());
        resolution
    }

    /// Resolve a contact among `customer`'s contacts only.
    pub async fn resolve_contact(
        &mut self,
        customer: &Customer,
        guessed: &str,
        threshold: u8,
        llm: Option<&dyn ChatBackend>,
    ) -> Resolution<Contact> {
        let key = (customer.id, guessed.to_string());
        if let Some(cached) = self.contacts.get(&key) {
            self.hits += 1;
            tracing::debug!(
                guessed,
                customer_id = customer.id,
                found = cached.winner.is_some(),
                "Using cached contact result"
            );
            return cached.clone();
        }

        let resolution =
            resolve(guessed, &customer.contacts, ItemKind::Contact, threshold, llm).await;
        self.contacts.insert(key, resolution.clone());
        resolution
    }
}

// ============================================================================
// TESTS
// ============================================================================
