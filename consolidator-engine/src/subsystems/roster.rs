//! Roster subsystem — the authoritative customer/contact snapshot
//!
//! A linking run loads the roster once and treats it as read-only. A missing
//! or unreadable snapshot is fatal for the run.

use async_trait::async_trait;
use consolidator_core::{Contact, ConsolidatorError, Customer};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn load(&self) -> Result<Vec<Customer>, ConsolidatorError>;
}

/// Roster snapshot stored as a JSON array of customers.
#[derive(Debug, Clone)]
pub struct JsonRosterProvider {
    path: PathBuf,
}

impl JsonRosterProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RosterProvider for JsonRosterProvider {
    async fn load(&self) -> Result<Vec<Customer>, ConsolidatorError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ConsolidatorError::Roster(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let customers: Vec<Customer> = serde_json::from_str(&raw).map_err(|e| {
            ConsolidatorError::Roster(format!("cannot parse {}: {}", self.path.display(), e))
        })?;
        tracing::debug!(path = %self.path.display(), customers = customers.len(), "Roster loaded");
        Ok(customers)
    }
}

/// A roster held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRoster {
    customers: Vec<Customer>,
}

impl MemoryRoster {
    pub fn new(customers: Vec<Customer>) -> Self {
        Self { customers }
    }
}

#[async_trait]
impl RosterProvider for MemoryRoster {
    async fn load(&self) -> Result<Vec<Customer>, ConsolidatorError> {
        Ok(self.customers.clone())
    }
}

/// Build the lean roster from raw customer and contact dumps.
///
/// Customers without an id or business name are dropped, as are contacts
/// without an id, name or owning customer id.
pub fn build_roster(raw_customers: &[Value], raw_contacts: &[Value]) -> Vec<Customer> {
    let mut contacts_by_customer: HashMap<i64, Vec<Contact>> = HashMap::new();
    for contact in raw_contacts {
        let (Some(customer_id), Some(id), Some(name)) = (
            contact.get("customer_id").and_then(Value::as_i64),
            contact.get("id").and_then(Value::as_i64),
            non_empty_str(contact, "name"),
        ) else {
            continue;
        };
        contacts_by_customer.entry(customer_id).or_default().push(Contact {
            id,
            display_name: name.to_string(),
        });
    }

    raw_customers
        .iter()
        .filter_map(|customer| {
            let id = customer.get("id").and_then(Value::as_i64)?;
            let name = non_empty_str(customer, "business_then_name")
                .or_else(|| non_empty_str(customer, "business_name"))?;
            Some(Customer {
                id,
                display_name: name.to_string(),
                contacts: contacts_by_customer.remove(&id).unwrap_or_default(),
            })
        })
        .collect()
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Read a JSON array from `path`.
pub async fn read_json_array(path: &Path) -> Result<Vec<Value>, ConsolidatorError> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write the roster snapshot, creating parent folders as needed.
pub async fn write_roster(path: &Path, customers: &[Customer]) -> Result<(), ConsolidatorError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_string_pretty(customers)?;
    tokio::fs::write(path, body).await?;
    Ok(())
}
