use serde::{Deserialize, Serialize};

/// Anything the match cascade can resolve a guessed name against.
pub trait Candidate {
    fn display_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    #[serde(rename = "business_name", alias = "display_name")]
    pub display_name: String,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(rename = "name", alias = "display_name")]
    pub display_name: String,
}

impl Candidate for Customer {
    fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl Candidate for Contact {
    fn display_name(&self) -> &str {
        &self.display_name
    }
}
