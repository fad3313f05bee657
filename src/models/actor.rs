use serde::{Deserialize, Serialize};

/// Role of an already-authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Reviewer,
    Parent,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "teacher" => Some(Role::Teacher),
            "reviewer" => Some(Role::Reviewer),
            "parent" => Some(Role::Parent),
            _ => None,
        }
    }
}

/// The identity attached to a request by the actor middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}
