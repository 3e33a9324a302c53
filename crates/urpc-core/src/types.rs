//! Common types used across the agent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Repository operation named by the final call of a pseudo-code string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// Find all records matching the options.
    FindMany,
    /// Find the first record matching the options.
    FindOne,
    /// Create a single record.
    Create,
    /// Create several records.
    CreateMany,
    /// Update the first record matching `where`.
    Update,
    /// Update every record matching `where`.
    UpdateMany,
    /// Update a record, or create it if none matches.
    Upsert,
    /// Upsert several records.
    UpsertMany,
    /// Delete records matching `where`.
    Delete,
}

impl Operation {
    /// Every operation, in the order they are presented to the model.
    pub const ALL: [Operation; 9] = [
        Operation::FindMany,
        Operation::FindOne,
        Operation::Create,
        Operation::CreateMany,
        Operation::Update,
        Operation::UpdateMany,
        Operation::Upsert,
        Operation::UpsertMany,
        Operation::Delete,
    ];

    /// The method name used in pseudo-code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::FindMany => "findMany",
            Operation::FindOne => "findOne",
            Operation::Create => "create",
            Operation::CreateMany => "createMany",
            Operation::Update => "update",
            Operation::UpdateMany => "updateMany",
            Operation::Upsert => "upsert",
            Operation::UpsertMany => "upsertMany",
            Operation::Delete => "delete",
        }
    }

    /// Returns true for operations that mint new records with fresh ids.
    pub fn is_create_family(&self) -> bool {
        matches!(self, Operation::Create | Operation::CreateMany)
    }

    /// Returns true if the operation only reads.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Operation::FindMany | Operation::FindOne)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a method name is not in the operation vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperation(pub String);

impl fmt::Display for UnknownOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown operation: {}", self.0)
    }
}

impl std::error::Error for UnknownOperation {}

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

/// Returns the current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
