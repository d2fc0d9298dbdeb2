//! Entity type identifiers.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of entity a change record addresses.
///
/// The set is closed: the synchronization core manages exactly these three
/// entity kinds. The string spellings are the wire identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    /// An identity root owning zero or more datasets.
    Project,
    /// A named dataset belonging to exactly one project.
    Dataset,
    /// An external git credential/link record.
    GitConnection,
}

impl EntityType {
    /// Returns the wire identifier for this entity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Project => "Project",
            EntityType::Dataset => "Dataset",
            EntityType::GitConnection => "GitConnection",
        }
    }

    /// All entity types, in a fixed order.
    pub const ALL: [EntityType; 3] = [
        EntityType::Project,
        EntityType::Dataset,
        EntityType::GitConnection,
    ];
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Project" => Ok(EntityType::Project),
            "Dataset" => Ok(EntityType::Dataset),
            "GitConnection" => Ok(EntityType::GitConnection),
            other => Err(ProtocolError::UnknownEntityType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_identifiers() {
        assert_eq!(EntityType::Project.as_str(), "Project");
        assert_eq!(EntityType::Dataset.as_str(), "Dataset");
        assert_eq!(EntityType::GitConnection.as_str(), "GitConnection");
    }

    #[test]
    fn parse_roundtrip() {
        for ty in EntityType::ALL {
            assert_eq!(ty.as_str().parse::<EntityType>().unwrap(), ty);
        }
        assert!("project".parse::<EntityType>().is_err());
    }

    #[test]
    fn serializes_as_bare_string() {
        let json = serde_json::to_string(&EntityType::GitConnection).unwrap();
        assert_eq!(json, "\"GitConnection\"");
    }
}
