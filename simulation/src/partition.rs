use std::{fs, path::Path};

use ml_core::Target;
use serde::{Deserialize, Serialize};

use crate::{Result, SimErr};

/// Id of the client holding the validation split.
pub const DEV: &str = "dev";

/// Id of the client holding the test split.
pub const TEST: &str = "test";

/// A reference to one sample of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Key of the sample's features in the feature store.
    pub key: String,
    pub label: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demographic: Option<String>,
}

impl PartitionEntry {
    pub fn new(key: impl Into<String>, label: Target) -> Self {
        Self {
            key: key.into(),
            label,
            demographic: None,
        }
    }
}

/// The ordered samples of one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPartition {
    pub id: String,
    pub entries: Vec<PartitionEntry>,
}

/// The assignment of samples to clients for one fold.
///
/// Clients keep their insertion order, which is also the index order used by
/// client sampling and seeding. The reserved `dev` and `test` ids hold the
/// evaluation splits and are never treated as training clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Partition {
    clients: Vec<ClientPartition>,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `id` names an evaluation split.
    pub fn is_reserved(id: &str) -> bool {
        id == DEV || id == TEST
    }

    /// Appends a client.
    ///
    /// # Errors
    /// Returns `SimErr::DuplicateClient` if the id is already present.
    pub fn insert(&mut self, id: impl Into<String>, entries: Vec<PartitionEntry>) -> Result<()> {
        let id = id.into();
        if self.get(&id).is_some() {
            return Err(SimErr::DuplicateClient(id));
        }

        self.clients.push(ClientPartition { id, entries });
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&[PartitionEntry]> {
        self.clients
            .iter()
            .find(|client| client.id == id)
            .map(|client| client.entries.as_slice())
    }

    pub fn dev(&self) -> Option<&[PartitionEntry]> {
        self.get(DEV)
    }

    pub fn test(&self) -> Option<&[PartitionEntry]> {
        self.get(TEST)
    }

    /// Iterates the training clients in order, skipping the evaluation splits.
    pub fn training_clients(&self) -> impl Iterator<Item = &ClientPartition> {
        self.clients
            .iter()
            .filter(|client| !Self::is_reserved(&client.id))
    }

    pub fn training_client_ids(&self) -> Vec<String> {
        self.training_clients().map(|c| c.id.clone()).collect()
    }

    pub fn num_training_clients(&self) -> usize {
        self.training_clients().count()
    }

    /// Checks every label against the size of the label set.
    ///
    /// # Errors
    /// Returns `SimErr::InvalidLabel` naming the first offending sample.
    pub fn check_labels(&self, num_classes: usize) -> Result<()> {
        for entry in self.clients.iter().flat_map(|c| &c.entries) {
            if entry.label.check_range(num_classes).is_err() {
                return Err(SimErr::InvalidLabel {
                    key: entry.key.clone(),
                    num_classes,
                });
            }
        }

        Ok(())
    }

    /// Reads a partition from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let partition: Self = serde_json::from_str(&raw)?;

        let mut seen = std::collections::HashSet::new();
        for client in &partition.clients {
            if !seen.insert(client.id.as_str()) {
                return Err(SimErr::DuplicateClient(client.id.clone()));
            }
        }

        Ok(partition)
    }

    /// Writes the partition as pretty JSON.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<PartitionEntry> {
        (0..n)
            .map(|i| PartitionEntry::new(format!("s{i}"), Target::Class(i % 2)))
            .collect()
    }

    #[test]
    fn reserved_ids_are_not_training_clients() {
        let mut partition = Partition::new();
        partition.insert("0", entries(3)).unwrap();
        partition.insert(DEV, entries(2)).unwrap();
        partition.insert("1", entries(1)).unwrap();
        partition.insert(TEST, entries(2)).unwrap();

        assert_eq!(partition.training_client_ids(), ["0", "1"]);
        assert_eq!(partition.dev().map(<[_]>::len), Some(2));
        assert_eq!(partition.test().map(<[_]>::len), Some(2));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut partition = Partition::new();
        partition.insert("0", entries(1)).unwrap();

        assert!(matches!(
            partition.insert("0", entries(1)),
            Err(SimErr::DuplicateClient(id)) if id == "0"
        ));
    }

    #[test]
    fn json_layout() {
        let raw = r#"[
            { "id": "0", "entries": [{ "key": "a", "label": 1 }] },
            { "id": "test", "entries": [{ "key": "b", "label": 0, "demographic": "f" }] }
        ]"#;

        let partition: Partition = serde_json::from_str(raw).unwrap();
        assert_eq!(partition.get("0").unwrap()[0].label, Target::Class(1));
        assert_eq!(partition.test().unwrap()[0].demographic.as_deref(), Some("f"));
    }

    #[test]
    fn label_check() {
        let mut partition = Partition::new();
        partition.insert("0", entries(4)).unwrap();

        assert!(partition.check_labels(2).is_ok());
        assert!(matches!(
            partition.check_labels(1),
            Err(SimErr::InvalidLabel { key, .. }) if key == "s1"
        ));
    }
}
