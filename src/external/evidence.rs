//! Evidence output: one JSON file per placed card.

use std::fs;
use std::path::{Path, PathBuf};

use super::{EvidenceWriter, PlacedCard};
use crate::error::ExternalError;
use crate::store::atomic::write_json_atomic;

/// Writes `<dir>/<card_id>.json` for every placed card.
///
/// Rewriting the same card replaces the file atomically, so a retried
/// organizer attempt leaves exactly one record.
#[derive(Debug, Clone)]
pub struct JsonEvidenceWriter {
    dir: PathBuf,
}

impl JsonEvidenceWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl EvidenceWriter for JsonEvidenceWriter {
    fn store(&self, placed: &PlacedCard) -> Result<(), ExternalError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| ExternalError::Unavailable(format!("evidence dir {}: {}", self.dir.display(), e)))?;
        let path = self.dir.join(format!("{}.json", placed.card.id));
        write_json_atomic(&path, placed)
            .map_err(|e| ExternalError::RequestFailed(format!("write {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::Card;
    use crate::scheduler::{TaskClass, TaskKind};
    use crate::store::{BriefSection, Placement};
    use chrono::Utc;
    use tempfile::TempDir;

    fn placed(id: &str) -> PlacedCard {
        PlacedCard {
            card: Card {
                id: id.to_string(),
                result_id: "res-t1".to_string(),
                task_id: "t1".to_string(),
                argument: "Prices rise".to_string(),
                kind: TaskKind::Support,
                class: TaskClass::Stock,
                tag: "Tariffs raise prices".to_string(),
                author: "Amiti".to_string(),
                year: "2019".to_string(),
                source_title: "NBER".to_string(),
                url: "https://nber.org/w25672".to_string(),
                text: "Full pass-through of tariffs to domestic prices.".to_string(),
                semantic_hint: "pass-through".to_string(),
                created_at: Utc::now(),
            },
            placement: Placement {
                section: BriefSection::Arguments,
                argument: "Prices rise".to_string(),
                group: "pass-through".to_string(),
                inserted: true,
            },
        }
    }

    #[test]
    fn test_store_writes_one_file_per_card() {
        let dir = TempDir::new().unwrap();
        let writer = JsonEvidenceWriter::new(dir.path().join("evidence"));
        writer.store(&placed("res-t1-c1")).unwrap();
        writer.store(&placed("res-t1-c1")).unwrap();
        writer.store(&placed("res-t1-c2")).unwrap();

        let files: Vec<_> = fs::read_dir(writer.dir()).unwrap().collect();
        assert_eq!(files.len(), 2);

        let raw = fs::read_to_string(writer.dir().join("res-t1-c1.json")).unwrap();
        let back: PlacedCard = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.card.author, "Amiti");
    }
}
