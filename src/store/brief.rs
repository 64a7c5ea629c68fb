//! The organized brief: cards grouped by argument and semantic group.
//!
//! The organizer is the only writer. Every save is an atomic replace, so the
//! strategy agent can read a consistent snapshot at any time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::atomic::{read_json, write_json_atomic};
use crate::agents::types::{Card, Side};
use crate::error::StoreError;
use crate::scheduler::TaskKind;

/// Group name for cards without a semantic hint.
pub const DEFAULT_GROUP: &str = "general";

/// Top-level brief section a card belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BriefSection {
    Arguments,
    Answers,
}

impl BriefSection {
    pub fn for_kind(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Answer => BriefSection::Answers,
            _ => BriefSection::Arguments,
        }
    }
}

/// Card as stored inside the brief.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BriefCard {
    pub id: String,
    pub tag: String,
    pub author: String,
    pub year: String,
    pub source_title: String,
    pub url: String,
    pub text: String,
}

impl From<&Card> for BriefCard {
    fn from(card: &Card) -> Self {
        Self {
            id: card.id.clone(),
            tag: card.tag.clone(),
            author: card.author.clone(),
            year: card.year.clone(),
            source_title: card.source_title.clone(),
            url: card.url.clone(),
            text: card.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SemanticGroup {
    /// The claim this group of cards makes together.
    pub claim: String,
    pub cards: Vec<BriefCard>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArgumentEntry {
    pub name: String,
    pub semantic_groups: BTreeMap<String, SemanticGroup>,
}

impl ArgumentEntry {
    pub fn card_count(&self) -> usize {
        self.semantic_groups.values().map(|g| g.cards.len()).sum()
    }
}

/// Where a card landed in the brief.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub section: BriefSection,
    pub argument: String,
    pub group: String,
    /// False when the card was already present.
    pub inserted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Brief {
    pub resolution: String,
    pub side: Side,
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgumentEntry>,
    #[serde(default)]
    pub answers: BTreeMap<String, ArgumentEntry>,
}

impl Brief {
    pub fn new(resolution: impl Into<String>, side: Side) -> Self {
        Self {
            resolution: resolution.into(),
            side,
            arguments: BTreeMap::new(),
            answers: BTreeMap::new(),
        }
    }

    fn section_mut(&mut self, section: BriefSection) -> &mut BTreeMap<String, ArgumentEntry> {
        match section {
            BriefSection::Arguments => &mut self.arguments,
            BriefSection::Answers => &mut self.answers,
        }
    }

    /// Returns true if a card with this id is anywhere in the brief.
    pub fn contains_card(&self, card_id: &str) -> bool {
        self.arguments
            .values()
            .chain(self.answers.values())
            .flat_map(|entry| entry.semantic_groups.values())
            .any(|group| group.cards.iter().any(|c| c.id == card_id))
    }

    /// Places a card under its argument and semantic group.
    ///
    /// Placing the same card id twice leaves the brief unchanged.
    pub fn place_card(&mut self, card: &Card) -> Placement {
        let section = BriefSection::for_kind(card.kind);
        let hint = card.semantic_hint.trim();
        let group_key = if hint.is_empty() { DEFAULT_GROUP } else { hint }.to_string();
        let argument = if card.argument.trim().is_empty() {
            "General".to_string()
        } else {
            card.argument.clone()
        };

        if self.contains_card(&card.id) {
            return Placement {
                section,
                argument,
                group: group_key,
                inserted: false,
            };
        }

        let entry = self
            .section_mut(section)
            .entry(argument.clone())
            .or_insert_with(|| ArgumentEntry {
                name: argument.clone(),
                semantic_groups: BTreeMap::new(),
            });
        let claim = if hint.is_empty() { argument.clone() } else { hint.to_string() };
        let group = entry
            .semantic_groups
            .entry(group_key.clone())
            .or_insert_with(|| SemanticGroup {
                claim,
                cards: Vec::new(),
            });
        group.cards.push(BriefCard::from(card));

        Placement {
            section,
            argument,
            group: group_key,
            inserted: true,
        }
    }

    pub fn total_cards(&self) -> usize {
        self.arguments
            .values()
            .chain(self.answers.values())
            .map(ArgumentEntry::card_count)
            .sum()
    }

    /// First argument with fewer than `min_cards` cards, with its count.
    pub fn thinnest_argument(&self, min_cards: usize) -> Option<(&str, usize)> {
        self.arguments
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.card_count()))
            .find(|(_, count)| *count < min_cards)
    }

    pub fn argument_names(&self) -> Vec<&str> {
        self.arguments.keys().map(String::as_str).collect()
    }

    pub fn answer_names(&self) -> Vec<&str> {
        self.answers.keys().map(String::as_str).collect()
    }

    /// Compact outline used in prompts: groups with card counts and the first two tags.
    pub fn outline(&self) -> String {
        let mut lines = Vec::new();
        for (title, section) in [("ARGUMENTS", &self.arguments), ("ANSWERS", &self.answers)] {
            if section.is_empty() {
                continue;
            }
            lines.push(format!("\n## {}", title));
            for (name, entry) in section {
                lines.push(format!("\n### {}", name));
                for (group_name, group) in &entry.semantic_groups {
                    lines.push(format!("  - {}: {} cards", group_name, group.cards.len()));
                    for card in group.cards.iter().take(2) {
                        let tag: String = card.tag.chars().take(50).collect();
                        lines.push(format!("    * {}", tag));
                    }
                }
            }
        }
        if lines.is_empty() {
            "(Empty brief)".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Brief document on disk.
#[derive(Debug)]
pub struct BriefStore {
    path: PathBuf,
    resolution: String,
    side: Side,
    write_lock: Mutex<()>,
}

impl BriefStore {
    pub fn new(path: impl Into<PathBuf>, resolution: impl Into<String>, side: Side) -> Self {
        Self {
            path: path.into(),
            resolution: resolution.into(),
            side,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the brief, or an empty one if nothing was written yet.
    pub fn load(&self) -> Result<Brief, StoreError> {
        Ok(read_json(&self.path)?.unwrap_or_else(|| Brief::new(&self.resolution, self.side)))
    }

    pub fn save(&self, brief: &Brief) -> Result<(), StoreError> {
        write_json_atomic(&self.path, brief)
    }

    /// Loads, places the card, and saves if anything changed.
    pub fn place_card(&self, card: &Card) -> Result<Placement, StoreError> {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut brief = self.load()?;
        let placement = brief.place_card(card);
        if placement.inserted {
            self.save(&brief)?;
        }
        Ok(placement)
    }
}
