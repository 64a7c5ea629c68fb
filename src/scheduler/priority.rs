//! Priority interleaving of pending work.
//!
//! The selector splits pending items into the priority stream (`stock`) and
//! everything else, then alternates between them at a fixed ratio so the
//! priority stream dominates a tight time budget without starving the rest.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::task::QueueItem;

/// Default number of priority items taken per round.
pub const DEFAULT_PRIORITY_RATIO: usize = 4;

/// Default number of other-class items taken per round.
pub const DEFAULT_OTHER_RATIO: usize = 1;

/// Interleave ratio between the priority stream and all other classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Priority items taken per round.
    pub priority_ratio: usize,
    /// Other-class items taken per round.
    pub other_ratio: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            priority_ratio: DEFAULT_PRIORITY_RATIO,
            other_ratio: DEFAULT_OTHER_RATIO,
        }
    }
}

impl SchedulerConfig {
    pub fn new(priority_ratio: usize, other_ratio: usize) -> Self {
        Self {
            priority_ratio,
            other_ratio,
        }
    }
}

/// Pure ordering function over a pending set.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrioritySelector {
    config: SchedulerConfig,
}

impl PrioritySelector {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Orders a pending set.
    ///
    /// Each stream keeps its input order, with creation time as the primary
    /// key (the sort is stable, so equal timestamps keep input order). Ids
    /// that appear more than once are yielded only the first time. Rounds of
    /// `priority_ratio` priority items followed by `other_ratio` other items
    /// repeat until both streams are exhausted.
    pub fn order<T: QueueItem>(&self, items: Vec<T>) -> Vec<T> {
        let mut seen = HashSet::with_capacity(items.len());
        let (mut priority, mut other): (Vec<T>, Vec<T>) = items
            .into_iter()
            .filter(|item| seen.insert(item.id().to_string()))
            .partition(|item| item.priority_class().is_priority());

        priority.sort_by_key(|item| item.created_at());
        other.sort_by_key(|item| item.created_at());

        let total = priority.len() + other.len();
        let mut ordered = Vec::with_capacity(total);
        let mut priority = priority.into_iter();
        let mut other = other.into_iter();

        // A zero ratio would never make progress on that stream; treat it as 1.
        let take_priority = self.config.priority_ratio.max(1);
        let take_other = self.config.other_ratio.max(1);

        while priority.len() + other.len() > 0 {
            ordered.extend(priority.by_ref().take(take_priority));
            ordered.extend(other.by_ref().take(take_other));
        }

        ordered
    }

    /// Picks the next item for a caller that selects one item per poll.
    ///
    /// `position` carries the round across polls: up to `priority_ratio`
    /// priority picks, then up to
    /// `other_ratio` other picks, then a new round. When the wanted stream
    /// has nothing eligible the other one is used, and a priority pick past
    /// its quota opens a new round.
    ///
    /// `eligible` is called in scheduled order and the first `true` is
    /// taken, so it may claim the item as a side effect.
    pub fn next_in_round<T, F>(&self, position: &mut RoundPosition, items: Vec<T>, mut eligible: F) -> Option<T>
    where
        T: QueueItem,
        F: FnMut(&T) -> bool,
    {
        let take_priority = self.config.priority_ratio.max(1);
        let take_other = self.config.other_ratio.max(1);

        let (priority, other): (Vec<T>, Vec<T>) = self
            .order(items)
            .into_iter()
            .partition(|item| item.priority_class().is_priority());

        let mut priority = priority.into_iter();
        let mut other = other.into_iter();
        let picked = if position.priority < take_priority {
            priority
                .find(|item| eligible(item))
                .map(|item| (true, item))
                .or_else(|| other.find(|item| eligible(item)).map(|item| (false, item)))
        } else {
            other
                .find(|item| eligible(item))
                .map(|item| (false, item))
                .or_else(|| priority.find(|item| eligible(item)).map(|item| (true, item)))
        };

        let (is_priority, item) = picked?;
        if is_priority {
            if position.priority < take_priority {
                position.priority += 1;
            } else {
                *position = RoundPosition { priority: 1, other: 0 };
            }
        } else {
            position.other += 1;
            if position.other >= take_other {
                *position = RoundPosition::default();
            }
        }
        Some(item)
    }
}

/// How far a caller is into the current interleave round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundPosition {
    /// Priority picks made this round.
    pub priority: usize,
    /// Other-class picks made this round.
    pub other: usize,
}
