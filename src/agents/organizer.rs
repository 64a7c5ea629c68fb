//! Organizer stage: files cards into the brief and steers the producer.
//!
//! Each card is placed under its argument and semantic group, then handed
//! to the evidence writer. Every `analysis_interval` newly placed cards,
//! the organizer asks the LLM where the brief is thin and writes up to
//! [`MAX_FEEDBACK_PER_ANALYSIS`] feedback items for the strategy agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::consumer::{Stage, StageContext};
use super::error::{AgentError, AgentResult};
use super::types::{Card, Feedback, FeedbackKind};
use crate::external::{offload, EvidenceWriter, PlacedCard, TextGenerator};
use crate::prompts::build_analysis_prompt;
use crate::store::{PrepSession, TaskQueue};
use crate::utils::parse_json_array;

/// Default number of placed cards between brief analyses.
pub const DEFAULT_ANALYSIS_INTERVAL: usize = 3;

pub const MAX_FEEDBACK_PER_ANALYSIS: usize = 2;

/// Reads one feedback entry. Accepts the kind under `type` or `kind`.
pub fn feedback_from_entry(entry: &Value) -> Result<Feedback, String> {
    let kind = entry
        .get("type")
        .or_else(|| entry.get("kind"))
        .and_then(Value::as_str)
        .ok_or_else(|| "feedback entry has no type".to_string())?
        .parse::<FeedbackKind>()?;
    let message = entry
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| "feedback entry has no message".to_string())?;
    let intent = entry
        .get("suggested_intent")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim();
    Ok(Feedback::new(kind, message, intent))
}

/// The organizer stage.
pub struct OrganizerStage {
    generator: Arc<dyn TextGenerator>,
    evidence: Arc<dyn EvidenceWriter>,
    analysis_interval: usize,
}

impl OrganizerStage {
    pub fn new(generator: Arc<dyn TextGenerator>, evidence: Arc<dyn EvidenceWriter>) -> Self {
        Self {
            generator,
            evidence,
            analysis_interval: DEFAULT_ANALYSIS_INTERVAL,
        }
    }

    /// Sets how many placed cards trigger an analysis. Zero disables analysis.
    pub fn with_analysis_interval(mut self, interval: usize) -> Self {
        self.analysis_interval = interval;
        self
    }

    /// Asks the LLM for feedback on the brief and writes what it returns.
    async fn analyze(&self, ctx: &StageContext<'_>) -> AgentResult<usize> {
        let brief = ctx.session.brief().load()?;
        let prompt = build_analysis_prompt(ctx.session.resolution(), ctx.session.side(), &brief.outline());
        let generator = self.generator.clone();
        let response = offload(move || generator.generate(&prompt)).await??;
        let entries: Vec<Value> = parse_json_array(&response)?;

        let mut written = 0;
        for entry in &entries {
            if written >= MAX_FEEDBACK_PER_ANALYSIS {
                break;
            }
            match feedback_from_entry(entry) {
                Ok(feedback) => {
                    ctx.session.feedback().enqueue(&feedback)?;
                    ctx.state.push_action(format!("Feedback ({}): {}", feedback.kind, feedback.message));
                    ctx.session.log_event(
                        "organizer",
                        "feedback",
                        json!({"feedback_id": feedback.id, "type": feedback.kind.to_string(), "message": feedback.message}),
                    );
                    written += 1;
                }
                Err(reason) => warn!(reason = %reason, "Dropping malformed feedback entry"),
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl Stage for OrganizerStage {
    type Input = Card;

    fn name(&self) -> &str {
        "organizer"
    }

    fn input_queue(&self, session: &PrepSession) -> Arc<TaskQueue<Card>> {
        session.cards().clone()
    }

    fn describe(&self, card: &Card) -> String {
        card.tag.clone()
    }

    async fn process(&self, card: &Card, ctx: &StageContext<'_>) -> AgentResult<()> {
        ctx.state.set_direction(format!("Organizing: {}", card.argument));
        let placement = ctx.session.brief().place_card(card)?;

        let placed = PlacedCard {
            card: card.clone(),
            placement: placement.clone(),
        };
        let evidence = self.evidence.clone();
        offload(move || evidence.store(&placed)).await??;

        // A card seen here is not yet in the completion log, so this is its
        // first successful pass even when an earlier attempt already filed it.
        if !placement.inserted {
            debug!(card_id = %card.id, "Card already in brief from an earlier attempt");
        }

        info!(card_id = %card.id, argument = %placement.argument, group = %placement.group, "Card placed");
        ctx.state.push_action(format!("Placed: {} → {}", card.tag, placement.group));
        ctx.session.log_event(
            "organizer",
            "card_placed",
            json!({"card_id": card.id, "argument": placement.argument, "group": placement.group}),
        );

        if self.analysis_interval == 0 {
            return Ok(());
        }
        let total = ctx.session.brief().load()?.total_cards();
        if total % self.analysis_interval != 0 {
            return Ok(());
        }

        // The card is already filed; a failed analysis must not send it back for retry.
        match self.analyze(ctx).await {
            Ok(written) => {
                ctx.state.record_created(written as u64);
                info!(total_cards = total, feedback = written, "Brief analyzed");
                Ok(())
            }
            Err(AgentError::Store(e)) => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Brief analysis failed");
                ctx.session.log_event("organizer", "analysis_failed", json!({"error": e.to_string()}));
                Ok(())
            }
        }
    }
}
