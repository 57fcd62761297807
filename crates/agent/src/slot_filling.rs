use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use leadbot_core::config::{ConversationConfig, LlmConfig};
use leadbot_core::domain::lead::Lead;
use leadbot_core::domain::machinery::MachineryType;
use leadbot_core::domain::value::SlotCandidate;
use leadbot_core::slots::{self, SlotId};

use crate::extraction::{
    DetectedIntent, ExtractionError, ExtractionRequest, ExtractionResult, RawCandidate,
    SlotExtractor,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextStep {
    Ask(SlotId),
    Complete,
}

impl NextStep {
    pub fn for_lead(lead: &Lead) -> Self {
        if slots::is_complete(lead) {
            return Self::Complete;
        }
        match slots::next_unset(lead) {
            Some(slot) => Self::Ask(slot),
            None => Self::Complete,
        }
    }

    pub fn slot(self) -> Option<SlotId> {
        match self {
            Self::Ask(slot) => Some(slot),
            Self::Complete => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// Candidates were merged into a copy of the lead. `applied` lists the
    /// slots that changed, in the order they were applied.
    Filled { lead: Lead, applied: Vec<SlotId>, next: NextStep },
    /// The user asked about stock; the pending question stays as it was.
    InventoryQuestion { pending: Option<SlotId> },
    /// Extraction kept failing; re-ask without touching the lead.
    Fallback { pending: Option<SlotId> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractionPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub call_timeout: Duration,
}

impl ExtractionPolicy {
    pub fn from_config(conversation: &ConversationConfig, llm: &LlmConfig) -> Self {
        Self {
            max_retries: conversation.extraction_max_retries,
            initial_backoff: Duration::from_millis(conversation.extraction_backoff_ms),
            call_timeout: Duration::from_secs(llm.timeout_secs.max(1)),
        }
    }
}

pub struct SlotFillingEngine {
    extractor: Arc<dyn SlotExtractor>,
    policy: ExtractionPolicy,
}

impl SlotFillingEngine {
    pub fn new(extractor: Arc<dyn SlotExtractor>, policy: ExtractionPolicy) -> Self {
        Self { extractor, policy }
    }

    pub async fn fill(&self, text: &str, lead: &Lead, last_asked_slot: Option<SlotId>) -> FillOutcome {
        let request = ExtractionRequest { text, lead, last_asked_slot };
        let pending = last_asked_slot.or_else(|| slots::next_unset(lead));

        let Some(result) = self.extract_with_retry(&request).await else {
            return FillOutcome::Fallback { pending };
        };

        if result.detected_intent == DetectedIntent::InventoryQuestion {
            return FillOutcome::InventoryQuestion { pending: last_asked_slot };
        }

        let (lead, applied) = merge_candidates(lead, &result.candidate_slots);
        let next = NextStep::for_lead(&lead);
        FillOutcome::Filled { lead, applied, next }
    }

    async fn extract_with_retry(&self, request: &ExtractionRequest<'_>) -> Option<ExtractionResult> {
        let mut backoff = self.policy.initial_backoff;
        for attempt in 0..=self.policy.max_retries {
            let outcome =
                match tokio::time::timeout(self.policy.call_timeout, self.extractor.extract(request))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ExtractionError::Timeout(self.policy.call_timeout)),
                };

            match outcome {
                Ok(result) => return Some(result),
                Err(error) => {
                    warn!(
                        event_name = "slot_filling.extraction.failed",
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_retries + 1,
                        error = %error,
                        "slot extraction attempt failed"
                    );
                }
            }

            if attempt < self.policy.max_retries {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }
        None
    }
}

/// Applies extracted candidates to a copy of `lead`.
///
/// Only unset slots change. A machinery type is applied before any technical
/// candidate so that the new branch can receive values from the same message.
/// Unknown slots, slots outside the current branch, out-of-domain values and
/// a declined machinery type are dropped.
pub fn merge_candidates(lead: &Lead, candidates: &[RawCandidate]) -> (Lead, Vec<SlotId>) {
    let mut updated = lead.clone();
    let mut applied = Vec::new();

    for candidate in candidates {
        if SlotId::parse(&candidate.slot) != Some(SlotId::MachineryType)
            || candidate.is_not_provided()
        {
            continue;
        }
        let machinery = candidate.value.as_str().and_then(MachineryType::parse);
        if let Some(machinery) = machinery {
            if updated.select_machinery(machinery) {
                applied.push(SlotId::MachineryType);
            }
        }
    }

    for candidate in candidates {
        let Some(slot) = SlotId::parse(&candidate.slot) else {
            continue;
        };
        if slot == SlotId::MachineryType {
            continue;
        }
        let Some(schema) = slots::schema_for(slot, updated.machinery_type()) else {
            continue;
        };

        let value = if candidate.is_not_provided() {
            SlotCandidate::NotProvided
        } else {
            match schema.domain.validate(&candidate.value) {
                Some(input) => SlotCandidate::Value(input),
                None => continue,
            }
        };

        if updated.fill(slot, value) {
            applied.push(slot);
        }
    }

    (updated, applied)
}
