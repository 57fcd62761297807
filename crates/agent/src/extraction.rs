use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use leadbot_core::domain::lead::Lead;
use leadbot_core::domain::machinery::MachineryType;
use leadbot_core::slots::{self, normalize_token, SlotId};

use crate::llm::{outermost_json_object, LlmClient};

/// Value the extractor uses when the user explicitly declines to answer.
pub const NOT_PROVIDED_SENTINEL: &str = "NOT_PROVIDED";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub slot: String,
    pub value: Value,
}

impl RawCandidate {
    pub fn new(slot: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { slot: slot.into(), value: value.into() }
    }

    pub fn not_provided(slot: impl Into<String>) -> Self {
        Self::new(slot, NOT_PROVIDED_SENTINEL)
    }

    pub fn is_not_provided(&self) -> bool {
        self.value.as_str().map(|value| normalize_token(value) == "not_provided").unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedIntent {
    #[default]
    ProvideInformation,
    InventoryQuestion,
    Other,
}

impl DetectedIntent {
    pub fn parse(raw: &str) -> Self {
        match normalize_token(raw).as_str() {
            "provide_information" | "provide_info" | "information" => Self::ProvideInformation,
            "inventory_question" | "inventory" | "catalog" | "inventario" => {
                Self::InventoryQuestion
            }
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractionResult {
    pub candidate_slots: Vec<RawCandidate>,
    pub detected_intent: DetectedIntent,
}

pub struct ExtractionRequest<'a> {
    pub text: &'a str,
    pub lead: &'a Lead,
    pub last_asked_slot: Option<SlotId>,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction backend failed: {0}")]
    Backend(String),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait SlotExtractor: Send + Sync {
    async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<ExtractionResult, ExtractionError>;
}

#[derive(Deserialize)]
struct WireExtraction {
    #[serde(default)]
    candidate_slots: Vec<Value>,
    #[serde(default)]
    detected_intent: Option<String>,
}

/// Parses a completion into candidates. Anything outside the outermost braces
/// is ignored; output that is not the expected object yields no extraction.
/// Malformed entries are dropped one by one and the rest are kept.
pub fn parse_extraction(raw: &str) -> ExtractionResult {
    let Some(json) = outermost_json_object(raw) else {
        debug!(event_name = "extraction.output.empty", "completion carried no JSON object");
        return ExtractionResult::default();
    };

    match serde_json::from_str::<WireExtraction>(json) {
        Ok(wire) => ExtractionResult {
            candidate_slots: candidates(wire.candidate_slots),
            detected_intent: wire
                .detected_intent
                .as_deref()
                .map(DetectedIntent::parse)
                .unwrap_or_default(),
        },
        Err(error) => {
            debug!(
                event_name = "extraction.output.malformed",
                error = %error,
                "completion JSON did not match the extraction shape"
            );
            ExtractionResult::default()
        }
    }
}

fn candidates(entries: Vec<Value>) -> Vec<RawCandidate> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<RawCandidate>(entry) {
            Ok(candidate) => Some(candidate),
            Err(error) => {
                debug!(
                    event_name = "extraction.candidate.malformed",
                    error = %error,
                    "skipping candidate without slot and value"
                );
                None
            }
        })
        .collect()
}

pub struct LlmSlotExtractor {
    llm: Arc<dyn LlmClient>,
}

impl LlmSlotExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn prompt(request: &ExtractionRequest<'_>) -> String {
        let machinery = request.lead.machinery_type();
        let mut prompt = String::from(
            "Extraes datos de un cliente que solicita maquinaria ligera. Devuelve solo los campos \
             que el mensaje menciona de forma explícita.\n\nCampos disponibles:\n",
        );

        for schema in slots::canonical_order(machinery) {
            let _ = writeln!(prompt, "- {}: {}", schema.slot.key(), schema.domain.describe());
        }
        if machinery.is_none() {
            prompt.push_str(
                "\nSi el mensaje menciona un tipo de maquinaria, también puedes extraer sus campos técnicos:\n",
            );
            for machinery in MachineryType::ALL {
                let keys: Vec<String> = slots::technical_schemas(machinery)
                    .iter()
                    .map(|schema| format!("{} ({})", schema.slot.key(), schema.domain.describe()))
                    .collect();
                let _ = writeln!(prompt, "- {}: {}", machinery.key(), keys.join("; "));
            }
        }

        let snapshot = serde_json::to_string(&request.lead.flatten()).unwrap_or_default();
        let _ = write!(
            prompt,
            "\nDatos ya registrados: {snapshot}\nÚltima pregunta del asistente: {}\n\n\
             Si el cliente se niega o dice que no tiene el dato, usa el valor \"{NOT_PROVIDED_SENTINEL}\".\n\
             Si el mensaje pregunta por inventario, catálogo o disponibilidad, usa \
             detected_intent = \"inventory_question\"; si no, \"provide_information\".\n\
             Responde únicamente con JSON:\n\
             {{\"candidate_slots\": [{{\"slot\": \"<campo>\", \"value\": <valor>}}], \"detected_intent\": \"<intención>\"}}\n\n\
             Mensaje del cliente:\n{}",
            request.last_asked_slot.map(SlotId::key).unwrap_or("ninguna"),
            request.text,
        );
        prompt
    }
}

#[async_trait]
impl SlotExtractor for LlmSlotExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<ExtractionResult, ExtractionError> {
        let raw = self
            .llm
            .complete(&Self::prompt(request))
            .await
            .map_err(|error| ExtractionError::Backend(error.to_string()))?;
        Ok(parse_extraction(&raw))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use leadbot_core::domain::lead::Lead;
    use leadbot_core::domain::machinery::MachineryType;
    use leadbot_core::slots::SlotId;

    use super::{
        parse_extraction, DetectedIntent, ExtractionRequest, LlmSlotExtractor, RawCandidate,
        SlotExtractor,
    };
    use crate::testing::ScriptedLlm;

    #[test]
    fn parses_candidates_and_intent_from_noisy_output() {
        let raw = r#"Aquí está:
```json
{"candidate_slots": [{"slot": "first_name", "value": "Juan"}, {"slot": "email", "value": "NOT_PROVIDED"}],
 "detected_intent": "provide_information"}
```"#;
        let result = parse_extraction(raw);

        assert_eq!(result.detected_intent, DetectedIntent::ProvideInformation);
        assert_eq!(
            result.candidate_slots,
            vec![
                RawCandidate::new("first_name", "Juan"),
                RawCandidate::new("email", "NOT_PROVIDED"),
            ]
        );
        assert!(result.candidate_slots[1].is_not_provided());
        assert!(!result.candidate_slots[0].is_not_provided());
    }

    #[test]
    fn malformed_or_empty_output_is_no_extraction() {
        for raw in ["", "sin datos", "{\"candidate_slots\": \"oops\"}", "{ broken"] {
            let result = parse_extraction(raw);
            assert!(result.candidate_slots.is_empty(), "{raw}");
            assert_eq!(result.detected_intent, DetectedIntent::ProvideInformation);
        }
    }

    #[test]
    fn malformed_candidates_are_skipped_without_losing_the_rest() {
        let raw = json!({
            "candidate_slots": [
                {"slot": "first_name", "value": "Juan"},
                {"slot": "email"},
                "phone=3312345678",
                {"value": "Venta"},
                {"slot": 7, "value": "x"},
                {"slot": "city", "value": "Guadalajara"}
            ],
            "detected_intent": "inventory_question"
        })
        .to_string();

        let result = parse_extraction(&raw);

        assert_eq!(
            result.candidate_slots,
            vec![
                RawCandidate::new("first_name", "Juan"),
                RawCandidate::new("city", "Guadalajara"),
            ]
        );
        assert_eq!(result.detected_intent, DetectedIntent::InventoryQuestion);
    }

    #[test]
    fn inventory_intent_aliases_are_recognized() {
        let result = parse_extraction(r#"{"detected_intent": "inventario"}"#);
        assert_eq!(result.detected_intent, DetectedIntent::InventoryQuestion);
        assert_eq!(DetectedIntent::parse("small_talk"), DetectedIntent::Other);
    }

    #[test]
    fn prompt_lists_branch_slots_once_machinery_is_known() {
        let mut lead = Lead::default();
        let request =
            ExtractionRequest { text: "Hola", lead: &lead, last_asked_slot: Some(SlotId::Phone) };
        let open = LlmSlotExtractor::prompt(&request);
        assert!(open.contains("- generator: activity"));
        assert!(open.contains("Última pregunta del asistente: phone"));

        lead.select_machinery(MachineryType::Welder);
        let request = ExtractionRequest { text: "Hola", lead: &lead, last_asked_slot: None };
        let branch = LlmSlotExtractor::prompt(&request);
        assert!(branch.contains("- amperage: number in A between 30 and 1000"));
        assert!(!branch.contains("- generator:"));
        assert!(branch.contains("\"machinery_type\":\"welder\""));
    }

    #[tokio::test]
    async fn llm_extractor_returns_parsed_candidates() {
        let llm = Arc::new(ScriptedLlm::replying(&[&json!({
            "candidate_slots": [{"slot": "phone", "value": "3312345678"}],
            "detected_intent": "provide_information"
        })
        .to_string()]));
        let extractor = LlmSlotExtractor::new(llm.clone());
        let lead = Lead::default();

        let result = extractor
            .extract(&ExtractionRequest { text: "3312345678", lead: &lead, last_asked_slot: None })
            .await
            .expect("extract");

        assert_eq!(result.candidate_slots, vec![RawCandidate::new("phone", "3312345678")]);
        assert!(llm.prompts()[0].ends_with("3312345678"));
    }
}
