use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Slice of `raw` between the first `{` and the last `}`. Models often wrap
/// JSON in prose or code fences.
pub fn outermost_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::outermost_json_object;

    #[test]
    fn strips_code_fences_and_prose() {
        let raw = "Claro:\n```json\n{\"label\": \"valid\", \"confidence\": 0.9}\n```";
        assert_eq!(
            outermost_json_object(raw),
            Some("{\"label\": \"valid\", \"confidence\": 0.9}")
        );
    }

    #[test]
    fn missing_braces_yield_none() {
        assert_eq!(outermost_json_object("no json here"), None);
        assert_eq!(outermost_json_object("} reversed {"), None);
    }
}
