//! `GenerationRequest`: the caller-supplied payload embedded in task metadata.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Url,
    InlineBase64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model_alias: String,
    /// `n` in spec §3, constrained to `[1, 10]` at validation (§4.4 step 5).
    pub count: u32,
    pub size: String,
    pub quality: Option<String>,
    pub style: Option<String>,
    pub response_format: ResponseFormat,
    pub webhook_url: Option<String>,
    pub webhook_headers: Option<serde_json::Value>,
    pub correlation_id: String,
}

impl GenerationRequest {
    /// Minimal, provider-agnostic schema check (spec §4.4 step 5).
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt must not be empty".into());
        }
        if !(1..=10).contains(&self.count) {
            return Err(format!("count must be in [1, 10], got {}", self.count));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> GenerationRequest {
        GenerationRequest {
            prompt: "a cat".into(),
            model_alias: "fast-image".into(),
            count: 2,
            size: "1024x1024".into(),
            quality: None,
            style: None,
            response_format: ResponseFormat::Url,
            webhook_url: None,
            webhook_headers: None,
            correlation_id: "corr-1".into(),
        }
    }

    #[test]
    fn rejects_empty_prompt() {
        let mut req = base();
        req.prompt = "  ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_count_out_of_range() {
        let mut req = base();
        req.count = 0;
        assert!(req.validate().is_err());
        req.count = 11;
        assert!(req.validate().is_err());
    }

    #[test]
    fn accepts_valid_request() {
        assert!(base().validate().is_ok());
    }
}
