//! Token usage accounting.

use serde::{Deserialize, Serialize};

/// Token usage for a generation (or the cumulative total for a session).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_every_counter() {
        let mut total = Usage::new(10, 5);
        total.merge(&Usage::new(3, 2));
        assert_eq!(total, Usage { prompt_tokens: 13, completion_tokens: 7, total_tokens: 20 });
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let usage: Usage = serde_json::from_str(r#"{"total_tokens": 4}"#)
            .expect("partial usage should parse");
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.total_tokens, 4);
    }
}
