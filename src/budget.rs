//! Token budget estimation for prompt assembly.
//!
//! Every stage that concatenates variable-length content into a prompt asks
//! this module whether the result still fits before calling the model. The
//! estimate is `chars / 4`: crude, but monotonic in the input length, which
//! is all the chunking and truncation logic relies on.
//!
//! The total budget is nominally split into system instructions, prompt
//! template, and content. Only the total and the content share are consulted
//! by callers; the other two are documentation of where the rest goes.

use serde::{Deserialize, Serialize};

/// Approximate characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Total tokens a single prompt may use.
pub const TOKEN_BUDGET_TOTAL: usize = 5000;
/// Reserved for system instructions.
pub const TOKEN_BUDGET_SYSTEM: usize = 500;
/// Reserved for the fixed prompt template.
pub const TOKEN_BUDGET_PROMPT: usize = 500;
/// Left for variable content.
pub const TOKEN_BUDGET_CONTENT: usize = 4000;

/// Estimate the token count of `text` with the default divisor.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Token budget split used by prompt builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub total: usize,
    pub system: usize,
    pub prompt: usize,
    pub content: usize,
    pub chars_per_token: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            total: TOKEN_BUDGET_TOTAL,
            system: TOKEN_BUDGET_SYSTEM,
            prompt: TOKEN_BUDGET_PROMPT,
            content: TOKEN_BUDGET_CONTENT,
            chars_per_token: CHARS_PER_TOKEN,
        }
    }
}

impl TokenBudget {
    /// Estimate tokens using this budget's divisor.
    pub fn estimate(&self, text: &str) -> usize {
        text.len() / self.chars_per_token.max(1)
    }

    /// Character allowance equivalent to `tokens`.
    pub fn chars_for(&self, tokens: usize) -> usize {
        tokens * self.chars_per_token.max(1)
    }

    /// Whether the three prompt parts together fit in `budget` tokens.
    pub fn fits(
        &self,
        content: &str,
        prompt_template: &str,
        system_instructions: &str,
        budget: usize,
    ) -> bool {
        let total = self.estimate(content)
            + self.estimate(prompt_template)
            + self.estimate(system_instructions);
        total <= budget
    }

    /// Whether the three prompt parts fit in the total budget.
    pub fn fits_total(&self, content: &str, prompt_template: &str, system_instructions: &str) -> bool {
        self.fits(content, prompt_template, system_instructions, self.total)
    }
}

/// Free-function form of [`TokenBudget::fits`] with the default divisor.
pub fn fits_budget(
    content: &str,
    prompt_template: &str,
    system_instructions: &str,
    budget: usize,
) -> bool {
    TokenBudget::default().fits(content, prompt_template, system_instructions, budget)
}
