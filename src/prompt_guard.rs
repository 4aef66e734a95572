//! Prompt and response guardrails
//!
//! Prompts are checked before any model call; responses are stripped of
//! shell-looking content before they are stored or shown.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::GuardError;
use crate::patterns::{PROMPT_DANGER_PATTERNS, SENSITIVE_DATA};

/// Placeholder for a removed shell code block
pub const REMOVED_CODE_BLOCK: &str = "[REMOVED: shell code block]";
/// Placeholder for a removed inline backtick command
pub const REMOVED_INLINE_COMMAND: &str = "[REMOVED: inline command]";
/// Placeholder for a removed `$()` or `${}` expansion
pub const REMOVED_EXPANSION: &str = "[REMOVED: shell expansion]";

/// Redaction rules applied in order: fenced blocks first so their contents
/// are not matched piecemeal by the inline rules. An unclosed shell fence
/// runs to the end of the text.
static REDACTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?is)```[ \t]*(bash|sh|shell|zsh|console)\b.*?(?:```|\z)", REMOVED_CODE_BLOCK),
        (r"\$\([^)]*\)", REMOVED_EXPANSION),
        (r"\$\{[^}]*\}", REMOVED_EXPANSION),
        (r"`[^`\n]+`", REMOVED_INLINE_COMMAND),
    ]
    .into_iter()
    .filter_map(|(pattern, placeholder)| Regex::new(pattern).ok().map(|re| (re, placeholder)))
    .collect()
});

/// Reject prompts that ask for dangerous commands or sensitive data
pub fn validate_prompt(prompt: &str) -> Result<(), GuardError> {
    for set in [&*PROMPT_DANGER_PATTERNS, &*SENSITIVE_DATA] {
        if let Some(reason) = set.matches(prompt) {
            warn!(set = set.name(), rule = %reason, "prompt rejected");
            return Err(GuardError::safety(format!(
                "Prompt blocked ({}): {}",
                set.name(),
                reason
            )));
        }
    }
    Ok(())
}

/// Strip shell-looking content from a model response
///
/// Shell-tagged fenced blocks, `$()` / `${}` expansions and backtick inline
/// commands are each replaced with a placeholder. Removed content is not
/// kept anywhere.
pub fn sanitize_response(response: &str) -> String {
    let mut text = response.to_string();
    for (re, placeholder) in REDACTIONS.iter() {
        if re.is_match(&text) {
            debug!(pattern = re.as_str(), "redacting response content");
            text = re.replace_all(&text, *placeholder).into_owned();
        }
    }
    text
}
