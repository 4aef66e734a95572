//! Pattern matching for guardrails
//!
//! Holds the static deny-lists used by the command and prompt guardrails and
//! tests input text against them.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::warn;

/// A named set of disallowed command names and regex patterns
#[derive(Debug)]
pub struct PatternSet {
    /// Name used in rejection reasons
    name: &'static str,
    /// Command names rejected when they are the leading token
    commands: Vec<&'static str>,
    /// Case-insensitive patterns searched anywhere in the text
    patterns: Vec<Regex>,
}

impl PatternSet {
    /// Build a pattern set, compiling every pattern case-insensitively
    ///
    /// Patterns that fail to compile are logged and skipped.
    pub fn new(name: &'static str, commands: &[&'static str], patterns: &[&str]) -> Self {
        Self {
            name,
            commands: commands.to_vec(),
            patterns: patterns
                .iter()
                .filter_map(|p| match RegexBuilder::new(p).case_insensitive(true).build() {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(set = name, pattern = %p, error = %e, "skipping invalid pattern");
                        None
                    }
                })
                .collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of compiled patterns (invalid ones are not counted)
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Return the first rule in this set that matches `text`
    pub fn matches(&self, text: &str) -> Option<String> {
        matches_any(text, &self.commands, &self.patterns)
    }
}

/// Test `text` against literal command names and regex patterns
///
/// A literal matches when it equals the first whitespace-delimited token of
/// the text, or the whole trimmed text. Patterns are searched anywhere.
/// Returns the identifier of the first rule that fired.
pub fn matches_any(text: &str, commands: &[&str], patterns: &[Regex]) -> Option<String> {
    let trimmed = text.trim();
    let leading = trimmed.split_whitespace().next().unwrap_or("");

    if let Some(cmd) = commands
        .iter()
        .find(|cmd| **cmd == leading || **cmd == trimmed)
    {
        return Some(format!("command '{}'", cmd));
    }

    patterns
        .iter()
        .find(|re| re.is_match(text))
        .map(|re| format!("pattern '{}'", re.as_str()))
}

/// Commands that are never executed when they lead a command line
const DISALLOWED_COMMANDS: &[&str] = &[
    "rm", "rmdir", "shred", "mkfs", "dd", "fdisk", "parted", "chmod", "chown", "chgrp",
    "chattr", "sudo", "su", "doas", "pkexec", "passwd", "visudo", "kill", "killall", "pkill",
    "shutdown", "reboot", "halt", "poweroff", "iptables", "ip6tables", "nft", "ufw",
    "firewall-cmd",
];

/// Destructive or privilege-changing shapes, applied to commands and prompts
const DANGEROUS_PATTERNS: &[&str] = &[
    r"\brm\s+-[a-z]*[rf]",
    r"\brm\s+--(recursive|force)\b",
    r"\bmkfs(\.\w+)?\b",
    r"\bdd\s+if=",
    r">\s*/dev/(sd|nvme|hd)",
    r":\(\)\s*\{",
    r"\bchmod\s+(-\w+\s+)*([0-7]{3,4}|[ugoa]*[+=-][rwxst]+)\b",
    r"\bchown\s+",
    r"\b(curl|wget)\b[^|;]*\|\s*(sudo\s+)?(ba|z|k|da)?sh\b",
    r"/etc/(shadow|sudoers|passwd)\b",
    r"\.ssh/(id_\w+|authorized_keys)\b",
    r"\b(sudo|doas|pkexec)\s+",
    r"\bsu\s+(-|root\b)",
    r"\b(kill\s+-9|killall|pkill)\b",
    r"\b(iptables|ip6tables|nft|ufw|firewall-cmd)\b",
    r"\b(shutdown|reboot|poweroff)\b",
];

/// Requests for credentials or other secrets in natural-language prompts
const SENSITIVE_DATA_PATTERNS: &[&str] = &[
    r"\bpass(word|wd|phrase)s?\b",
    r"\b(private|secret|api|access|ssh)[\s_-]?keys?\b",
    r"\bid_(rsa|dsa|ecdsa|ed25519)\b",
    r"\b(auth|api|access|bearer)[\s_-]?tokens?\b",
    r"\bcredentials?(\s+files?)?\b",
    r"\.aws/credentials\b",
    r"/etc/(shadow|passwd|sudoers)\b",
    r"\.(bash|zsh|sh)_history\b",
    r"\b(shell|command|bash)\s+history\b",
];

/// Deny-list for shell command lines
pub static COMMAND_PATTERNS: LazyLock<PatternSet> =
    LazyLock::new(|| PatternSet::new("command", DISALLOWED_COMMANDS, DANGEROUS_PATTERNS));

/// Dangerous-command shapes as they appear inside prompts
pub static PROMPT_DANGER_PATTERNS: LazyLock<PatternSet> =
    LazyLock::new(|| PatternSet::new("dangerous-command", &[], DANGEROUS_PATTERNS));

/// Sensitive-data requests inside prompts
pub static SENSITIVE_DATA: LazyLock<PatternSet> =
    LazyLock::new(|| PatternSet::new("sensitive-data", &[], SENSITIVE_DATA_PATTERNS));
