//! Shell command safety analysis
//!
//! A lexical pre-flight check applied when `SHELL_STRICT` is set: the
//! command string is split into tokens and matched against a small set of
//! destructive patterns. This is a guard rail against obviously
//! catastrophic commands reaching `sh -c`, not a sandbox.

use serde::Serialize;

/// The verdict for one analyzed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CommandVerdict {
    /// Nothing flagged
    Safe,
    /// Rejected; carries the offending token and the reason
    Rejected { token: String, reason: String },
}

impl CommandVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, CommandVerdict::Safe)
    }
}

/// Paths that must never be the target of a recursive delete.
const PROTECTED_DELETE_TARGETS: &[&str] = &["/", "/*", "/etc", "/usr", "/var", "/home", "~"];

/// Device files that redirection must not clobber.
const PROTECTED_DEVICES: &[&str] = &["/dev/sda", "/dev/sdb", "/dev/nvme0n1", "/dev/mem"];

/// Analyze a shell command string lexically.
///
/// Commands that fail to tokenize (unbalanced quotes) are rejected too:
/// a command the analyzer cannot read is a command it cannot clear.
pub fn analyze_command(command: &str) -> CommandVerdict {
    let Some(tokens) = shlex::split(command) else {
        return CommandVerdict::Rejected {
            token: command.to_string(),
            reason: "command could not be tokenized (unbalanced quotes?)".to_string(),
        };
    };

    // Fork bomb: the classic and its spaced variants collapse to this.
    let compact: String = command.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.contains(":(){:|:&};:") {
        return CommandVerdict::Rejected {
            token: ":(){ :|:& };:".to_string(),
            reason: "fork bomb".to_string(),
        };
    }

    for (i, token) in tokens.iter().enumerate() {
        if token == "rm" {
            let rest = &tokens[i + 1..];
            let recursive = rest
                .iter()
                .take_while(|t| t.starts_with('-'))
                .any(|t| t.contains('r') || t.contains('R'));
            if recursive {
                for target in rest.iter().filter(|t| !t.starts_with('-')) {
                    if PROTECTED_DELETE_TARGETS.contains(&target.as_str()) {
                        return CommandVerdict::Rejected {
                            token: format!("rm -r {target}"),
                            reason: format!("recursive delete of protected path '{target}'"),
                        };
                    }
                }
            }
        }
        if token == "mkfs" || token.starts_with("mkfs.") {
            return CommandVerdict::Rejected {
                token: token.clone(),
                reason: "filesystem formatting".to_string(),
            };
        }
        if token == "dd" {
            for arg in &tokens[i + 1..] {
                if let Some(target) = arg.strip_prefix("of=") {
                    if target.starts_with("/dev/") {
                        return CommandVerdict::Rejected {
                            token: arg.clone(),
                            reason: format!("dd writing directly to device '{target}'"),
                        };
                    }
                }
            }
        }
    }

    // Redirection over raw devices bypasses tokenized args.
    for device in PROTECTED_DEVICES {
        if command.contains(&format!("> {device}")) || command.contains(&format!(">{device}")) {
            return CommandVerdict::Rejected {
                token: (*device).to_string(),
                reason: format!("output redirection over device '{device}'"),
            };
        }
    }

    CommandVerdict::Safe
}
