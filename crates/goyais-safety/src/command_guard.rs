// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use crate::GuardError;

const SHELL_METACHARACTERS: &[&str] = &["\n", ";", "&&", "||", "|", ">", "<", "$(", "`"];
const BLOCKED_PATTERNS: &[&str] = &["rm -rf /", "shutdown", "reboot", "mkfs", ":(){:|:&};:"];
const ALLOWED_COMMANDS: &[&str] = &["pwd", "ls", "cat", "rg", "git"];
const READ_ONLY_GIT_SUBCOMMANDS: &[&str] = &["status", "diff", "show", "log", "branch", "rev-parse"];
const ALLOWED_LS_FLAGS: &[&str] = &[
    "-a",
    "-l",
    "-la",
    "-al",
    "--all",
    "--human-readable",
    "--color=never",
];

/// Vet a raw command string and return an argv safe to execute without a
/// shell.
///
/// Anything that could chain, redirect, or substitute is rejected outright;
/// the surviving argv is then checked against the read-only verb allowlist
/// and per-verb flag rules. The returned tokens are passed to the process
/// spawner directly — no `sh -c` anywhere downstream.
pub fn ensure_safe_command(command: &str) -> Result<Vec<String>, GuardError> {
    let normalized = command.trim();
    if normalized.is_empty() {
        return Err(blocked("command is required"));
    }

    let lowered = normalized.to_lowercase();
    for pattern in BLOCKED_PATTERNS {
        if lowered.contains(pattern) {
            return Err(blocked(format!("blocked command pattern: {pattern}")));
        }
    }
    if SHELL_METACHARACTERS.iter().any(|m| normalized.contains(m)) {
        return Err(blocked("shell operators are not allowed"));
    }

    let tokens = shlex::split(normalized).ok_or_else(|| blocked("command parsing failed"))?;
    if tokens.is_empty() {
        return Err(blocked("command is required"));
    }

    let head = tokens[0].to_lowercase();
    if !ALLOWED_COMMANDS.contains(&head.as_str()) {
        return Err(blocked(format!("command is not allowed: {head}")));
    }

    match head.as_str() {
        "pwd" => {
            if tokens.len() > 1 {
                return Err(blocked("pwd does not accept arguments"));
            }
        }
        "ls" => {
            for arg in &tokens[1..] {
                if arg.starts_with('-') && !ALLOWED_LS_FLAGS.contains(&arg.as_str()) {
                    return Err(blocked(format!("ls flag is not allowed: {arg}")));
                }
            }
        }
        "cat" => {
            if tokens.len() < 2 {
                return Err(blocked("cat requires a file path"));
            }
            for arg in &tokens[1..] {
                if arg.starts_with('-') {
                    return Err(blocked(format!("cat flag is not allowed: {arg}")));
                }
            }
        }
        // ripgrep is allowed for read-only search workflows.
        "rg" => {}
        "git" => {
            if tokens.len() < 2 {
                return Err(blocked("git requires a subcommand"));
            }
            let subcommand = tokens[1].to_lowercase();
            if !READ_ONLY_GIT_SUBCOMMANDS.contains(&subcommand.as_str()) {
                return Err(blocked(format!(
                    "git subcommand is not allowed: {subcommand}"
                )));
            }
        }
        _ => unreachable!("head already checked against allowlist"),
    }

    Ok(tokens)
}

/// Shape test used by the risk classifier: does this command string look like
/// one of the read-only invocations the guard would accept?
///
/// Deliberately stricter than [`ensure_safe_command`] on `git` (only
/// `git status` counts as obviously read-only for risk purposes).
pub fn is_read_only_command(command: &str) -> bool {
    let command = command.trim();
    if command.is_empty() {
        return false;
    }
    if SHELL_METACHARACTERS.iter().any(|m| command.contains(m)) {
        return false;
    }
    let Some(tokens) = shlex::split(command) else {
        return false;
    };
    if tokens.is_empty() {
        return false;
    }
    match tokens[0].to_lowercase().as_str() {
        "pwd" | "ls" => true,
        "cat" | "rg" => tokens.len() >= 2,
        "git" => tokens.len() >= 2 && tokens[1].eq_ignore_ascii_case("status"),
        _ => false,
    }
}

fn blocked(message: impl Into<String>) -> GuardError {
    GuardError::CommandBlocked(message.into())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_allowed_commands_pass() {
        assert_eq!(ensure_safe_command("pwd").unwrap(), vec!["pwd"]);
        assert_eq!(
            ensure_safe_command("git status").unwrap(),
            vec!["git", "status"]
        );
        assert_eq!(
            ensure_safe_command("cat README.md").unwrap(),
            vec!["cat", "README.md"]
        );
    }

    #[test]
    fn quoting_is_posix() {
        let argv = ensure_safe_command("rg \"fn main\" src").unwrap();
        assert_eq!(argv, vec!["rg", "fn main", "src"]);
    }

    #[test]
    fn shell_operators_are_rejected() {
        for cmd in [
            "ls; rm x",
            "ls && pwd",
            "ls | wc -l",
            "cat a > b",
            "cat `whoami`",
            "ls $(pwd)",
            "ls\npwd",
        ] {
            assert!(ensure_safe_command(cmd).is_err(), "should reject: {cmd}");
        }
    }

    #[test]
    fn blocked_patterns_are_rejected() {
        assert!(ensure_safe_command("git rm -rf /").is_err());
        assert!(ensure_safe_command("shutdown now").is_err());
    }

    #[test]
    fn head_outside_allowlist_is_rejected() {
        for cmd in ["python x.py", "bash -c ls", "curl http://x", "make"] {
            assert!(ensure_safe_command(cmd).is_err(), "should reject: {cmd}");
        }
    }

    #[test]
    fn pwd_with_arguments_is_rejected() {
        assert!(ensure_safe_command("pwd -P").is_err());
    }

    #[test]
    fn ls_flag_allowlist_is_enforced() {
        assert!(ensure_safe_command("ls -la src").is_ok());
        assert!(ensure_safe_command("ls --color=never").is_ok());
        assert!(ensure_safe_command("ls -R").is_err());
    }

    #[test]
    fn cat_flags_are_rejected() {
        assert!(ensure_safe_command("cat -n file").is_err());
        assert!(ensure_safe_command("cat").is_err());
    }

    #[test]
    fn git_subcommands_are_restricted() {
        assert!(ensure_safe_command("git log -5").is_ok());
        assert!(ensure_safe_command("git rev-parse HEAD").is_ok());
        assert!(ensure_safe_command("git push origin main").is_err());
        assert!(ensure_safe_command("git checkout -b x").is_err());
        assert!(ensure_safe_command("git").is_err());
    }

    #[test]
    fn unbalanced_quote_is_a_parse_failure() {
        assert!(ensure_safe_command("cat \"unterminated").is_err());
    }

    #[test]
    fn read_only_shape_test() {
        assert!(is_read_only_command("pwd"));
        assert!(is_read_only_command("ls -la"));
        assert!(is_read_only_command("cat notes.md"));
        assert!(is_read_only_command("rg TODO src"));
        assert!(is_read_only_command("git status"));
        assert!(!is_read_only_command("git diff"));
        assert!(!is_read_only_command("cat"));
        assert!(!is_read_only_command("rg"));
        assert!(!is_read_only_command("ls | head"));
        assert!(!is_read_only_command(""));
    }
}
