// SPDX-License-Identifier: AGPL-3.0-only
//! Ordered command rules. The first rule that matches decides; otherwise the service default does.

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;

use crate::document::RuleConfig;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Permit,
    #[default]
    Deny,
}

impl Verdict {
    pub fn is_permit(self) -> bool {
        self == Verdict::Permit
    }
}

/// Whether service-start attributes are added to or replace the NAS's own.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    #[default]
    Add,
    Replace,
}

#[derive(Debug, Clone)]
pub enum CommandRule {
    /// Exact command name; `args` is matched against everything after it.
    Command {
        name: String,
        args: Regex,
        verdict: Verdict,
    },
    /// Pattern over the whole normalized command line.
    Line { pattern: Regex, verdict: Verdict },
}

impl CommandRule {
    pub fn compile(config: &RuleConfig) -> Result<CommandRule> {
        match (&config.command, &config.line) {
            (Some(name), None) => {
                let name = normalize_command(name);
                if name.is_empty() || name.contains(' ') {
                    bail!("rule command must be a single word, got {name:?}");
                }
                let raw = config.args.as_deref().unwrap_or(".*");
                let args = compile_pattern(raw)
                    .with_context(|| format!("compiling args pattern {raw:?} for {name}"))?;
                Ok(CommandRule::Command {
                    name,
                    args,
                    verdict: config.verdict,
                })
            }
            (None, Some(line)) => {
                if config.args.is_some() {
                    bail!("rule with a line pattern cannot also set args");
                }
                let pattern = compile_pattern(line)
                    .with_context(|| format!("compiling line pattern {line:?}"))?;
                Ok(CommandRule::Line {
                    pattern,
                    verdict: config.verdict,
                })
            }
            (Some(_), Some(_)) => bail!("rule sets both command and line"),
            (None, None) => bail!("rule needs either command or line"),
        }
    }

    pub fn verdict(&self) -> Verdict {
        match self {
            CommandRule::Command { verdict, .. } | CommandRule::Line { verdict, .. } => *verdict,
        }
    }

    /// `line` must already be normalized.
    pub fn matches(&self, line: &str) -> bool {
        match self {
            CommandRule::Command { name, args, .. } => {
                let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
                cmd == name && args.is_match(rest)
            }
            CommandRule::Line { pattern, .. } => pattern.is_match(line),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleDecision {
    pub verdict: Verdict,
    /// Index of the deciding rule; `None` when the default applied.
    pub matched_rule: Option<usize>,
}

impl RuleDecision {
    pub fn allowed(&self) -> bool {
        self.verdict.is_permit()
    }
}

pub fn evaluate(rules: &[CommandRule], default: Verdict, command: &str) -> RuleDecision {
    let line = normalize_command(command);
    rules
        .iter()
        .position(|rule| rule.matches(&line))
        .map(|idx| RuleDecision {
            verdict: rules[idx].verdict(),
            matched_rule: Some(idx),
        })
        .unwrap_or(RuleDecision {
            verdict: default,
            matched_rule: None,
        })
}

/// Trims and collapses runs of whitespace to one space. Case is preserved.
pub fn normalize_command(cmd: &str) -> String {
    cmd.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn compile_pattern(raw: &str) -> Result<Regex> {
    let anchored = format!("^(?:{raw})$");
    Regex::new(&anchored).context("invalid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(verdict: Verdict, pattern: &str) -> CommandRule {
        CommandRule::compile(&RuleConfig {
            verdict,
            command: None,
            args: None,
            line: Some(pattern.into()),
        })
        .unwrap()
    }

    fn command(verdict: Verdict, name: &str, args: Option<&str>) -> CommandRule {
        CommandRule::compile(&RuleConfig {
            verdict,
            command: Some(name.into()),
            args: args.map(Into::into),
            line: None,
        })
        .unwrap()
    }

    #[test]
    fn normalizes_whitespace_and_keeps_case() {
        assert_eq!(normalize_command(" show  Run "), "show Run");
        assert_eq!(normalize_command("show\tint  Gi0/1"), "show int Gi0/1");
        assert_eq!(normalize_command("   "), "");
    }

    #[test]
    fn first_match_wins() {
        let rules = vec![
            line(Verdict::Deny, "show running-config"),
            line(Verdict::Permit, "show.*"),
        ];
        let denied = evaluate(&rules, Verdict::Deny, "show running-config");
        assert_eq!(denied.verdict, Verdict::Deny);
        assert_eq!(denied.matched_rule, Some(0));

        let permitted = evaluate(&rules, Verdict::Deny, "show interfaces");
        assert!(permitted.allowed());
        assert_eq!(permitted.matched_rule, Some(1));
    }

    #[test]
    fn no_match_falls_back_to_default() {
        let rules = vec![line(Verdict::Permit, "show.*")];
        let deny = evaluate(&rules, Verdict::Deny, "configure terminal");
        assert_eq!(deny.verdict, Verdict::Deny);
        assert_eq!(deny.matched_rule, None);
        assert!(evaluate(&rules, Verdict::Permit, "configure terminal").allowed());
        assert!(evaluate(&[], Verdict::Permit, "reload").allowed());
    }

    #[test]
    fn patterns_are_anchored() {
        let rules = vec![line(Verdict::Permit, "show")];
        assert!(!evaluate(&rules, Verdict::Deny, "show version").allowed());
        assert!(!evaluate(&rules, Verdict::Deny, "no show").allowed());
        assert!(evaluate(&rules, Verdict::Deny, "show").allowed());
    }

    #[test]
    fn command_rule_matches_exact_name_and_args() {
        let rules = vec![command(Verdict::Permit, "interface", Some("GigabitEthernet.*"))];
        assert!(evaluate(&rules, Verdict::Deny, "interface GigabitEthernet0/1").allowed());
        assert!(!evaluate(&rules, Verdict::Deny, "interface Loopback0").allowed());
        assert!(!evaluate(&rules, Verdict::Deny, "interfaces GigabitEthernet0/1").allowed());
    }

    #[test]
    fn command_rule_without_args_matches_any_arguments() {
        let rules = vec![command(Verdict::Deny, "reload", None)];
        assert_eq!(evaluate(&rules, Verdict::Permit, "reload").verdict, Verdict::Deny);
        assert_eq!(evaluate(&rules, Verdict::Permit, "reload in 5").verdict, Verdict::Deny);
        assert!(evaluate(&rules, Verdict::Permit, "reloaded").allowed());
    }

    #[test]
    fn matching_is_case_sensitive() {
        let rules = vec![line(Verdict::Permit, "show.*")];
        assert!(!evaluate(&rules, Verdict::Deny, "SHOW version").allowed());
    }

    #[test]
    fn malformed_rules_are_rejected() {
        let both = RuleConfig {
            verdict: Verdict::Permit,
            command: Some("show".into()),
            args: None,
            line: Some("show.*".into()),
        };
        assert!(CommandRule::compile(&both).is_err());

        let neither = RuleConfig {
            verdict: Verdict::Permit,
            command: None,
            args: None,
            line: None,
        };
        assert!(CommandRule::compile(&neither).is_err());

        let bad_regex = RuleConfig {
            verdict: Verdict::Permit,
            command: None,
            args: None,
            line: Some("show (".into()),
        };
        assert!(CommandRule::compile(&bad_regex).is_err());
    }
}
