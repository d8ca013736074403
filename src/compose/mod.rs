//! Command composition: compound splitting and namespace rewriting
//!
//! Pure string logic, no I/O. A raw command line is decomposed into
//! ordered sub-commands at `&&`, `||` and `;` boundaries, each sub-command
//! keeps the leading `KEY=VALUE` environment prefix of the original line,
//! and `rewrite_for_namespace` turns a sub-command into the effective
//! `nsenter` invocation for a given leader PID.
//!
//! This is deliberately naive leftmost-match scanning, not a shell
//! grammar: nesting, subshells, pipes and quoting are out of scope, and
//! an operator inside quotes still splits.

use std::collections::HashMap;


/// Connective between two adjacent sub-commands in a compound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `&&` — run the next sub-command only on exit code 0.
    And,
    /// `||` — run the next sub-command only on non-zero exit.
    Or,
    /// `;` — always run the next sub-command.
    Seq,
}

impl Operator {
    pub fn token(self) -> &'static str {
        match self {
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Seq => ";",
        }
    }
}

/// One element of a decomposed command line.
///
/// `env_prefix` holds the leading `KEY=VALUE` tokens stripped from the
/// front of the original line (re-applied to every sub-command), `body`
/// is the command itself, and `next` is the operator joining this
/// sub-command to the one after it (`None` for the last).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCommand {
    pub env_prefix: Vec<String>,
    pub body: String,
    pub next: Option<Operator>,
}

impl SubCommand {
    /// The sub-command as a plain command line, env prefix re-attached.
    pub fn command_line(&self) -> String {
        if self.env_prefix.is_empty() {
            self.body.clone()
        } else if self.body.is_empty() {
            self.env_prefix.join(" ")
        } else {
            format!("{} {}", self.env_prefix.join(" "), self.body)
        }
    }
}

/// Split leading `KEY=VALUE` assignments off the front of a command.
///
/// A token belongs to the prefix iff it contains `=` and every token
/// before it did too; the first token without `=` ends the prefix and
/// starts the remainder (rejoined with single spaces). Purely lexical:
/// values containing `=` are preserved as part of their token. When no
/// token contains `=` at all the input is returned unchanged.
pub fn split_env_prefix(cmd: &str) -> (Vec<String>, String) {
    let tokens: Vec<&str> = cmd.split_whitespace().collect();
    if !tokens.iter().any(|t| t.contains('=')) {
        return (Vec::new(), cmd.to_string());
    }
    let split = tokens
        .iter()
        .position(|t| !t.contains('='))
        .unwrap_or(tokens.len());
    let prefix = tokens[..split].iter().map(|t| t.to_string()).collect();
    (prefix, tokens[split..].join(" "))
}

/// Find the earliest operator occurrence in `cmd`.
///
/// Candidates are checked in the order AND, OR, SEQ and a later candidate
/// only wins with a strictly smaller index, so AND/OR take precedence
/// over SEQ on an index tie.
fn find_operator(cmd: &str) -> Option<(Operator, usize)> {
    let mut best: Option<(Operator, usize)> = None;
    for op in [Operator::And, Operator::Or, Operator::Seq] {
        if let Some(idx) = cmd.find(op.token()) {
            if best.map_or(true, |(_, b)| idx < b) {
                best = Some((op, idx));
            }
        }
    }
    best
}

/// Decompose a command line into its ordered sub-commands.
///
/// With no operator present the result is a single entry carrying the
/// whole (trimmed) line. Otherwise the environment prefix is stripped
/// once and cloned onto every sub-command, and the remainder is split
/// repeatedly at the leftmost operator.
pub fn split_compound(cmd: &str) -> Vec<SubCommand> {
    let cmd = cmd.trim();
    if find_operator(cmd).is_none() {
        let (env_prefix, body) = split_env_prefix(cmd);
        return vec![SubCommand {
            env_prefix,
            body,
            next: None,
        }];
    }

    let (env_prefix, mut rest) = split_env_prefix(cmd);
    let mut out = Vec::new();
    while let Some((op, idx)) = find_operator(&rest) {
        let pre = rest[..idx].trim().to_string();
        let post = rest[idx + op.token().len()..].trim().to_string();
        out.push(SubCommand {
            env_prefix: env_prefix.clone(),
            body: pre,
            next: Some(op),
        });
        rest = post;
    }
    out.push(SubCommand {
        env_prefix,
        body: rest,
        next: None,
    });
    out
}

/// Replace `$KEY` occurrences with values from the container environment.
///
/// One substring replacement per known key, in map order, exactly as the
/// container saw its own environment. Substituted text is not protected
/// from later keys; with real process environments this does not occur
/// in practice.
pub fn substitute_env(cmd: &str, env: &HashMap<String, String>) -> String {
    let mut out = cmd.to_string();
    for (key, value) in env {
        let needle = format!("${key}");
        if out.contains(&needle) {
            out = out.replace(&needle, value);
        }
    }
    out
}

/// Produce the effective host-side command for one sub-command.
///
/// Container environment variables are substituted first, the env prefix
/// is re-split from the substituted text, and the namespace-entry prefix
/// is woven between prefix and body:
/// `<ENV..> nsenter -m -u -i -n -p -t <leader> <body>`.
///
/// The leader PID is a parameter: callers look it up fresh for every
/// invocation because the container's leader process can change between
/// calls.
pub fn rewrite_for_namespace(
    sub: &SubCommand,
    env: &HashMap<String, String>,
    leader_pid: u32,
) -> String {
    let substituted = substitute_env(&sub.command_line(), env);
    let (prefix, body) = split_env_prefix(&substituted);
    let nsenter = format!("nsenter -m -u -i -n -p -t {leader_pid}");
    let prefix_joined = prefix.join(" ");

    let mut parts: Vec<&str> = Vec::new();
    if !prefix_joined.is_empty() {
        parts.push(&prefix_joined);
    }
    parts.push(&nsenter);
    if !body.is_empty() {
        parts.push(&body);
    }
    parts.join(" ")
}
