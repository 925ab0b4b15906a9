// ABOUTME: Command-line tokenizer and permission tiers for chat commands
// ABOUTME: Supports double-quote grouping and backslash escapes, strips the command prefix

use std::fmt;

/// A parsed command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub label: String,
    pub args: Vec<String>,
}

/// Splits `input` into a label and arguments.
///
/// A backslash takes the next character literally, double quotes group
/// (and are dropped), spaces and tabs separate tokens outside quotes, and
/// empty tokens are skipped. `prefix` is stripped from the first token.
/// Returns `None` when there is no token at all.
pub fn parse_command_line(input: &str, prefix: &str) -> Option<CommandLine> {
    let mut tokens = tokenize(input).into_iter();
    let first = tokens.next()?;
    let label = first
        .strip_prefix(prefix)
        .map(str::to_string)
        .unwrap_or(first);
    Some(CommandLine {
        label,
        args: tokens.collect(),
    })
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => quoted = !quoted,
            ' ' | '\t' if !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Who may invoke a command. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    #[default]
    Member,
    GroupAdmin,
    BotAdmin,
}

impl Permission {
    /// Effective tier of a caller.
    pub fn of(is_bot_admin: bool, is_group_admin: bool) -> Self {
        if is_bot_admin {
            Permission::BotAdmin
        } else if is_group_admin {
            Permission::GroupAdmin
        } else {
            Permission::Member
        }
    }

    /// Whether a caller holding `held` may run a command requiring `self`.
    pub fn allows(self, held: Permission) -> bool {
        held >= self
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::Member => "member",
            Permission::GroupAdmin => "group admin",
            Permission::BotAdmin => "bot admin",
        })
    }
}
