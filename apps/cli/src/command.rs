//! REPL 命令解析与执行

use std::collections::HashSet;

use anyhow::{bail, Context};
use tm_core::TagSet;
use tm_durable::RegistryManager;

pub const HELP: &str = "Available commands:
  use <owner>       - Switch the current owner key
  add <name>...     - Normalize tag names (adds references)
  remove <id>...    - Release references by tag id
  ids <name>...     - Resolve names to tag ids
  names <id>...     - Resolve tag ids to names
  tags              - Show all tags with counts
  export            - Print the full tag set as JSON
  import <json>     - Replace the tag set with the given JSON
  clear             - Delete all tags of the current owner
  actors            - List active registries
  deactivate        - Hibernate the current owner's registry
  help              - Show this help message
  quit / exit       - Exit the CLI";

/// REPL 命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Use(String),
    Add(Vec<String>),
    Remove(Vec<String>),
    Ids(Vec<String>),
    Names(Vec<String>),
    Tags,
    Export,
    Import(String),
    Clear,
    Actors,
    Deactivate,
    Quit,
}

/// 解析一行输入
pub fn parse(input: &str) -> anyhow::Result<Command> {
    let input = input.trim();
    let (command, rest) = input
        .split_once(char::is_whitespace)
        .map_or((input, ""), |(c, r)| (c, r.trim()));
    let args = || -> Vec<String> { rest.split_whitespace().map(str::to_string).collect() };

    let parsed = match command {
        "help" => Command::Help,
        "use" => match args().as_slice() {
            [owner] => Command::Use(owner.clone()),
            _ => bail!("usage: use <owner>"),
        },
        "add" | "remove" | "ids" | "names" if rest.is_empty() => {
            bail!("usage: {} <value>...", command)
        }
        "add" => Command::Add(args()),
        "remove" => Command::Remove(args()),
        "ids" => Command::Ids(args()),
        "names" => Command::Names(args()),
        "tags" => Command::Tags,
        "export" => Command::Export,
        "import" if rest.is_empty() => bail!("usage: import <json>"),
        "import" => Command::Import(rest.to_string()),
        "clear" => Command::Clear,
        "actors" => Command::Actors,
        "deactivate" => Command::Deactivate,
        "quit" | "exit" => Command::Quit,
        other => bail!("Unknown command: {}", other),
    };
    Ok(parsed)
}

/// 交互会话: 当前租户 + 管理器
pub struct Session {
    manager: RegistryManager,
    owner: String,
}

impl Session {
    pub fn new(manager: RegistryManager, owner: impl Into<String>) -> Self {
        Self {
            manager,
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 执行命令, 返回要打印的输出
    pub async fn execute(&mut self, command: Command) -> anyhow::Result<String> {
        let owner = self.owner.clone();
        let output = match command {
            Command::Help => HELP.to_string(),
            Command::Use(next) => {
                self.owner = next;
                format!("Switched to owner '{}'", self.owner)
            }
            Command::Add(names) => {
                let ids = self
                    .manager
                    .normalize_tags(&owner, names.into_iter().collect(), HashSet::new())
                    .await?;
                serde_json::to_string_pretty(&ids)?
            }
            Command::Remove(ids) => {
                self.manager
                    .normalize_tags(&owner, HashSet::new(), ids.into_iter().collect())
                    .await?;
                "OK".to_string()
            }
            Command::Ids(names) => {
                let ids = self
                    .manager
                    .get_tag_ids(&owner, names.into_iter().collect())
                    .await?;
                serde_json::to_string_pretty(&ids)?
            }
            Command::Names(ids) => {
                let names = self
                    .manager
                    .denormalize_tags(&owner, ids.into_iter().collect())
                    .await?;
                serde_json::to_string_pretty(&names)?
            }
            Command::Tags => {
                let mut tags: Vec<_> = self.manager.get_tags(&owner).await?.into_iter().collect();
                if tags.is_empty() {
                    return Ok("Tags: (none)".to_string());
                }
                tags.sort();
                tags.iter()
                    .map(|(name, count)| format!("  {:<24} {}", name, count))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Command::Export => {
                let tags = self.manager.get_exportable_tags(&owner).await?;
                serde_json::to_string_pretty(&tags)?
            }
            Command::Import(json) => {
                let tags: TagSet = serde_json::from_str(&json).context("invalid tag set JSON")?;
                let count = tags.len();
                self.manager.rebuild(&owner, tags).await?;
                format!("Rebuilt '{}' with {} tags", owner, count)
            }
            Command::Clear => {
                self.manager.clear(&owner).await?;
                format!("Cleared '{}'", owner)
            }
            Command::Actors => {
                let keys = self.manager.active_keys().await;
                if keys.is_empty() {
                    "Active registries: (none)".to_string()
                } else {
                    format!("Active registries: {}", keys.join(", "))
                }
            }
            Command::Deactivate => {
                if self.manager.deactivate(&owner).await {
                    format!("Deactivated '{}'", owner)
                } else {
                    format!("'{}' was not active", owner)
                }
            }
            Command::Quit => "Goodbye!".to_string(),
        };
        Ok(output)
    }
}
