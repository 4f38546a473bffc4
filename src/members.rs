//! Listing of the tools, prompts and resources a server declares.

use std::fmt;

use tracing::warn;

use crate::mcp::{Prompt, Resource, Session, SessionResult, Tool};

const RULE_WIDTH: usize = 50;
const SECTION_RULE_WIDTH: usize = 30;

/// One named member of a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Tool or prompt name, or resource display name.
    pub name: String,
    /// Description, if the server gave one.
    pub description: Option<String>,
}

impl From<&Tool> for Member {
    fn from(tool: &Tool) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
        }
    }
}

impl From<&Prompt> for Member {
    fn from(prompt: &Prompt) -> Self {
        Self {
            name: prompt.name.clone(),
            description: prompt.description.clone(),
        }
    }
}

impl From<&Resource> for Member {
    fn from(resource: &Resource) -> Self {
        Self {
            name: resource.display_name().to_string(),
            description: resource.description.clone(),
        }
    }
}

/// The outcome of listing one kind of member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    /// Members in discovery order.
    Listed(Vec<Member>),
    /// The listing failed with this message.
    Failed(String),
}

impl Section {
    fn from_result<T>(kind: &str, result: SessionResult<Vec<T>>) -> Self
    where
        for<'a> Member: From<&'a T>,
    {
        match result {
            Ok(items) => Self::Listed(items.iter().map(Member::from).collect()),
            Err(e) => {
                warn!(kind, error = %e, "Listing failed");
                Self::Failed(e.to_string())
            }
        }
    }
}

/// Everything a server declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Members {
    /// Declared tools.
    pub tools: Section,
    /// Declared prompts.
    pub prompts: Section,
    /// Declared resources.
    pub resources: Section,
}

impl Members {
    /// Lists tools, prompts and resources.
    ///
    /// A failing section is recorded rather than aborting the listing.
    pub async fn discover(session: &Session) -> Self {
        Self {
            tools: Section::from_result("tools", session.list_tools().await),
            prompts: Section::from_result("prompts", session.list_prompts().await),
            resources: Section::from_result("resources", session.list_resources().await),
        }
    }

    /// Renders the listing printed by `--members`.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

fn write_section(f: &mut fmt::Formatter<'_>, title: &str, section: &Section) -> fmt::Result {
    match section {
        Section::Listed(members) if members.is_empty() => {
            writeln!(f, "\n{title}: None available")
        }
        Section::Listed(members) => {
            writeln!(f, "\n{title} ({}):", members.len())?;
            writeln!(f, "{}", "-".repeat(SECTION_RULE_WIDTH))?;
            for member in members {
                let description = member.description.as_deref().unwrap_or("No description");
                writeln!(f, "  > {} - {description}", member.name)?;
            }
            Ok(())
        }
        Section::Failed(message) => writeln!(f, "\n{title}: Error - {message}"),
    }
}

impl fmt::Display for Members {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MCP Server Members")?;
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        write_section(f, "TOOLS", &self.tools)?;
        write_section(f, "PROMPTS", &self.prompts)?;
        write_section(f, "RESOURCES", &self.resources)?;
        writeln!(f, "\n{}", "=".repeat(RULE_WIDTH))
    }
}
