//! JSON-lines replay scripts.
//!
//! Each non-blank line is one step:
//!
//! ```text
//! {"op":"attributes","kind":"channel","id":5,"attributes":{"displayName":"Lobby","orderKey":0}}
//! {"op":"notify","notification":{"type":"channel_added","id":5,"parent":0}}
//! ```
//!
//! Lines starting with `#` are comments.

use std::io::BufRead;

use anyhow::{Context, Result};
use serde::Deserialize;
use voxlink_core::{Attributes, EntityId, EntityKind, Notification};
use voxlink_session::{MemoryAttributeSource, Session};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Publish (or replace) the attributes the remote reports for an entity.
    Attributes {
        kind: EntityKind,
        id: EntityId,
        #[serde(default)]
        attributes: Attributes,
    },
    /// Deliver one inbound notification.
    Notify { notification: Notification },
}

pub fn parse_script(reader: impl BufRead) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let step = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid step on line {}", idx + 1))?;
        steps.push(step);
    }
    Ok(steps)
}

/// Apply steps in order on the calling thread, which acts as the session's
/// delivery context. Returns the number of notifications applied.
pub fn run(session: &Session, source: &MemoryAttributeSource, steps: Vec<Step>) -> usize {
    let mut applied = 0;
    for step in steps {
        match step {
            Step::Attributes { kind, id, attributes } => source.set(kind, id, attributes),
            Step::Notify { notification } => {
                session.apply(notification);
                applied += 1;
            }
        }
    }
    applied
}

/// Indented rendering of the channel tree.
pub fn render_tree(session: &Session) -> String {
    let mut out = String::new();
    for (id, depth) in session.tree().walk() {
        let name = session
            .channels()
            .peek(id)
            .map(|c| c.display_name())
            .unwrap_or_default();
        out.push_str(&format!("{}{} {}\n", "  ".repeat(depth), id, name));
    }
    out
}
