//! The shared tag→content note board skills and the orchestrator use to leave
//! state for future turns.
//!
//! Rendered into the system prompt by [`crate::prompt::PromptBuilder`] as a
//! sorted markdown section, so ordering is always by tag name, not insertion
//! order.

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Thread-safe `tag -> content` map. Cloning a `Scratchpad` clones the
/// `Arc`-free inner lock's current contents into a fresh, independent map —
/// use [`Scratchpad::new`] once per agent and share it via `Arc` if multiple
/// owners need the same instance.
#[derive(Debug, Default)]
pub struct Scratchpad {
    entries: RwLock<BTreeMap<String, String>>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn set(&self, tag: impl Into<String>, content: impl Into<String>) {
        self.entries.write().insert(tag.into(), content.into());
    }

    pub fn remove(&self, tag: &str) -> Option<String> {
        self.entries.write().remove(tag)
    }

    pub fn get(&self, tag: &str) -> Option<String> {
        self.entries.read().get(tag).cloned()
    }

    /// A defensive snapshot of every entry, tag-sorted.
    pub fn all(&self) -> BTreeMap<String, String> {
        self.entries.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Render as a markdown section, entries sorted by tag. Returns an empty
    /// string when there's nothing to show, so callers can unconditionally
    /// append it without an extra blank section.
    pub fn render(&self) -> String {
        let entries = self.entries.read();
        if entries.is_empty() {
            return String::new();
        }

        let mut out = String::from("## Scratchpad\n\n");
        for (tag, content) in entries.iter() {
            out.push_str(&format!("### {tag}\n{content}\n\n"));
        }
        out.trim_end().to_string()
    }
}
