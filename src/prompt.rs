//! Prompt Builder: assembles a turn's system prompt from ordered sections,
//! tracking where the cacheable prefix ends.
//!
//! A pure function of its inputs — it holds no state of its own — so it is
//! built fresh every turn from the agent's registered sections, loaded
//! memories, skill fragments, and current scratchpad snapshot.

/// One assembled section, in final render order.
struct Section {
    name: String,
    content: String,
    cacheable: bool,
}

/// The output of [`PromptBuilder::build`]: the concatenated system prompt
/// plus the cache-breakpoint byte offset, if any.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub system: String,
    /// Byte offset into `system` marking the end of the cacheable prefix.
    /// `None` when there was no cacheable/dynamic split to report (either
    /// everything was cacheable, or nothing was).
    pub cache_breakpoint: Option<usize>,
}

/// Assembles sections in a fixed order: base prompt, project guidance,
/// named extra sections (registration order), cross-session memories, skill
/// prompt fragments, scratchpad render — the first three cacheable, the
/// last three dynamic.
#[derive(Default)]
pub struct PromptBuilder {
    sections: Vec<Section>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a section under `name` with `content`, marked cacheable or
    /// dynamic. Sections render in the order they are added.
    pub fn add_section(&mut self, name: impl Into<String>, content: impl Into<String>, cacheable: bool) -> &mut Self {
        self.sections.push(Section {
            name: name.into(),
            content: content.into(),
            cacheable,
        });
        self
    }

    /// Convenience for the fixed cacheable sections: base system prompt.
    pub fn base_prompt(&mut self, content: impl Into<String>) -> &mut Self {
        self.add_section("base", content, true)
    }

    /// Convenience for the fixed cacheable sections: project guidance.
    pub fn project_guidance(&mut self, content: impl Into<String>) -> &mut Self {
        self.add_section("project_guidance", content, true)
    }

    /// Cross-session memories loaded via the persistence contract for the
    /// agent's working directory. Dynamic: can change between turns.
    pub fn memories(&mut self, memories: &[crate::persistence::MemoryRecord]) -> &mut Self {
        if memories.is_empty() {
            return self;
        }
        let body = memories
            .iter()
            .map(|m| format!("[{}] {}", m.tag, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.add_section("memories", body, false)
    }

    /// Skill-provided prompt fragments, collected from every registered
    /// `PromptFragmentProvider`. Dynamic.
    pub fn fragments(&mut self, fragments: &[(String, String)]) -> &mut Self {
        if fragments.is_empty() {
            return self;
        }
        let body = fragments
            .iter()
            .map(|(name, content)| format!("=== {name} ===\n{content}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.add_section("fragments", body, false)
    }

    /// The current Scratchpad render. Dynamic.
    pub fn scratchpad(&mut self, rendered: impl Into<String>) -> &mut Self {
        let rendered = rendered.into();
        if rendered.is_empty() {
            return self;
        }
        self.add_section("scratchpad", rendered, false)
    }

    /// Concatenates every non-empty section's body with a blank-line
    /// separator, computing the cache breakpoint when both a cacheable and
    /// a dynamic section are present.
    pub fn build(&self) -> BuiltPrompt {
        let mut system = String::new();
        let mut cacheable_end: Option<usize> = None;
        let mut saw_cacheable = false;
        let mut saw_dynamic = false;

        for section in &self.sections {
            if section.content.is_empty() {
                continue;
            }

            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&section.content);

            if section.cacheable {
                saw_cacheable = true;
                cacheable_end = Some(system.len());
            } else {
                saw_dynamic = true;
            }
        }

        let cache_breakpoint = if saw_cacheable && saw_dynamic { cacheable_end } else { None };

        BuiltPrompt { system, cache_breakpoint }
    }
}
