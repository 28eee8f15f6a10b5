//! Context assembly for prompt injection.
//!
//! Three builders with different budgets and selection policies:
//! [`AgentMemory::build_context`] (ranked, token-budgeted),
//! [`AgentMemory::inject_context`] (relevant + recent sections under a
//! character ceiling), and [`AgentMemory::post_compaction_context`]
//! (type-priority ordering for rebuilding an agent's working state).

use chrono::TimeZone;

use super::{open_stored, AgentMemory};
use crate::analysis::tokenize;
use crate::models::{Episode, RecallOptions};
use crate::{current_timestamp_ms, Result};

/// Character ceiling for a single episode inside injected context.
const EPISODE_TRUNCATE_CHARS: usize = 300;
/// Search depth for the relevant-memories section.
const INJECT_SEARCH_LIMIT: usize = 15;
/// Search depth for `build_context`.
const BUILD_SEARCH_LIMIT: usize = 20;
/// Characters budgeted per token when converting a token budget to a
/// character ceiling.
const CHARS_PER_TOKEN: f64 = 3.5;

/// Options for [`AgentMemory::inject_context`].
#[derive(Debug, Clone)]
pub struct InjectOptions {
    /// Token budget; the rendered string is capped at `max_tokens × 3.5`
    /// characters.
    pub max_tokens: usize,
    /// Episodes carrying any of these tags are dropped.
    pub exclude_tags: Vec<String>,
    /// Episodes carrying any of these tags get a 1.5× score boost.
    pub priority_tags: Vec<String>,
    /// How many newest episodes feed the recent section.
    pub recent_count: usize,
}

impl Default for InjectOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1_000,
            exclude_tags: Vec::new(),
            priority_tags: Vec::new(),
            recent_count: 5,
        }
    }
}

/// Options for [`AgentMemory::post_compaction_context`].
#[derive(Debug, Clone)]
pub struct CompactionOptions {
    /// Look-back window in hours.
    pub hours_back: u64,
    /// Character budget for the rendered context.
    pub char_budget: usize,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        Self {
            hours_back: 24,
            char_budget: 4_000,
        }
    }
}

/// Score boost applied to priority-tagged episodes.
const PRIORITY_BOOST: f64 = 1.5;

impl AgentMemory {
    /// Builds a plain ranked context block for a query.
    ///
    /// Recalls the top matches and concatenates
    /// `[yyyy-mm-dd] (type)[tags]: text` entries until adding another would
    /// push the analyzer token count past `max_tokens`.
    ///
    /// # Errors
    ///
    /// Surfaces storage and crypto failures.
    pub fn build_context(&mut self, query: &str, max_tokens: usize) -> Result<String> {
        let recalled = self.recall(
            query,
            &RecallOptions::default().with_limit(BUILD_SEARCH_LIMIT),
        )?;

        let mut out = String::new();
        let mut used_tokens = 0usize;
        for hit in recalled {
            let line = format_entry(&hit.episode);
            let line_tokens = tokenize(&line).len();
            if used_tokens + line_tokens > max_tokens && !out.is_empty() {
                break;
            }
            out.push_str(&line);
            out.push_str("\n\n");
            used_tokens += line_tokens;
        }
        Ok(out)
    }

    /// Builds a two-section context block: relevant matches for `query`,
    /// then the newest episodes, deduplicated and truncated.
    ///
    /// The selection runs entirely against the in-memory doc map; only the
    /// chosen episodes are hydrated.
    ///
    /// # Errors
    ///
    /// Surfaces storage and crypto failures.
    pub fn inject_context(&mut self, query: &str, opts: &InjectOptions) -> Result<String> {
        self.ensure_initialized()?;
        let now = current_timestamp_ms();

        let search_opts = RecallOptions::default().with_limit(INJECT_SEARCH_LIMIT);
        let mut hits = self.index.search(query, &self.synonyms, &search_opts, now);

        // Priority tags re-rank before selection
        if !opts.priority_tags.is_empty() {
            for hit in &mut hits {
                if let Some(doc) = self.index.doc(&hit.id) {
                    if doc.tags.iter().any(|t| opts.priority_tags.contains(t)) {
                        hit.score *= PRIORITY_BOOST;
                    }
                }
            }
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
        }

        let excluded = |tags: &[String]| tags.iter().any(|t| opts.exclude_tags.contains(t));

        let mut relevant_ids = Vec::new();
        for hit in &hits {
            if let Some(doc) = self.index.doc(&hit.id) {
                if !excluded(&doc.tags) {
                    relevant_ids.push(hit.id.clone());
                }
            }
        }

        let mut recent: Vec<(String, i64)> = self
            .index
            .iter()
            .filter(|(id, doc)| !excluded(&doc.tags) && !relevant_ids.contains(id))
            .map(|(id, doc)| (id.clone(), doc.created_at))
            .collect();
        recent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        recent.truncate(opts.recent_count);

        let mut out = String::new();
        if !relevant_ids.is_empty() {
            out.push_str("## Relevant Memories\n\n");
            for id in &relevant_ids {
                if let Some(entry) = self.hydrate_entry(id)? {
                    out.push_str(&entry);
                }
            }
        }
        if !recent.is_empty() {
            out.push_str("## Recent Context\n\n");
            for (id, _) in &recent {
                if let Some(entry) = self.hydrate_entry(id)? {
                    out.push_str(&entry);
                }
            }
        }

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let char_budget = (opts.max_tokens as f64 * CHARS_PER_TOKEN) as usize;
        Ok(truncate_at_newline(&out, char_budget))
    }

    /// Builds the context an agent re-reads after a compaction: everything
    /// from the look-back window, ordered by type priority (checkpoints and
    /// decisions first) and then recency.
    ///
    /// # Errors
    ///
    /// Surfaces storage and crypto failures.
    pub fn post_compaction_context(&mut self, opts: &CompactionOptions) -> Result<String> {
        self.ensure_initialized()?;
        let now = current_timestamp_ms();
        #[allow(clippy::cast_possible_wrap)]
        let cutoff = now - (opts.hours_back as i64) * 3_600_000;

        let mut candidates: Vec<(String, u8, i64)> = self
            .index
            .iter()
            .filter(|(_, doc)| doc.created_at >= cutoff)
            .map(|(id, doc)| {
                (
                    id.clone(),
                    doc.episode_type.compaction_priority(),
                    doc.created_at,
                )
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut out = String::new();
        for (id, _, _) in &candidates {
            let Some(entry) = self.hydrate_entry(id)? else {
                continue;
            };
            if out.len() + entry.len() > opts.char_budget && !out.is_empty() {
                break;
            }
            out.push_str(&entry);
        }
        Ok(out)
    }

    /// Loads, decrypts, truncates, and formats one episode entry. Missing
    /// episodes yield `None`.
    fn hydrate_entry(&mut self, id: &str) -> Result<Option<String>> {
        let Some(stored) = self.storage.get_episode(id)? else {
            return Ok(None);
        };
        let mut episode = open_stored(self.encryptor.as_ref(), stored)?;
        episode.text = truncate_at_newline(&episode.text, EPISODE_TRUNCATE_CHARS);
        Ok(Some(format!("{}\n\n", format_entry(&episode).trim_end())))
    }
}

/// `[yyyy-mm-dd] (type)[tags]: text`
fn format_entry(episode: &Episode) -> String {
    let date = chrono::Utc
        .timestamp_millis_opt(episode.created_at)
        .single()
        .map_or_else(|| "????-??-??".to_string(), |dt| dt.format("%Y-%m-%d").to_string());
    let tags = episode.tags.join(",");
    format!(
        "[{date}] ({})[{tags}]: {}",
        episode.episode_type, episode.text
    )
}

/// Truncates to at most `max_chars`, cutting at the last newline inside the
/// budget when there is one.
fn truncate_at_newline(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max_chars).collect();
    match prefix.rfind('\n') {
        Some(pos) if pos > 0 => prefix[..pos].to_string(),
        _ => prefix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConfig, RememberOptions};
    use tempfile::TempDir;

    fn memory(dir: &TempDir) -> AgentMemory {
        AgentMemory::new(MemoryConfig::new(dir.path(), "test"))
    }

    #[test]
    fn test_build_context_format_and_budget() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        mem.remember(
            "dark mode is preferred",
            RememberOptions::new().with_type("fact").with_tags(["ui"]),
        )
        .unwrap();

        let ctx = mem.build_context("dark mode", 100).unwrap();
        assert!(ctx.contains("(fact)[ui]:"));
        assert!(ctx.contains("dark mode is preferred"));
        assert!(ctx.ends_with("\n\n"));

        // A tiny budget still emits the first entry, then stops
        for i in 0..5 {
            mem.remember(
                &format!("dark mode note number {i}"),
                RememberOptions::new(),
            )
            .unwrap();
        }
        let tight = mem.build_context("dark mode", 6).unwrap();
        assert_eq!(tight.matches("\n\n").count(), 1);
    }

    #[test]
    fn test_inject_context_sections() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        mem.remember("the bridge fee doubled", RememberOptions::new())
            .unwrap();
        mem.remember("unrelated recent note", RememberOptions::new())
            .unwrap();

        let ctx = mem
            .inject_context("bridge fee", &InjectOptions::default())
            .unwrap();
        assert!(ctx.contains("## Relevant Memories"));
        assert!(ctx.contains("bridge fee doubled"));
        assert!(ctx.contains("## Recent Context"));
        assert!(ctx.contains("unrelated recent note"));
    }

    #[test]
    fn test_inject_context_exclude_tags() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        mem.remember(
            "secret scratch content",
            RememberOptions::new().with_tags(["scratch"]),
        )
        .unwrap();
        mem.remember("normal content", RememberOptions::new()).unwrap();

        let opts = InjectOptions {
            exclude_tags: vec!["scratch".to_string()],
            ..InjectOptions::default()
        };
        let ctx = mem.inject_context("content", &opts).unwrap();
        assert!(!ctx.contains("scratch content"));
        assert!(ctx.contains("normal content"));
    }

    #[test]
    fn test_inject_context_priority_boost() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        mem.remember("shared topic plain", RememberOptions::new())
            .unwrap();
        mem.remember(
            "shared topic boosted",
            RememberOptions::new().with_tags(["critical"]),
        )
        .unwrap();

        let opts = InjectOptions {
            priority_tags: vec!["critical".to_string()],
            ..InjectOptions::default()
        };
        let ctx = mem.inject_context("shared topic", &opts).unwrap();
        let boosted = ctx.find("boosted").unwrap();
        let plain = ctx.find("plain").unwrap();
        assert!(boosted < plain, "priority-tagged entry must come first");
    }

    #[test]
    fn test_inject_context_truncates_long_episodes() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        let long = format!("needle {}", "filler ".repeat(200));
        mem.remember(&long, RememberOptions::new()).unwrap();

        let ctx = mem.inject_context("needle", &InjectOptions::default()).unwrap();
        // 300-char cap per episode plus formatting overhead
        assert!(ctx.len() < 500);
    }

    #[test]
    fn test_post_compaction_orders_by_type_priority() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        mem.remember("a chatty exchange", RememberOptions::new().with_type("conversation"))
            .unwrap();
        mem.remember("chose the rollback plan", RememberOptions::new().with_type("decision"))
            .unwrap();
        mem.remember("session checkpoint state", RememberOptions::new().with_type("checkpoint"))
            .unwrap();

        let ctx = mem
            .post_compaction_context(&CompactionOptions::default())
            .unwrap();
        let checkpoint = ctx.find("checkpoint state").unwrap();
        let decision = ctx.find("rollback plan").unwrap();
        let chat = ctx.find("chatty exchange").unwrap();
        assert!(checkpoint < decision && decision < chat);
    }

    #[test]
    fn test_post_compaction_respects_char_budget() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        for i in 0..10 {
            mem.remember(&format!("note {i} {}", "x".repeat(100)), RememberOptions::new())
                .unwrap();
        }

        let ctx = mem
            .post_compaction_context(&CompactionOptions {
                hours_back: 24,
                char_budget: 300,
            })
            .unwrap();
        assert!(!ctx.is_empty());
        assert!(ctx.len() <= 450, "budget overshoot is bounded by one entry");
    }

    #[test]
    fn test_truncate_at_newline() {
        assert_eq!(truncate_at_newline("short", 100), "short");
        let cut = truncate_at_newline("line one\nline two\nline three", 15);
        assert_eq!(cut, "line one");
        // No newline inside the budget: hard cut
        let cut = truncate_at_newline("aaaaaaaaaaaaaaaaaaaa", 5);
        assert_eq!(cut, "aaaaa");
    }
}
