//! CLI command implementations behind the `engram` binary.
//!
//! Every command takes the orchestrator plus its parsed arguments, prints
//! human-readable output on stdout, and returns an error only for failures
//! the binary should turn into a non-zero exit code ([`Error::NotFound`]
//! maps to 2, everything else to 1). Key material and ciphertext never
//! reach the output.

use crate::memory::{AgentMemory, InjectOptions, PruneOptions, RememberOptions};
use crate::models::{RecallOptions, RecalledEpisode};
use crate::{Error, Result};

/// `remember` — persist text as one or more episodes.
pub fn cmd_remember(
    memory: &mut AgentMemory,
    text: &str,
    episode_type: &str,
    tags: Option<&str>,
    importance: f64,
    supersedes: Option<&str>,
) -> Result<()> {
    let mut opts = RememberOptions::new()
        .with_type(episode_type)
        .with_importance(importance);
    if let Some(tags) = tags {
        opts = opts.with_tags(split_list(tags));
    }
    if let Some(supersedes) = supersedes {
        opts = opts.with_supersedes(split_list(supersedes));
    }

    let episodes = memory.remember(text, opts)?;
    for ep in &episodes {
        println!("{}", ep.id);
    }
    Ok(())
}

/// `recall` — ranked search.
pub fn cmd_recall(
    memory: &mut AgentMemory,
    query: &str,
    limit: usize,
    tags: Option<&str>,
    episode_type: Option<&str>,
    include_superseded: bool,
) -> Result<()> {
    let mut opts = RecallOptions::default().with_limit(limit);
    if let Some(tags) = tags {
        opts = opts.with_tags(split_list(tags));
    }
    if let Some(t) = episode_type {
        opts = opts.with_type(t);
    }
    if include_superseded {
        opts = opts.with_superseded();
    }

    let results = memory.recall(query, &opts)?;
    if results.is_empty() {
        println!("no matches");
        return Ok(());
    }
    for hit in &results {
        print_hit(hit);
    }
    Ok(())
}

/// `recent` — newest episodes.
pub fn cmd_recent(memory: &mut AgentMemory, limit: usize) -> Result<()> {
    for ep in memory.get_recent(limit)? {
        println!("{}  ({})  {}", ep.id, ep.episode_type, first_line(&ep.text, 80));
    }
    Ok(())
}

/// `temporal` — natural-language time-window query.
pub fn cmd_temporal(memory: &mut AgentMemory, query: &str) -> Result<()> {
    let results = memory.temporal(query)?;
    if results.is_empty() {
        println!("no matches");
        return Ok(());
    }
    for hit in &results {
        print_hit(hit);
    }
    Ok(())
}

/// `context` — ranked context block for a query.
pub fn cmd_context(memory: &mut AgentMemory, query: &str, max_tokens: usize) -> Result<()> {
    print!("{}", memory.build_context(query, max_tokens)?);
    Ok(())
}

/// `inject` — two-section context block.
pub fn cmd_inject(
    memory: &mut AgentMemory,
    query: &str,
    max_tokens: usize,
    exclude_tags: Option<&str>,
    priority_tags: Option<&str>,
) -> Result<()> {
    let opts = InjectOptions {
        max_tokens,
        exclude_tags: exclude_tags.map(split_list).unwrap_or_default(),
        priority_tags: priority_tags.map(split_list).unwrap_or_default(),
        ..InjectOptions::default()
    };
    print!("{}", memory.inject_context(query, &opts)?);
    Ok(())
}

/// `stats` — store and index counters.
pub fn cmd_stats(memory: &mut AgentMemory) -> Result<()> {
    let stats = memory.stats()?;
    println!("agent:         {}", stats.agent_id);
    println!("location:      {}", stats.location);
    println!("episodes:      {}", stats.episode_count);
    println!("indexed docs:  {}", stats.indexed_docs);
    println!("terms:         {}", stats.term_count);
    println!("bytes:         {}", stats.total_bytes);
    Ok(())
}

/// `prune` — apply the retention policy.
pub fn cmd_prune(
    memory: &mut AgentMemory,
    keep: usize,
    max_age_days: f64,
    min_importance: f64,
) -> Result<()> {
    let report = memory.prune(&PruneOptions {
        keep,
        max_age_days,
        min_importance,
    })?;
    println!("pruned {} episodes, kept {}", report.pruned, report.kept);
    Ok(())
}

/// `forget <id>` — delete one episode. Unknown ids exit with code 2.
pub fn cmd_forget(memory: &mut AgentMemory, id: &str) -> Result<()> {
    if memory.forget(id)? {
        println!("forgot {id}");
        Ok(())
    } else {
        Err(Error::NotFound {
            what: id.to_string(),
        })
    }
}

/// `chain <id>` — print the supersession chain, oldest first.
pub fn cmd_chain(memory: &mut AgentMemory, id: &str) -> Result<()> {
    let chain = memory.supersession_chain(id)?;
    if chain.is_empty() {
        return Err(Error::NotFound {
            what: id.to_string(),
        });
    }
    for (i, ep) in chain.iter().enumerate() {
        let marker = if ep.superseded_by.is_empty() { "current" } else { "superseded" };
        println!("{i}: {}  [{marker}]  {}", ep.id, first_line(&ep.text, 60));
    }
    Ok(())
}

/// `hourly-summary` — emit a summary episode for the recent window.
pub fn cmd_hourly_summary(
    memory: &mut AgentMemory,
    hours: u64,
    mark_superseded: bool,
) -> Result<()> {
    match memory.hourly_summary(hours, mark_superseded)? {
        Some(summary) => {
            println!("{}", summary.id);
            println!("{}", summary.text);
        },
        None => println!("nothing to summarize"),
    }
    Ok(())
}

/// `snapshot` — build and anchor a Merkle snapshot.
pub fn cmd_snapshot(memory: &mut AgentMemory) -> Result<()> {
    let (snapshot, location) = memory.create_snapshot()?;
    println!("root:      {}", snapshot.root_hex());
    println!("episodes:  {}", snapshot.episode_count());
    if let Some(location) = location {
        println!("anchored:  {location}");
    }
    Ok(())
}

/// `verify --root <hex>` — recompute the root and compare. A mismatch is a
/// hard failure (tamper detection).
pub fn cmd_verify(memory: &mut AgentMemory, root: &str) -> Result<()> {
    if memory.verify_root(root)? {
        println!("ok: store matches root");
        Ok(())
    } else {
        Err(Error::Integrity {
            cause: "store does not match the provided root".to_string(),
        })
    }
}

fn print_hit(hit: &RecalledEpisode) {
    println!(
        "{:.4}  {}  ({})  {}",
        hit.score,
        hit.episode.id,
        hit.episode.episode_type,
        first_line(&hit.episode.text, 80)
    );
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    let mut out: String = line.chars().take(max_chars).collect();
    if line.chars().count() > max_chars {
        out.push('…');
    }
    out
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConfig;
    use tempfile::TempDir;

    fn memory(dir: &TempDir) -> AgentMemory {
        AgentMemory::new(MemoryConfig::new(dir.path(), "cli"))
    }

    #[test]
    fn test_forget_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        assert!(matches!(
            cmd_forget(&mut mem, "missing"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_chain_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        assert!(matches!(
            cmd_chain(&mut mem, "missing"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_verify_mismatch_is_integrity_failure() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        cmd_remember(&mut mem, "content", "fact", None, 0.5, None).unwrap();
        assert!(matches!(
            cmd_verify(&mut mem, &"0".repeat(64)),
            Err(Error::Integrity { .. })
        ));
    }

    #[test]
    fn test_roundtrip_through_commands() {
        let dir = TempDir::new().unwrap();
        let mut mem = memory(&dir);
        cmd_remember(&mut mem, "dark mode preferred", "fact", Some("ui,prefs"), 0.7, None).unwrap();
        cmd_recall(&mut mem, "dark mode", 5, None, None, false).unwrap();
        cmd_recent(&mut mem, 5).unwrap();
        cmd_stats(&mut mem).unwrap();
        cmd_snapshot(&mut mem).unwrap();
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(split_list(" , "), Vec::<String>::new());
    }
}
