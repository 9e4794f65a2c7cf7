//! In-process store for development and tests.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::RwLock;

use super::{StoreResult, TaskStore};

/// Task store backed by an in-memory map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher = compile_pattern(pattern)?;
        let entries = self.entries.read().await;
        Ok(entries
            .keys()
            .filter(|key| matcher.is_match(key))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        Ok(u64::from(self.entries.write().await.remove(key).is_some()))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Compile a Redis `KEYS`/`SCAN` pattern into an anchored regex.
///
/// Supports `*`, `?`, `[...]` classes with `^` negation and `a-z` ranges,
/// and `\` escapes. An unclosed class runs to the end of the pattern.
fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str("(?s:.*)"),
            '?' => re.push_str("(?s:.)"),
            '[' => push_class(&mut re, &mut chars),
            '\\' => push_literal(&mut re, chars.next().unwrap_or('\\')),
            _ => push_literal(&mut re, c),
        }
    }
    re.push('$');
    Regex::new(&re)
}

fn push_literal(re: &mut String, c: char) {
    let mut buf = [0; 4];
    re.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn push_class(re: &mut String, chars: &mut Peekable<Chars<'_>>) {
    let negated = chars.next_if_eq(&'^').is_some();
    let mut ranges: Vec<(char, char)> = Vec::new();
    while let Some(c) = chars.next() {
        match c {
            ']' => break,
            '\\' => {
                let escaped = chars.next().unwrap_or('\\');
                ranges.push((escaped, escaped));
            }
            _ => {
                let mut ahead = chars.clone();
                match (ahead.next(), ahead.next()) {
                    (Some('-'), Some(end)) => {
                        *chars = ahead;
                        ranges.push((c.min(end), c.max(end)));
                    }
                    _ => ranges.push((c, c)),
                }
            }
        }
    }

    if ranges.is_empty() {
        // `[]` matches nothing, `[^]` any single character.
        re.push_str(if negated { "(?s:.)" } else { r"[^\x{0}-\x{10FFFF}]" });
        return;
    }

    re.push('[');
    if negated {
        re.push('^');
    }
    for (start, end) in ranges {
        re.push_str(&format!(r"\x{{{:X}}}", u32::from(start)));
        if start != end {
            re.push_str(&format!(r"-\x{{{:X}}}", u32::from(end)));
        }
    }
    re.push(']');
}
