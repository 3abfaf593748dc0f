//! L5 — static context registry.
//!
//! One markdown file per domain, loaded at startup and never mutated.
//! Hot reload replaces the whole snapshot atomically; readers see the old
//! registry or the new one, never a mix. Document lookup is keyed purely
//! by the resolved domain — user text has no influence on selection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use palisade_core::error::{PalisadeError, Result};
use palisade_core::types::Domain;
use palisade_sessions::history::estimate_tokens;

/// Separator between documents concatenated into one domain file.
const DOC_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Default)]
struct Snapshot {
    docs: HashMap<Domain, Vec<String>>,
}

pub struct ContextRegistry {
    dir: PathBuf,
    token_budget: usize,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ContextRegistry {
    /// Load `<dir>/<domain>.md` for every routable domain. Missing files
    /// are tolerated with a warning (the domain then answers from persona
    /// alone); an unreadable directory is a startup error.
    pub fn load(dir: impl Into<PathBuf>, token_budget: usize) -> Result<Self> {
        let dir = dir.into();
        let snapshot = Self::read_snapshot(&dir)?;
        info!(
            dir = %dir.display(),
            domains = snapshot.docs.len(),
            "context registry loaded"
        );
        Ok(Self {
            dir,
            token_budget,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Re-read every file and swap the whole snapshot in one store.
    pub fn reload(&self) -> Result<()> {
        let fresh = Self::read_snapshot(&self.dir)?;
        *self.snapshot.write().unwrap() = Arc::new(fresh);
        info!("context registry reloaded");
        Ok(())
    }

    /// Assemble the context blob for `domain`, truncated to the token
    /// budget at document boundaries (whole documents in, oldest-listed
    /// first, stop before the budget breaks).
    pub fn context_for(&self, domain: Domain) -> String {
        let snapshot = self.snapshot.read().unwrap().clone();
        let Some(docs) = snapshot.docs.get(&domain) else {
            return String::new();
        };

        let mut used = 0usize;
        let mut kept: Vec<&str> = Vec::new();
        for doc in docs {
            let cost = estimate_tokens(doc);
            if used + cost > self.token_budget && !kept.is_empty() {
                break;
            }
            if used + cost > self.token_budget {
                // A single oversized document: keep a prefix so the domain
                // is not silently context-free.
                kept.push(doc);
                break;
            }
            used += cost;
            kept.push(doc);
        }

        let blob = kept
            .iter()
            .map(|d| d.trim())
            .collect::<Vec<_>>()
            .join(DOC_SEPARATOR);
        truncate_to_tokens(&blob, self.token_budget)
    }

    fn read_snapshot(dir: &Path) -> Result<Snapshot> {
        if !dir.is_dir() {
            return Err(PalisadeError::Context(format!(
                "context directory not found: {}",
                dir.display()
            )));
        }

        let mut docs = HashMap::new();
        for &domain in Domain::routable() {
            let path = dir.join(format!("{}.md", domain.as_str().to_lowercase()));
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let parts: Vec<String> = content
                        .split(DOC_SEPARATOR)
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty())
                        .collect();
                    docs.insert(domain, parts);
                }
                Err(_) => {
                    warn!(domain = %domain, path = %path.display(), "no context document");
                }
            }
        }
        Ok(Snapshot { docs })
    }
}

fn truncate_to_tokens(text: &str, budget: usize) -> String {
    if estimate_tokens(text) <= budget {
        return text.to_string();
    }
    // Hard fallback for a single runaway document: character cut at the
    // token-estimate boundary.
    text.chars().take(budget * 4).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn registry_with(files: &[(&str, &str)], budget: usize) -> (tempfile::TempDir, ContextRegistry) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(content.as_bytes()).unwrap();
        }
        let reg = ContextRegistry::load(dir.path(), budget).unwrap();
        (dir, reg)
    }

    #[test]
    fn lookup_is_keyed_by_domain_only() {
        let (_d, reg) = registry_with(
            &[
                ("professional.md", "Kellogg has ten years of experience."),
                ("hobbies.md", "Kellogg brews kombucha."),
            ],
            1000,
        );
        assert!(reg.context_for(Domain::Professional).contains("ten years"));
        assert!(reg.context_for(Domain::Hobbies).contains("kombucha"));
        assert!(reg.context_for(Domain::Meta).is_empty());
    }

    #[test]
    fn truncation_respects_document_boundaries() {
        let doc_a = "a".repeat(400); // ~100 tokens
        let doc_b = "b".repeat(400);
        let doc_c = "c".repeat(400);
        let content = format!("{doc_a}\n---\n{doc_b}\n---\n{doc_c}");
        let (_d, reg) = registry_with(&[("projects.md", &content)], 250);
        let blob = reg.context_for(Domain::Projects);
        assert!(blob.contains('a'));
        assert!(blob.contains('b'));
        assert!(!blob.contains('c'));
    }

    #[test]
    fn single_oversized_document_is_prefix_truncated() {
        let content = "x".repeat(4000);
        let (_d, reg) = registry_with(&[("meta.md", &content)], 100);
        let blob = reg.context_for(Domain::Meta);
        assert!(!blob.is_empty());
        assert!(estimate_tokens(&blob) <= 100);
    }

    #[test]
    fn reload_swaps_the_whole_snapshot() {
        let (dir, reg) = registry_with(&[("contact.md", "email: old@example.com")], 1000);
        assert!(reg.context_for(Domain::Contact).contains("old@"));

        std::fs::write(dir.path().join("contact.md"), "email: new@example.com").unwrap();
        reg.reload().unwrap();
        assert!(reg.context_for(Domain::Contact).contains("new@"));
    }

    #[test]
    fn missing_directory_is_a_startup_error() {
        assert!(ContextRegistry::load("/nonexistent/palisade-ctx", 100).is_err());
    }
}
