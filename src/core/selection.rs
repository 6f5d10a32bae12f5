//! Asset pool scanning and selection
//!
//! Pools are directories of images or prompt files. Listing is recursive,
//! skips hidden entries, and orders by natural sort so `img2` precedes
//! `img10` the way a file browser shows them.

use rand::seq::SliceRandom;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "heic", "heif"];
const PROMPT_EXTENSIONS: [&str; 3] = ["txt", "md", "j2"];

#[derive(Debug, PartialEq, Eq)]
enum SortSegment {
    Number(u64),
    Text(String),
}

impl Ord for SortSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortSegment::Number(a), SortSegment::Number(b)) => a.cmp(b),
            (SortSegment::Text(a), SortSegment::Text(b)) => a.cmp(b),
            (SortSegment::Number(_), SortSegment::Text(_)) => Ordering::Less,
            (SortSegment::Text(_), SortSegment::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for SortSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split a file name into numeric and textual runs for numeric-aware sorting.
fn natural_sort_key(path: &Path) -> Vec<SortSegment> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let mut segments = Vec::new();
    let mut digits = String::new();
    let mut text = String::new();
    for ch in name.chars() {
        if ch.is_ascii_digit() {
            if !text.is_empty() {
                segments.push(SortSegment::Text(std::mem::take(&mut text)));
            }
            digits.push(ch);
        } else {
            if !digits.is_empty() {
                let value = digits.parse().unwrap_or(u64::MAX);
                segments.push(SortSegment::Number(value));
                digits.clear();
            }
            text.push(ch);
        }
    }
    if !digits.is_empty() {
        segments.push(SortSegment::Number(digits.parse().unwrap_or(u64::MAX)));
    }
    if !text.is_empty() {
        segments.push(SortSegment::Text(text));
    }
    segments
}

fn scan(dir: &Path, extensions: &[&str], found: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            scan(&path, extensions, found);
        } else if path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                extensions.contains(&ext.as_str())
            })
            .unwrap_or(false)
        {
            found.push(path);
        }
    }
}

fn list_with_extensions(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut found = Vec::new();
    scan(dir, extensions, &mut found);
    found.sort_by(|a, b| natural_sort_key(a).cmp(&natural_sort_key(b)));
    found
}

/// List all images under a directory, recursively, in natural order.
pub fn list_images(dir: &Path) -> Vec<PathBuf> {
    list_with_extensions(dir, &IMAGE_EXTENSIONS)
}

/// List all prompt files under a directory, recursively, in natural order.
pub fn list_prompts(dir: &Path) -> Vec<PathBuf> {
    list_with_extensions(dir, &PROMPT_EXTENSIONS)
}

/// Find an available asset matching a user-given spec: an exact file name or
/// a path suffix.
pub fn find_by_spec(available: &[PathBuf], spec: &str) -> Option<PathBuf> {
    let spec_path = Path::new(spec);
    available
        .iter()
        .find(|p| {
            p.file_name().map(|n| n == spec_path.as_os_str()).unwrap_or(false)
                || p.ends_with(spec_path)
        })
        .cloned()
}

/// Resolve user-specified asset identifiers against a pool.
///
/// Every spec must resolve to a distinct file; duplicates (including two
/// specs resolving to the same file) and unknown identifiers are collected as
/// errors so the caller can fail the run with all of them at once.
pub fn validate_specified(
    specified: &[String],
    available: &[PathBuf],
) -> Result<Vec<PathBuf>, Vec<String>> {
    let mut errors = Vec::new();
    let mut resolved = Vec::new();
    let mut seen_specs = HashSet::new();
    let mut seen_files = HashSet::new();

    for spec in specified {
        if !seen_specs.insert(spec.as_str()) {
            errors.push(format!("duplicate specified asset: {}", spec));
            continue;
        }
        match find_by_spec(available, spec) {
            None => errors.push(format!("specified asset not found: {}", spec)),
            Some(path) => {
                if !seen_files.insert(path.clone()) {
                    errors.push(format!(
                        "specified asset resolves to an already-selected file: {}",
                        spec
                    ));
                } else {
                    resolved.push(path);
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(resolved)
    } else {
        Err(errors)
    }
}

/// Draw `count` products for one group without replacement, consuming the
/// specified items first and filling the remainder from a shuffled pool.
///
/// Returns fewer than `count` when the pool is too small; the caller reports
/// that as a warning, not an error.
pub fn draw_products<R: Rng>(
    pool: &[PathBuf],
    specified: &[PathBuf],
    count: usize,
    rng: &mut R,
) -> Vec<PathBuf> {
    let mut chosen = Vec::with_capacity(count);
    let mut used: HashSet<&PathBuf> = HashSet::new();

    for path in specified {
        if chosen.len() >= count {
            break;
        }
        if used.insert(path) {
            chosen.push(path.clone());
        }
    }

    let mut remaining: Vec<&PathBuf> = pool.iter().filter(|p| !used.contains(p)).collect();
    remaining.shuffle(rng);
    for path in remaining {
        if chosen.len() >= count {
            break;
        }
        chosen.push(path.clone());
    }

    chosen
}
