//! File-system primitives behind the executor's tools: read, write,
//! search-and-replace, grep, listing, and the windowed excerpts injected
//! into prompts.

use std::fs;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use walkdir::WalkDir;

use crate::models::analysis::normalize_for_search;

use super::Workspace;

/// Directories never traversed by listing, tree, or grep.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    ".pytest_cache",
    "node_modules",
    "target",
    ".venv",
    "venv",
];

/// Maximum number of grep result lines returned to the model.
const GREP_RESULT_CAP: usize = 100;

/// Maximum entries emitted by a flat listing.
const LIST_ENTRY_CAP: usize = 500;

/// Lines of context emitted on each side of a known failure line.
const WINDOW_RADIUS: usize = 80;

/// Lines emitted from the top of a file when the failure line is unknown.
const WINDOW_HEAD: usize = 120;

pub fn read_file(ws: &Workspace, path: &str) -> Result<String> {
    let resolved = ws.resolve(path)?;
    fs::read_to_string(&resolved).with_context(|| format!("reading {path}"))
}

pub fn write_file(ws: &Workspace, path: &str, content: &str) -> Result<()> {
    let resolved = ws.resolve(path)?;
    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating parent of {path}"))?;
    }
    fs::write(&resolved, content).with_context(|| format!("writing {path}"))
}

/// Replace one occurrence of `search_block` in the file.
///
/// Matching is two-tier: exact substring first, then whitespace-normalized
/// comparison over line windows of the same length. The block must match
/// exactly once; two matches is an ambiguity error, zero is a not-found
/// error carrying nearby context.
pub fn replace_in_file(
    ws: &Workspace,
    path: &str,
    search_block: &str,
    replace_block: &str,
) -> Result<()> {
    let resolved = ws.resolve(path)?;
    let content =
        fs::read_to_string(&resolved).with_context(|| format!("reading {path} for replace"))?;

    let exact_count = content.matches(search_block).count();
    if exact_count > 1 {
        return Err(anyhow!(
            "search block found multiple times in {path}; include more surrounding context"
        ));
    }
    if exact_count == 1 {
        let updated = content.replacen(search_block, replace_block, 1);
        return fs::write(&resolved, updated).with_context(|| format!("writing {path}"));
    }

    fuzzy_replace(ws, path, &content, search_block, replace_block)
}

fn fuzzy_replace(
    ws: &Workspace,
    path: &str,
    content: &str,
    search_block: &str,
    replace_block: &str,
) -> Result<()> {
    let wanted: Vec<String> = search_block
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect();
    if wanted.is_empty() {
        return Err(anyhow!("Search block not found in {path}: block is empty"));
    }

    let lines: Vec<&str> = content.lines().collect();
    let normalized: Vec<(usize, String)> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| (i, l.split_whitespace().collect::<Vec<_>>().join(" ")))
        .filter(|(_, l)| !l.is_empty())
        .collect();

    let mut matches: Vec<(usize, usize)> = Vec::new();
    for window in normalized.windows(wanted.len()) {
        if window.iter().map(|(_, l)| l.as_str()).eq(wanted.iter().map(String::as_str)) {
            matches.push((window[0].0, window[wanted.len() - 1].0));
        }
    }

    match matches.len() {
        0 => Err(anyhow!(
            "Search block not found in {path}. Context around the closest line:\n{}",
            not_found_context(&lines, &normalized, &wanted[0])
        )),
        1 => {
            let (start, end) = matches[0];
            let mut updated: Vec<&str> = Vec::with_capacity(lines.len());
            updated.extend(&lines[..start]);
            updated.extend(replace_block.lines());
            updated.extend(&lines[end + 1..]);
            let mut joined = updated.join("\n");
            if content.ends_with('\n') {
                joined.push('\n');
            }
            let resolved = ws.resolve(path)?;
            fs::write(&resolved, joined).with_context(|| format!("writing {path}"))
        }
        _ => Err(anyhow!(
            "search block found multiple times in {path}; include more surrounding context"
        )),
    }
}

/// A few lines around the closest match for the first line of the
/// intended block, so the model can see what the file actually contains.
fn not_found_context(lines: &[&str], normalized: &[(usize, String)], first_wanted: &str) -> String {
    let norm_first = normalize_for_search(first_wanted);
    let anchor = normalized
        .iter()
        .find(|(_, l)| normalize_for_search(l).contains(&norm_first) || l.contains(first_wanted))
        .map(|(i, _)| *i)
        .unwrap_or(0);
    let lo = anchor.saturating_sub(3);
    let hi = (anchor + 4).min(lines.len());
    lines[lo..hi]
        .iter()
        .enumerate()
        .map(|(offset, l)| format!("{:>5} | {l}", lo + offset + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Search file contents under `path`, returning `path:line:content` rows.
pub fn grep(ws: &Workspace, pattern: &str, path: &str) -> Result<String> {
    let re = Regex::new(pattern).with_context(|| format!("invalid pattern {pattern:?}"))?;
    let base = ws.resolve(path)?;
    let mut rows = Vec::new();
    'outer: for entry in WalkDir::new(&base)
        .into_iter()
        .filter_entry(|e| !skipped(e.file_name().to_string_lossy().as_ref()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let display = ws.display_path(entry.path());
        for (idx, line) in content.lines().enumerate() {
            if re.is_match(line) {
                rows.push(format!("{display}:{}:{line}", idx + 1));
                if rows.len() >= GREP_RESULT_CAP {
                    rows.push(format!("... truncated at {GREP_RESULT_CAP} results"));
                    break 'outer;
                }
            }
        }
    }
    if rows.is_empty() {
        return Ok(format!("no matches for {pattern:?}"));
    }
    Ok(rows.join("\n"))
}

/// Flat recursive listing of workspace-relative paths.
pub fn list_files(ws: &Workspace, path: &str) -> Result<String> {
    let base = ws.resolve(path)?;
    let mut entries = Vec::new();
    for entry in WalkDir::new(&base)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skipped(e.file_name().to_string_lossy().as_ref()))
        .filter_map(|e| e.ok())
    {
        let display = ws.display_path(entry.path());
        if entry.file_type().is_dir() {
            entries.push(format!("{display}/"));
        } else {
            entries.push(display);
        }
        if entries.len() >= LIST_ENTRY_CAP {
            entries.push(format!("... truncated at {LIST_ENTRY_CAP} entries"));
            break;
        }
    }
    Ok(entries.join("\n"))
}

/// Depth-limited indented tree rendering.
pub fn file_tree(ws: &Workspace, path: &str, depth: usize) -> Result<String> {
    let base = ws.resolve(path)?;
    let mut out = Vec::new();
    for entry in WalkDir::new(&base)
        .min_depth(1)
        .max_depth(depth.max(1))
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skipped(e.file_name().to_string_lossy().as_ref()))
        .filter_map(|e| e.ok())
    {
        let indent = "  ".repeat(entry.depth().saturating_sub(1));
        let name = entry.file_name().to_string_lossy();
        let suffix = if entry.file_type().is_dir() { "/" } else { "" };
        out.push(format!("{indent}{name}{suffix}"));
    }
    Ok(out.join("\n"))
}

fn skipped(name: &str) -> bool {
    SKIP_DIRS.contains(&name)
}

/// Windowed excerpt of file content around a failure line, each line
/// prefixed with its original number, elided ranges summarized.
pub fn window_around_line(content: &str, line: Option<usize>) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let total = lines.len();
    let (lo, hi) = match line {
        Some(n) => {
            let n = n.max(1);
            (n.saturating_sub(WINDOW_RADIUS).max(1), (n + WINDOW_RADIUS).min(total))
        }
        None => (1, WINDOW_HEAD.min(total)),
    };

    let mut out = Vec::new();
    if lo > 1 {
        out.push(format!("(lines 1-{} elided)", lo - 1));
    }
    for (idx, text) in lines.iter().enumerate().take(hi).skip(lo - 1) {
        out.push(format!("{:>5} | {text}", idx + 1));
    }
    if hi < total {
        out.push(format!("(lines {}-{total} elided)", hi + 1));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workspace_with(files: &[(&str, &str)]) -> (tempfile::TempDir, Workspace) {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        for (path, content) in files {
            write_file(&ws, path, content).unwrap();
        }
        (dir, ws)
    }

    #[test]
    fn test_write_creates_parents_and_read_round_trips() {
        let (_dir, ws) = workspace_with(&[]);
        write_file(&ws, "src/deep/nested.py", "x = 1\n").unwrap();
        assert_eq!(read_file(&ws, "src/deep/nested.py").unwrap(), "x = 1\n");
    }

    #[test]
    fn test_replace_exact_single_match() {
        let (_dir, ws) = workspace_with(&[("src/calc.py", "def multiply(a, b):\n    return a / b\n")]);
        replace_in_file(&ws, "src/calc.py", "return a / b", "return a * b").unwrap();
        assert!(read_file(&ws, "src/calc.py").unwrap().contains("a * b"));
    }

    #[test]
    fn test_replace_fuzzy_whitespace_match() {
        let (_dir, ws) = workspace_with(&[(
            "src/calc.py",
            "def multiply(a, b):\n        return a /  b\n",
        )]);
        replace_in_file(&ws, "src/calc.py", "return a / b", "        return a * b").unwrap();
        assert!(read_file(&ws, "src/calc.py").unwrap().contains("a * b"));
    }

    #[test]
    fn test_replace_missing_block_reports_not_found_with_context() {
        let (_dir, ws) = workspace_with(&[("src/calc.py", "def add(a, b):\n    return a + b\n")]);
        let err = replace_in_file(&ws, "src/calc.py", "return a ** b", "return a * b")
            .unwrap_err()
            .to_string();
        assert!(err.contains("Search block not found"), "{err}");
        assert!(err.contains("return a + b"), "snippet missing: {err}");
    }

    #[test]
    fn test_replace_ambiguous_block_is_rejected() {
        let (_dir, ws) = workspace_with(&[(
            "src/calc.py",
            "    return a / b\n    return a / b\n",
        )]);
        let err = replace_in_file(&ws, "src/calc.py", "return a / b", "return a * b")
            .unwrap_err()
            .to_string();
        assert!(err.contains("multiple times"), "{err}");
    }

    #[test]
    fn test_grep_caps_and_formats_results() {
        let (_dir, ws) = workspace_with(&[("src/a.py", "alpha\nbeta\nalpha again\n")]);
        let out = grep(&ws, "alpha", ".").unwrap();
        assert!(out.contains("src/a.py:1:alpha"));
        assert!(out.contains("src/a.py:3:alpha again"));
    }

    #[test]
    fn test_list_and_tree_skip_noise_dirs() {
        let (_dir, ws) = workspace_with(&[
            ("src/a.py", "x"),
            ("__pycache__/junk.pyc", "x"),
        ]);
        let listing = list_files(&ws, ".").unwrap();
        assert!(listing.contains("src/a.py"));
        assert!(!listing.contains("__pycache__"));
        let tree = file_tree(&ws, ".", 3).unwrap();
        assert!(tree.contains("src/"));
        assert!(!tree.contains("__pycache__"));
    }

    #[test]
    fn test_window_known_line_bounds() {
        let content: String = (1..=300).map(|i| format!("line {i}\n")).collect();
        let window = window_around_line(&content, Some(150));
        assert!(window.contains("  150 | line 150"));
        assert!(window.contains("(lines 1-69 elided)"));
        assert!(window.contains("(lines 231-300 elided)"));
        assert!(!window.contains("line 69\n"));
    }

    #[test]
    fn test_window_unknown_line_takes_head() {
        let content: String = (1..=300).map(|i| format!("line {i}\n")).collect();
        let window = window_around_line(&content, None);
        assert!(window.contains("    1 | line 1"));
        assert!(window.contains("  120 | line 120"));
        assert!(window.contains("(lines 121-300 elided)"));
    }

    #[test]
    fn test_window_empty_content_is_empty() {
        assert_eq!(window_around_line("", Some(10)), "");
        assert_eq!(window_around_line("", None), "");
    }
}
