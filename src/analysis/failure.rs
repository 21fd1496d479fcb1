//! Regex extraction of the failing artifact and line from merged
//! test-runner output.
//!
//! The extractor prefers the deepest in-project stack frame, then falls
//! back to collection errors, failed-test identifiers, and finally the
//! no-tests markers.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::CollectionSubtype;

/// Long frame format: `File "/abs/path/src/foo.py", line 12`. The capture
/// groups exclude newlines so a mangled traceback can never smear across
/// lines.
static LONG_FRAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"File "([^"\n]+)", line (\d+)"#).expect("invalid frame pattern"));

/// Anchored short frame format: `src/foo.py:12:` at line start.
static SHORT_FRAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^((?:src|tests|testing)/[^\s:]+):(\d+):").expect("invalid frame pattern")
});

static ERROR_COLLECTING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ERROR collecting (\S+)").expect("invalid collect pattern"));

static FAILED_TEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"FAILED ([^\s:]+)::(\S+)").expect("invalid failed pattern"));

/// Path fragments that mark a frame as outside the workspace.
const OUT_OF_PROJECT: &[&str] = &[
    "site-packages",
    "dist-packages",
    "/venv/",
    "/.venv/",
    "virtualenv",
    "<frozen",
];

/// Directory anchors used to relativize absolute paths.
const PROJECT_ANCHORS: &[&str] = &["/src/", "/testing/", "/tests/"];

/// What the analyzer pulled out of one run's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureExtract {
    pub artifact: Option<String>,
    pub line: Option<usize>,
    pub subtype: CollectionSubtype,
    pub reason: Option<String>,
    pub module: Option<String>,
}

pub struct FailureAnalyzer;

impl FailureAnalyzer {
    /// Extract the failing artifact, line, and failure subtype from merged
    /// runner output. Never returns a multi-line artifact path.
    pub fn analyze(output: &str) -> FailureExtract {
        let subtype = classify_subtype(output);
        let reason = extract_reason(output);

        if let Some((artifact, line)) = deepest_project_frame(output) {
            return FailureExtract {
                artifact: Some(artifact),
                line: Some(line),
                subtype,
                reason,
                module: None,
            };
        }

        if let Some(caps) = ERROR_COLLECTING.captures(output) {
            if let Some(artifact) = sanitize_candidate(&caps[1]) {
                let module = artifact
                    .rsplit('/')
                    .next()
                    .and_then(|f| f.split('.').next())
                    .map(str::to_string);
                return FailureExtract {
                    artifact: Some(artifact),
                    line: None,
                    subtype,
                    reason,
                    module,
                };
            }
        }

        if let Some(caps) = FAILED_TEST.captures(output) {
            if let Some(artifact) = sanitize_candidate(&caps[1]) {
                return FailureExtract {
                    artifact: Some(artifact),
                    line: None,
                    subtype,
                    reason,
                    module: None,
                };
            }
        }

        if output.contains("ERROR: not found")
            || output.contains("no tests ran")
            || output.contains("no tests collected")
        {
            return FailureExtract {
                artifact: None,
                line: None,
                subtype: CollectionSubtype::NoTestsFound,
                reason: reason.or_else(|| Some("no tests were collected".to_string())),
                module: None,
            };
        }

        FailureExtract {
            artifact: None,
            line: None,
            subtype,
            reason,
            module: None,
        }
    }
}

/// Scan every stack frame, keeping the last in-project source frame, or
/// the last test frame when no source frame appears.
fn deepest_project_frame(output: &str) -> Option<(String, usize)> {
    let mut last_source: Option<(String, usize)> = None;
    let mut last_test: Option<(String, usize)> = None;

    let frames = LONG_FRAME
        .captures_iter(output)
        .chain(SHORT_FRAME.captures_iter(output));
    for caps in frames {
        let raw = &caps[1];
        if OUT_OF_PROJECT.iter().any(|m| raw.contains(m)) {
            continue;
        }
        let Some(path) = sanitize_candidate(&relativize(raw)) else {
            continue;
        };
        let Ok(line) = caps[2].parse::<usize>() else {
            continue;
        };
        if is_test_path(&path) {
            last_test = Some((path, line));
        } else {
            last_source = Some((path, line));
        }
    }

    last_source.or(last_test)
}

fn is_test_path(path: &str) -> bool {
    path.starts_with("tests/")
        || path.starts_with("testing/")
        || path.contains("/tests/")
        || path
            .rsplit('/')
            .next()
            .map(|f| f.starts_with("test_"))
            .unwrap_or(false)
}

/// Convert an absolute path to workspace-relative using directory anchors.
fn relativize(path: &str) -> String {
    for anchor in PROJECT_ANCHORS {
        if let Some(idx) = path.rfind(anchor) {
            return path[idx + 1..].to_string();
        }
    }
    path.trim_start_matches("./").to_string()
}

/// Single-line sanity check: a usable artifact path contains no newlines,
/// no diff-style `>` markers, and no internal whitespace.
fn sanitize_candidate(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.contains('\n')
        || trimmed.contains('>')
        || trimmed.chars().any(char::is_whitespace)
    {
        return None;
    }
    Some(trimmed.to_string())
}

fn classify_subtype(output: &str) -> CollectionSubtype {
    if output.contains("ImportError") || output.contains("ModuleNotFoundError") {
        CollectionSubtype::ImportError
    } else if output.contains("SyntaxError") {
        CollectionSubtype::SyntaxError
    } else if output.contains("no tests ran") || output.contains("no tests collected") {
        CollectionSubtype::NoTestsFound
    } else {
        CollectionSubtype::Unknown
    }
}

/// The most specific error line available, for the collection-failure
/// reason field.
fn extract_reason(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|l| {
            l.starts_with("E ")
                || l.contains("Error:")
                || l.contains("ImportError")
                || l.contains("SyntaxError")
        })
        .map(|l| l.trim_start_matches("E ").trim().chars().take(300).collect())
}
