//! File walker: expands the config's glob patterns over a directory tree.
//!
//! Patterns use a small glob grammar:
//!
//! - `\` escapes the next character
//! - `*` matches any run of characters within one path segment
//! - `**` matches anything, separators included; `**/foo` also matches a
//!   top-level `foo` because the separator after `**` is optional
//! - `/` separates segments; everything else matches literally
//!
//! Each pattern compiles to two regexes: a *full* regex anchored at both
//! ends, tested against files, and a *prefix* regex in which every
//! successive segment is optional, tested against directories so the walk
//! can prune subtrees no pattern could reach.
//!
//! Traversal is depth-first over a stack of sibling lists; a file is
//! yielded once per matching pattern, patterns in lexicographic key order.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::MAIN_SEPARATOR;

use crate::config::FileEntry;
use crate::core::VbumpError;

/// Compiled form of one glob pattern.
#[derive(Debug)]
pub struct Pattern {
    full: Regex,
    prefix: Regex,
}

impl Pattern {
    /// Compile a glob into its full and prefix regexes.
    pub fn new(expr: &str) -> Result<Self, VbumpError> {
        let sep = regex::escape(&MAIN_SEPARATOR.to_string());
        let cleaned = clean(expr);

        // translate the glob into regex fragments, one per path segment
        let mut parts: Vec<String> = Vec::new();
        let mut cur = String::new();
        enum State {
            Default,
            Escape,
            Star,
        }
        let mut state = State::Default;
        for ch in cleaned.chars() {
            match state {
                State::Default => match ch {
                    '\\' => state = State::Escape,
                    '*' => state = State::Star,
                    '/' => {
                        parts.push(std::mem::take(&mut cur));
                        // "**/" also matches the empty path, so the
                        // separator after it is optional
                        let prev = parts.last().map(String::as_str).unwrap_or_default();
                        if prev == ".*" || prev == format!("{sep}.*") {
                            cur = format!("{sep}?");
                        } else {
                            cur = sep.clone();
                        }
                    }
                    ch => cur.push_str(&regex::escape(&ch.to_string())),
                },
                State::Escape => {
                    cur.push_str(&regex::escape(&ch.to_string()));
                    state = State::Default;
                }
                State::Star => {
                    state = State::Default;
                    if ch == '*' {
                        // ** crosses path separators
                        cur.push_str(".*");
                    } else {
                        cur.push_str(&format!("[^{sep}]*"));
                        match ch {
                            '\\' => state = State::Escape,
                            '/' => {
                                parts.push(std::mem::take(&mut cur));
                                cur = sep.clone();
                            }
                            ch => cur.push_str(&regex::escape(&ch.to_string())),
                        }
                    }
                }
            }
        }
        if matches!(state, State::Star) {
            cur.push_str(&format!("[^{sep}]*"));
        }
        parts.push(cur);

        // full match covers the entire path
        let full_src = format!("^{}$", parts.join(""));
        // prefix match makes every successive segment optional
        let mut prefix_src = format!("^{}", parts.join("(?:"));
        for _ in 0..parts.len() - 1 {
            prefix_src.push_str(")?");
        }
        prefix_src.push('$');

        let compile = |src: &str| {
            Regex::new(src).map_err(|e| VbumpError::Pattern {
                pattern: expr.to_string(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            full: compile(&full_src)?,
            prefix: compile(&prefix_src)?,
        })
    }

    /// Test a file path against the full pattern, or a directory path
    /// against the prefix pattern.
    pub fn matches(&self, path: &str, prefix: bool) -> bool {
        if prefix {
            self.prefix.is_match(path)
        } else {
            self.full.is_match(path)
        }
    }
}

/// Normalize a path or pattern: drop `.` segments and empty segments,
/// keeping a leading separator for absolute paths.
fn clean(path: &str) -> String {
    let abs = path.starts_with(MAIN_SEPARATOR);
    let parts: Vec<&str> = path
        .split(MAIN_SEPARATOR)
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    let joined = parts.join(&MAIN_SEPARATOR.to_string());
    if abs {
        format!("{MAIN_SEPARATOR}{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Join path components the way the walker builds paths: `.` components
/// vanish unless they are the only component, and a leading empty
/// component (the residue of splitting an absolute path on the
/// separator) restores the root.
fn join(parts: &[&str]) -> String {
    let mut out = String::new();
    let mut rest = parts;
    if let Some(("", tail)) = parts.split_first().map(|(f, t)| (*f, t)) {
        out.push(MAIN_SEPARATOR);
        rest = tail;
    }
    for part in rest {
        if part.is_empty() || (*part == "." && parts.len() > 1) {
            continue;
        }
        if !out.is_empty() && !out.ends_with(MAIN_SEPARATOR) {
            out.push(MAIN_SEPARATOR);
        }
        out.push_str(part);
    }
    if out.is_empty() {
        ".".to_string()
    } else {
        out
    }
}

/// Depth-first directory traversal yielding `(path, pattern-key)` pairs.
pub struct Walker {
    conf_keys: Vec<String>,
    patterns: Vec<Pattern>,
    paths: Vec<String>,
    /// Stack of sibling lists; `cur_path[i][0]` is the component of the
    /// current path at depth `i`.
    cur_path: Vec<Vec<String>>,
    /// Index of the last pattern returned for the current file.
    cur_conf: isize,
}

impl Walker {
    /// Build a walker over `paths` (default: the current directory) using
    /// the config's file table.
    pub fn new(paths: &[String], files: &BTreeMap<String, FileEntry>) -> Result<Self, VbumpError> {
        let paths = if paths.is_empty() {
            vec![".".to_string()]
        } else {
            paths.to_vec()
        };
        // pattern keys sorted so multiple matches yield deterministically
        let conf_keys: Vec<String> = files.keys().cloned().collect();
        let patterns = conf_keys
            .iter()
            .map(|k| Pattern::new(k))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            conf_keys,
            patterns,
            paths,
            cur_path: Vec::new(),
            cur_conf: -1,
        })
    }

    /// Finish the current path: advance to the next sibling, or pop levels
    /// until one has a sibling left.
    fn pop_cur_path(&mut self) {
        while let Some(level) = self.cur_path.last_mut() {
            if level.len() > 1 {
                level.remove(0);
                self.cur_conf = -1;
                return;
            }
            self.cur_path.pop();
        }
    }

    fn step(&mut self) -> Option<Result<(String, String), VbumpError>> {
        loop {
            // all patterns checked against the current path: move on
            if self.cur_conf + 1 >= self.patterns.len() as isize {
                self.pop_cur_path();
            }

            // tree exhausted: pull the next root path
            if self.cur_path.is_empty() {
                if self.paths.is_empty() {
                    return None;
                }
                let next = clean(&self.paths.remove(0));
                self.cur_path = next
                    .split(MAIN_SEPARATOR)
                    .map(|part| vec![part.to_string()])
                    .collect();
                self.cur_conf = -1;
            }

            let parts: Vec<&str> = self.cur_path.iter().map(|l| l[0].as_str()).collect();
            let filename = join(&parts);
            let meta = match std::fs::metadata(&filename) {
                Ok(m) => m,
                Err(e) => {
                    self.pop_cur_path();
                    return Some(Err(VbumpError::io(&filename, e)));
                }
            };

            if meta.is_dir() {
                // prune subtrees no pattern prefix can reach; the walk
                // roots themselves are always searched
                let root = filename == "." || filename == MAIN_SEPARATOR.to_string();
                let found = root
                    || self
                        .patterns
                        .iter()
                        .any(|p| p.matches(&filename, true));
                if !found {
                    self.pop_cur_path();
                    continue;
                }
                let entries = match std::fs::read_dir(&filename) {
                    Ok(rd) => rd,
                    Err(e) => {
                        self.pop_cur_path();
                        return Some(Err(VbumpError::io(&filename, e)));
                    }
                };
                let mut names = Vec::new();
                for entry in entries {
                    match entry {
                        Ok(e) => names.push(e.file_name().to_string_lossy().into_owned()),
                        Err(e) => {
                            self.pop_cur_path();
                            return Some(Err(VbumpError::io(&filename, e)));
                        }
                    }
                }
                if names.is_empty() {
                    self.pop_cur_path();
                    continue;
                }
                names.sort();
                self.cur_path.push(names);
                continue;
            }

            // a file: yield once per matching pattern
            self.cur_conf += 1;
            while (self.cur_conf as usize) < self.patterns.len() {
                if self.patterns[self.cur_conf as usize].matches(&filename, false) {
                    return Some(Ok((
                        filename,
                        self.conf_keys[self.cur_conf as usize].clone(),
                    )));
                }
                self.cur_conf += 1;
            }
        }
    }
}

impl Iterator for Walker {
    type Item = Result<(String, String), VbumpError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step()
    }
}
