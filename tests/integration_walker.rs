//! Walker behavior over a real tree with cwd-relative patterns.
//!
//! Kept in its own binary because the test changes the process working
//! directory; nothing else here may run concurrently with it.

use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

use vbump::config::FileEntry;
use vbump::walker::Walker;

#[test]
fn double_star_and_literal_patterns_over_a_tree() -> Result<()> {
    let dir = TempDir::new()?;
    let base = dir.path();
    fs::write(base.join("01-example.sh"), "")?;
    fs::create_dir_all(base.join("sub/sub"))?;
    fs::write(base.join("sub/02.sh"), "")?;
    fs::write(base.join("sub/sub/03.txt"), "")?;

    let orig = std::env::current_dir()?;
    std::env::set_current_dir(base)?;
    let run = || -> Result<Vec<(String, String)>> {
        let mut files = BTreeMap::new();
        files.insert("**/*.sh".to_string(), FileEntry::default());
        files.insert("01-example.sh".to_string(), FileEntry::default());
        let walker = Walker::new(&[], &files)?;
        Ok(walker.collect::<Result<Vec<_>, _>>()?)
    };
    let found = run();
    std::env::set_current_dir(orig)?;
    let found = found?;

    // 01-example.sh matches both patterns and is yielded twice, the
    // pattern keys in sorted order
    let example: Vec<&str> = found
        .iter()
        .filter(|(f, _)| f == "01-example.sh")
        .map(|(_, k)| k.as_str())
        .collect();
    assert_eq!(example, vec!["**/*.sh", "01-example.sh"]);

    // sub/02.sh matches only the double-star pattern
    let sub: Vec<&str> = found
        .iter()
        .filter(|(f, _)| f == "sub/02.sh")
        .map(|(_, k)| k.as_str())
        .collect();
    assert_eq!(sub, vec!["**/*.sh"]);

    // the txt file matches nothing
    assert!(!found.iter().any(|(f, _)| f.ends_with("03.txt")));
    Ok(())
}
