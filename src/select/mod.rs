//! Selector: reduce a multi-valued source result to one version string.
//!
//! The processor's filter, sort, offset, and output template drive the
//! reduction:
//!
//! 1. The filter expression (template-expanded against the match context,
//!    then compiled as a regex) drops non-matching keys.
//! 2. An optional sort template transforms each key before comparison; the
//!    original key is remembered and restored afterwards.
//! 3. Keys sort by the configured method: `semver`, `numeric`, or plain
//!    string comparison, ascending or descending.
//! 4. The offset indexes the sorted list; the selected key maps back to its
//!    value in `VerMap`.
//! 5. An optional output template renders `{VerMap, VerMeta, VerList,
//!    Version}` into the final string.

use regex::Regex;
use serde_json::{json, Value};

use crate::config::ProcessorEntry;
use crate::core::VbumpError;
use crate::source::Results;
use crate::template;

/// Pick one version out of `results` per the processor's selection rules.
/// `data` is the per-match template context used for filter expansion.
pub fn select(
    results: &Results,
    proc: &ProcessorEntry,
    data: &Value,
) -> Result<String, VbumpError> {
    let filter = if proc.filter.expr.is_empty() {
        None
    } else {
        let expr = template::render(&proc.filter.expr, data)?;
        let re = Regex::new(&expr).map_err(|e| VbumpError::Pattern {
            pattern: expr.clone(),
            reason: format!("failed to compile filter expr: {e}"),
        })?;
        Some(re)
    };

    // keys that survive the filter, each remembering its original spelling
    // when a sort template rewrites it
    let mut keys: Vec<String> = Vec::new();
    let mut key_to_ver: std::collections::BTreeMap<String, String> = Default::default();
    for ver in results.ver_map.keys() {
        if let Some(re) = &filter {
            if !re.is_match(ver) {
                continue;
            }
        }
        let key = if proc.sort.template.is_empty() {
            ver.clone()
        } else {
            match template::render(&proc.sort.template, &Value::String(ver.clone())) {
                Ok(k) => k,
                // keys the transform cannot handle drop out of the sort
                Err(_) => continue,
            }
        };
        key_to_ver.insert(key.clone(), ver.clone());
        keys.push(key);
    }
    if keys.is_empty() {
        return Err(VbumpError::FilterEmpty {
            expr: proc.filter.expr.clone(),
        });
    }

    sort_keys(&mut keys, proc)?;

    // map transformed keys back to the VerMap keys they came from
    let ver_list: Vec<String> = keys.iter().map(|k| key_to_ver[k].clone()).collect();

    if ver_list.len() <= proc.sort.offset {
        return Err(VbumpError::OffsetOutOfRange {
            len: ver_list.len(),
            versions: ver_list,
        });
    }
    let selected = &ver_list[proc.sort.offset];
    let version = results.ver_map[selected].clone();

    if proc.template.is_empty() {
        return Ok(version);
    }
    let out_data = json!({
        "VerMap": results.ver_map,
        "VerMeta": results.ver_meta,
        "VerList": ver_list,
        "Version": version,
    });
    template::render(&proc.template, &out_data)
}

/// Order `keys` in place per the sort method and direction.
fn sort_keys(keys: &mut Vec<String>, proc: &ProcessorEntry) -> Result<(), VbumpError> {
    let asc = proc.sort.asc;
    match proc.sort.method.as_str() {
        "semver" => {
            let mut parsed: Vec<(semver::Version, String)> = keys
                .iter()
                .filter_map(|k| parse_semver_lenient(k).map(|v| (v, k.clone())))
                .collect();
            if parsed.is_empty() {
                return Err(VbumpError::SortEmpty {
                    method: "semver",
                    keys: keys.clone(),
                });
            }
            parsed.sort_by(|a, b| a.0.cmp(&b.0));
            if !asc {
                parsed.reverse();
            }
            *keys = parsed.into_iter().map(|(_, k)| k).collect();
        }
        "numeric" => {
            let mut parsed: Vec<(i64, String)> = keys
                .iter()
                .filter_map(|k| k.parse::<i64>().ok().map(|n| (n, k.clone())))
                .collect();
            if parsed.is_empty() {
                return Err(VbumpError::SortEmpty {
                    method: "numeric",
                    keys: keys.clone(),
                });
            }
            parsed.sort_by_key(|(n, _)| *n);
            if !asc {
                parsed.reverse();
            }
            *keys = parsed.into_iter().map(|(_, k)| k).collect();
        }
        _ => {
            keys.sort();
            if !asc {
                keys.reverse();
            }
        }
    }
    Ok(())
}

/// Parse a key as a semantic version the way release tags are actually
/// spelled: a leading `v` is dropped and missing minor/patch components
/// are padded with zeros. Returns `None` when no reading works.
fn parse_semver_lenient(key: &str) -> Option<semver::Version> {
    let trimmed = key
        .strip_prefix('v')
        .or_else(|| key.strip_prefix('V'))
        .unwrap_or(key);
    if let Ok(v) = semver::Version::parse(trimmed) {
        return Some(v);
    }
    let core_end = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, rest) = trimmed.split_at(core_end);
    let padded = match core.chars().filter(|c| *c == '.').count() {
        0 => format!("{core}.0.0{rest}"),
        1 => format!("{core}.0{rest}"),
        _ => return None,
    };
    semver::Version::parse(&padded).ok()
}
