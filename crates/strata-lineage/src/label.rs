//! Helpers over BIDS-style resource names
//!
//! A resource name is a sequence of underscore-separated `key-value` tags
//! followed by a final suffix, e.g. `space-template_desc-preproc_bold`.
//! The suffix is the data type (`bold`).

use std::collections::BTreeMap;

const TAG_SEPARATOR: char = '_';
const DESC: &str = "desc-";

/// Final suffix of a resource name
///
/// ```
/// assert_eq!(strata_lineage::label::data_type("space-template_desc-preproc_bold"), "bold");
/// ```
#[must_use]
pub fn data_type(label: &str) -> &str {
    label.rsplit(TAG_SEPARATOR).next().unwrap_or(label)
}

/// Resource name with its `desc-*` tag removed
///
/// Fork tags are keyed on this form so that descriptive variants of a
/// resource share one fork history.
#[must_use]
pub fn base_label(label: &str) -> String {
    if !label.contains(DESC) {
        return label.to_string();
    }
    let kept: Vec<&str> = label
        .split(TAG_SEPARATOR)
        .filter(|tag| !tag.starts_with(DESC))
        .collect();
    if kept.is_empty() {
        label.to_string()
    } else {
        kept.join("_")
    }
}

/// `key -> value` map of the entity tags (the suffix is excluded)
#[must_use]
pub fn bids_tags(label: &str) -> BTreeMap<&str, &str> {
    let mut parts: Vec<&str> = label.split(TAG_SEPARATOR).collect();
    parts.pop();
    parts
        .into_iter()
        .filter_map(|tag| tag.split_once('-'))
        .collect()
}

/// Value of entity `key` if present
#[must_use]
pub fn tag_value<'a>(label: &'a str, key: &str) -> Option<&'a str> {
    bids_tags(label).get(key).copied()
}

/// True if the name carries an entity tag with this key
#[must_use]
pub fn has_tag(label: &str, key: &str) -> bool {
    tag_value(label, key).is_some()
}

/// Extend the description of a resource name with `suffix`
///
/// `desc-preproc_bold` becomes `desc-preproc-sm_bold`. Names without a
/// description gain `desc-{suffix}`, placed after a `space-*` tag when one
/// exists and at the front otherwise.
#[must_use]
pub fn append_desc(label: &str, suffix: &str) -> String {
    let tags: Vec<&str> = label.split(TAG_SEPARATOR).collect();
    if tags.iter().any(|tag| tag.starts_with(DESC)) {
        return tags
            .iter()
            .map(|tag| {
                if tag.starts_with(DESC) {
                    format!("{tag}-{suffix}")
                } else {
                    (*tag).to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("_");
    }
    if let Some(space) = tags.iter().position(|tag| tag.starts_with("space-")) {
        let mut out: Vec<String> = tags.iter().map(|t| (*t).to_string()).collect();
        out.insert(space + 1, format!("{DESC}{suffix}"));
        return out.join("_");
    }
    format!("{DESC}{suffix}_{label}")
}

/// Number a surviving variant of a resource for materialization
///
/// `desc-preproc_bold` becomes `desc-preproc-2_bold`; names without a
/// description gain `desc-2` before the suffix.
#[must_use]
pub fn with_variant_number(label: &str, number: usize) -> String {
    let mut tags: Vec<String> = label.split(TAG_SEPARATOR).map(str::to_string).collect();
    if let Some(desc) = tags.iter_mut().find(|tag| tag.starts_with(DESC)) {
        desc.push_str(&format!("-{number}"));
    } else {
        let at = tags.len().saturating_sub(1);
        tags.insert(at, format!("{DESC}{number}"));
    }
    tags.join("_")
}

/// Undo [`with_variant_number`]
///
/// Removes a trailing `-N` (up to three digits) from the description, or
/// the whole tag when the description is only a number.
#[must_use]
pub fn strip_variant_number(label: &str) -> String {
    let is_ordinal = |s: &str| !s.is_empty() && s.len() <= 3 && s.bytes().all(|b| b.is_ascii_digit());
    label
        .split(TAG_SEPARATOR)
        .filter_map(|tag| {
            let Some(value) = tag.strip_prefix(DESC) else {
                return Some(tag.to_string());
            };
            if is_ordinal(value) {
                return None;
            }
            match value.rsplit_once('-') {
                Some((head, tail)) if is_ordinal(tail) => Some(format!("{DESC}{head}")),
                _ => Some(tag.to_string()),
            }
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Remove every tag whose key is in `keys`
#[must_use]
pub fn strip_tags(label: &str, keys: &[&str]) -> String {
    label
        .split(TAG_SEPARATOR)
        .filter(|tag| {
            tag.split_once('-')
                .map_or(true, |(key, _)| !keys.contains(&key))
        })
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_label_strips_description() {
        assert_eq!(base_label("space-template_desc-preproc_bold"), "space-template_bold");
        assert_eq!(base_label("desc-brain_T1w"), "T1w");
        assert_eq!(base_label("alff"), "alff");
    }

    #[test]
    fn data_type_is_last_segment() {
        assert_eq!(data_type("desc-brain_T1w"), "T1w");
        assert_eq!(data_type("T1w-brain-template"), "T1w-brain-template");
    }

    #[test]
    fn tags_exclude_suffix() {
        let tags = bids_tags("space-template_res-derivative_desc-bold_mask");
        assert_eq!(tags.get("space"), Some(&"template"));
        assert_eq!(tags.get("res"), Some(&"derivative"));
        assert_eq!(tags.get("desc"), Some(&"bold"));
        assert_eq!(tags.len(), 3);
        assert!(has_tag("desc-preproc_bold", "desc"));
        assert!(!has_tag("bold", "desc"));
    }

    #[test]
    fn append_desc_rules() {
        assert_eq!(append_desc("desc-preproc_bold", "sm"), "desc-preproc-sm_bold");
        assert_eq!(append_desc("space-template_alff", "sm"), "space-template_desc-sm_alff");
        assert_eq!(append_desc("alff", "zstd"), "desc-zstd_alff");
    }

    #[test]
    fn variant_numbers_round_trip() {
        assert_eq!(with_variant_number("desc-preproc_bold", 2), "desc-preproc-2_bold");
        assert_eq!(with_variant_number("space-template_bold", 1), "space-template_desc-1_bold");
        assert_eq!(strip_variant_number("desc-preproc-2_bold"), "desc-preproc_bold");
        assert_eq!(strip_variant_number("space-template_desc-1_bold"), "space-template_bold");
        assert_eq!(strip_variant_number("desc-sm-zstd_alff"), "desc-sm-zstd_alff");
    }

    #[test]
    fn strip_tags_by_key() {
        assert_eq!(
            strip_tags("task-rest_run-1_space-template_desc-preproc_bold", &["task", "run"]),
            "space-template_desc-preproc_bold"
        );
    }
}
