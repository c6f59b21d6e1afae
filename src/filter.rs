use crate::record::Record;

/// Substrings that mark a product as sugar-free. Matched against the
/// lower-cased product name.
pub const ZERO_PATTERNS: &[&str] = &[
    "제로",
    "zero",
    "sugar free",
    "sugar-free",
    "no sugar",
    "무설탕",
    "무가당",
    "무당",
    "제로슈거",
    "zero sugar",
    "0 sugar",
    "0g sugar",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub keep: bool,
    pub is_zero: bool,
}

pub fn matches_zero(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }
    let lower = name.to_lowercase();
    ZERO_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Decide whether a record goes on to dedup.
///
/// `only_zero` drops anything that is not sugar-free. A non-empty
/// `extra_keyword` must appear in the product name or the maker name.
pub fn filter_record(rec: &Record, only_zero: bool, extra_keyword: &str) -> Verdict {
    let name = rec.name().trim();
    let maker = rec.maker.as_deref().unwrap_or_default().trim();

    let is_zero = matches_zero(name);
    if only_zero && !is_zero {
        return Verdict { keep: false, is_zero };
    }

    let keyword = extra_keyword.trim().to_lowercase();
    let keep = keyword.is_empty()
        || name.to_lowercase().contains(&keyword)
        || maker.to_lowercase().contains(&keyword);
    Verdict { keep, is_zero }
}
