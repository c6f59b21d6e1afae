use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;
use tracing::debug;

use crate::record::{sort_amount_fields, Record, UPDATE_DATE};

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Keep the first record seen for each distinct tuple of trimmed key values.
pub fn dedupe_by_keys(records: Vec<Record>, keys: &[String]) -> Vec<Record> {
    if keys.is_empty() {
        return records;
    }
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    records
        .into_iter()
        .filter(|r| {
            let key = keys
                .iter()
                .map(|k| r.get(k).unwrap_or_default().trim().to_string())
                .collect();
            seen.insert(key)
        })
        .collect()
}

/// Name used for clustering: whitespace removed, lower-cased.
pub fn normalize_name(name: &str) -> String {
    WHITESPACE_RE.replace_all(name, "").to_lowercase()
}

/// `UPDATE_DATE` as `YYYYMMDD`. Anything with fewer than eight digits is 0.
pub fn date_key(raw: &str) -> u32 {
    let digits: String = raw.chars().filter(char::is_ascii_digit).take(8).collect();
    if digits.len() < 8 {
        return 0;
    }
    digits.parse().unwrap_or(0)
}

/// Amount field names seen anywhere in a batch, ordered by numeric suffix.
/// Computed once per batch so every record is compared on the same columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmountKeys(Vec<String>);

impl AmountKeys {
    pub fn collect(records: &[Record]) -> Self {
        let mut keys: Vec<String> = records
            .iter()
            .flat_map(|r| r.amounts.keys())
            .unique()
            .cloned()
            .collect();
        sort_amount_fields(&mut keys);
        AmountKeys(keys)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Trimmed amount values in key order; missing fields are "".
    pub fn signature<'a>(&self, rec: &'a Record) -> Vec<&'a str> {
        self.0
            .iter()
            .map(|k| rec.amounts.get(k).map(|v| v.trim()).unwrap_or(""))
            .collect()
    }
}

/// Pick the survivor of a cluster given `(batch position, date key)` pairs.
/// Greatest date wins; on equal dates the earliest position wins.
pub fn pick_survivor(cluster: &[(usize, u32)]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for &(pos, date) in cluster {
        best = match best {
            None => Some((pos, date)),
            Some((bpos, bdate)) => {
                if date > bdate || (date == bdate && pos < bpos) {
                    Some((pos, date))
                } else {
                    Some((bpos, bdate))
                }
            }
        };
    }
    best.map(|(pos, _)| pos)
}

/// Collapse records that share a normalized name and an identical amount
/// signature, keeping the most recently updated one of each cluster.
///
/// Survivors come back in their original batch order.
pub fn dedupe_by_name_and_amounts(records: Vec<Record>) -> Vec<Record> {
    if records.is_empty() {
        return records;
    }
    let amount_keys = AmountKeys::collect(&records);
    let survivors = survivor_positions(&records, &amount_keys);
    debug!(
        amount_keys = amount_keys.len(),
        before = records.len(),
        after = survivors.len(),
        "signature dedup"
    );

    let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
    survivors
        .into_iter()
        .filter_map(|pos| slots[pos].take())
        .collect()
}

/// Batch positions of the records that survive signature dedup, ascending.
pub fn survivor_positions(records: &[Record], amount_keys: &AmountKeys) -> Vec<usize> {
    // name groups in order of first appearance
    let mut group_index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (pos, rec) in records.iter().enumerate() {
        let key = normalize_name(rec.name());
        let idx = *group_index.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[idx].push(pos);
    }

    let mut survivors = Vec::with_capacity(groups.len());
    for members in groups {
        if members.len() == 1 {
            survivors.push(members[0]);
            continue;
        }

        let mut cluster_index: HashMap<Vec<&str>, usize> = HashMap::new();
        let mut clusters: Vec<Vec<(usize, u32)>> = Vec::new();
        for pos in members {
            let rec = &records[pos];
            let sig = amount_keys.signature(rec);
            let idx = *cluster_index.entry(sig).or_insert_with(|| {
                clusters.push(Vec::new());
                clusters.len() - 1
            });
            let date = date_key(rec.get(UPDATE_DATE).unwrap_or_default().trim());
            clusters[idx].push((pos, date));
        }

        survivors.extend(clusters.iter().filter_map(|c| pick_survivor(c)));
    }

    survivors.sort_unstable();
    survivors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FOOD_NM_KR, NUM};

    fn rec(num: &str, name: &str, date: &str, amounts: &[(&str, &str)]) -> Record {
        let mut r = Record::from_pairs([(NUM, num), (FOOD_NM_KR, name), (UPDATE_DATE, date)]);
        for (k, v) in amounts {
            r.set(k, v.to_string());
        }
        r
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.id().unwrap_or_default()).collect()
    }

    #[test]
    fn date_key_formats() {
        assert_eq!(date_key("2025-01-23"), 20250123);
        assert_eq!(date_key("20250123"), 20250123);
        assert_eq!(date_key("2025.01.23 10:11:12"), 20250123);
        assert_eq!(date_key("2025-01"), 0);
        assert_eq!(date_key(""), 0);
        assert_eq!(date_key("unknown"), 0);
    }

    #[test]
    fn normalize_strips_all_whitespace() {
        assert_eq!(normalize_name(" Zero  Cola\t라임 "), "zerocola라임");
        assert_eq!(normalize_name("ZeroCola라임"), normalize_name("zero cola 라임"));
    }

    #[test]
    fn simple_key_dedup_keeps_first() {
        let batch = vec![
            Record::from_pairs([(NUM, "1"), ("FOOD_CD", "A"), (FOOD_NM_KR, "콜라")]),
            Record::from_pairs([(NUM, "2"), ("FOOD_CD", " A "), (FOOD_NM_KR, "콜라")]),
            Record::from_pairs([(NUM, "3"), ("FOOD_CD", "B"), (FOOD_NM_KR, "콜라")]),
            Record::from_pairs([(NUM, "4"), (FOOD_NM_KR, "콜라")]),
            Record::from_pairs([(NUM, "5"), ("FOOD_CD", ""), (FOOD_NM_KR, "콜라 ")]),
        ];
        let keys = vec!["FOOD_CD".to_string(), FOOD_NM_KR.to_string()];
        let out = dedupe_by_keys(batch, &keys);
        assert_eq!(ids(&out), ["1", "3", "4"]);
    }

    #[test]
    fn simple_key_dedup_without_keys_is_identity() {
        let batch = vec![rec("1", "a", "", &[]), rec("1", "a", "", &[])];
        assert_eq!(dedupe_by_keys(batch, &[]).len(), 2);
    }

    #[test]
    fn amount_keys_union_sorted_by_suffix() {
        let batch = vec![
            rec("1", "a", "", &[("AMT_NUM10", "1"), ("AMT_NUM2", "1")]),
            rec("2", "b", "", &[("AMT_NUM1", "1"), ("AMT_NUM2", "3")]),
        ];
        let keys = AmountKeys::collect(&batch);
        assert_eq!(keys.as_slice(), ["AMT_NUM1", "AMT_NUM2", "AMT_NUM10"]);
        assert_eq!(keys.signature(&batch[0]), ["", "1", "1"]);
    }

    #[test]
    fn recency_wins() {
        let batch = vec![
            rec("old", "제로 콜라", "2025-01-20", &[("AMT_NUM1", "0")]),
            rec("new", "제로콜라", "2025-01-23", &[("AMT_NUM1", "0")]),
        ];
        let out = dedupe_by_name_and_amounts(batch);
        assert_eq!(ids(&out), ["new"]);
    }

    #[test]
    fn tie_keeps_first_on_equal_dates() {
        let batch = vec![
            rec("first", "제로 콜라", "2025-01-23", &[("AMT_NUM1", "0")]),
            rec("second", "제로 콜라", "20250123", &[("AMT_NUM1", "0")]),
        ];
        assert_eq!(ids(&dedupe_by_name_and_amounts(batch)), ["first"]);
    }

    #[test]
    fn tie_keeps_first_when_both_dates_unparsable() {
        let batch = vec![
            rec("first", "제로 콜라", "n/a", &[("AMT_NUM1", "0")]),
            rec("second", "제로 콜라", "", &[("AMT_NUM1", "0")]),
        ];
        assert_eq!(ids(&dedupe_by_name_and_amounts(batch)), ["first"]);
    }

    #[test]
    fn any_real_date_beats_unparsable() {
        let batch = vec![
            rec("undated", "제로 콜라", "", &[]),
            rec("dated", "제로 콜라", "2019-03-01", &[]),
        ];
        assert_eq!(ids(&dedupe_by_name_and_amounts(batch)), ["dated"]);
    }

    #[test]
    fn different_amounts_are_different_items() {
        let batch = vec![
            rec("a", "제로 콜라", "2025-01-20", &[("AMT_NUM1", "0")]),
            rec("b", "제로 콜라", "2025-01-23", &[("AMT_NUM1", "1")]),
            rec("c", "제로 콜라", "2025-01-25", &[("AMT_NUM1", "0"), ("AMT_NUM3", "2")]),
        ];
        assert_eq!(ids(&dedupe_by_name_and_amounts(batch)), ["a", "b", "c"]);
    }

    #[test]
    fn missing_amount_equals_empty_amount() {
        let batch = vec![
            rec("a", "콜라", "2025-01-20", &[("AMT_NUM1", "5")]),
            rec("b", "콜라", "2025-01-21", &[("AMT_NUM1", " 5 "), ("AMT_NUM2", "")]),
        ];
        assert_eq!(ids(&dedupe_by_name_and_amounts(batch)), ["b"]);
    }

    #[test]
    fn one_survivor_per_cluster_in_batch_order() {
        let batch = vec![
            rec("x1", "사이다", "2024-01-01", &[("AMT_NUM1", "9")]),
            rec("y1", "제로 콜라", "2024-05-01", &[("AMT_NUM1", "0")]),
            rec("x2", "사 이 다", "2024-02-01", &[("AMT_NUM1", "9")]),
            rec("z1", "두유", "", &[]),
            rec("y2", "제로콜라", "2024-04-01", &[("AMT_NUM1", "0")]),
        ];
        assert_eq!(ids(&dedupe_by_name_and_amounts(batch)), ["y1", "x2", "z1"]);
    }

    #[test]
    fn permuted_batch_keeps_same_survivors() {
        let batch = vec![
            rec("a1", "콜라", "2025-01-01", &[("AMT_NUM1", "1")]),
            rec("a2", "콜라", "2025-02-01", &[("AMT_NUM1", "1")]),
            rec("b1", "사이다", "2025-01-01", &[("AMT_NUM2", "7")]),
            rec("b2", "사이다", "2024-01-01", &[("AMT_NUM2", "7")]),
            rec("c1", "두유", "2025-03-03", &[]),
        ];
        let mut reversed = batch.clone();
        reversed.reverse();

        let mut forward: Vec<String> = ids(&dedupe_by_name_and_amounts(batch))
            .into_iter()
            .map(String::from)
            .collect();
        let mut backward: Vec<String> = ids(&dedupe_by_name_and_amounts(reversed))
            .into_iter()
            .map(String::from)
            .collect();
        forward.sort();
        backward.sort();
        assert_eq!(forward, ["a2", "b1", "c1"]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn tie_break_follows_fixed_permutation() {
        let batch = vec![
            rec("p", "콜라", "2025-01-01", &[]),
            rec("q", "콜라", "2025-01-01", &[]),
        ];
        let mut swapped = batch.clone();
        swapped.swap(0, 1);
        assert_eq!(ids(&dedupe_by_name_and_amounts(batch)), ["p"]);
        assert_eq!(ids(&dedupe_by_name_and_amounts(swapped)), ["q"]);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let batch = vec![
            rec("1", "a", "2025-01-01", &[("AMT_NUM1", "1")]),
            rec("2", "b", "2025-01-01", &[]),
            rec("3", "A", "2025-01-02", &[("AMT_NUM1", "1")]),
        ];
        let first = dedupe_by_name_and_amounts(batch.clone());
        let second = dedupe_by_name_and_amounts(batch);
        assert_eq!(first, second);
        assert_eq!(ids(&first), ["2", "3"]);
    }

    #[test]
    fn empty_batch() {
        assert!(dedupe_by_name_and_amounts(Vec::new()).is_empty());
        assert!(dedupe_by_keys(Vec::new(), &["NUM".to_string()]).is_empty());
    }

    #[test]
    fn pick_survivor_comparator() {
        assert_eq!(pick_survivor(&[]), None);
        assert_eq!(pick_survivor(&[(4, 0)]), Some(4));
        assert_eq!(pick_survivor(&[(1, 20250120), (2, 20250123)]), Some(2));
        assert_eq!(pick_survivor(&[(1, 20250123), (2, 20250123)]), Some(1));
        assert_eq!(pick_survivor(&[(1, 0), (2, 0)]), Some(1));
        // position, not slice order, breaks ties
        assert_eq!(pick_survivor(&[(5, 20250101), (3, 20250101)]), Some(3));
    }
}
