use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

pub const NUM: &str = "NUM";
pub const FOOD_NM_KR: &str = "FOOD_NM_KR";
pub const MAKER_NM: &str = "MAKER_NM";
pub const UPDATE_DATE: &str = "UPDATE_DATE";
pub const AMOUNT_PREFIX: &str = "AMT_NUM";

static AMOUNT_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"AMT_NUM(\d+)").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub num: Option<String>,
    pub food_name: Option<String>,
    pub maker: Option<String>,
    pub update_date: Option<String>,
    /// `AMT_NUM<k>` fields present on this record.
    pub amounts: BTreeMap<String, String>,
    /// Everything else the service returned (category, serving size, ...).
    pub extra: BTreeMap<String, String>,
}

impl Record {
    pub fn from_json(obj: &Map<String, Value>) -> Self {
        let mut rec = Record::default();
        for (key, value) in obj {
            if let Some(v) = scalar_to_string(value) {
                rec.set(key, v);
            }
        }
        rec
    }

    /// Build a record from `(field, value)` pairs. Mostly for tests and
    /// callers that already hold flat rows.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut rec = Record::default();
        for (k, v) in pairs {
            rec.set(k.as_ref(), v.into());
        }
        rec
    }

    pub fn set(&mut self, field: &str, value: String) {
        match field {
            NUM => self.num = Some(value),
            FOOD_NM_KR => self.food_name = Some(value),
            MAKER_NM => self.maker = Some(value),
            UPDATE_DATE => self.update_date = Some(value),
            f if is_amount_field(f) => {
                self.amounts.insert(f.to_string(), value);
            }
            f => {
                self.extra.insert(f.to_string(), value);
            }
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        match field {
            NUM => self.num.as_deref(),
            FOOD_NM_KR => self.food_name.as_deref(),
            MAKER_NM => self.maker.as_deref(),
            UPDATE_DATE => self.update_date.as_deref(),
            f if is_amount_field(f) => self.amounts.get(f).map(String::as_str),
            f => self.extra.get(f).map(String::as_str),
        }
    }

    /// Trimmed identifier, `None` when missing or blank.
    pub fn id(&self) -> Option<&str> {
        self.num.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn name(&self) -> &str {
        self.food_name.as_deref().unwrap_or_default()
    }
}

pub fn is_amount_field(field: &str) -> bool {
    field.starts_with(AMOUNT_PREFIX)
}

/// Numeric suffix of an amount field name; 0 when it has none.
pub fn amount_suffix(field: &str) -> u64 {
    AMOUNT_SUFFIX_RE
        .captures(field)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

/// Sort amount field names by numeric suffix, then by name.
pub fn sort_amount_fields(fields: &mut [String]) {
    fields.sort_by(|a, b| {
        amount_suffix(a)
            .cmp(&amount_suffix(b))
            .then_with(|| a.cmp(b))
    });
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_known_amount_and_extra_fields() {
        let v = json!({
            "NUM": "D000123",
            "FOOD_NM_KR": "제로 콜라",
            "MAKER_NM": "코카콜라음료",
            "UPDATE_DATE": "2025-01-23",
            "AMT_NUM1": "0",
            "AMT_NUM13": 12.5,
            "FOOD_CAT1_NM": "음료류",
            "ITEM_REPORT_NO": null
        });
        let rec = Record::from_json(v.as_object().unwrap());
        assert_eq!(rec.id(), Some("D000123"));
        assert_eq!(rec.name(), "제로 콜라");
        assert_eq!(rec.get(MAKER_NM), Some("코카콜라음료"));
        assert_eq!(rec.amounts.len(), 2);
        assert_eq!(rec.get("AMT_NUM13"), Some("12.5"));
        assert_eq!(rec.get("FOOD_CAT1_NM"), Some("음료류"));
        assert_eq!(rec.get("ITEM_REPORT_NO"), None);
    }

    #[test]
    fn numeric_identifier_becomes_string() {
        let v = json!({ "NUM": 42 });
        let rec = Record::from_json(v.as_object().unwrap());
        assert_eq!(rec.id(), Some("42"));
    }

    #[test]
    fn blank_identifier_is_none() {
        let rec = Record::from_pairs([(NUM, "   ")]);
        assert_eq!(rec.id(), None);
        assert_eq!(Record::default().id(), None);
    }

    #[test]
    fn amount_fields_sort_numerically() {
        let mut fields = vec![
            "AMT_NUM10".to_string(),
            "AMT_NUM2".to_string(),
            "AMT_NUM1".to_string(),
        ];
        sort_amount_fields(&mut fields);
        assert_eq!(fields, ["AMT_NUM1", "AMT_NUM2", "AMT_NUM10"]);
    }

    #[test]
    fn suffixless_amount_field_sorts_first() {
        assert_eq!(amount_suffix("AMT_NUM"), 0);
        assert_eq!(amount_suffix("AMT_NUM7"), 7);
    }
}
