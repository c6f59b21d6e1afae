use std::borrow::Cow;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{EngineError, FetchCause, Result};
use crate::record::Record;

/// Category marker sent with every request (commercial products only).
pub const DB_CLASS_NM: &str = "상용제품";
pub const DEFAULT_NUM_OF_ROWS: u32 = 100;

/// One page request against the nutrition database.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub service_key: String,
    pub num_of_rows: Option<u32>,
    pub page_no: Option<u32>,
    pub food_name: Option<String>,
    pub maker: Option<String>,
    pub category: Option<String>,
}

impl Query {
    pub fn new(service_key: impl Into<String>) -> Self {
        Query {
            service_key: service_key.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_key.trim().is_empty() {
            return Err(EngineError::validation("serviceKey", "must not be empty"));
        }
        Ok(())
    }

    /// Query-string pairs in request order. Blank filters are omitted.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("serviceKey", self.service_key.trim().to_string()),
            ("type", "json".to_string()),
            ("DB_CLASS_NM", DB_CLASS_NM.to_string()),
            (
                "numOfRows",
                self.num_of_rows.unwrap_or(DEFAULT_NUM_OF_ROWS).to_string(),
            ),
        ];
        if let Some(page) = self.page_no {
            params.push(("pageNo", page.to_string()));
        }
        let filters = [
            ("FOOD_NM_KR", &self.food_name),
            ("MAKER_NM", &self.maker),
            ("FOOD_CAT1_NM", &self.category),
        ];
        for (name, value) in filters {
            if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                params.push((name, v.to_string()));
            }
        }
        params
    }
}

/// Parse an optional count option; blank means "not set".
pub fn parse_count(field: &'static str, raw: &str) -> Result<Option<u32>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u32>()
        .map(Some)
        .map_err(|e| EngineError::validation(field, format!("'{raw}' is not a whole number ({e})")))
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Run `op` until it succeeds or `policy.attempts` is exhausted.
/// Sleeps `policy.delay` between attempts, never after the last one.
pub fn with_retry<T>(
    policy: RetryPolicy,
    mut op: impl FnMut(u32) -> std::result::Result<T, FetchCause>,
) -> Result<T> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(cause) if attempt >= attempts => {
                return Err(EngineError::Fetch { attempts, cause });
            }
            Err(cause) => {
                warn!(
                    "Request failed (attempt {}/{}): {}; retrying in {:.1}s",
                    attempt,
                    attempts,
                    cause,
                    policy.delay.as_secs_f64()
                );
                thread::sleep(policy.delay);
                attempt += 1;
            }
        }
    }
}

pub struct Fetcher {
    client: Client,
    endpoint: String,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Fetch {
                attempts: 0,
                cause: FetchCause::Transport(e),
            })?;
        Ok(Fetcher {
            client,
            endpoint: endpoint.into(),
            retry,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Fetcher::new(
            settings.endpoint.clone(),
            settings.request_timeout(),
            RetryPolicy {
                attempts: settings.retry_attempts,
                delay: settings.retry_delay(),
            },
        )
    }

    /// Fetch one page and flatten its envelope into records.
    pub fn fetch_page(&self, query: &Query) -> Result<Vec<Record>> {
        query.validate()?;
        let params = query.params();
        info!(
            "Fetching page {} ({} rows)",
            query.page_no.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            query.num_of_rows.unwrap_or(DEFAULT_NUM_OF_ROWS)
        );

        let body = with_retry(self.retry, |attempt| {
            debug!(attempt, endpoint = %self.endpoint, "GET");
            let resp = self.client.get(&self.endpoint).query(&params).send()?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchCause::Status(status));
            }
            let text = resp.text()?;
            Ok(serde_json::from_str::<Value>(&text)?)
        })?;

        let records: Vec<Record> = extract_items(&body)
            .iter()
            .map(|obj| Record::from_json(obj))
            .collect();
        info!("Decoded {} records", records.len());
        Ok(records)
    }
}

/// Flatten whatever envelope the service returned into record objects.
pub fn extract_items(data: &Value) -> Vec<Cow<'_, Map<String, Value>>> {
    match data {
        Value::Object(obj) => {
            if let Some(Value::Object(body)) = obj.get("body") {
                return normalize_items(body.get("items"));
            }
            if let Some(items) = obj.get("items").filter(|v| v.is_array() || v.is_object()) {
                return normalize_items(Some(items));
            }
            if let Some(item) = obj.get("item") {
                // a bare unusable `item` becomes a record holding only that field
                return item_records(item).unwrap_or_else(|| {
                    let mut single = Map::new();
                    single.insert("item".to_string(), item.clone());
                    vec![Cow::Owned(single)]
                });
            }
            if obj.is_empty() {
                return Vec::new();
            }
            vec![Cow::Borrowed(obj)]
        }
        Value::Array(arr) => objects(arr),
        _ => Vec::new(),
    }
}

fn normalize_items(items: Option<&Value>) -> Vec<Cow<'_, Map<String, Value>>> {
    let Some(items) = items else {
        return Vec::new();
    };
    match items {
        Value::Array(arr) => objects(arr),
        // without a usable `item`, the object is already a single record
        Value::Object(obj) if !obj.is_empty() => obj
            .get("item")
            .and_then(item_records)
            .unwrap_or_else(|| vec![Cow::Borrowed(obj)]),
        _ => Vec::new(),
    }
}

fn item_records(item: &Value) -> Option<Vec<Cow<'_, Map<String, Value>>>> {
    match item {
        Value::Array(arr) => Some(objects(arr)),
        Value::Object(obj) => Some(vec![Cow::Borrowed(obj)]),
        _ => None,
    }
}

fn objects(arr: &[Value]) -> Vec<Cow<'_, Map<String, Value>>> {
    arr.iter().filter_map(Value::as_object).map(Cow::Borrowed).collect()
}
