use std::path::Path;

use tracing::{info, warn};

use crate::dedup::{dedupe_by_keys, dedupe_by_name_and_amounts};
use crate::error::Result;
use crate::fetcher::{Fetcher, Query};
use crate::filter::filter_record;
use crate::ledger::{self, MergeSummary};
use crate::record::Record;

/// Anything that can produce one page of records for a query.
pub trait PageSource {
    fn fetch_page(&self, query: &Query) -> Result<Vec<Record>>;
}

impl PageSource for Fetcher {
    fn fetch_page(&self, query: &Query) -> Result<Vec<Record>> {
        Fetcher::fetch_page(self, query)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    pub only_zero: bool,
    pub extra_keyword: String,
    /// Key fields for the composite-key dedup; empty disables it.
    pub dedupe_keys: Vec<String>,
}

/// Pipeline milestones reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    PageFetched { page: u32, records: usize },
    Filtered { kept: usize, zero: usize, total: usize },
    Deduplicated { before: usize, after: usize },
    KeyDeduplicated { before: usize, after: usize },
    Merged { appended: usize, skipped: usize },
}

#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub fetched: usize,
    pub filtered: usize,
    /// Records left after both dedup passes, ready for preview and the ledger.
    pub records: Vec<Record>,
}

/// Filter and dedup an already fetched batch.
pub fn process(raw: Vec<Record>, opts: &CollectOptions, progress: &mut dyn FnMut(Progress)) -> Batch {
    let fetched = raw.len();
    let mut zero = 0;
    let filtered: Vec<Record> = raw
        .into_iter()
        .filter(|rec| {
            let verdict = filter_record(rec, opts.only_zero, &opts.extra_keyword);
            if verdict.keep && verdict.is_zero {
                zero += 1;
            }
            verdict.keep
        })
        .collect();
    progress(Progress::Filtered {
        kept: filtered.len(),
        zero,
        total: fetched,
    });

    let before = filtered.len();
    let deduped = dedupe_by_name_and_amounts(filtered);
    info!("Name+amount dedup: {} -> {}", before, deduped.len());
    progress(Progress::Deduplicated {
        before,
        after: deduped.len(),
    });

    let records = if opts.dedupe_keys.is_empty() {
        deduped
    } else {
        let signature_count = deduped.len();
        let records = dedupe_by_keys(deduped, &opts.dedupe_keys);
        info!(
            "Key dedup on {}: {} -> {}",
            opts.dedupe_keys.join(","),
            signature_count,
            records.len()
        );
        progress(Progress::KeyDeduplicated {
            before: signature_count,
            after: records.len(),
        });
        records
    };

    Batch {
        fetched,
        filtered: before,
        records,
    }
}

/// Fetch `pages` consecutive pages starting at `query.page_no` (or 1),
/// stopping early at the first empty page, then filter and dedup.
pub fn collect(
    source: &dyn PageSource,
    query: &Query,
    pages: u32,
    opts: &CollectOptions,
    progress: &mut dyn FnMut(Progress),
) -> Result<Batch> {
    query.validate()?;
    let first = query.page_no.unwrap_or(1);
    let mut raw = Vec::new();

    for offset in 0..pages.max(1) {
        let Some(page_no) = first.checked_add(offset) else {
            warn!("Page number would pass {}, stopping", u32::MAX);
            break;
        };
        let mut page_query = query.clone();
        // a single unnumbered request is sent as-is
        if pages > 1 || query.page_no.is_some() {
            page_query.page_no = Some(page_no);
        }
        let page = source.fetch_page(&page_query)?;
        progress(Progress::PageFetched {
            page: page_no,
            records: page.len(),
        });
        if page.is_empty() {
            info!("Page {} is empty, stopping", page_no);
            break;
        }
        raw.extend(page);
    }

    Ok(process(raw, opts, progress))
}

/// Merge a processed batch into the ledger and report it.
pub fn persist(
    batch: &Batch,
    ledger_path: &Path,
    include_amount_columns: bool,
    progress: &mut dyn FnMut(Progress),
) -> Result<MergeSummary> {
    let summary = ledger::merge(&batch.records, ledger_path, include_amount_columns)?;
    progress(Progress::Merged {
        appended: summary.appended,
        skipped: summary.skipped,
    });
    Ok(summary)
}
