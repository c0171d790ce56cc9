use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::detail;
use crate::driver::Browser;
use crate::listing;
use crate::product::{Extraction, ProductRecord};

/// Knobs for one run. Defaults match a conservative production run.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub headless: bool,
    pub wait_timeout: Duration,
    pub click_delay: Duration,
    pub retry_attempts: u32,
    pub page_load_timeout: Duration,
    pub command_timeout: Duration,
    pub max_pages: Option<u32>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            headless: false,
            wait_timeout: Duration::from_secs(20),
            click_delay: Duration::from_millis(400),
            retry_attempts: 2,
            page_load_timeout: Duration::from_secs(120),
            command_timeout: Duration::from_secs(180),
            max_pages: None,
        }
    }
}

/// Run counters. Monotonically incremented, reported once at run end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub success: u64,
    pub partial: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl RunStats {
    fn record(&mut self, outcome: Extraction) {
        match outcome {
            Extraction::Complete => self.success += 1,
            Extraction::Partial => self.partial += 1,
            Extraction::Failed => self.failed += 1,
        }
    }
}

/// Top-level loop: pages → rows → detail views, with dedup applied before
/// any extraction work. Only the initial listing load can fail the run;
/// everything after degrades into statistics and log lines, and whatever
/// was collected so far is returned.
pub async fn scrape<B: Browser>(
    browser: &mut B,
    cfg: &ScrapeConfig,
    known: &mut HashSet<String>,
) -> Result<(Vec<ProductRecord>, RunStats)> {
    listing::open_listing(browser, cfg).await?;

    let mut stats = RunStats::default();
    let mut new_products: Vec<ProductRecord> = Vec::new();
    let mut processed_this_run: HashSet<String> = HashSet::new();
    let mut page_number: u32 = 1;

    loop {
        let summaries = match listing::collect_page_rows(browser, cfg).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Could not read the current listing page: {}", e);
                break;
            }
        };
        if summaries.is_empty() {
            warn!("Page contained no rows, stopping");
            break;
        }

        info!("Processing page {} with {} rows", page_number, summaries.len());

        for summary in &summaries {
            // Collection already normalized the registro and dropped blanks.
            let registro = summary.numero_registro.clone();
            if known.contains(&registro) || processed_this_run.contains(&registro) {
                debug!("Skipping already known product {}", registro);
                stats.skipped += 1;
                continue;
            }

            let (record, outcome) = detail::process_product(browser, cfg, summary).await;
            stats.record(outcome);
            known.insert(registro.clone());
            processed_this_run.insert(registro);
            new_products.push(record);
        }

        if cfg.max_pages.is_some_and(|max| page_number >= max) {
            info!("Requested page limit reached");
            break;
        }

        match listing::advance(browser, cfg).await {
            Ok(true) => page_number += 1,
            Ok(false) => break,
            Err(e) => {
                warn!("Pagination failed: {}", e);
                break;
            }
        }
    }

    Ok((new_products, stats))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockBrowser, MockRow};
    use crate::driver::Browser;

    fn cfg() -> ScrapeConfig {
        ScrapeConfig {
            wait_timeout: Duration::from_secs(2),
            click_delay: Duration::from_millis(10),
            ..ScrapeConfig::default()
        }
    }

    async fn run(
        browser: &mut MockBrowser,
        cfg: &ScrapeConfig,
        known: &mut HashSet<String>,
    ) -> (Vec<ProductRecord>, RunStats) {
        scrape(browser, cfg, known).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn two_pages_of_complete_details() {
        let mut browser = MockBrowser::new(vec![
            vec![
                MockRow::complete("10001"),
                MockRow::complete("10002"),
                MockRow::complete("10003"),
            ],
            vec![
                MockRow::complete("20001"),
                MockRow::complete("20002"),
                MockRow::complete("20003"),
            ],
        ]);
        let mut known = HashSet::new();

        let (records, stats) = run(&mut browser, &cfg(), &mut known).await;

        assert_eq!(records.len(), 6);
        assert_eq!(stats.success, 6);
        assert_eq!(stats.partial, 0);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.skipped, 0);
        assert_eq!(records[0].aptitudes, "Insecticida");
        assert_eq!(records[5].numero_registro, "20003");
    }

    #[tokio::test(start_paused = true)]
    async fn known_registro_is_skipped() {
        let mut browser = MockBrowser::new(vec![vec![
            MockRow::complete("12345"),
            MockRow::complete("67890"),
        ]]);
        let mut known: HashSet<String> = ["12345".to_string()].into();

        let (records, stats) = run(&mut browser, &cfg(), &mut known).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].numero_registro, "67890");
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.success, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_row_within_run_is_processed_once() {
        // A stale re-render can surface the same registro twice.
        let mut browser = MockBrowser::new(vec![vec![
            MockRow::complete("33333"),
            MockRow::complete("33333"),
        ]]);
        let mut known = HashSet::new();

        let (records, stats) = run(&mut browser, &cfg(), &mut known).await;

        assert_eq!(records.len(), 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.success, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_detail_is_exported_and_counted() {
        let mut browser =
            MockBrowser::new(vec![vec![MockRow::with_details("44444", "Herbicida", "")]]);
        let mut known = HashSet::new();

        let (records, stats) = run(&mut browser, &cfg(), &mut known).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].aptitudes, "Herbicida");
        assert_eq!(records[0].presentacion, "");
        assert_eq!(stats.partial, 1);
        assert_eq!(stats.success, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_degrade_to_failed_record() {
        let mut browser = MockBrowser::new(vec![vec![
            MockRow::with_details("55555", "", ""),
            MockRow::complete("55556"),
        ]]);
        let mut known = HashSet::new();

        let (records, stats) = run(&mut browser, &cfg(), &mut known).await;

        // The failed row is still exported, and the run moved on.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].numero_registro, "55555");
        assert_eq!(records[0].aptitudes, "");
        assert_eq!(records[0].presentacion, "");
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn detail_marker_appearing_on_second_attempt() {
        let mut flaky = MockRow::complete("66666");
        flaky.fail_opens = 1;
        let mut browser = MockBrowser::new(vec![vec![flaky]]);
        let mut known = HashSet::new();

        let (records, stats) = run(&mut browser, &cfg(), &mut known).await;

        assert_eq!(records.len(), 1);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn max_pages_caps_the_loop() {
        let mut browser = MockBrowser::new(vec![
            vec![MockRow::complete("1")],
            vec![MockRow::complete("2")],
            vec![MockRow::complete("3")],
        ]);
        let mut known = HashSet::new();
        let cfg = ScrapeConfig {
            max_pages: Some(1),
            ..cfg()
        };

        let (records, stats) = run(&mut browser, &cfg, &mut known).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].numero_registro, "1");
        assert_eq!(stats.success, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pagination_terminates_after_last_page() {
        // No numbered pagination; the "next" control disappears on page 3.
        let mut browser = MockBrowser::new(vec![
            vec![MockRow::complete("1")],
            vec![MockRow::complete("2")],
            vec![MockRow::complete("3")],
        ]);
        let mut known = HashSet::new();

        let (records, stats) = run(&mut browser, &cfg(), &mut known).await;

        assert_eq!(records.len(), 3);
        assert_eq!(stats.success, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_keeps_earlier_pages_when_listing_stops_rendering() {
        let mut browser = MockBrowser::new(vec![
            vec![MockRow::complete("1"), MockRow::complete("2")],
            vec![MockRow::complete("3")],
        ]);
        browser.vanish_after_page = Some(1);
        let mut known = HashSet::new();

        let (records, stats) = run(&mut browser, &cfg(), &mut known).await;

        // Page 2 never rendered; page 1 results survive the graceful stop.
        assert_eq!(records.len(), 2);
        assert_eq!(stats.success, 2);
        assert_eq!(records[1].numero_registro, "2");
    }

    #[tokio::test(start_paused = true)]
    async fn numbered_pagination_walks_every_page() {
        let mut browser = MockBrowser::new(vec![
            vec![MockRow::complete("1")],
            vec![MockRow::complete("2")],
        ]);
        browser.numbered = true;
        let mut known = HashSet::new();

        let (records, _) = run(&mut browser, &cfg(), &mut known).await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn new_tab_details_are_restored_cleanly() {
        let mut tabbed = MockRow::complete("77777");
        tabbed.new_tab = true;
        let mut browser = MockBrowser::new(vec![vec![tabbed, MockRow::complete("77778")]]);
        let mut known = HashSet::new();

        let (records, stats) = run(&mut browser, &cfg(), &mut known).await;

        assert_eq!(records.len(), 2);
        assert_eq!(stats.success, 2);
        assert_eq!(browser.window_handles().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_seeded_from_first_finds_nothing() {
        let pages =
            || vec![vec![MockRow::complete("90001"), MockRow::complete("90002")]];
        let mut known = HashSet::new();

        let mut first = MockBrowser::new(pages());
        let (records, _) = run(&mut first, &cfg(), &mut known).await;
        assert_eq!(records.len(), 2);

        // Idempotence: known-set seeded from the first run's output.
        let mut seeded: HashSet<String> =
            records.iter().map(|r| r.numero_registro.clone()).collect();
        let mut second = MockBrowser::new(pages());
        let (records, stats) = run(&mut second, &cfg(), &mut seeded).await;

        assert!(records.is_empty());
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.success, 0);
    }
}
