use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::driver::{wait_for_element, Browser, DriverResult, Selector};
use crate::product::{normalize_registro, ProductSummary};
use crate::scraper::ScrapeConfig;

pub const LISTING_URL: &str = "https://aps2.senasa.gov.ar/vademecum/app/publico/formulados";

/// Rows with fewer cells than this are decoration or spinners, not data.
const MIN_ROW_CELLS: usize = 5;
const INITIAL_LOAD_BACKOFF: Duration = Duration::from_secs(3);

fn table_rows() -> Selector {
    Selector::css("table tbody tr")
}

/// Navigate to the listing root and wait for the first page of rows.
/// The navigation itself is retried once; a table that never renders is
/// fatal to the run.
pub async fn open_listing<B: Browser>(browser: &mut B, cfg: &ScrapeConfig) -> Result<()> {
    for attempt in 0..2 {
        match browser.navigate(LISTING_URL).await {
            Ok(()) => break,
            Err(e) if attempt == 0 => {
                warn!("Retrying initial listing load after error: {}", e);
                tokio::time::sleep(INITIAL_LOAD_BACKOFF).await;
            }
            Err(e) => return Err(e).context("initial listing navigation failed"),
        }
    }
    if !wait_for_table(browser, cfg).await? {
        bail!("listing table did not render within the wait timeout");
    }
    Ok(())
}

pub async fn wait_for_table<B: Browser>(
    browser: &mut B,
    cfg: &ScrapeConfig,
) -> DriverResult<bool> {
    Ok(wait_for_element(browser, &table_rows(), cfg.wait_timeout)
        .await?
        .is_some())
}

/// Read every rendered row of the current page into summaries.
/// Short rows and rows with a blank registration number are discarded; an
/// empty result on a rendered page means true end-of-data.
pub async fn collect_page_rows<B: Browser>(
    browser: &mut B,
    cfg: &ScrapeConfig,
) -> Result<Vec<ProductSummary>> {
    if !wait_for_table(browser, cfg).await? {
        bail!("listing table did not render");
    }
    let rows = browser.find_elements(&table_rows()).await?;
    let mut summaries = Vec::new();

    for row in rows {
        let cells = browser.find_in(row, &Selector::css("td")).await?;
        if cells.len() < MIN_ROW_CELLS {
            continue;
        }
        let numero_registro = normalize_registro(&browser.text(cells[0]).await?);
        if numero_registro.is_empty() {
            continue;
        }
        let marca = browser.text(cells[1]).await?.trim().to_string();
        let activos = browser.text(cells[3]).await?.trim().to_string();
        let banda_tox = browser.text(cells[4]).await?.trim().to_string();
        summaries.push(ProductSummary {
            numero_registro,
            marca,
            activos,
            banda_tox,
        });
    }

    Ok(summaries)
}

async fn current_page_number<B: Browser>(browser: &mut B) -> DriverResult<Option<u32>> {
    let selectors = [
        "ul.pagination li.active",
        ".pagination .active",
        ".pagination .current",
    ];
    for sel in selectors {
        for el in browser.find_elements(&Selector::css(sel)).await? {
            let text = browser.text(el).await?;
            if let Ok(n) = text.trim().parse::<u32>() {
                return Ok(Some(n));
            }
        }
    }
    Ok(None)
}

/// Outcome of a numbered page jump. A click that landed on a dead page is
/// not the same as finding no link at all: only the latter may fall through
/// to another pagination mechanism.
enum Jump {
    Advanced,
    TableMissing,
    NoLink,
}

/// Move to the next listing page. Tries a numbered jump to `current + 1`
/// first, then a generic "next" control that is not marked disabled; the
/// precise mechanism first avoids skipping or repeating pages when the
/// pagination widget renders inconsistently.
pub async fn advance<B: Browser>(browser: &mut B, cfg: &ScrapeConfig) -> Result<bool> {
    if let Some(current) = current_page_number(browser).await? {
        match jump_to_page(browser, cfg, current + 1).await? {
            Jump::Advanced => {
                info!("Loaded page {}", current + 1);
                return Ok(true);
            }
            Jump::TableMissing => {
                warn!("Table did not re-render after advancing, stopping pagination");
                return Ok(false);
            }
            Jump::NoLink => {}
        }
    }

    let next_selectors = [
        Selector::xpath(
            "//a[contains(translate(., 'SIGUIENTE', 'siguiente'), 'siguiente') \
             and not(contains(@class,'disabled'))]",
        ),
        Selector::css("ul.pagination li.next:not(.disabled) a"),
        Selector::css(".pagination .page-link[rel='next']"),
    ];
    for sel in &next_selectors {
        for el in browser.find_elements(sel).await? {
            let classes = browser
                .attribute(el, "class")
                .await?
                .unwrap_or_default()
                .to_lowercase();
            let aria = browser
                .attribute(el, "aria-disabled")
                .await?
                .unwrap_or_default()
                .to_lowercase();
            if classes.contains("disabled") || aria == "true" {
                continue;
            }
            browser.click(el).await?;
            tokio::time::sleep(cfg.click_delay).await;
            if !wait_for_table(browser, cfg).await? {
                warn!("Table did not re-render after advancing, stopping pagination");
                return Ok(false);
            }
            return Ok(true);
        }
    }

    info!("No further pages detected");
    Ok(false)
}

async fn jump_to_page<B: Browser>(
    browser: &mut B,
    cfg: &ScrapeConfig,
    target: u32,
) -> Result<Jump> {
    let selectors = [
        Selector::xpath(format!("//a[normalize-space()='{target}']")),
        Selector::xpath(format!("//a[contains(@href, 'page={target}')]")),
        Selector::css(format!(".pagination a[href*='page={target}']")),
    ];
    for sel in &selectors {
        for el in browser.find_elements(sel).await? {
            if !browser.is_interactable(el).await? {
                continue;
            }
            browser.click(el).await?;
            tokio::time::sleep(cfg.click_delay).await;
            if !wait_for_table(browser, cfg).await? {
                return Ok(Jump::TableMissing);
            }
            return Ok(Jump::Advanced);
        }
    }
    Ok(Jump::NoLink)
}

// ── Tests ──
