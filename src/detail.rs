use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use tracing::{error, warn};

use crate::driver::{wait_for_element, Browser, DriverResult, ElementId, Selector};
use crate::listing;
use crate::product::{Extraction, ProductRecord, ProductSummary};
use crate::scraper::ScrapeConfig;

const RETRY_BACKOFF: Duration = Duration::from_millis(1500);

/// Detail affordances within a row, most explicit first.
const DETAIL_SELECTORS: [&str; 7] = [
    "td:last-child a",
    "td:last-child button",
    "td:last-child [onclick]",
    "td:last-child i.fa-search",
    "td:last-child [class*='search']",
    "td:last-child [class*='detail']",
    "td:last-child [title*='detalle']",
];

/// Markers that the detail view has rendered.
const DETAIL_MARKERS: [&str; 2] = [
    "//*[contains(translate(., 'DATOS', 'datos'), 'datos del producto')]",
    "//*[contains(@class, 'panel-heading') and \
     contains(translate(., 'DATOS', 'datos'), 'datos del producto')]",
];

/// Clickables that expand the collapsed product-data section.
const EXPAND_SELECTORS: [&str; 5] = [
    "//h4[contains(translate(., 'DATOS', 'datos'), 'datos del producto')]",
    "//div[contains(translate(., 'DATOS', 'datos'), 'datos del producto')]",
    "//button[contains(translate(., 'DATOS', 'datos'), 'datos del producto')]",
    "//a[contains(translate(., 'DATOS', 'datos'), 'datos del producto')]",
    "//*[normalize-space()='Datos del producto']",
];

/// Keywords proving the expanded section actually carries product data.
const SECTION_KEYWORDS: [&str; 5] = [
    "aptitud",
    "presentaci",
    "insecticida",
    "herbicida",
    "fungicida",
];

const KEYWORD_SCAN_XPATH: &str = "//*[contains(translate(text(),'APTUCIONES','aptuciones'),'aptitud') \
     or contains(translate(text(),'PRESENTACION','presentacion'),'presentac')]";

static APTITUDES_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)Aptitudes:\s*([^<\n\r]+)",
        r"(?im)aptitudes?:\s*([^<\n\r]+)",
        r"(?im)<[^>]*>Aptitudes[^>]*>\s*([^<]+)",
        r"(?im)(?:IN|HE|FU|AC)\s*-\s*(?:Insecticida|Herbicida|Fungicida|Acaricida)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static PRESENTACION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)Presentaci[oó]n:\s*([^<\n\r]+)",
        r"(?im)<[^>]*>Presentaci[oó]n[^>]*>\s*([^<]+)",
        r"(?im)(Suspensi[oó]n concentrada|Polvo mojable|Concentrado emulsionable|SC|WP|EC|SL|SE)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// How the detail view opened, so restoration can mirror it exactly.
enum Activation {
    SameTab { origin: String },
    NewTab { origin: String },
}

/// Run the full detail protocol for one listing row. Never fails: after all
/// attempts are exhausted the summary is returned with empty detail fields
/// and a `Failed` classification, and the run moves on.
pub async fn process_product<B: Browser>(
    browser: &mut B,
    cfg: &ScrapeConfig,
    summary: &ProductSummary,
) -> (ProductRecord, Extraction) {
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 1..=cfg.retry_attempts {
        match attempt_process(browser, cfg, summary, attempt < cfg.retry_attempts).await {
            Ok(outcome) => return outcome,
            Err(e) => {
                warn!(
                    "Error processing {} (attempt {}/{}): {}",
                    summary.numero_registro, attempt, cfg.retry_attempts, e
                );
                last_error = Some(e);
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }

    error!(
        "Could not extract detail for {}: {}",
        summary.numero_registro,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    );
    (ProductRecord::empty_detail(summary), Extraction::Failed)
}

async fn attempt_process<B: Browser>(
    browser: &mut B,
    cfg: &ScrapeConfig,
    summary: &ProductSummary,
    allow_retry: bool,
) -> Result<(ProductRecord, Extraction)> {
    // The listing may have re-rendered since collection, so the row is
    // re-located by its registration number.
    let row = find_row_by_registro(browser, cfg, &summary.numero_registro)
        .await?
        .ok_or_else(|| anyhow!("row for {} not found in listing", summary.numero_registro))?;
    let button = find_detail_button(browser, row)
        .await?
        .ok_or_else(|| anyhow!("no detail control found in row"))?;

    let handles_before = browser.window_handles().await?;
    browser.click(button).await?;
    tokio::time::sleep(cfg.click_delay).await;
    let activation = detect_activation(browser, &handles_before).await?;

    // Extraction result is held until navigation has been restored; the
    // restore path runs exactly once regardless of the extraction outcome.
    let extracted = extract_detail(browser, cfg, &summary.numero_registro).await;
    let restored = restore_listing(browser, cfg, &activation).await;
    let (aptitudes, presentacion) = extracted?;
    restored?;

    if allow_retry && aptitudes.is_empty() && presentacion.is_empty() {
        bail!("detail view returned no data");
    }

    let outcome = Extraction::classify(&aptitudes, &presentacion);
    Ok((ProductRecord::new(summary, aptitudes, presentacion), outcome))
}

async fn find_row_by_registro<B: Browser>(
    browser: &mut B,
    cfg: &ScrapeConfig,
    registro: &str,
) -> DriverResult<Option<ElementId>> {
    let xpath = format!(
        "//table//tr[td[1][normalize-space()={}]]",
        xpath_literal(registro)
    );
    wait_for_element(browser, &Selector::xpath(xpath), cfg.wait_timeout).await
}

async fn find_detail_button<B: Browser>(
    browser: &mut B,
    row: ElementId,
) -> DriverResult<Option<ElementId>> {
    for sel in DETAIL_SELECTORS {
        for el in browser.find_in(row, &Selector::css(sel)).await? {
            if browser.is_interactable(el).await? {
                return Ok(Some(el));
            }
        }
    }
    Ok(None)
}

/// Compare window handles around the click: a grown set means the detail
/// opened in a new tab, which we switch into.
async fn detect_activation<B: Browser>(
    browser: &mut B,
    handles_before: &[String],
) -> DriverResult<Activation> {
    let origin = handles_before.first().cloned().unwrap_or_default();
    let handles_after = browser.window_handles().await?;
    if handles_after.len() > handles_before.len() {
        if let Some(new) = handles_after
            .iter()
            .find(|h| !handles_before.contains(h))
            .cloned()
        {
            browser.switch_window(&new).await?;
            return Ok(Activation::NewTab { origin });
        }
    }
    Ok(Activation::SameTab { origin })
}

async fn wait_for_detail_page<B: Browser>(browser: &mut B, cfg: &ScrapeConfig) -> Result<()> {
    for marker in DETAIL_MARKERS {
        let found =
            wait_for_element(browser, &Selector::xpath(marker), cfg.wait_timeout).await?;
        if found.is_some() {
            return Ok(());
        }
    }
    bail!("detail view marker not detected")
}

async fn extract_detail<B: Browser>(
    browser: &mut B,
    cfg: &ScrapeConfig,
    registro: &str,
) -> Result<(String, String)> {
    wait_for_detail_page(browser, cfg).await?;

    if !expand_detail_section(browser, cfg).await? {
        warn!("Could not expand 'Datos del producto' for {}", registro);
        return Ok((String::new(), String::new()));
    }

    let html = browser.page_source().await?;
    let mut aptitudes = search_patterns(&html, &APTITUDES_PATTERNS);
    let mut presentacion = search_patterns(&html, &PRESENTACION_PATTERNS);

    // Secondary strategy: scan DOM text for labelled fields.
    if aptitudes.is_empty() || presentacion.is_empty() {
        let (apt_dom, pres_dom) = scan_dom_keywords(browser).await?;
        if aptitudes.is_empty() {
            aptitudes = apt_dom;
        }
        if presentacion.is_empty() {
            presentacion = pres_dom;
        }
    }

    Ok((
        aptitudes.trim().to_string(),
        presentacion.trim().to_string(),
    ))
}

async fn expand_detail_section<B: Browser>(browser: &mut B, cfg: &ScrapeConfig) -> Result<bool> {
    for sel in EXPAND_SELECTORS {
        let Some(el) =
            wait_for_element(browser, &Selector::xpath(sel), cfg.wait_timeout).await?
        else {
            continue;
        };
        browser.click(el).await?;
        tokio::time::sleep(cfg.click_delay).await;
        if section_has_loaded(browser).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn section_has_loaded<B: Browser>(browser: &mut B) -> DriverResult<bool> {
    let content = browser.page_source().await?.to_lowercase();
    Ok(SECTION_KEYWORDS.iter().any(|k| content.contains(k)))
}

fn search_patterns(html: &str, patterns: &[Regex]) -> String {
    for re in patterns {
        for caps in re.captures_iter(html) {
            let m = caps
                .get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str())
                .unwrap_or("");
            let cleaned = TAG_RE.replace_all(m, "").trim().to_string();
            if !cleaned.is_empty() && !cleaned.chars().all(|c| c.is_ascii_digit()) {
                return cleaned;
            }
        }
    }
    String::new()
}

async fn scan_dom_keywords<B: Browser>(browser: &mut B) -> DriverResult<(String, String)> {
    let mut aptitudes = String::new();
    let mut presentacion = String::new();

    for el in browser
        .find_elements(&Selector::xpath(KEYWORD_SCAN_XPATH))
        .await?
    {
        let text = browser.text(el).await?.trim().to_string();
        if text.is_empty() {
            continue;
        }
        let lower = text.to_lowercase();
        if lower.contains("aptitud") && aptitudes.is_empty() {
            aptitudes = text.clone();
        }
        if lower.contains("presentac") && presentacion.is_empty() {
            presentacion = text;
        }
        if !aptitudes.is_empty() && !presentacion.is_empty() {
            break;
        }
    }

    Ok((aptitudes, presentacion))
}

/// Mirror of the activation step: close the tab we opened and return to the
/// origin handle, or step back in place. Either way the listing table must
/// be back before control returns to the caller.
async fn restore_listing<B: Browser>(
    browser: &mut B,
    cfg: &ScrapeConfig,
    activation: &Activation,
) -> Result<()> {
    match activation {
        Activation::NewTab { origin } => {
            browser.close_window().await?;
            browser.switch_window(origin).await?;
        }
        Activation::SameTab { origin } => {
            let handles = browser.window_handles().await?;
            if handles.len() > 1 {
                // Stray windows can appear even when the click navigated in
                // place; sweep everything that is not the origin.
                for handle in handles.iter().filter(|h| *h != origin) {
                    browser.switch_window(handle).await?;
                    browser.close_window().await?;
                }
                browser.switch_window(origin).await?;
            } else {
                browser.back().await?;
                tokio::time::sleep(cfg.click_delay).await;
            }
        }
    }

    if !listing::wait_for_table(browser, cfg).await? {
        bail!("listing table did not re-render after closing detail view");
    }
    Ok(())
}

/// Escape arbitrary text for use inside an XPath expression.
pub(crate) fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{text}'");
    }
    if !text.contains('"') {
        return format!("\"{text}\"");
    }
    let parts: Vec<String> = text.split('\'').map(|p| format!("'{p}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

// ── Tests ──
