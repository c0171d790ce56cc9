mod detail;
mod driver;
mod export;
mod listing;
mod product;
mod registry;
mod scraper;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::driver::WebDriverBrowser;
use crate::scraper::ScrapeConfig;

#[derive(Parser)]
#[command(
    name = "senasa_scraper",
    about = "Incremental scraper for the SENASA vademecum of formulated products"
)]
struct Cli {
    /// CSV file where newly discovered products are written
    #[arg(long, default_value = "productos_senasa_nuevos.csv")]
    output: PathBuf,
    /// CSV with previously exported products, used to avoid duplicates
    #[arg(long = "existing-csv", default_value = "productos_senasa_seguro.csv")]
    existing_csv: PathBuf,
    /// Run the browser in headless mode
    #[arg(long)]
    headless: bool,
    /// Optional limit on listing pages to process
    #[arg(long)]
    max_pages: Option<u32>,
    /// Attempts per product before giving up on its detail view
    #[arg(long, default_value_t = 2)]
    retry_attempts: u32,
    /// Settle delay (seconds) after each click
    #[arg(long, default_value_t = 0.4)]
    click_delay: f64,
    /// Timeout (seconds) for explicit waits
    #[arg(long, default_value_t = 20)]
    wait_timeout: u64,
    /// Timeout (seconds) for page loads
    #[arg(long, default_value_t = 120)]
    page_load_timeout: u64,
    /// Timeout (seconds) for individual browser commands
    #[arg(long, default_value_t = 180)]
    command_timeout: u64,
    /// WebDriver endpoint to attach to (e.g. a local chromedriver)
    #[arg(long, default_value = "http://localhost:9515")]
    webdriver_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = ScrapeConfig {
        headless: cli.headless,
        wait_timeout: Duration::from_secs(cli.wait_timeout),
        click_delay: Duration::from_secs_f64(cli.click_delay),
        retry_attempts: cli.retry_attempts.max(1),
        page_load_timeout: Duration::from_secs(cli.page_load_timeout),
        command_timeout: Duration::from_secs(cli.command_timeout),
        max_pages: cli.max_pages,
    };

    let mut existing_files = vec![cli.existing_csv.clone()];
    if cli.output != cli.existing_csv && cli.output.exists() {
        existing_files.push(cli.output.clone());
    }
    let mut known = registry::load_known_registros(&existing_files);
    info!("Previously known products: {}", known.len());

    let mut browser = WebDriverBrowser::connect(
        &cli.webdriver_url,
        cfg.headless,
        cfg.page_load_timeout,
        cfg.command_timeout,
    )
    .await?;

    let t0 = Instant::now();
    let result = scraper::scrape(&mut browser, &cfg, &mut known).await;
    // Session released no matter how the run ended.
    browser.quit().await;
    let (new_products, stats) = result?;

    info!("Scrape summary:");
    info!("  success: {}", stats.success);
    info!("  partial: {}", stats.partial);
    info!("  failed:  {}", stats.failed);
    info!("  skipped: {}", stats.skipped);
    info!("Total time: {}", format_duration(t0.elapsed()));

    if new_products.is_empty() {
        println!("No new products detected.");
        return Ok(());
    }

    export::write_csv(&cli.output, &new_products)?;
    println!(
        "Saved {} new products to {}",
        new_products.len(),
        cli.output.display()
    );
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
