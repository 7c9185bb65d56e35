use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use rainbow_scrape::control::{self, ControlState};
use rainbow_scrape::{config, detector, dom, oracle};

#[derive(Parser)]
#[command(name = "rainbow-scrape")]
#[command(about = "Interactive, assisted web-scraping engine", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control channel (REST + WebSocket)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3001")]
        port: u16,
    },

    /// Navigate to a URL with a real browser and report what was detected
    Navigate {
        /// URL to navigate to
        url: String,

        /// Save a screenshot to this path
        #[arg(short, long)]
        screenshot: Option<String>,
    },

    /// Run the detection pipeline against a built-in offline fixture to
    /// smoke-test the engine without a browser
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    config::init_logging();

    let cli = Cli::parse();
    let settings = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => serve(port, settings).await?,
        Commands::Navigate { url, screenshot } => navigate(&url, screenshot).await?,
        Commands::Test => run_offline_smoke_test(&settings)?,
    }

    Ok(())
}

async fn serve(port: u16, settings: config::RainbowConfig) -> Result<()> {
    info!("starting control channel on port {}", port);
    let oracle: Arc<dyn oracle::Oracle> = Arc::from(oracle::from_config(&settings.oracle));
    let state = ControlState::new(oracle);
    control::serve(port, state).await?;
    Ok(())
}

#[cfg(feature = "chrome")]
async fn navigate(url: &str, screenshot: Option<String>) -> Result<()> {
    use rainbow_scrape::driver::chrome::ChromeDriver;
    use rainbow_scrape::driver::Driver;

    info!("navigating to: {}", url);
    let driver = ChromeDriver::launch().await?;
    driver.goto(url).await?;
    driver.wait_for_timeout(1_000).await;

    if let Some(path) = screenshot {
        let bytes = driver.screenshot().await?;
        std::fs::write(&path, bytes)?;
        info!("screenshot saved to: {}", path);
    }

    info!("current url: {}", driver.current_url().await?);
    Ok(())
}

#[cfg(not(feature = "chrome"))]
async fn navigate(_url: &str, _screenshot: Option<String>) -> Result<()> {
    anyhow::bail!("navigate requires the `chrome` feature (cargo run --features chrome)")
}

const SMOKE_TEST_FIXTURE: &str = r#"
<html><body>
<div class="product-grid">
  <div class="product-card"><img src="a.jpg"><span class="title">Widget A</span><span class="price">$19.99</span></div>
  <div class="product-card"><img src="b.jpg"><span class="title">Widget B</span><span class="price">$24.99</span></div>
  <div class="product-card"><img src="c.jpg"><span class="title">Widget C</span><span class="price">$9.99</span></div>
</div>
</body></html>
"#;

fn run_offline_smoke_test(settings: &config::RainbowConfig) -> Result<()> {
    info!("running offline detection smoke test");
    let doc = dom::parse_document(SMOKE_TEST_FIXTURE);
    let options = detector::DetectorOptions {
        weights: settings.scorer_weights.into(),
        min_confidence: settings.min_confidence,
        ..Default::default()
    };
    let result = detector::detect(&doc, &options);

    match result.selected_element {
        Some(selected) => {
            info!(
                "detected container `{}` with confidence {:.2}",
                selected.specific_selector, result.confidence
            );
        }
        None => anyhow::bail!("smoke test failed: no product container detected"),
    }

    Ok(())
}
