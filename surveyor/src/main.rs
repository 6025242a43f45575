use anyhow::Context;
use aprescore::prelude::{CancelToken, FixReader};
use clap::Parser;
use log::{error, info};
use notifier::ConsoleNotifier;
use std::fs::File;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::SurveyConfig;
use workflow::runner::Runner;

mod notifier;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Position-triggered ApRES radar survey driver")]
struct Args {
    /// Load the survey setup from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Radar address, overrides the workflow
    #[arg(long)]
    root: Option<String>,
    /// Radar API key, overrides the workflow
    #[arg(long)]
    key: Option<String>,
    /// GPS NMEA stream as host:port, overrides the workflow
    #[arg(long)]
    gps: Option<String>,
    /// Survey from a recorded NMEA file instead of the live receiver
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Append point records to this file
    #[arg(long)]
    point_log: Option<PathBuf>,
    /// Print housekeeping status and exit
    #[arg(long, default_value_t = false)]
    status: bool,
    /// Configure the radar, run one trial burst and exit
    #[arg(long, default_value_t = false)]
    trial: bool,
    /// List a directory on the radar and exit
    #[arg(long)]
    list: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut SurveyConfig) {
        if let Some(root) = &self.root {
            config.radar.root = root.clone();
        }
        if let Some(key) = &self.key {
            config.radar.api_key = Some(key.clone());
        }
        if let Some(address) = &self.gps {
            config.gps.address = address.clone();
        }
        if let Some(path) = &self.point_log {
            config.logging.point_log = Some(path.clone());
        }
    }
}

/// Trips `cancel` on Ctrl+C so the survey loop and any results wait stop cleanly.
fn watch_interrupt(cancel: CancelToken) -> anyhow::Result<()> {
    let runtime = TokioBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("creating runtime for signal handling")?;
    thread::spawn(move || {
        match runtime.block_on(signal::ctrl_c()) {
            Ok(()) => info!("interrupt received, stopping survey"),
            Err(err) => error!("awaiting Ctrl+C failed: {}", err),
        }
        cancel.cancel();
    });
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.workflow {
        Some(path) => SurveyConfig::load(path)?,
        None => SurveyConfig::default(),
    };
    args.apply(&mut config);

    let console = ConsoleNotifier::new();
    let mut runner = Runner::connect(config)?;

    if args.status {
        let status = runner.status()?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    if args.trial {
        let result = runner.trial()?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if let Some(path) = &args.list {
        let listing = runner.list(path)?;
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let cancel = CancelToken::new();
    watch_interrupt(cancel.clone())?;
    console.publish_status("Survey running (Ctrl+C to stop)...");

    let notifier = Arc::new(console);
    let counts = match &args.replay {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening NMEA replay {}", path.display()))?;
            runner.survey(FixReader::replay(file), notifier, &cancel)?
        }
        None => {
            let address = runner.config().gps.address.clone();
            let stream = TcpStream::connect(&address)
                .with_context(|| format!("connecting to gps at {}", address))?;
            info!("gps connected at {}", address);
            runner.survey(FixReader::new(stream), notifier, &cancel)?
        }
    };

    console.publish_status(&format!(
        "Survey finished -> captured {}, failed {}, start retries {}, failed downloads {}, degraded fixes {}",
        counts.captured,
        counts.failed,
        counts.start_retries,
        counts.failed_downloads,
        counts.degraded_fixes
    ));
    Ok(())
}
