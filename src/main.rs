//! mini-torrent - Main entry point

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use mini_torrent::cli::progress::format_bytes;
use mini_torrent::{
    create_multi_file_descriptor, create_single_file_descriptor, CliArgs, Command, CreatedTorrent,
    Descriptor, Downloader, ProgressDisplay, SeedStatus, Seeder, SessionState, TorrentInfo,
};
use tracing::{debug, error, info};

/// Status refresh period for the foreground loops
const STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

/// Initialize logging based on CLI arguments
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.verbose {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
    debug!("Logging initialized at {:?}", args.log_level());
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let result = match &args.command {
        Command::Create { path, output, .. } => {
            let options = args.command.create_options().unwrap_or_default();
            run_create(path, output.clone(), options, args.quiet)
        }
        Command::Seed { .. } => match args.command.seed_config() {
            Some(config) => run_seed(config, args.quiet).await,
            None => Ok(()),
        },
        Command::Download { .. } => match args.command.download_config() {
            Some(config) => run_download(config, args.quiet).await,
            None => Ok(()),
        },
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn run_create(path: &Path, output: Option<PathBuf>, options: mini_torrent::CreateOptions, quiet: bool) -> Result<()> {
    let output = output.unwrap_or_else(|| default_output(path));
    info!("Creating descriptor for {}", path.display());

    let created = if path.is_dir() {
        create_multi_file_descriptor(path, &output, &options)
    } else {
        create_single_file_descriptor(path, &output, &options)
    }
    .context("Failed to create descriptor")?;

    if !quiet {
        display_created(&created);
    }
    Ok(())
}

/// `<path>.torrent` next to the input
fn default_output(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".torrent");
    PathBuf::from(name)
}

fn display_created(created: &CreatedTorrent) {
    println!("Descriptor written to {}", created.torrent_path.display());
    println!("  Info Hash: {}", created.info_hash_hex());
    println!("  Files: {}", created.file_count);
    println!("  Total Size: {}", format_bytes(created.total_size));
    println!("  Pieces: {} x {}", created.piece_count, format_bytes(created.piece_length));
}

fn display_torrent_info(info: &TorrentInfo) {
    println!("Torrent: {}", info.name);
    println!("  Info Hash: {}", info.info_hash_hex());
    println!("  Total Size: {}", format_bytes(info.total_size()));
    println!("  Pieces: {} x {}", info.piece_count(), format_bytes(info.piece_length));
}

fn load_torrent_info(path: &Path) -> Result<TorrentInfo> {
    let descriptor = Descriptor::load(path)?;
    TorrentInfo::from_descriptor(&descriptor)
}

async fn run_seed(config: mini_torrent::SeedConfig, quiet: bool) -> Result<()> {
    if !quiet {
        display_torrent_info(&load_torrent_info(&config.torrent_path)?);
    }

    let seeder = Seeder::new(config)?;
    seeder.start().await.context("Failed to start seeding")?;

    let mut progress = ProgressDisplay::new(quiet);
    if let Some(addr) = seeder.local_addr().await {
        progress.print_status(&format!("Listening on {} (Ctrl+C to stop)", addr))?;
    }

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status: SeedStatus = seeder.status().await;
                progress.update_seed(&status)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping seeder");
                break;
            }
        }
    }

    seeder.stop().await?;
    progress.print_status("Seeding stopped")?;
    Ok(())
}

async fn run_download(config: mini_torrent::DownloadConfig, quiet: bool) -> Result<()> {
    if !quiet {
        display_torrent_info(&load_torrent_info(&config.torrent_path)?);
    }

    let downloader = Downloader::new(config)?;
    downloader.start().await.context("Failed to start download")?;

    let mut progress = ProgressDisplay::new(quiet);
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    let finished = downloader.finished();
    tokio::pin!(finished);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                progress.update_download(&downloader.status().await)?;
            }
            _ = &mut finished => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, saving progress");
                break;
            }
        }
    }

    downloader.stop().await?;
    let status = downloader.status().await;
    match status.state {
        SessionState::Completed => progress.print_complete(&status)?,
        _ => progress.print_status(&format!(
            "Download stopped at {}/{} pieces",
            status.downloaded_pieces, status.total_pieces
        ))?,
    }
    Ok(())
}
