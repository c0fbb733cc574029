//! ovfexport CLI - Export powered-off vSphere VMs to OVF.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use ovfexport_core::vsphere::{ConnectOptions, VsphereClient, DEFAULT_API_VERSION};
use ovfexport_core::{
    export_vm, ExportOptions, ExportPhase, ExportProgress, Inventory, ProgressCallback,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code when the VM does not exist.
const EXIT_NOT_FOUND: u8 = 255;
/// Exit code for every other failure.
const EXIT_FAILURE: u8 = 254;

/// Export a powered-off vSphere VM to a local OVF directory.
#[derive(Parser)]
#[command(name = "ovfexport")]
#[command(version, about, long_about = None)]
struct Cli {
    /// vSphere service to connect to.
    #[arg(short = 's', long)]
    host: String,

    /// Port to connect on.
    #[arg(short = 'o', long, default_value_t = 443)]
    port: u16,

    /// User name to use when connecting to host.
    #[arg(short, long)]
    user: String,

    /// Password to use when connecting to host.
    #[arg(short, long, env = "OVFEXPORT_PASSWORD", hide_env_values = true)]
    password: String,

    /// The name of the VM to export.
    #[arg(short, long)]
    name: String,

    /// Working directory. Must have write permission.
    #[arg(short, long)]
    workdir: PathBuf,

    /// vim25 API version.
    #[arg(long, default_value = DEFAULT_API_VERSION)]
    api_version: String,

    /// Verify the server's TLS certificate.
    #[arg(long)]
    verify_tls: bool,

    /// Do not write the SHA-256 `.mf` file.
    #[arg(long)]
    no_manifest: bool,

    /// Suppress the progress bar.
    #[arg(short, long)]
    quiet: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(if cli.verbose { "debug" } else { "info" }) {
        eprintln!("failed to initialize logging: {e:#}");
    }

    println!("vsphere: {}, VM: {}", cli.host, cli.name);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let not_found = e
                .downcast_ref::<ovfexport_core::Error>()
                .is_some_and(ovfexport_core::Error::is_not_found);
            ExitCode::from(if not_found { EXIT_NOT_FOUND } else { EXIT_FAILURE })
        }
    }
}

/// Install the fmt subscriber; `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let mut connect = ConnectOptions::new(&cli.host, &cli.user, &cli.password);
    connect.port = cli.port;
    connect.accept_invalid_certs = !cli.verify_tls;
    connect.api_version = cli.api_version.clone();

    let client = VsphereClient::connect(connect)
        .with_context(|| format!("failed to connect to {}:{}", cli.host, cli.port))?;

    let Some(uuid) = client.find_vm_uuid_by_name(&cli.name)? else {
        println!("VM {} not found", cli.name);
        return Ok(ExitCode::from(EXIT_NOT_FOUND));
    };

    let fetcher = client.device_fetcher()?;
    let mut options = ExportOptions::default();
    if cli.no_manifest {
        options = options.without_manifest();
    }

    let progress_bar = if cli.quiet { None } else { Some(new_progress_bar()?) };
    let callback: Option<ProgressCallback> = progress_bar.clone().map(|pb| {
        Box::new(move |progress: ExportProgress| update_progress_bar(&pb, &progress)) as ProgressCallback
    });

    let summary = export_vm(&client, &fetcher, &uuid, &cli.workdir, &options, callback)
        .with_context(|| format!("failed to export VM {}", cli.name))?;

    if let Some(pb) = progress_bar {
        pb.finish_with_message("Complete!");
    }

    if !cli.quiet {
        println!();
        println!("Export completed successfully: {}", summary.target_dir.display());
        println!("Descriptor:  {}", display_name(&summary.descriptor_path));
        for file in &summary.files {
            println!("  {} - {}", file.path, format_bytes(file.size));
        }
        if let Some(mf) = &summary.checksum_path {
            println!("Manifest:    {}", display_name(mf));
        }
        println!("Total:       {}", format_bytes(summary.bytes_written()));
    }

    Ok(ExitCode::SUCCESS)
}

fn new_progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")?
        .progress_chars("#>-");
    pb.set_style(style);
    Ok(pb)
}

fn update_progress_bar(pb: &ProgressBar, progress: &ExportProgress) {
    if pb.length() != Some(progress.bytes_total) {
        pb.set_length(progress.bytes_total);
    }
    pb.set_position(progress.bytes_written.min(progress.bytes_total));

    let message = match (progress.phase, &progress.current_device) {
        (ExportPhase::Initializing, _) => "Waiting for lease...".to_string(),
        (ExportPhase::Downloading, Some(device)) => format!("{device} ({}%)", progress.percent),
        (ExportPhase::Downloading, None) => format!("Downloading ({}%)", progress.percent),
        (ExportPhase::Finalizing, _) => "Finalizing...".to_string(),
        (ExportPhase::Complete, _) => "Complete!".to_string(),
    };
    pb.set_message(message);
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_minimal_args() {
        let cli = Cli::try_parse_from([
            "ovfexport", "-s", "vc.lab", "-u", "root", "-p", "pw", "-n", "web01", "-w", "/tmp/out",
        ])
        .unwrap();
        assert_eq!(cli.port, 443);
        assert_eq!(cli.api_version, DEFAULT_API_VERSION);
        assert!(!cli.verify_tls);
        assert!(!cli.no_manifest);
        assert_eq!(cli.workdir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
