#![forbid(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use udfck_core::{run_check, CheckOptions, CheckReport};
use udfck_error::ExitStatus;
use udfck_repair::{RepairMode, StdinPrompter};

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "udfck",
    about = "udfck — consistency checker and repair tool for UDF media",
    version
)]
struct Cli {
    /// Block device or image file holding the UDF volume.
    device: PathBuf,

    /// Force the sector size (power of two in 512..=32768).
    #[arg(short = 'b', long = "blocksize")]
    blocksize: Option<u32>,

    /// Ask before applying each fix.
    #[arg(short = 'i', long = "interactive", conflicts_with = "autofix")]
    interactive: bool,

    /// Apply every fix without asking.
    #[arg(short = 'p', long = "autofix")]
    autofix: bool,

    /// Raise verbosity (repeatable: warn, info, debug, trace).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the report as JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_owned()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = CheckOptions {
        mode: if cli.autofix {
            RepairMode::AutoFix
        } else if cli.interactive {
            RepairMode::Interactive
        } else {
            RepairMode::CheckOnly
        },
        force_sector_size: cli.blocksize,
        listing: !cli.json,
    };

    let prompter = cli
        .interactive
        .then(|| Box::new(StdinPrompter) as Box<dyn udfck_repair::Prompter>);

    match run_check(&cli.device, &options, prompter) {
        Ok(report) => {
            if let Err(err) = print_report(&report, cli.json) {
                eprintln!("udfck: {err:#}");
                std::process::exit(ExitStatus::OPERATIONAL.code());
            }
            std::process::exit(report.exit_status().code());
        }
        Err(err) => {
            eprintln!("udfck: {err}");
            std::process::exit(err.exit_class().code());
        }
    }
}

fn print_report(report: &CheckReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("serialize report")?
        );
        return Ok(());
    }

    for line in &report.listing {
        println!("{line}");
    }

    println!(
        "sector size {}, minimum UDF revision {:x}.{:02x}",
        report.sector_size,
        report.min_udf_revision >> 8,
        report.min_udf_revision & 0xFF
    );
    println!(
        "{} files, {} directories, {} of {} blocks free",
        report.found.num_files,
        report.found.num_dirs,
        report.found_free_blocks,
        report.partition_blocks
    );

    for finding in &report.vds_findings {
        println!(
            "{} {}: {}",
            finding.copy, finding.descriptor, finding.findings
        );
    }
    if !report.lvid_findings.is_empty() {
        println!("LVID: {}", report.lvid_findings);
    }
    if let Some(recon) = &report.reconciliation {
        if recon.bitmap_matches == Some(false) {
            println!(
                "space bitmap disagrees with the walk ({} free recorded, {} found)",
                recon.free_blocks_sbd.unwrap_or(0),
                recon.free_blocks_found
            );
        }
    }
    for record in &report.fixes.records {
        use udfck_repair::FixOutcome;
        match record.outcome {
            FixOutcome::Clean => {}
            FixOutcome::Applied => println!("fixed: {}", record.site),
            FixOutcome::Declined => println!("not fixed: {}", record.site),
            FixOutcome::Uncorrectable => println!("uncorrectable: {}", record.site),
        }
    }

    let status = report.exit_status();
    println!("result: {status}");
    Ok(())
}
