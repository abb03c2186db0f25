use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pipeline_nwb::batch::{export_all_with, BatchError, BatchReport, FailurePolicy};
use pipeline_nwb::nwb::io;
use pipeline_nwb::{Database, ExportConfig, ExportOptions, SessionSource, DEFAULT_OUTPUT_DIR};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pipeline-nwb")]
#[command(author, version, about = "Export imaging sessions from the pipeline database to NWB-structured files")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Pipeline database
    #[arg(long, global = true, default_value = "pipeline.db")]
    db: PathBuf,

    /// JSON file overriding institution, rig and imaging plane settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only show warnings and the summary
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export every session in the database
    Export {
        /// Output directory
        #[arg(default_value = DEFAULT_OUTPUT_DIR)]
        out_dir: PathBuf,

        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,

        /// Keep exporting after a session fails
        #[arg(long)]
        keep_going: bool,
    },

    /// List session keys
    Sessions,

    /// Summarize an exported session file
    Inspect {
        /// Path to a .nwb.json file
        file: PathBuf,
    },
}

fn main() {
    let args = Args::parse();
    init_logging(args.quiet);

    let code = match args.command {
        Command::Export {
            ref out_dir,
            overwrite,
            keep_going,
        } => run_export(&args, out_dir, overwrite, keep_going),
        Command::Sessions => run_sessions(&args.db),
        Command::Inspect { ref file } => run_inspect(file),
    };
    std::process::exit(code);
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_db(path: &Path) -> Option<Database> {
    match Database::open_at(path) {
        Ok(db) => Some(db),
        Err(e) => {
            eprintln!("Failed to open database {}: {}", path.display(), e);
            None
        }
    }
}

fn run_export(args: &Args, out_dir: &Path, overwrite: bool, keep_going: bool) -> i32 {
    let config = match &args.config {
        Some(path) => match ExportConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return 1;
            }
        },
        None => ExportConfig::default(),
    };
    let Some(db) = open_db(&args.db) else {
        return 1;
    };

    if !args.quiet {
        eprintln!("\x1b[1mpipeline-nwb - Session Exporter\x1b[0m");
        eprintln!("{}", "─".repeat(70));
        eprintln!("Database: {}", args.db.display());
        eprintln!("Output:   {}\n", out_dir.display());
    }

    let options = ExportOptions::save_to(out_dir).with_overwrite(overwrite);
    let policy = if keep_going {
        FailurePolicy::Continue
    } else {
        FailurePolicy::Abort
    };

    let pb = if args.quiet {
        None
    } else {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Some(pb)
    };

    let result = export_all_with(&db, &config, &options, policy, |p| {
        if let Some(ref pb) = pb {
            pb.set_length(p.total as u64);
            pb.set_position(p.position as u64);
            pb.set_message(p.key.to_string());
        }
    });

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    match result {
        Ok(report) => {
            print_summary(&report);
            if report.is_success() {
                0
            } else {
                1
            }
        }
        Err(BatchError::Aborted { key, source, report }) => {
            print_summary(&report);
            eprintln!("\n\x1b[31mExport of {} failed: {}\x1b[0m", key, source);
            eprintln!("\x1b[90mRe-run with --keep-going to export the remaining sessions.\x1b[0m");
            1
        }
        Err(e) => {
            eprintln!("\x1b[31m{}\x1b[0m", e);
            1
        }
    }
}

fn print_summary(report: &BatchReport) {
    eprintln!("\n{}", "─".repeat(70));
    eprintln!("\x1b[1mSummary:\x1b[0m");
    eprintln!("  \x1b[32m✓ Written:\x1b[0m  {}", report.written.len());
    eprintln!("  \x1b[33m- Skipped:\x1b[0m  {}", report.skipped.len());
    if !report.failed.is_empty() {
        eprintln!("  \x1b[31m✗ Failed:\x1b[0m   {}", report.failed.len());
        for failure in &report.failed {
            eprintln!("      {}: {}", failure.key, failure.message);
        }
    }
    let unattempted = report.total.saturating_sub(report.attempted());
    if unattempted > 0 {
        eprintln!("  \x1b[90mNot reached:\x1b[0m {}", unattempted);
    }
}

fn run_sessions(db_path: &Path) -> i32 {
    let Some(db) = open_db(db_path) else {
        return 1;
    };
    match db.session_keys() {
        Ok(keys) => {
            if keys.is_empty() {
                println!("No sessions found.");
            } else {
                println!("{:<12} {:<8}", "SUBJECT", "SESSION");
                println!("{}", "-".repeat(24));
                for key in keys {
                    println!("{:<12} {:<8}", key.subject_id, key.session);
                }
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn run_inspect(file: &Path) -> i32 {
    let nwb = match io::read(file) {
        Ok(nwb) => nwb,
        Err(e) => {
            eprintln!("Failed to read {}: {}", file.display(), e);
            return 1;
        }
    };

    println!("\x1b[1m{}\x1b[0m", nwb.identifier);
    match nwb.identity() {
        Ok(id) => println!(
            "  subject {}  date {}  session {}",
            id.subject_id, id.session_date, id.session
        ),
        Err(e) => println!("  \x1b[33m{}\x1b[0m", e),
    }
    println!("  experimenter: {}", nwb.experimenter);
    println!("  created:      {}", nwb.file_create_date);
    println!("  genotype:     {}", nwb.subject.genotype);

    if let Some(images) = nwb.images() {
        let names: Vec<_> = images.images.iter().map(|i| i.name.as_str()).collect();
        println!("  images:       {}", names.join(", "));
    }
    if let Some(seg) = nwb.plane_segmentation() {
        let included = seg.rois.iter().filter(|r| r.included).count();
        println!("  rois:         {} ({} included)", seg.rois.len(), included);
    }
    match &nwb.trials {
        Some(trials) => println!("  trials:       {}", trials.rows.len()),
        None => println!("  trials:       none"),
    }
    if let Some(events) = nwb.behavioral_events() {
        for ts in &events.time_series {
            println!("  event {:<10} {}", ts.name, ts.timestamps.len());
        }
    }
    0
}

