use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use comic_batch::pipeline::PlannedTask;
use comic_batch::{
    analyze, gm_tool, CancellationToken, Pipeline, ProcessingParameters, RunPlan, UnsharpMask,
};
use shared_utils::logging::{init_logging, LogConfig};
use shared_utils::{create_progress_bar, print_summary_json, print_summary_report};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;

#[derive(Parser)]
#[command(name = "comic-batch")]
#[command(version, long_about = None)]
#[command(about = "Adaptive batch converter for comic page directories")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Directory for rotated log files (default: system temp dir)
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every chapter directory under INPUT into OUTPUT
    Run {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        conversion: ConversionArgs,

        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Classify chapter directories without converting anything
    Analyze {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Pages at least this wide are split
        #[arg(long, default_value_t = 1000)]
        width_threshold: u32,

        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Print the tasks and commands a run would execute
    Plan {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        conversion: ConversionArgs,

        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Locate and verify GraphicsMagick
    CheckTool,
}

#[derive(Args, Debug, Clone)]
struct ConversionArgs {
    /// Pages at least this wide (px) are split into two halves
    #[arg(long, default_value_t = 1000)]
    width_threshold: u32,

    /// Output height (px)
    #[arg(long, default_value_t = 1600)]
    resize_height: u32,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = 85)]
    quality: u8,

    /// Unsharp mask RADIUSxSIGMA+AMOUNT+THRESHOLD; an amount of 0 disables it
    #[arg(long, default_value = "0x0.75+0.75+0.008")]
    unsharp: UnsharpMask,

    /// Concurrent gm processes (0 = auto)
    #[arg(short, long, default_value_t = 0)]
    workers: usize,

    /// Images per batch when --workers is set (1-1000)
    #[arg(short, long, default_value_t = 50)]
    batch_size: usize,

    /// Convert to grayscale
    #[arg(long)]
    grayscale: bool,
}

impl From<ConversionArgs> for ProcessingParameters {
    fn from(args: ConversionArgs) -> Self {
        Self {
            width_threshold: args.width_threshold,
            resize_height: args.resize_height,
            quality: args.quality,
            unsharp: args.unsharp,
            workers: args.workers,
            batch_size: args.batch_size,
            grayscale: args.grayscale,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let mut log_config = LogConfig::default().with_level(level);
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }
    if let Err(e) = init_logging("comic_batch", log_config) {
        eprintln!("⚠️  Logging disabled: {:#}", e);
    }

    if cli.quiet {
        shared_utils::progress::enable_quiet_mode();
    }

    match cli.command {
        Commands::Run {
            input,
            output,
            conversion,
            format,
        } => run(&input, &output, conversion.into(), format),
        Commands::Analyze {
            input,
            width_threshold,
            format,
        } => analyze_only(&input, width_threshold, format),
        Commands::Plan {
            input,
            output,
            conversion,
            format,
        } => plan(&input, &output, conversion.into(), format),
        Commands::CheckTool => check_tool(),
    }
}

fn install_ctrlc(cancel: &CancellationToken) -> Result<()> {
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n⏹️  Cancelling, waiting for running batches to stop...");
        token.cancel();
    })
    .context("Failed to install Ctrl-C handler")
}

fn run(
    input: &Path,
    output: &Path,
    params: ProcessingParameters,
    format: OutputFormat,
) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    install_ctrlc(&cancel)?;

    let mut pipeline = Pipeline::new(input, output, params);
    let bar = (format == OutputFormat::Human).then(|| create_progress_bar(0, "Converting"));
    if let Some(bar) = bar.clone() {
        pipeline = pipeline.with_progress(move |done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
        });
    }

    let summary = pipeline.run(&cancel);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    match format {
        OutputFormat::Human => print_summary_report(&summary, "Comic Batch"),
        OutputFormat::Json => print_summary_json(&summary)?,
    }

    Ok(if summary.aborted.is_some() {
        ExitCode::FAILURE
    } else if summary.cancelled {
        ExitCode::from(130)
    } else {
        ExitCode::SUCCESS
    })
}

fn analyze_only(input: &Path, width_threshold: u32, format: OutputFormat) -> Result<ExitCode> {
    anyhow::ensure!(width_threshold > 0, "--width-threshold must be greater than 0");

    let cancel = CancellationToken::new();
    install_ctrlc(&cancel)?;

    let scans = analyze(input, width_threshold, &cancel)
        .with_context(|| format!("Failed to analyze {}", input.display()))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&scans)?),
        OutputFormat::Human => {
            if scans.is_empty() {
                println!("⚠️  No chapter directories with images under {}", input.display());
            }
            for scan in &scans {
                println!(
                    "📁 {:<40} {:>9} {:>6} images{}",
                    scan.name(),
                    scan.category.to_string(),
                    scan.images.len(),
                    if scan.high_resolution { "  🔍 high-res" } else { "" }
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn plan(
    input: &Path,
    output: &Path,
    params: ProcessingParameters,
    format: OutputFormat,
) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    install_ctrlc(&cancel)?;

    let (run_plan, planned) = Pipeline::new(input, output, params)
        .plan_commands(&cancel)
        .context("Planning failed")?;

    match format {
        OutputFormat::Json => print_plan_json(&run_plan, &planned)?,
        OutputFormat::Human => print_plan(&run_plan, &planned),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_plan(run_plan: &RunPlan, planned: &[PlannedTask]) {
    println!(
        "📋 {} directories, {} images → {} tasks ({} workers, batch size {})",
        run_plan.scans.len(),
        run_plan.total_images,
        run_plan.tasks.len(),
        run_plan.workers,
        run_plan.batch_size
    );
    for p in planned {
        let t = &p.task;
        println!(
            "\n#{:<4} {:?} cost={} images={} global={} → {}",
            t.id,
            t.priority,
            t.estimated_cost,
            t.images.len(),
            t.is_global,
            t.output_dir.display()
        );
        for command in &p.batch.commands {
            println!("   {}", command);
        }
        for path in &p.batch.failed {
            println!("   ❌ unreadable: {}", path.display());
        }
    }
}

fn print_plan_json(run_plan: &RunPlan, planned: &[PlannedTask]) -> Result<()> {
    let tasks: Vec<serde_json::Value> = planned
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.task.id,
                "priority": p.task.priority,
                "estimated_cost": p.task.estimated_cost,
                "is_global": p.task.is_global,
                "high_resolution": p.task.high_resolution,
                "output_dir": p.task.output_dir,
                "commands": p.batch.commands,
                "unreadable": p.batch.failed,
            })
        })
        .collect();

    let value = serde_json::json!({
        "directories": run_plan.scans.len(),
        "total_images": run_plan.total_images,
        "workers": run_plan.workers,
        "batch_size": run_plan.batch_size,
        "tasks": tasks,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn check_tool() -> Result<ExitCode> {
    match gm_tool::discover() {
        Ok(tool) => {
            println!("✅ {}", tool.path.display());
            println!("   {}", tool.version);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            eprintln!(
                "💡 Install GraphicsMagick or point {} at the gm executable",
                gm_tool::GM_ENV
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
