use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use pillbox_core::export::{export_forecast, export_intake_history};
use pillbox_core::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pillbox")]
#[command(about = "Medication inventory and intake tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use a specific config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pretend today is this date (for testing)
    #[arg(long, global = true, hide = true, value_parser = parse_date_arg)]
    today: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show remaining supply and outlook (default)
    Status,

    /// Record pills taken today
    Take {
        /// Number of pills
        #[arg(default_value_t = 1)]
        count: u32,
    },

    /// Change medication settings
    Settings {
        #[arg(long)]
        name: Option<String>,

        /// Pills in a full container (resets the remaining count when changed)
        #[arg(long)]
        total_pills: Option<u32>,

        #[arg(long)]
        daily_dose: Option<u32>,

        /// Start date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date_arg)]
        start_date: Option<NaiveDate>,
    },

    /// Refill: full container, empty history
    Reset,

    /// Project remaining pills day by day
    Forecast {
        /// Number of days to project
        #[arg(long)]
        days: Option<u32>,

        #[command(flatten)]
        refill: RefillArgs,
    },

    /// Show intake history
    History,

    /// Export history or forecast to CSV
    Export {
        /// Write intake history to this file
        #[arg(long, required_unless_present = "forecast")]
        history: Option<PathBuf>,

        /// Write the forecast to this file
        #[arg(long)]
        forecast: Option<PathBuf>,

        /// Forecast horizon in days
        #[arg(long)]
        days: Option<u32>,

        #[command(flatten)]
        refill: RefillArgs,
    },

    /// Replace the ledger with a JSON document (bare or legacy browser export)
    Import { path: PathBuf },

    /// Remote mirror operations
    Mirror {
        #[command(subcommand)]
        action: MirrorAction,
    },
}

#[derive(Subcommand)]
enum MirrorAction {
    /// Export the ledger to the mirror
    Push,
    /// Verify the mirror can create, read, append and delete records
    Check,
}

/// Refill policy override; falls back to the configured policy
#[derive(clap::Args)]
#[group(multiple = false)]
struct RefillArgs {
    /// Refill on this day of every month
    #[arg(long)]
    refill_monthly: Option<u32>,

    /// Refill once a year on this date (MM-DD)
    #[arg(long)]
    refill_annually: Option<String>,

    /// Refill every N days counting from the start date
    #[arg(long)]
    refill_every: Option<u32>,
}

/// Everything a command needs besides its own arguments
struct Context {
    data_dir: PathBuf,
    config: Config,
    today: NaiveDate,
}

impl Context {
    fn store(&self) -> JsonFileStore {
        JsonFileStore::new(self.data_dir.join("ledger.json"))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        pillbox_core::logging::init_with_level("debug");
    } else {
        pillbox_core::logging::init();
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let ctx = Context {
        data_dir: cli
            .data_dir
            .unwrap_or_else(|| config.data.data_dir.clone()),
        config,
        today: cli.today.unwrap_or_else(today),
    };
    tracing::debug!(
        "Using data dir {:?} with today = {}",
        ctx.data_dir,
        ctx.today
    );

    match cli.command {
        None | Some(Commands::Status) => cmd_status(&ctx),
        Some(Commands::Take { count }) => cmd_take(&ctx, count),
        Some(Commands::Settings {
            name,
            total_pills,
            daily_dose,
            start_date,
        }) => cmd_settings(&ctx, name, total_pills, daily_dose, start_date),
        Some(Commands::Reset) => cmd_reset(&ctx),
        Some(Commands::Forecast { days, refill }) => cmd_forecast(&ctx, days, &refill),
        Some(Commands::History) => cmd_history(&ctx),
        Some(Commands::Export {
            history,
            forecast,
            days,
            refill,
        }) => cmd_export(&ctx, history, forecast, days, &refill),
        Some(Commands::Import { path }) => cmd_import(&ctx, &path),
        Some(Commands::Mirror { action }) => cmd_mirror(&ctx, action),
    }
}

fn parse_date_arg(input: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(input).map_err(|e| e.to_string())
}

/// Load the ledger, moving an unreadable file aside and starting fresh.
fn load_ledger(ctx: &Context) -> Result<LedgerState> {
    let store = ctx.store();
    match store.load_or_init(ctx.today) {
        Ok(state) => Ok(state),
        Err(err @ Error::Persistence { .. }) => {
            eprintln!("Warning: {}", err);
            let moved = store.quarantine()?;
            tracing::info!("Starting a new ledger at {:?}", store.path());
            eprintln!(
                "  Moved it to {} and started a new ledger.",
                moved.display()
            );
            Ok(LedgerState::new(ctx.today))
        }
        Err(err) => Err(err),
    }
}

/// Load, apply `f`, save.
fn update_ledger<F>(ctx: &Context, f: F) -> Result<LedgerState>
where
    F: FnOnce(&mut LedgerState) -> Result<()>,
{
    let mut state = load_ledger(ctx)?;
    f(&mut state)?;
    ctx.store().save(&mut state)?;
    Ok(state)
}

fn resolve_refill(
    ctx: &Context,
    args: &RefillArgs,
    state: &LedgerState,
) -> Result<Option<RefillPolicy>> {
    let policy = if let Some(day) = args.refill_monthly {
        Some(RefillPolicy::Monthly { day })
    } else if let Some(ref month_day) = args.refill_annually {
        let (month, day) = month_day
            .split_once('-')
            .and_then(|(m, d)| {
                let month = m.trim().parse::<u32>().ok()?;
                let day = d.trim().parse::<u32>().ok()?;
                Some((month, day))
            })
            .ok_or_else(|| {
                Error::Validation(format!("refill date must be MM-DD, got '{}'", month_day))
            })?;
        Some(RefillPolicy::Annually { month, day })
    } else if let Some(days) = args.refill_every {
        Some(RefillPolicy::Interval {
            anchor: state.start_date(),
            days,
        })
    } else {
        ctx.config.forecast.refill
    };

    if let Some(ref p) = policy {
        p.validate()?;
    }
    tracing::debug!("Refill policy: {:?}", policy);
    Ok(policy)
}

fn cmd_status(ctx: &Context) -> Result<()> {
    let state = load_ledger(ctx)?;
    let refill = ctx.config.forecast.refill;
    let outlook = state.outlook(ctx.today, refill);

    println!("\n  {}", state.name());
    println!(
        "  Pills remaining: {} / {} ({:.0}%)",
        state.pills_remaining(),
        state.total_pills(),
        state.percent_remaining()
    );
    println!("  Daily dose: {}", state.daily_dose());
    println!("  Tracking since: {}", state.start_date());
    println!("  Days remaining: {}", outlook.days_remaining);
    println!("  Runs out on: {}", outlook.run_out_date);

    if let Some(next_refill) = outlook.next_refill {
        println!("  Next refill: {}", next_refill);
        if outlook.runs_out_before_refill == Some(true) {
            println!("  ⚠ Supply runs out before the next refill");
        }
    }
    println!();

    Ok(())
}

fn cmd_take(ctx: &Context, count: u32) -> Result<()> {
    let today = ctx.today;
    let result = update_ledger(ctx, |state| state.record_intake(count, today));

    match result {
        Ok(state) => {
            println!("✓ Recorded {} pill(s) for {}", count, today);
            println!(
                "  {} of {} remaining",
                state.pills_remaining(),
                state.total_pills()
            );
            Ok(())
        }
        Err(err) => {
            if let Some(shortfall) = err.shortfall() {
                eprintln!(
                    "Not enough pills: requested {}, short by {}. Nothing was recorded.",
                    count, shortfall
                );
            } else if let Error::Conflict { expected, found } = err {
                tracing::info!(
                    "Save rejected: loaded revision {}, stored revision {}",
                    expected,
                    found
                );
                eprintln!("The ledger was changed by another process; please retry.");
            }
            Err(err)
        }
    }
}

fn cmd_settings(
    ctx: &Context,
    name: Option<String>,
    total_pills: Option<u32>,
    daily_dose: Option<u32>,
    start_date: Option<NaiveDate>,
) -> Result<()> {
    let state = update_ledger(ctx, |state| {
        let config = MedicationConfig::new(
            name.unwrap_or_else(|| state.name().to_string()),
            total_pills.unwrap_or(state.total_pills()),
            daily_dose.unwrap_or(state.daily_dose()),
            start_date.unwrap_or(state.start_date()),
        )?;
        state.update_settings(config);
        Ok(())
    })?;

    println!("✓ Settings saved");
    println!("  Name: {}", state.name());
    println!(
        "  Pills: {} / {}",
        state.pills_remaining(),
        state.total_pills()
    );
    println!("  Daily dose: {}", state.daily_dose());
    println!("  Start date: {}", state.start_date());
    Ok(())
}

fn cmd_reset(ctx: &Context) -> Result<()> {
    let state = update_ledger(ctx, |state| {
        state.reset_medicine();
        Ok(())
    })?;

    println!("✓ Refilled: {} pills", state.pills_remaining());
    Ok(())
}

fn cmd_forecast(ctx: &Context, days: Option<u32>, refill: &RefillArgs) -> Result<()> {
    let state = load_ledger(ctx)?;
    let policy = resolve_refill(ctx, refill, &state)?;
    let horizon = days.unwrap_or(ctx.config.forecast.horizon_days);

    println!("  {:<12} {:>9}", "Date", "Remaining");
    for point in state.project_forecast(horizon, ctx.today, policy)? {
        println!("  {:<12} {:>9}", point.date.to_string(), point.remaining);
    }

    let outlook = state.outlook(ctx.today, policy);
    println!();
    println!(
        "  Runs out on {} ({} days)",
        outlook.run_out_date, outlook.days_remaining
    );
    Ok(())
}

fn cmd_history(ctx: &Context) -> Result<()> {
    let state = load_ledger(ctx)?;

    if state.intake_history().is_empty() {
        println!("No intake recorded yet.");
        return Ok(());
    }

    for entry in state.intake_history() {
        println!("  {}  {:>4}", entry.date, entry.count);
    }

    let stats = state.intake_stats();
    println!();
    println!("  Total: {} pills over {} days", stats.total, stats.days);
    println!("  Average: {:.1} per day", stats.average);
    Ok(())
}

fn cmd_export(
    ctx: &Context,
    history: Option<PathBuf>,
    forecast: Option<PathBuf>,
    days: Option<u32>,
    refill: &RefillArgs,
) -> Result<()> {
    let state = load_ledger(ctx)?;

    if let Some(path) = history {
        let count = export_intake_history(&state, &path)?;
        println!("✓ Exported {} intake entries to {}", count, path.display());
    }

    if let Some(path) = forecast {
        let policy = resolve_refill(ctx, refill, &state)?;
        let horizon = days.unwrap_or(ctx.config.forecast.horizon_days);
        let points = state.project_forecast(horizon, ctx.today, policy)?;
        let count = export_forecast(points, &path)?;
        println!("✓ Exported {} forecast days to {}", count, path.display());
    }

    Ok(())
}

fn cmd_import(ctx: &Context, path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path)?;
    let imported = parse_ledger(&contents)?;

    let state = update_ledger(ctx, |state| {
        state.replace_with(imported);
        Ok(())
    })?;

    println!(
        "✓ Imported {} ({} / {} pills, {} intake entries)",
        state.name(),
        state.pills_remaining(),
        state.total_pills(),
        state.intake_history().len()
    );
    Ok(())
}

fn cmd_mirror(ctx: &Context, action: MirrorAction) -> Result<()> {
    let mut mirror = JsonlMirror::new(ctx.config.mirror_dir(&ctx.data_dir));

    match action {
        MirrorAction::Push => {
            let state = load_ledger(ctx)?;
            let report = push_ledger(&mut mirror, &state)?;
            println!("✓ Pushed to mirror as {}", report.medication.id);
            println!("  {} intake records", report.intakes.len());
        }
        MirrorAction::Check => match check_connectivity(&mut mirror, ctx.today) {
            Ok(report) => {
                println!("✓ Mirror reachable at {}", mirror.dir().display());
                println!(
                    "  Created, read and removed {} test records",
                    report.records_cleaned
                );
            }
            Err(err) => {
                eprintln!("Mirror check failed: {}", err);
                return Err(err);
            }
        },
    }

    Ok(())
}
