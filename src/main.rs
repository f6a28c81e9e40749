// src/main.rs

use chrono::Local;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use mid_task::constants::DEFAULT_OUT_DIR;
use mid_task::database::open_db;
use mid_task::repository;
use mid_task::simulate::SimulatedParticipant;
use mid_task::stimuli::StimulusCatalog;
use mid_task::terminal::TerminalFrontend;
use mid_task::{
    load_config, AbortSignal, CsvSink, FanoutSink, Frontend, MidError, Result, Session,
    SessionInfo, SqliteSink,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "mid-task")]
#[command(about = "Monetary Incentive Delay task with adaptive target timing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session
    Run {
        /// Experiment config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Participant id
        #[arg(short, long, default_value = "p00")]
        participant: String,

        /// Session id
        #[arg(short, long, default_value = "001")]
        session: String,

        /// Directory for the CSV trial log
        #[arg(short, long, default_value = DEFAULT_OUT_DIR)]
        out_dir: PathBuf,

        /// Also record trials into this SQLite database
        #[arg(long)]
        db: Option<PathBuf>,

        /// RNG seed for schedules and jitters
        #[arg(long)]
        seed: Option<u64>,

        /// Drive the session with a simulated participant
        #[arg(long)]
        simulate: bool,

        /// Mean reaction time of the simulated participant
        #[arg(long, default_value_t = 250.0)]
        hit_rate_ms: f64,
    },

    /// Show stored sessions, or per-condition stats for one session
    Summary {
        /// SQLite database written by `run --db`
        #[arg(long)]
        db: PathBuf,

        /// Session row id
        #[arg(long)]
        session_id: Option<i64>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            config,
            participant,
            session,
            out_dir,
            db,
            seed,
            simulate,
            hit_rate_ms,
        } => run_session(RunArgs {
            config,
            info: SessionInfo {
                participant,
                session,
            },
            out_dir,
            db,
            seed,
            simulate,
            mean_rt_ms: hit_rate_ms,
        }),
        Commands::Summary { db, session_id } => show_summary(db, session_id),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

struct RunArgs {
    config: PathBuf,
    info: SessionInfo,
    out_dir: PathBuf,
    db: Option<PathBuf>,
    seed: Option<u64>,
    simulate: bool,
    mean_rt_ms: f64,
}

fn run_session(args: RunArgs) -> Result<()> {
    // 1. Config and assets (fatal before any trial runs)
    let config = load_config(&args.config)?;
    let stimuli = StimulusCatalog::load(&config);
    if stimuli.placeholder_count() > 0 {
        warn!("{} stimulus asset(s) replaced by placeholders", stimuli.placeholder_count());
    }

    // 2. Randomness
    let seed = args.seed.unwrap_or_else(rand::random);
    info!("RNG seed: {}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    // 3. Cancellation
    let abort = AbortSignal::new();
    let handle = abort.clone();
    ctrlc::set_handler(move || handle.trigger())
        .map_err(|e| MidError::Frontend(format!("failed to set Ctrl+C handler: {}", e)))?;

    // 4. Frontend, built before any output file is created
    let mut frontend: Box<dyn Frontend> = if args.simulate {
        let resp_key = config.task.resp_keys.first().cloned().unwrap_or_default();
        Box::new(
            SimulatedParticipant::new(stimuli.target().clone(), &resp_key, seed)
                .mean_rt_ms(args.mean_rt_ms)
                .abort_key(&config.task.abort_key),
        )
    } else {
        Box::new(TerminalFrontend::new(abort.clone())?)
    };

    // 5. Sinks
    let mut sink = FanoutSink::new();
    let csv = CsvSink::in_dir(&args.out_dir, &args.info, &Local::now())?;
    let csv_path = csv.path().to_path_buf();
    sink.push(Box::new(csv));
    if let Some(db_path) = &args.db {
        sink.push(Box::new(SqliteSink::open(db_path, &args.info)?));
    }

    // 6. Run
    let mut session = Session::with_stimuli(config, args.info, stimuli);
    let summary = session.run(frontend.as_mut(), &mut sink, &abort, &mut rng)?;

    println!(
        "{} {} trials, {} points. Data saved to {}",
        if summary.aborted { "Aborted:" } else { "Finished:" },
        summary.trials_completed,
        summary.points_total,
        csv_path.display()
    );
    Ok(())
}

fn show_summary(db: PathBuf, session_id: Option<i64>) -> Result<()> {
    let conn = open_db(&db)?;

    let Some(id) = session_id else {
        for s in repository::list_sessions(&conn)? {
            println!(
                "#{:<4} {:<12} {:<6} {}  trials={} points={}",
                s.id,
                s.participant,
                s.session,
                s.started_at,
                s.trials_completed,
                s.points_total.map_or_else(|| "-".to_string(), |p| p.to_string())
            );
        }
        return Ok(());
    };

    let session = repository::get_session(&conn, id)?
        .ok_or(MidError::SessionNotFound(id))?;
    println!(
        "Session #{}: participant {} session {} ({} trials, {} points)",
        session.id,
        session.participant,
        session.session,
        session.trials_completed,
        session.points_total.unwrap_or(0)
    );
    for c in repository::get_condition_stats(&conn, id)? {
        println!(
            "  {:<12} {:>3}/{:<3} hits ({:>5.1}%)  mean RT {:>7}  last target {}ms",
            c.condition,
            c.hits,
            c.trials,
            c.hit_rate * 100.0,
            c.mean_rt_ms.map_or_else(|| "-".to_string(), |rt| format!("{:.1}ms", rt)),
            c.last_target_ms
        );
    }
    Ok(())
}
