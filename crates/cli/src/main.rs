//! Exertion CLI - dispatch demo compositions and inspect monitor sessions.

mod providers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exertion_core::{
    Block, Condition, DataContext, Exertion, Flow, Job, Opt, Pipe, SessionId, SessionRecord,
    Signature, Status, Strategy, Task,
};
use exertion_dispatch::{DispatchConfig, DispatchEngine};
use exertion_monitor::{LoggingSubscriber, MonitorConfig, MonitoringEngine, StatusSubscriber};
use exertion_storage::{JsonSessionStore, SessionStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exertion")]
#[command(about = "Dispatch exertions and inspect their monitor sessions", long_about = None)]
struct Cli {
    /// Directory holding session records
    #[arg(long, global = true, default_value = ".exertion")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a demo composition
    Demo {
        #[command(subcommand)]
        demo: Demo,
    },
    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        command: Sessions,
    },
}

#[derive(Subcommand)]
enum Demo {
    /// t3 = t1 - t2 with t1 = 10 * 50 and t2 = 20 + 80
    Arithmetic {
        /// Run the children in parallel
        #[arg(long)]
        par: bool,
    },
    /// A block with an optional step and an alternative
    Block,
}

#[derive(Subcommand)]
enum Sessions {
    /// List stored root sessions
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<Status>,
    },
    /// Show a session tree
    Show {
        /// Root session cookie
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let store = Arc::new(
        JsonSessionStore::new(&cli.data_dir)
            .await
            .with_context(|| format!("cannot open {}", cli.data_dir.display()))?,
    );

    match cli.command {
        Commands::Demo { demo } => {
            let unit = match demo {
                Demo::Arithmetic { par } => arithmetic_job(if par { Flow::Par } else { Flow::Seq }),
                Demo::Block => demo_block(),
            };
            let done = run(store, unit).await?;
            print_unit(&done, 0);
            if let Some(session) = done.session() {
                println!("Session: {}", session);
            }
        }
        Commands::Sessions { command: Sessions::List { status } } => {
            let records = store.list().await?;
            let records: Vec<_> = records
                .into_iter()
                .filter(|r| status.map_or(true, |s| r.status() == s))
                .collect();

            println!("Sessions ({})", records.len());
            for record in records {
                println!(
                    "  {} | {} | {} units - {}",
                    record.cookie,
                    record.status(),
                    record.size(),
                    record.runtime.name,
                );
            }
        }
        Commands::Sessions { command: Sessions::Show { id } } => {
            let cookie: SessionId = id.parse().map_err(|_| anyhow::anyhow!("Invalid session ID"))?;
            let Some(record) = store.load(cookie).await? else {
                println!("Session not found");
                return Ok(());
            };
            print_record(&record, 0);
        }
    }

    Ok(())
}

async fn run(store: Arc<JsonSessionStore>, unit: Exertion) -> Result<Exertion> {
    let subscribers: Vec<Arc<dyn StatusSubscriber>> = vec![Arc::new(LoggingSubscriber)];
    let (monitor, _governor) = MonitoringEngine::spawn(MonitorConfig::default(), store, subscribers);

    let engine = Arc::new(
        DispatchEngine::new(DispatchConfig::from_env(), Arc::new(providers::arithmetic()))
            .with_monitor(monitor.clone()),
    );
    let done = engine.dispatch(unit, None).await?;
    info!("{} finished {}", done.name(), done.status());

    monitor.shutdown().await?;
    Ok(done)
}

fn args(name: &str, x1: f64, x2: f64) -> DataContext {
    DataContext::new(name)
        .with_in("arg/x1", x1)
        .with_in("arg/x2", x2)
        .with_out("result/y")
}

fn arithmetic_job(flow: Flow) -> Exertion {
    let t1 = Task::new("t1", Signature::new("multiply", "Multiplier")).with_context(args("t1", 10.0, 50.0));
    let t2 = Task::new("t2", Signature::new("add", "Adder")).with_context(args("t2", 20.0, 80.0));
    let t3 = Task::new("t3", Signature::new("subtract", "Subtractor"))
        .with_context(DataContext::new("t3").with_out("result/y"));
    let (i1, i2, i3) = (t1.id, t2.id, t3.id);

    Job::new("arithmetic")
        .with_strategy(Strategy::new().with_flow(flow).with_monitor(true))
        .with_child(t1)
        .with_child(t2)
        .with_child(t3)
        .with_pipe(Pipe::new(i1, "result/y", i3, "arg/x1"))
        .with_pipe(Pipe::new(i2, "result/y", i3, "arg/x2"))
        .into()
}

fn demo_block() -> Exertion {
    let scale = Task::new("scale", Signature::new("multiply", "Multiplier")).with_context(args("scale", 6.0, 7.0));
    let bump = Task::new("bump", Signature::new("add", "Adder"))
        .with_context(args("bump", 0.0, 100.0));
    let small = Task::new("small", Signature::new("average", "Averager")).with_context(args("small", 1.0, 3.0));
    let large = Task::new("large", Signature::new("subtract", "Subtractor")).with_context(args("large", 50.0, 8.0));

    Block::new("block")
        .with_strategy(Strategy::new().with_monitor(true))
        .with_step(scale)
        .with_opt(Opt::new(Condition::less_than("result/y", 10.0), bump))
        .with_alt(vec![
            Opt::new(Condition::less_than("result/y", 40.0), small),
            Opt::new(Condition::True, large),
        ])
        .into()
}

fn print_unit(unit: &Exertion, depth: usize) {
    let indent = "  ".repeat(depth);
    let result = unit
        .context()
        .get("result/y")
        .map(|v| format!(" result/y={}", v))
        .unwrap_or_default();
    println!("{}{} [{}]{}", indent, unit.name(), unit.status(), result);
    for fault in &unit.control().faults {
        println!("{}  ! {}", indent, fault.message);
    }
    for child in unit.children() {
        print_unit(child, depth + 1);
    }
}

fn print_record(record: &SessionRecord, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{}{} {} [{}]", indent, record.cookie, record.runtime.name, record.status());
    if let Some(expiration) = record.expiration {
        println!("{}  expires {}", indent, expiration);
    }
    for child in &record.children {
        print_record(child, depth + 1);
    }
}
