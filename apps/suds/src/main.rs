use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use suds_core::{Phase, Session};
use suds_engine::{EngineError, SessionController};

#[derive(Parser, Debug)]
#[command(name = "suds", about = "Paired shower timer over a session relay")]
struct Cli {
    /// Join an existing session by code instead of hosting one
    #[arg(long, short = 'j')]
    join: Option<String>,

    /// Relay to talk to
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Requested total duration in seconds when hosting
    #[arg(long)]
    total_seconds: Option<u32>,
}

#[tokio::main]
async fn main() {
    // Default to WARN level if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let controller = if let Some(code) = cli.join.as_deref() {
        match SessionController::join(&cli.server, code).await {
            Ok(controller) => {
                println!("Joined session {}", controller.code());
                controller
            }
            Err(e) => {
                eprintln!("Could not join: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match SessionController::create(&cli.server, cli.total_seconds).await {
            Ok(controller) => {
                println!("Hosting session {}", controller.code());
                println!("Share this code with the other device.");
                controller
            }
            Err(e) => {
                eprintln!("Could not create a session: {}", e);
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = run_ui(controller).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run_ui(controller: SessionController) -> anyhow::Result<()> {
    println!("Commands: start, pause, resume, stop, quit");

    let mut snapshots = controller.watch();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_rendered = String::new();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = render(&snapshots.borrow_and_update());
                if line != last_rendered {
                    println!("{}", line);
                    last_rendered = line;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "start" => report(controller.start().await),
                    "pause" => report(controller.pause().await),
                    "resume" => report(controller.resume().await),
                    "stop" => report(controller.stop().await),
                    "quit" | "exit" => break,
                    other => println!("Unknown command: {}", other),
                }
            }
        }
    }

    controller.leave().await;
    Ok(())
}

fn report(result: Result<(), EngineError>) {
    if let Err(e) = result {
        println!("{}", e);
    }
}

fn render(session: &Session) -> String {
    match session.phase {
        Phase::Running | Phase::Paused => {
            let step = session
                .nth_active(session.active_step_index)
                .map(|s| s.label.as_str())
                .unwrap_or("?");
            format!(
                "[{}] {} {} {}:{:02} left",
                session.code,
                session.phase,
                step,
                session.time_remaining_seconds / 60,
                session.time_remaining_seconds % 60,
            )
        }
        _ => format!("[{}] {}", session.code, session.phase),
    }
}
