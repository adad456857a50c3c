mod cli;

use std::{
    io::{self, Read},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use is_terminal::IsTerminal;
use robot_studio_bridge::{
    bridge::server, logging, printer::EventPrinter, Bridge, BridgeEvent, Config, OutputRelay, ProcessRunner,
};
use tokio::{sync::mpsc, task::JoinHandle};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // CLI candidate override goes through the same key the config layer reads.
    if let Some(python) = args.python.as_deref() {
        std::env::set_var("ROBOT_PYTHON_CANDIDATES", python);
    }

    let cfg = Config::load();
    let filter = args.log.clone().unwrap_or_else(|| cfg.log_filter());
    logging::init(&filter);

    let (relay, events) = OutputRelay::channel();
    let runner = Arc::new(ProcessRunner::new(cfg.settings(), relay));
    let color = !args.no_color && io::stderr().is_terminal();

    match args.command.unwrap_or(cli::Command::Serve { subscribe_all: false }) {
        cli::Command::Serve { subscribe_all } => {
            let bridge = Arc::new(Bridge::new(runner));
            if subscribe_all || cfg.get_bool("ROBOT_SUBSCRIBE_ALL") {
                bridge.subscribe_all();
            }
            tracing::info!("robot-bridge serving on stdio");
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            server::serve(bridge, events, stdin, tokio::io::stdout(), async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .context("bridge server failed")?;
            Ok(())
        }
        cli::Command::CheckVersion => {
            let (command, version) = runner.version().await.map_err(|e| anyhow!(e.user_message()))?;
            println!("{}: {}", command, version);
            Ok(())
        }
        cli::Command::Run { file } => {
            let code = if file.as_os_str() == "-" {
                let mut buf = String::new();
                io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                std::fs::read_to_string(&file).with_context(|| format!("reading script: {}", file.display()))?
            };

            let printer = spawn_printer(events, color);
            let handle = runner.execute(&code).await.map_err(|e| anyhow!(e.user_message()))?;
            let exit_code = tokio::select! {
                result = handle.wait() => Some(result.exit_code()),
                _ = tokio::signal::ctrl_c() => {
                    runner.shutdown().await;
                    None
                }
            };
            drop(runner);
            let _ = printer.await;

            match run_exit_status(exit_code) {
                0 => Ok(()),
                status => std::process::exit(status),
            }
        }
        cli::Command::Install { name } => {
            let printer = spawn_printer(events, color);
            let outcome = runner.install_package(&name).await;
            drop(runner);
            let _ = printer.await;

            let status = EventPrinter { color };
            match outcome {
                Ok(outcome) => {
                    status.status(&outcome.message, true);
                    Ok(())
                }
                Err(e) => Err(anyhow!(e.user_message())),
            }
        }
        cli::Command::Check { name } => {
            let installed = runner.check_package(&name).await.map_err(|e| anyhow!(e.user_message()))?;
            if installed {
                println!("{} is installed", name);
                Ok(())
            } else {
                println!("{} is not installed", name);
                std::process::exit(1);
            }
        }
    }
}

fn spawn_printer(mut events: mpsc::UnboundedReceiver<BridgeEvent>, color: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let printer = EventPrinter { color };
        while let Some(event) = events.recv().await {
            printer.print(&event);
        }
    })
}

/// Exit status for `run`. `None` means interrupted; `Some(None)` means the script was killed.
fn run_exit_status(exit_code: Option<Option<i32>>) -> i32 {
    match exit_code {
        Some(Some(code)) => code,
        Some(None) => 1,
        // 128 + SIGINT
        None => 130,
    }
}
