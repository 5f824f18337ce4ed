use clap::Parser;
use imgsearch_backend::ProcessSupervisor;
use imgsearch_shell::cli::Cli;
use imgsearch_shell::{
    BrowserWindow, HeadlessWindow, QuitSignals, Settings, ShellConfig, ShellController,
    ShutdownTrigger, WindowHost, log,
};
use miette::{IntoDiagnostic, Result, WrapErr};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    log::init_tracing(cli.log_level(), cli.log_format);

    let mut config = ShellConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(&cli);
    let settings = config.resolve()?;

    let (triggers_tx, triggers_rx) = mpsc::channel(4);
    let signals = QuitSignals::new();
    let _listener = signals
        .install(triggers_tx)
        .into_diagnostic()
        .wrap_err("Failed to install signal handlers")?;

    if cli.headless {
        run(settings, HeadlessWindow::new(), triggers_rx).await?;
    } else {
        run(settings, BrowserWindow::new(), triggers_rx).await?;
    }

    signals.shutdown();
    Ok(())
}

async fn run<W: WindowHost>(
    settings: Settings,
    window: W,
    triggers: mpsc::Receiver<ShutdownTrigger>,
) -> Result<()> {
    let supervisor = match settings.pid_file() {
        Some(pid_file) => ProcessSupervisor::new().with_pid_file(pid_file),
        None => ProcessSupervisor::new(),
    };

    let mut controller =
        ShellController::new(supervisor, window, settings.layout, settings.options)?;
    controller.run(triggers).await;
    Ok(())
}
