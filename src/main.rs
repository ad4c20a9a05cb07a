use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::oneshot;

use twin_deck::audio::{Deck, DeviceManager, Mixer, OutputEngine, SourceOpener, SymphoniaOpener};
use twin_deck::cli::{CliApp, Commands, DeckCommand, StatusDisplay};
use twin_deck::config::ConfigManager;
use twin_deck::control::{ControlHandle, ControlLoop, DeckAction};
use twin_deck::error::{DeckError, ErrorSeverity};
use twin_deck::logging::DeckLogger;

/// A load sent to the control loop whose outcome has not been reported yet
struct PendingLoad {
    deck: usize,
    path: PathBuf,
    outcome: oneshot::Receiver<Result<(), DeckError>>,
}

/// Main application controller that coordinates all components
pub struct AppController {
    config_manager: ConfigManager,
    decks: Vec<Arc<Deck>>,
    control: ControlLoop,
    engine: OutputEngine,
    logger: DeckLogger,
    pending_loads: Vec<PendingLoad>,
}

impl AppController {
    /// Open the output device, build the decks and start the control loop
    pub fn new(cli: &CliApp, logger: DeckLogger) -> Result<Self, DeckError> {
        let config_manager = Self::open_config(cli)?;
        let config = config_manager.get_config().clone();

        let mut device_manager = DeviceManager::new()?;
        let device_name = cli.device.as_deref().or(config.preferred_device.as_deref());
        device_manager.select_device_with_fallback(device_name)?;
        let device = device_manager
            .current_device()
            .cloned()
            .ok_or_else(|| DeckError::Control("no output device selected".to_string()))?;

        let channels = device_manager.default_output_config()?.channels();
        if channels != config.output_channels {
            info!(
                "Device renders {} channels, configured output_channels is {}; using the device layout",
                channels, config.output_channels
            );
        }

        let opener: Arc<dyn SourceOpener> = Arc::new(SymphoniaOpener::new());
        let decks: Vec<Arc<Deck>> = (0..config.deck_count)
            .map(|index| {
                Arc::new(Deck::with_config(
                    Self::deck_name(index),
                    opener.clone(),
                    channels,
                    &config,
                ))
            })
            .collect();

        let mut mixer = Mixer::new(channels);
        for deck in &decks {
            mixer.add_deck(deck.clone());
        }

        let engine = OutputEngine::start(device, mixer, config.block_size)?;
        let control = ControlLoop::start(
            decks.clone(),
            Duration::from_millis(config.fade_tick_ms),
            logger.clone(),
        )?;

        info!("Application controller initialized with {} decks", decks.len());

        Ok(Self {
            config_manager,
            decks,
            control,
            engine,
            logger,
            pending_loads: Vec::new(),
        })
    }

    fn open_config(cli: &CliApp) -> Result<ConfigManager, DeckError> {
        let manager = match &cli.config {
            Some(path) => ConfigManager::with_path(CliApp::expand_path(&path.to_string_lossy()))?,
            None => ConfigManager::new()?,
        };
        Ok(manager)
    }

    fn deck_name(index: usize) -> String {
        if index < 26 {
            ((b'A' + index as u8) as char).to_string()
        } else {
            (index + 1).to_string()
        }
    }

    fn handle(&self) -> ControlHandle {
        self.control.handle()
    }

    /// Queue a track load; the outcome is reported from the prompt loop
    pub fn load(&mut self, deck: usize, path: PathBuf) -> Result<(), DeckError> {
        let outcome = self.handle().send_detached(deck, DeckAction::Load(path.clone()))?;
        println!("Loading {} ...", path.display());
        self.pending_loads.push(PendingLoad { deck, path, outcome });
        Ok(())
    }

    /// Execute a single prompt command. Returns `false` to leave the prompt.
    pub async fn execute_command(&mut self, command: DeckCommand) -> Result<bool, DeckError> {
        match command {
            DeckCommand::Quit => return Ok(false),
            DeckCommand::Help => CliApp::display_help(),
            DeckCommand::Status => self.display_status(),
            DeckCommand::Events { count } => {
                StatusDisplay::display_events(&self.logger.get_recent_events(count));
            }
            DeckCommand::Load { deck, path } => self.load(deck, path)?,
            other => {
                if let Some((deck, action)) = other.into_action() {
                    let name = action.name();
                    self.handle().send(deck, action).await?;
                    println!("OK: {} on deck {}", name, Self::deck_name(deck));
                }
            }
        }
        Ok(true)
    }

    fn display_status(&self) {
        for deck in &self.decks {
            StatusDisplay::display_deck_status(deck.name(), &deck.status());
        }
        let info = self.engine.info();
        println!(
            "Output: {} | {} Hz | {} ch | {} | {} frame blocks",
            info.device_name, info.sample_rate, info.channels, info.sample_format, info.block_size
        );
        let errors = self.engine.stream_errors();
        if errors > 0 {
            println!("Stream errors: {}", errors);
        }
    }

    /// Report loads that finished since the last poll
    fn poll_pending_loads(&mut self) {
        let mut still_pending = Vec::with_capacity(self.pending_loads.len());
        for mut pending in self.pending_loads.drain(..) {
            match pending.outcome.try_recv() {
                Ok(Ok(())) => {
                    let name = Self::deck_name(pending.deck);
                    match self.decks.get(pending.deck) {
                        Some(deck) => {
                            println!();
                            StatusDisplay::display_compact_status(&name, &deck.status());
                        }
                        None => println!("\nDeck {} loaded: {}", name, pending.path.display()),
                    }
                }
                Ok(Err(e)) => {
                    // A newer load on the same deck is already reported separately
                    if e.severity() != ErrorSeverity::Info {
                        eprintln!();
                        StatusDisplay::display_error(&e);
                    }
                }
                Err(oneshot::error::TryRecvError::Empty) => still_pending.push(pending),
                Err(oneshot::error::TryRecvError::Closed) => {
                    warn!("Load of {} was dropped", pending.path.display());
                }
            }
        }
        self.pending_loads = still_pending;
    }

    /// Run interactive mode with the prompt loop
    pub async fn run_interactive_mode(&mut self) -> Result<(), DeckError> {
        println!("Twin Deck - {} decks ready. Type 'help' for commands.", self.decks.len());

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let shutdown_flag_clone = shutdown_flag.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!("\nReceived interrupt signal. Shutting down...");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }) {
            warn!("Could not install Ctrl-C handler: {}", e);
        }

        // stdin is read on its own thread so the prompt loop can keep polling
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut interval = tokio::time::interval(Duration::from_millis(100));
        let mut awaiting_input = false;

        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            if !awaiting_input {
                print!("> ");
                let _ = std::io::stdout().flush();
                awaiting_input = true;
            }

            tokio::select! {
                biased;

                line = rx.recv() => {
                    awaiting_input = false;
                    let Some(line) = line else {
                        println!();
                        break;
                    };
                    if line.is_empty() {
                        continue;
                    }
                    let result = match CliApp::parse_command(&line) {
                        Ok(command) => self.execute_command(command).await,
                        Err(e) => Err(DeckError::from(e)),
                    };
                    match result {
                        Ok(true) => {}
                        Ok(false) => {
                            println!("Goodbye!");
                            break;
                        }
                        Err(e) => self.report_error(&e),
                    }
                }

                _ = interval.tick() => {
                    if !self.pending_loads.is_empty() {
                        self.poll_pending_loads();
                        if self.pending_loads.is_empty() {
                            awaiting_input = false;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn report_error(&self, error: &DeckError) {
        log::log!(error.severity().log_level(), "Command failed: {}", error);
        StatusDisplay::display_error(error);
    }

    /// Stop the audio stream and the control loop
    pub fn shutdown(mut self) {
        println!("Shutting down...");
        self.engine.stop();
        self.control.shutdown();
        info!("Configuration at {}", self.config_manager.config_path().display());
        println!("Shutdown complete.");
    }
}

fn list_devices() -> Result<(), DeckError> {
    let mut device_manager = DeviceManager::new()?;
    let default_name = match device_manager.select_default_device() {
        Ok(()) => device_manager.current_device_name()?,
        Err(_) => None,
    };

    let devices = device_manager.list_devices();
    if devices.is_empty() {
        println!("No output devices found");
        return Ok(());
    }

    println!("Output devices:");
    for name in devices {
        let marker = if default_name.as_deref() == Some(name.as_str()) { "*" } else { " " };
        match device_manager.get_capabilities(&name) {
            Some(caps) => println!(
                " {} {} ({} Hz, {} ch, {:?})",
                marker,
                name,
                caps.default_sample_rate(),
                caps.default_channels(),
                caps.default_sample_format()
            ),
            None => println!(" {} {}", marker, name),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if std::env::var("TWINDECK_LOG_LEVEL").is_err() {
        std::env::set_var("TWINDECK_LOG_LEVEL", "warn");
    }
    if let Err(e) = DeckLogger::init() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let cli = CliApp::parse();

    if let Some(Commands::Devices) = cli.command {
        if let Err(e) = list_devices() {
            StatusDisplay::display_simple_error(&e);
            std::process::exit(1);
        }
        return;
    }

    let logger = DeckLogger::new();
    let mut app = match AppController::new(&cli, logger) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            StatusDisplay::display_simple_error(&e);
            std::process::exit(1);
        }
    };

    for (deck, path) in [&cli.deck_a, &cli.deck_b].into_iter().enumerate() {
        if let Some(path) = path {
            if let Err(e) = app.load(deck, CliApp::expand_path(&path.to_string_lossy())) {
                StatusDisplay::display_error(&e);
            }
        }
    }

    if let Err(e) = app.run_interactive_mode().await {
        StatusDisplay::display_error(&e);
    }
    // Joining the control thread blocks, so leave the async context first
    if tokio::task::spawn_blocking(move || app.shutdown()).await.is_err() {
        error!("Shutdown did not complete cleanly");
    }
    info!("Application shutdown complete");
}
