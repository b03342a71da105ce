mod ui;

use clap::{error::ErrorKind, CommandFactory, Parser, ValueEnum};
use crossterm::{
    event::{KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    io::{self, stdin},
    path::PathBuf,
    time::Duration,
};

use dripwatch::{
    clock::SystemClock,
    config::{Config, ConfigStore, FileConfigStore},
    history::HistoryDb,
    persist::SnapshotGateway,
    runtime::{AppEvent, CrosstermEventSource, Runner},
    session::{CalibrationLevel, SpeedLevel, VolumePreset},
    storage::FileStore,
    store::InfusionStore,
    util,
};

const TICK_RATE_MS: u64 = 1_000;

/// bedside iv drip timer with live countdown and tap-measured drip rate
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Estimates remaining infusion time from bag volume, drip speed, and drop factor, with tap-to-measure calibration and session recovery across restarts. Advisory only; always follow clinical guidance."
)]
pub struct Cli {
    /// bag volume preset
    #[clap(short = 'v', long, value_enum)]
    volume: Option<CliVolume>,

    /// custom bag volume in millilitres (implies --volume custom)
    #[clap(long)]
    custom_volume: Option<f64>,

    /// drip speed preset used until a rate is measured
    #[clap(short = 's', long, value_enum)]
    speed: Option<CliSpeed>,

    /// infusion set drop factor in drops per millilitre (10-60)
    #[clap(short = 'd', long)]
    drop_factor: Option<u32>,

    /// print recent completed infusions and exit
    #[clap(long)]
    history: bool,

    /// export all completed infusions as csv and exit
    #[clap(long, value_name = "PATH")]
    export_csv: Option<PathBuf>,
}

#[derive(Debug, Copy, Clone, ValueEnum, strum_macros::Display)]
pub enum CliVolume {
    #[value(name = "100")]
    #[strum(serialize = "100")]
    Small,
    #[value(name = "200")]
    #[strum(serialize = "200")]
    Standard,
    Custom,
}

impl CliVolume {
    fn as_preset(&self) -> VolumePreset {
        match self {
            CliVolume::Small => VolumePreset::Small,
            CliVolume::Standard => VolumePreset::Standard,
            CliVolume::Custom => VolumePreset::Custom,
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum, strum_macros::Display)]
pub enum CliSpeed {
    Slow,
    Medium,
    Fast,
}

impl CliSpeed {
    fn as_level(&self) -> SpeedLevel {
        match self {
            CliSpeed::Slow => SpeedLevel::Slow,
            CliSpeed::Medium => SpeedLevel::Medium,
            CliSpeed::Fast => SpeedLevel::Fast,
        }
    }
}

impl Cli {
    /// Fold CLI overrides into the persisted defaults
    fn apply_to(&self, config: &mut Config) {
        if let Some(volume) = self.volume {
            config.volume_preset = volume.as_preset();
        }
        if let Some(custom) = self.custom_volume {
            config.custom_volume_ml = custom;
            config.volume_preset = VolumePreset::Custom;
        }
        if let Some(speed) = self.speed {
            config.speed_level = speed.as_level();
        }
        if let Some(drop_factor) = self.drop_factor {
            config.drop_factor = drop_factor;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppState {
    Setup,
    Measure,
    Timer,
}

pub struct App {
    pub store: InfusionStore<SystemClock, FileStore>,
    pub state: AppState,
    config_store: FileConfigStore,
}

impl App {
    pub fn new(cli: &Cli) -> Self {
        let config_store = FileConfigStore::new();
        let mut config = config_store.load();
        cli.apply_to(&mut config);

        let gateway = SnapshotGateway::new(FileStore::new());
        let store = InfusionStore::new(SystemClock, gateway, &config);
        let store = match HistoryDb::new() {
            Ok(db) => store.with_history(db),
            Err(_) => store,
        };

        // a restored in-flight session goes straight back to the countdown
        let state = if store.session().is_running || store.session().is_completed {
            AppState::Timer
        } else {
            AppState::Setup
        };

        Self {
            store,
            state,
            config_store,
        }
    }

    fn save_defaults(&self) {
        let _ = self
            .config_store
            .save(&Config::of_session(self.store.session()));
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if cli.history {
        return print_history();
    }
    if let Some(path) = cli.export_csv.as_deref() {
        let db = HistoryDb::new()?;
        db.export_csv(path)?;
        println!("exported {} records to {}", db.count()?, path.display());
        return Ok(());
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(&cli);
    let result = start_tui(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn print_history() -> Result<(), Box<dyn Error>> {
    let db = HistoryDb::new()?;
    let records = db.recent(10)?;

    if records.is_empty() {
        println!("no completed infusions recorded yet");
        return Ok(());
    }

    for record in records {
        let since = (chrono::Local::now() - record.completed_at)
            .num_seconds()
            .max(0) as u64;
        println!(
            "{:>6.0} ml  {:>2} drops/ml  {:<6}  est {:>5.0} min  actual {:>5.1} min  ({})",
            record.volume_ml,
            record.drop_factor,
            record.speed_level,
            record.estimated_minutes,
            record.actual_minutes,
            util::ago(since),
        );
    }

    Ok(())
}

fn start_tui<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> Result<(), Box<dyn Error>> {
    let runner = Runner::new(
        CrosstermEventSource::new(),
        Duration::from_millis(TICK_RATE_MS),
    );

    terminal.draw(|f| f.render_widget(&*app, f.area()))?;

    loop {
        match runner.step() {
            AppEvent::Tick => {
                let completed = app.store.on_tick();
                let session = app.store.session();
                if completed || (session.is_running && !session.is_paused) {
                    terminal.draw(|f| f.render_widget(&*app, f.area()))?;
                }
            }
            AppEvent::Resize => {
                terminal.draw(|f| f.render_widget(&*app, f.area()))?;
            }
            AppEvent::Key(key) => {
                if is_quit(&key) {
                    break;
                }
                handle_key(app, &key);
                terminal.draw(|f| f.render_widget(&*app, f.area()))?;
            }
        }
    }

    Ok(())
}

fn is_quit(key: &KeyEvent) -> bool {
    key.code == KeyCode::Esc
        || (key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c'))
}

fn handle_key(app: &mut App, key: &KeyEvent) {
    match app.state {
        AppState::Setup => handle_setup_key(app, key),
        AppState::Measure => handle_measure_key(app, key),
        AppState::Timer => handle_timer_key(app, key),
    }
}

fn handle_setup_key(app: &mut App, key: &KeyEvent) {
    match key.code {
        KeyCode::Char('v') => {
            let next = match app.store.session().volume_preset {
                VolumePreset::Small => VolumePreset::Standard,
                VolumePreset::Standard => VolumePreset::Custom,
                VolumePreset::Custom => VolumePreset::Small,
            };
            app.store.set_volume_preset(next);
            app.save_defaults();
        }
        KeyCode::Up => {
            if app.store.session().volume_preset == VolumePreset::Custom {
                let volume = app.store.session().custom_volume + 50.0;
                app.store.set_custom_volume(volume);
                app.save_defaults();
            }
        }
        KeyCode::Down => {
            if app.store.session().volume_preset == VolumePreset::Custom {
                let volume = (app.store.session().custom_volume - 50.0).max(50.0);
                app.store.set_custom_volume(volume);
                app.save_defaults();
            }
        }
        KeyCode::Char('1') => {
            app.store.set_speed_level(SpeedLevel::Slow);
            app.save_defaults();
        }
        KeyCode::Char('2') => {
            app.store.set_speed_level(SpeedLevel::Medium);
            app.save_defaults();
        }
        KeyCode::Char('3') => {
            app.store.set_speed_level(SpeedLevel::Fast);
            app.save_defaults();
        }
        KeyCode::Char('[') => {
            let factor = app.store.session().drop_factor.saturating_sub(5);
            app.store.set_drop_factor(factor);
            app.save_defaults();
        }
        KeyCode::Char(']') => {
            let factor = app.store.session().drop_factor + 5;
            app.store.set_drop_factor(factor);
            app.save_defaults();
        }
        KeyCode::Char('m') => {
            app.state = AppState::Measure;
        }
        KeyCode::Enter | KeyCode::Char('s') => {
            app.store.start_infusion();
            app.state = AppState::Timer;
        }
        _ => {}
    }
}

fn handle_measure_key(app: &mut App, key: &KeyEvent) {
    match key.code {
        KeyCode::Char('t') | KeyCode::Char(' ') => {
            app.store.tap_for_speed();
        }
        KeyCode::Char('r') => {
            app.store.reset_taps();
        }
        KeyCode::Char('b') | KeyCode::Enter => {
            app.state = AppState::Setup;
        }
        _ => {}
    }
}

fn handle_timer_key(app: &mut App, key: &KeyEvent) {
    let session = app.store.session();

    if session.is_completed {
        if key.code == KeyCode::Char('n') {
            app.store.reset();
            app.state = AppState::Setup;
        }
        return;
    }

    match key.code {
        KeyCode::Char(' ') => {
            if session.is_paused {
                app.store.resume_infusion();
            } else {
                app.store.pause_infusion();
            }
        }
        KeyCode::Char('+') | KeyCode::Char('=') => {
            app.store.adjust_estimate(1.0);
        }
        KeyCode::Char('-') => {
            app.store.adjust_estimate(-1.0);
        }
        KeyCode::Char('1') => {
            app.store.set_calibration(CalibrationLevel::High);
        }
        KeyCode::Char('2') => {
            app.store.set_calibration(CalibrationLevel::Half);
        }
        KeyCode::Char('3') => {
            app.store.set_calibration(CalibrationLevel::Low);
        }
        KeyCode::Char('c') => {
            app.store.complete_infusion();
        }
        KeyCode::Char('x') => {
            app.store.reset();
            app.state = AppState::Setup;
        }
        _ => {}
    }
}
