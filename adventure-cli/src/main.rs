use std::fs;
use std::io;
use std::mem::{self, Discriminant};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adventure_core::{
    DirectoryProbe, DisplaySurface, Frame, Navigator, PageIndex, RenderStatus, Step, ViewerConfig,
};
use adventure_render::PdfiumPageSource;
use adventure_tty::{
    CellMetrics, CrosstermEvents, EventMapper, KittyRenderer, TerminalChoiceResolver, UiEvent,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "adventure",
    version,
    about = "Branching page-by-page story viewer for kitty terminals"
)]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Page index to start on when PATH is a directory
    #[arg(short = 'p', long = "page")]
    page: Option<u32>,

    /// Story directory, or one of its numbered page files
    path: PathBuf,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "adventure", "adventure")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| ViewerConfig::default_path(&project_dirs));
    let config = ViewerConfig::load(&config_path)?;
    let _log_guard = init_logging(&project_dirs, &config.log_filter)?;

    let (root, start) = resolve_start(&args.path, args.page)?;
    info!(root = %root.display(), %start, "opening story");

    let source = Arc::new(PdfiumPageSource::new(
        config.render_threads,
        config.progress_bands,
    )?);
    let mut metrics = CellMetrics::query(config.viewport)?;
    let surface = Arc::new(DisplaySurface::new(source, metrics.viewport()));
    let surface_events = surface.events();
    let probe = Arc::new(DirectoryProbe::from_config(root.clone(), &config));
    let mut navigator = Navigator::new(probe, surface.clone(), start);

    let mut message = report(navigator.start())
        .with_context(|| format!("failed to open the first page in {:?}", root))?;

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = KittyRenderer::new(stdout);
    renderer.clear_all()?;
    let mut event_mapper = EventMapper::new();
    let mut last_frame: Option<Discriminant<Frame>> = None;
    let mut dirty = true;

    loop {
        if !mem::take(&mut *surface_events.lock()).is_empty() {
            dirty = true;
        }

        if dirty {
            let status = status_text(&navigator, surface.status(), &message);
            repaint(&mut renderer, &surface, &metrics, &mut last_frame, &status)?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        match handle_event(
            event_mapper.map_event(event::read()?),
            &mut navigator,
            &mut renderer,
            metrics,
        ) {
            LoopAction::Continue => {}
            LoopAction::Show(text) => {
                message = text;
                dirty = true;
            }
            LoopAction::Redraw => {
                last_frame = None;
                dirty = true;
            }
            LoopAction::Resize => {
                metrics = CellMetrics::query(config.viewport)?;
                surface.resize(metrics.viewport());
                last_frame = None;
                dirty = true;
            }
            LoopAction::Quit => break,
        }
    }

    renderer.delete_image()?;
    {
        let mut writer = renderer.writer();
        crossterm::execute!(&mut writer, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    }
    info!(page = %navigator.position(), "closed");
    Ok(())
}

enum LoopAction {
    Continue,
    Show(String),
    Redraw,
    Resize,
    Quit,
}

fn handle_event(
    event: UiEvent,
    navigator: &mut Navigator,
    renderer: &mut KittyRenderer<io::Stdout>,
    metrics: CellMetrics,
) -> LoopAction {
    match event {
        UiEvent::Advance => {
            let mut resolver = TerminalChoiceResolver::new(renderer, CrosstermEvents, metrics);
            LoopAction::Show(report_soft(navigator.advance(&mut resolver)))
        }
        UiEvent::Retreat => LoopAction::Show(report_soft(navigator.retreat())),
        UiEvent::Redraw => LoopAction::Redraw,
        UiEvent::Resize => LoopAction::Resize,
        UiEvent::Quit => LoopAction::Quit,
        UiEvent::Choose(_) | UiEvent::CancelChoice | UiEvent::None => LoopAction::Continue,
    }
}

fn repaint(
    renderer: &mut KittyRenderer<io::Stdout>,
    surface: &DisplaySurface,
    metrics: &CellMetrics,
    last_frame: &mut Option<Discriminant<Frame>>,
    status: &str,
) -> Result<()> {
    let frame = surface.paint();
    renderer.begin_sync_update()?;
    let kind = mem::discriminant(&frame);
    if *last_frame != Some(kind) {
        renderer.clear_all()?;
        *last_frame = Some(kind);
    }
    renderer.draw_frame(&frame, metrics)?;
    renderer.status_line(metrics, status)?;
    renderer.end_sync_update()
}

/// Works out the story directory and the page to start on.
fn resolve_start(path: &Path, page: Option<u32>) -> Result<(PathBuf, PageIndex)> {
    let explicit = match page {
        Some(value) => Some(
            PageIndex::new(value).ok_or_else(|| anyhow!("page {} is not a valid index", value))?,
        ),
        None => None,
    };

    if path.is_dir() {
        let start = explicit.unwrap_or(PageIndex::FIRST);
        return Ok((path.to_path_buf(), start));
    }

    let root = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let start = explicit.unwrap_or_else(|| PageIndex::from_file_name(path));
    if !start.is_known() {
        bail!(
            "cannot tell which page {:?} is; page files are named <index>.<extension>",
            path
        );
    }
    Ok((root, start))
}

fn report(step: Result<Step>) -> Result<String> {
    step.map(|step| describe(&step))
}

/// Hard failures after start-up are shown rather than ending the session.
fn report_soft(step: Result<Step>) -> String {
    match step {
        Ok(step) => describe(&step),
        Err(err) => {
            warn!(?err, "navigation failed");
            format!("Error: {err:#}")
        }
    }
}

fn describe(step: &Step) -> String {
    match step {
        Step::Started { at } => format!("Page {at}"),
        Step::Advanced { to, .. } => format!("Page {to}"),
        Step::Retreated { to, .. } => format!("Back to page {to}"),
        Step::Ended => "The End: no further content".to_owned(),
        Step::NoHistory => "Nothing to go back to".to_owned(),
        Step::Cancelled => "Stayed on this page".to_owned(),
        Step::LoadError(err) => format!("Cannot continue: {err}"),
    }
}

fn status_text(navigator: &Navigator, render: RenderStatus, message: &str) -> String {
    let render = match render {
        RenderStatus::Idle => "",
        RenderStatus::Pending => " | rendering",
        RenderStatus::Complete => "",
        RenderStatus::Failed => " | render failed",
    };
    format!(
        "page {} | depth {}{} | {}",
        navigator.position(),
        navigator.history_depth(),
        render,
        message
    )
}

fn init_logging(project_dirs: &ProjectDirs, default_filter: &str) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "adventure.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
