use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use inkpdf_core::settings::project_dirs;
use inkpdf_core::{
    AnnotationModel, AnnotationStore, BackgroundTasks, Color, Editor, FileAnnotationStore,
    GestureOutcome, Point, RecentFiles, Settings, TaskKind, TaskOutcome, Tool,
};
use inkpdf_render::{LopdfSink, LopdfSinkProvider, PdfiumProvider};
use serde::Deserialize;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "inkpdf",
    version,
    about = "Ink, shapes and notes on PDF pages, stored beside the document"
)]
struct Args {
    #[command(subcommand)]
    command: CommandKind,
}

#[derive(Debug, Subcommand)]
enum CommandKind {
    /// Page count and stored annotations of a document
    Info { file: PathBuf },
    /// Drive the editor with a JSON list of pointer and tool steps
    Replay {
        file: PathBuf,
        script: PathBuf,
        /// Leave the annotation store untouched
        #[arg(long)]
        no_save: bool,
    },
    /// Write a copy of the document with the stored annotations burned in
    Export { file: PathBuf, destination: PathBuf },
    /// Recently opened documents, newest first
    Recent {
        /// Forget entries whose file no longer exists
        #[arg(long)]
        prune: bool,
    },
}

/// One replay step. Points are in render pixels of the stacked page view.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Step {
    Tool(Tool),
    Color([f64; 3]),
    Width(f64),
    Layer(String),
    NewLayer(String),
    Down([f64; 2]),
    Move([f64; 2]),
    Up,
    /// Queued answer for the next text or comment prompt.
    Answer(String),
    Undo,
    Redo,
    EraseAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs =
        project_dirs().ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let settings = Settings::load(&Settings::config_path(&project_dirs))?;
    let recent_path = RecentFiles::default_path(&project_dirs);

    match args.command {
        CommandKind::Info { file } => info_command(&file),
        CommandKind::Replay {
            file,
            script,
            no_save,
        } => replay_command(&file, &script, no_save, &settings, recent_path).await,
        CommandKind::Export { file, destination } => export_command(&file, destination).await,
        CommandKind::Recent { prune } => recent_command(recent_path, prune),
    }
}

fn info_command(file: &Path) -> Result<()> {
    let page_count = LopdfSink::load(file)?.page_count();
    let model = load_model(file, page_count)?;

    println!("{}", file.display());
    println!("  pages: {page_count}");
    println!("  annotations: {}", model.len());
    for layer in model.layers().iter() {
        let mut per_page: BTreeMap<usize, usize> = BTreeMap::new();
        for placed in model.iter().filter(|placed| placed.layer == layer.name()) {
            *per_page.entry(placed.page).or_default() += 1;
        }
        let pages = per_page
            .iter()
            .map(|(page, count)| format!("p{}: {count}", page + 1))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  layer {:?}: {} [{pages}]", layer.name(), layer.entries().len());
    }
    Ok(())
}

async fn replay_command(
    file: &Path,
    script: &Path,
    no_save: bool,
    settings: &Settings,
    recent_path: PathBuf,
) -> Result<()> {
    let steps = read_script(script)?;
    let provider = PdfiumProvider::new()?;
    let recent = RecentFiles::load(recent_path.clone()).unwrap_or_else(|err| {
        warn!(?err, "recent files unavailable");
        RecentFiles::empty(recent_path)
    });
    let mut editor = Editor::open(
        &provider,
        file,
        settings,
        Arc::new(FileAnnotationStore),
        Arc::new(LopdfSinkProvider),
        BackgroundTasks::new(Handle::current()),
    )
    .await
    .with_context(|| format!("failed to open {:?}", file))?
    .with_recent_files(recent);
    if let Some(warning) = editor.load_warning() {
        eprintln!("warning: existing annotations not loaded: {warning}");
    }

    let mut answers: VecDeque<String> = VecDeque::new();
    for (index, step) in steps.into_iter().enumerate() {
        if let Err(err) = apply_step(&mut editor, &mut answers, step) {
            warn!(step = index, %err, "step rejected");
            eprintln!("step {index}: {err:#}");
        }
    }

    let model = editor.model();
    println!(
        "{} annotations in {} layers (undo {}, redo {})",
        model.len(),
        model.layers().len(),
        model.history().undo_len(),
        model.history().redo_len()
    );

    if no_save {
        return Ok(());
    }
    editor.save();
    report(editor.wait_for_tasks().await)
}

fn apply_step(editor: &mut Editor, answers: &mut VecDeque<String>, step: Step) -> Result<()> {
    let session = editor.session_mut();
    match step {
        Step::Tool(tool) => session.select_tool(tool),
        Step::Color(rgb) => session.tools_mut().pen_mut().color = Color::from_components(rgb, None),
        Step::Width(width) => {
            if !(width.is_finite() && width > 0.0) {
                bail!("pen width must be positive, got {width}");
            }
            session.tools_mut().pen_mut().width_px = width;
        }
        Step::Layer(name) => session.model_mut().set_active_layer(&name)?,
        Step::NewLayer(name) => session.model_mut().create_layer(&name)?,
        Step::Down([x, y]) => {
            let mut prompt = |_: Tool| answers.pop_front();
            if session.pointer_down(Point::new(x, y), &mut prompt)? == GestureOutcome::Ignored {
                info!(x, y, "press ignored");
            }
        }
        Step::Move([x, y]) => {
            session.pointer_move(Point::new(x, y))?;
        }
        Step::Up => {
            session.pointer_up();
        }
        Step::Answer(text) => answers.push_back(text),
        Step::Undo => {
            session.model_mut().undo();
        }
        Step::Redo => {
            session.model_mut().redo();
        }
        Step::EraseAll => editor.clear_all(),
    }
    Ok(())
}

async fn export_command(file: &Path, destination: PathBuf) -> Result<()> {
    let page_count = LopdfSink::load(file)?.page_count();
    let snapshot = load_model(file, page_count)?.snapshot();
    let source = file.to_path_buf();
    let target = destination.clone();

    let mut tasks = BackgroundTasks::new(Handle::current());
    tasks
        .submit(TaskKind::Export, destination, move || {
            inkpdf_core::export_to(&LopdfSinkProvider, &source, &snapshot, &target)?;
            Ok(target)
        })
        .ok_or_else(|| anyhow!("export already running"))?;
    report(tasks.wait_all().await)
}

fn recent_command(recent_path: PathBuf, prune: bool) -> Result<()> {
    let mut recent = RecentFiles::load(recent_path)?;
    if prune {
        let removed = recent.prune();
        recent.save()?;
        info!(removed, "recent files pruned");
    }
    for (index, entry) in recent.entries().iter().enumerate() {
        println!("{:>2}  {}", index + 1, entry.display());
    }
    Ok(())
}

fn load_model(file: &Path, page_count: usize) -> Result<AnnotationModel> {
    let mut model = AnnotationModel::new(page_count);
    let entries = FileAnnotationStore.load(file, page_count)?;
    model.load_entries(entries)?;
    Ok(model)
}

fn read_script(path: &Path) -> Result<Vec<Step>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read script {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse script {:?}", path))
}

fn report(outcomes: Vec<TaskOutcome>) -> Result<()> {
    let mut failed = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok(path) => println!("{} written to {}", outcome.kind, path.display()),
            Err(reason) => {
                failed += 1;
                eprintln!(
                    "{} to {} failed: {reason}",
                    outcome.kind,
                    outcome.destination.display()
                );
            }
        }
    }
    if failed > 0 {
        bail!("{failed} background job(s) failed");
    }
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "inkpdf.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_steps_parse() {
        let steps: Vec<Step> = serde_json::from_str(
            r#"[
                {"tool": "highlighter"},
                {"color": [1, 0, 0]},
                {"width": 6},
                {"new_layer": "Review"},
                {"layer": "Review"},
                {"down": [10, 20]},
                {"move": [30.5, 40]},
                "up",
                {"answer": "typo"},
                "undo",
                "redo",
                "erase_all"
            ]"#,
        )
        .unwrap();
        assert_eq!(steps.len(), 12);
        assert_eq!(steps[0], Step::Tool(Tool::Highlighter));
        assert_eq!(steps[5], Step::Down([10.0, 20.0]));
        assert_eq!(steps[7], Step::Up);
        assert_eq!(steps[11], Step::EraseAll);
    }

    #[test]
    fn unknown_step_is_rejected() {
        assert!(serde_json::from_str::<Vec<Step>>(r#"[{"teleport": [0, 0]}]"#).is_err());
    }

    #[test]
    fn failed_jobs_fail_the_command() {
        let outcome = TaskOutcome {
            id: uuid_for_test(),
            kind: TaskKind::Export,
            destination: PathBuf::from("/nowhere/out.pdf"),
            result: Err("permission denied".into()),
        };
        assert!(report(vec![outcome]).is_err());
        assert!(report(Vec::new()).is_ok());
    }

    fn uuid_for_test() -> inkpdf_core::TaskId {
        inkpdf_core::document_id_for_path(Path::new("/nowhere/out.pdf"))
    }

    #[test]
    fn missing_recent_list_prunes_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recent.json");
        recent_command(path.clone(), true).unwrap();
        assert!(RecentFiles::load(path).unwrap().entries().is_empty());
    }

    #[test]
    fn document_without_store_has_empty_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = load_model(&dir.path().join("paper.pdf"), 3).unwrap();
        assert!(model.is_empty());
        assert_eq!(model.page_count(), 3);
    }
}
