use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thesisflow::config::AppConfig;
use thesisflow::models::{MoveDirection, SettingsPatch};
use thesisflow::pipeline::{BuildError, BuildEvent};
use thesisflow::session::{DocumentRef, Session};
use thesisflow::toolchain::Toolchain;
use thesisflow::tree_render::render_outline;
use thesisflow::Project;

#[derive(Parser)]
#[command(name = "thesisflow")]
#[command(about = "Assemble a thesis written as markdown chapters into a single PDF")]
struct Cli {
    /// Replace an unreadable manifest with one rebuilt from the chapter files
    #[arg(long, global = true)]
    reset_corrupt: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project in the projects directory
    New {
        name: String,
        #[arg(short, long, default_value = "")]
        author: String,
        /// Typst file defining `front-matter`, copied to template.typ
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// List projects in the projects directory
    List,
    /// Print the chapter and paragraph outline of a project
    Outline { project: String },
    /// Add, rename, remove or reorder chapters
    Chapter {
        project: String,
        #[command(subcommand)]
        action: ChapterAction,
    },
    /// Add, rename, remove or reorder paragraphs of a chapter
    Paragraph {
        project: String,
        chapter: String,
        #[command(subcommand)]
        action: ParagraphAction,
    },
    /// Replace a chapter or paragraph file with text read from stdin
    Write {
        project: String,
        chapter: String,
        #[arg(short, long)]
        paragraph: Option<String>,
    },
    /// Copy a file into the project's assets directory
    Asset { project: String, file: PathBuf },
    /// Update thesis metadata
    Settings {
        project: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        candidate: Option<String>,
        #[arg(long)]
        supervisor: Option<String>,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        citation_style: Option<String>,
    },
    /// Reattach paragraph files that are missing from the manifest
    Reconcile { project: String },
    /// Check that the converter and compiler can be found
    Check,
    /// Build the project into a PDF
    Build {
        project: String,
        /// Emit one JSON object per build event on stdout
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ChapterAction {
    Add { title: String },
    Rename { id: String, title: String },
    Remove { id: String },
    Move { id: String, direction: String },
}

#[derive(Subcommand)]
enum ParagraphAction {
    Add { title: String },
    Rename { id: String, title: String },
    Remove { id: String },
    Move { id: String, direction: String },
}

/// Initialize tracing. Logs go to stderr so stdout stays clean for `--json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "thesisflow=info,thesisflow_core=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// A project argument is a directory path, or a name under the projects root.
fn project_path(config: &AppConfig, project: &str) -> PathBuf {
    let path = Path::new(project);
    if path.is_dir() {
        path.to_path_buf()
    } else {
        config.projects_root.join(project)
    }
}

/// Open a project argument, resetting a corrupt manifest only when asked to.
fn open_project<'a>(
    session: &'a mut Session,
    config: &AppConfig,
    project: &str,
    reset_corrupt: bool,
) -> anyhow::Result<&'a mut Project> {
    let root = project_path(config, project);
    let project = session
        .open_project_or_reset(&root, |e| {
            if !reset_corrupt {
                eprintln!("{}\nRun again with --reset-corrupt to rebuild it from the chapter files.", e);
            }
            reset_corrupt
        })
        .with_context(|| format!("Failed to open {}", root.display()))?;
    Ok(project)
}

fn parse_direction(direction: &str) -> anyhow::Result<MoveDirection> {
    MoveDirection::from_str(direction)
        .with_context(|| format!("Invalid direction '{}', expected 'up' or 'down'", direction))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = AppConfig::load();
    let mut session = Session::new(config.clone());

    let reset_corrupt = cli.reset_corrupt;
    match cli.command {
        Commands::New { name, author, template } => {
            let project = session.create_project_with_template(&name, &author, template.as_deref())?;
            println!("{}", project.root().display());
        }
        Commands::List => {
            for root in thesisflow_core::list_projects(&config.projects_root)? {
                println!("{}", root.display());
            }
        }
        Commands::Outline { project } => {
            let project = open_project(&mut session, &config, &project, reset_corrupt)?;
            print!("{}", render_outline(project.manifest(), project.root()));
        }
        Commands::Chapter { project, action } => {
            let project = open_project(&mut session, &config, &project, reset_corrupt)?;
            match action {
                ChapterAction::Add { title } => {
                    let chapter = project.add_chapter(&title)?;
                    println!("{}", chapter.id);
                }
                ChapterAction::Rename { id, title } => project.rename_chapter(&id, &title)?,
                ChapterAction::Remove { id } => {
                    project.delete_chapter(&id)?;
                }
                ChapterAction::Move { id, direction } => {
                    if !project.move_chapter(&id, parse_direction(&direction)?)? {
                        tracing::info!(chapter = %id, "Chapter already at the edge");
                    }
                }
            }
        }
        Commands::Paragraph {
            project,
            chapter,
            action,
        } => {
            let project = open_project(&mut session, &config, &project, reset_corrupt)?;
            match action {
                ParagraphAction::Add { title } => {
                    let paragraph = project.add_paragraph(&chapter, &title)?;
                    println!("{}", paragraph.id);
                }
                ParagraphAction::Rename { id, title } => project.rename_paragraph(&chapter, &id, &title)?,
                ParagraphAction::Remove { id } => {
                    project.delete_paragraph(&chapter, &id)?;
                }
                ParagraphAction::Move { id, direction } => {
                    if !project.move_paragraph(&chapter, &id, parse_direction(&direction)?)? {
                        tracing::info!(paragraph = %id, "Paragraph already at the edge");
                    }
                }
            }
        }
        Commands::Write {
            project,
            chapter,
            paragraph,
        } => {
            open_project(&mut session, &config, &project, reset_corrupt)?;
            let target = match paragraph {
                Some(paragraph) => DocumentRef::Paragraph { chapter, paragraph },
                None => DocumentRef::Chapter { chapter },
            };
            session.open_document(target)?;

            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            session.edit_document(text)?;
            session.save()?;
        }
        Commands::Asset { project, file } => {
            let project = open_project(&mut session, &config, &project, reset_corrupt)?;
            println!("{}", project.add_asset(&file)?);
        }
        Commands::Settings {
            project,
            title,
            author,
            candidate,
            supervisor,
            year,
            citation_style,
        } => {
            let project = open_project(&mut session, &config, &project, reset_corrupt)?;
            let patch = SettingsPatch {
                title,
                author,
                candidate,
                supervisor,
                year,
                citation_style,
            };
            if patch.is_empty() {
                println!("{}", project.manifest().to_json()?);
            } else if !project.apply_settings(patch)? {
                tracing::info!("Settings unchanged");
            }
        }
        Commands::Reconcile { project } => {
            // Opening a project already reconciles; report what it found.
            let project = open_project(&mut session, &config, &project, reset_corrupt)?;
            let paragraphs: usize = project.manifest().chapters.iter().map(|c| c.paragraphs.len()).sum();
            println!(
                "{} chapters, {} paragraphs",
                project.manifest().chapters.len(),
                paragraphs
            );
        }
        Commands::Check => {
            let missing = Toolchain::from_config(&config).missing();
            for (tool, program) in &missing {
                eprintln!("{} not found: {}", tool, program.display());
            }
            if !missing.is_empty() {
                bail!("{} tool(s) missing", missing.len());
            }
            println!("converter and compiler found");
        }
        Commands::Build { project, json } => {
            open_project(&mut session, &config, &project, reset_corrupt)?;
            run_build(&mut session, json).await?;
        }
    }

    Ok(())
}

/// Drive one build to its terminal event. Ctrl-C cancels the run.
async fn run_build(session: &mut Session, json: bool) -> anyhow::Result<()> {
    let mut handle = session.build()?;
    let mut interrupted = false;

    loop {
        let event = tokio::select! {
            event = handle.next_event() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                tracing::info!("Interrupted, cancelling build");
                interrupted = true;
                handle.cancel();
                continue;
            }
        };
        let Some(event) = event else {
            bail!("Build ended without a result");
        };

        match event {
            BuildEvent::Progress { stage, fraction } => {
                if json {
                    println!(
                        "{}",
                        json!({ "event": "progress", "stage": stage.as_str(), "fraction": fraction })
                    );
                } else {
                    eprintln!("[{:>3.0}%] {}", fraction * 100.0, stage);
                }
            }
            BuildEvent::Succeeded(artifact) => {
                if json {
                    println!(
                        "{}",
                        json!({ "event": "succeeded", "artifact": artifact })
                    );
                } else {
                    println!("{}", artifact.path.display());
                }
                return Ok(());
            }
            BuildEvent::Failed(error) => {
                report_failure(&error, json);
                bail!(error);
            }
        }
    }
}

fn report_failure(error: &BuildError, json: bool) {
    if json {
        println!(
            "{}",
            json!({
                "event": "failed",
                "kind": error.kind(),
                "message": error.to_string(),
                "diagnostics": error.diagnostics(),
            })
        );
        return;
    }
    for diagnostic in error.diagnostics() {
        eprintln!("{}: {}", diagnostic.severity.as_str(), diagnostic.message);
    }
}
