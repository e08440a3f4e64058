//! Task commands: list, submit, show, watch, cancel, download.

use std::path::PathBuf;

use anyhow::{Context as _, bail};
use lusolve_client::{NewTask, TaskInput};
use lusolve_live::{TaskChannel, TaskView};
use lusolve_protocol::TaskSnapshot;

use crate::config::CliContext;

#[derive(clap::Subcommand)]
pub enum TasksCommand {
    /// List your tasks
    List,
    /// Submit a new solve task
    Submit(SubmitArgs),
    /// Show one task
    Show {
        id: u64,
    },
    /// Follow a task live until it reaches a terminal status
    Watch(WatchArgs),
    /// Request cancellation
    Cancel {
        id: u64,
    },
    /// Download the result file
    Download {
        id: u64,
        /// Destination path; defaults to the server-provided filename.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
pub struct SubmitArgs {
    #[arg(long)]
    pub name: String,
    /// Upper bound on the matrix dimension the server will accept.
    #[arg(long, default_value_t = 5_000)]
    pub max_n: u32,
    /// Keep the L, U, P factor matrices alongside the solution.
    #[arg(long)]
    pub save_matrices: bool,
    /// Matrix given inline, one row per line.
    #[arg(long, conflicts_with = "matrix_file")]
    pub matrix_text: Option<String>,
    /// Matrix read from a file.
    #[arg(long)]
    pub matrix_file: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct WatchArgs {
    pub id: u64,
    /// Update-stream base URL override (defaults to LUSOLVE_WS_URL or a
    /// derivation from the REST base).
    #[arg(long)]
    pub ws_url: Option<String>,
}

pub async fn run(context: &CliContext, command: TasksCommand) -> anyhow::Result<()> {
    match command {
        TasksCommand::List => list(context).await,
        TasksCommand::Submit(args) => submit(context, args).await,
        TasksCommand::Show { id } => show(context, id).await,
        TasksCommand::Watch(args) => watch(context, args).await,
        TasksCommand::Cancel { id } => cancel(context, id).await,
        TasksCommand::Download { id, out } => download(context, id, out).await,
    }
}

async fn list(context: &CliContext) -> anyhow::Result<()> {
    let tasks = context.client.list_tasks().await?;
    if tasks.is_empty() {
        println!("no tasks yet");
        return Ok(());
    }
    for task in tasks {
        let progress = task
            .last_progress
            .as_ref()
            .map(|p| format!(" [{} {:.0}%]", p.stage, p.percentage))
            .unwrap_or_default();
        println!(
            "#{:<5} {:<10} {}  {}{progress}",
            task.id,
            task.status,
            task.created_at.format("%Y-%m-%d %H:%M"),
            task.name,
        );
    }
    Ok(())
}

async fn submit(context: &CliContext, args: SubmitArgs) -> anyhow::Result<()> {
    let input = match (args.matrix_text, args.matrix_file) {
        (Some(text), None) => TaskInput::MatrixText(text),
        (None, Some(path)) => {
            let contents = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "matrix.txt".to_string());
            TaskInput::SourceFile { filename, contents }
        }
        (None, None) => bail!("provide the matrix with --matrix-text or --matrix-file"),
        (Some(_), Some(_)) => bail!("provide only one of --matrix-text and --matrix-file"),
    };

    let snapshot = context
        .client
        .submit_task(&NewTask {
            name: args.name,
            max_n: args.max_n,
            save_matrices: args.save_matrices,
            input,
        })
        .await?;

    println!("task #{} submitted ({})", snapshot.id, snapshot.status);
    if let Some(message) = &snapshot.queue_message {
        println!("{message}");
    }
    print_queue_info(&snapshot);
    println!("follow it with: lusolve tasks watch {}", snapshot.id);
    Ok(())
}

async fn show(context: &CliContext, id: u64) -> anyhow::Result<()> {
    let snapshot = context.client.task(id).await?;
    print_snapshot(&snapshot);
    Ok(())
}

async fn cancel(context: &CliContext, id: u64) -> anyhow::Result<()> {
    let message = context.client.cancel_task(id).await?;
    println!("{message}");
    Ok(())
}

async fn download(context: &CliContext, id: u64, out: Option<PathBuf>) -> anyhow::Result<()> {
    let file = context.client.download_result(id).await?;
    let destination = out.unwrap_or_else(|| PathBuf::from(&file.filename));
    std::fs::write(&destination, &file.bytes)
        .with_context(|| format!("writing {}", destination.display()))?;
    println!(
        "saved {} ({} bytes) to {}",
        file.filename,
        file.bytes.len(),
        destination.display()
    );
    Ok(())
}

/// Snapshot fetch, then live follow: the channel opens only once the fetch
/// has supplied the task UUID, and every merged state is rendered as it
/// changes until a terminal status or Ctrl-C tears the view down.
async fn watch(context: &CliContext, args: WatchArgs) -> anyhow::Result<()> {
    let snapshot = context.client.task(args.id).await?;
    let task_uuid = snapshot.uuid;
    let mut view = TaskView::new(snapshot);

    for line in view.logs() {
        print_log_line(line);
    }
    let mut printed_logs = view.logs().len();
    print_view_line(&view);

    if view.status().is_terminal() {
        print_outcome(&view);
        return Ok(());
    }

    let ws_base = context.ws_base(args.ws_url.as_deref())?;
    tracing::debug!("opening live channel at {ws_base} for task {task_uuid}");
    let channel = TaskChannel::open(&ws_base, task_uuid)?;
    let mut connected = channel.connected();

    loop {
        tokio::select! {
            update = channel.recv() => {
                let Some(update) = update else { break };
                view.apply(&update);
                for line in &view.logs()[printed_logs..] {
                    print_log_line(line);
                }
                printed_logs = view.logs().len();
                print_view_line(&view);
                if view.status().is_terminal() {
                    break;
                }
            }
            changed = connected.changed() => {
                if changed.is_err() {
                    break;
                }
                let live = *connected.borrow();
                println!("  [{}]", if live { "live" } else { "reconnecting" });
            }
            _ = tokio::signal::ctrl_c() => {
                println!("interrupted");
                break;
            }
        }
    }

    channel.close().await;
    print_outcome(&view);
    Ok(())
}

fn print_queue_info(snapshot: &TaskSnapshot) {
    if let Some(position) = snapshot.queue_position {
        println!("queue position: {position}");
    }
    if let Some(wait) = snapshot.estimated_wait_time_sec {
        println!("estimated wait: {wait}s");
    }
}

fn print_snapshot(snapshot: &TaskSnapshot) {
    println!("#{} {} ({})", snapshot.id, snapshot.name, snapshot.status);
    println!("uuid:    {}", snapshot.uuid);
    println!("created: {}", snapshot.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(started) = snapshot.started_at {
        println!("started: {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(completed) = snapshot.completed_at {
        println!("done:    {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(size) = snapshot.matrix_size {
        println!("matrix:  {size}x{size}");
    }
    print_queue_info(snapshot);
    if let Some(progress) = snapshot.last_progress() {
        println!("stage:   {} ({:.0}%)", progress.stage, progress.percentage);
    }
    if let Some(message) = &snapshot.result_message {
        println!("result:  {message}");
    }
    for entry in &snapshot.logs {
        println!(
            "  {} [{}] {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.level,
            entry.message
        );
    }
}

fn print_log_line(line: &lusolve_live::LogLine) {
    match &line.level {
        Some(level) => println!(
            "  {} [{}] {}",
            line.timestamp.format("%H:%M:%S"),
            level,
            line.message
        ),
        None => println!("  {} {}", line.timestamp.format("%H:%M:%S"), line.message),
    }
}

fn print_view_line(view: &TaskView) {
    let stage = view.stage().unwrap_or("...");
    let queue = view
        .queue_position()
        .map(|position| format!(" queue: {position}"))
        .unwrap_or_default();
    println!(
        "{} {} {:.0}%{queue}",
        view.status(),
        stage,
        view.progress_percent()
    );
}

fn print_outcome(view: &TaskView) {
    if let Some(message) = view.result_message() {
        if view.result_is_error() {
            println!("error: {message}");
        } else {
            println!("result: {message}");
        }
    }
    if view.can_download() {
        println!(
            "download the solution with: lusolve tasks download {}",
            view.snapshot().id
        );
    }
}
