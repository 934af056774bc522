use std::collections::HashMap;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use taskboard::{
    board::{
        activity, store, BoardError, BulkFields, Change, MutationEngine, Status, TaskDraft,
        TaskPatch, TaskRow,
    },
    config::BoardConfig,
    storage::Storage,
};

#[derive(Parser)]
#[command(
    name = "taskboard",
    about = "Collaborative task board backed by a local SQLite database",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory for the SQLite database and config.toml
    #[arg(long, env = "TASKBOARD_DATA_DIR", global = true)]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TASKBOARD_LOG", global = true)]
    log: Option<String>,

    /// Actor name recorded on activities (default: "cli")
    #[arg(long, env = "TASKBOARD_ACTOR", global = true)]
    actor: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "TASKBOARD_LOG_FILE", global = true)]
    log_file: Option<std::path::PathBuf>,

    /// Suppress progress and informational output.
    ///
    /// Errors are still printed to stderr. JSON output (--json flags) is
    /// unaffected. Use this flag when piping output to other tools.
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create a task.
    ///
    /// New tasks land in Backlog at priority P2 unless told otherwise, and are
    /// placed at the end of their lane. Pass --index to choose an explicit
    /// position instead.
    ///
    /// Examples:
    ///   taskboard create "Fix login flow"
    ///   taskboard create "Ship v2" --status Ready --priority P0 --owner alice
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// Backlog | Ready | "In Progress" | Review | Done
        #[arg(long)]
        status: Option<String>,
        /// P0 (highest) through P3
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        /// Estimate in points (non-negative)
        #[arg(long)]
        estimate: Option<i64>,
        /// Free-form tags as a JSON object, e.g. '{"area":"auth"}'
        #[arg(long)]
        tags: Option<String>,
        /// Explicit lane position; omit for end-of-lane
        #[arg(long)]
        index: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Show one task.
    ///
    /// Examples:
    ///   taskboard get 4f1c… --json
    Get {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// List the board in lane order.
    ///
    /// Tasks sort by (status, ordering_index, id). Filter to a single lane
    /// with --status.
    ///
    /// Examples:
    ///   taskboard list
    ///   taskboard list --status "In Progress" --json
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show what to work on next.
    ///
    /// Ready and In Progress tasks, highest priority first.
    ///
    /// Examples:
    ///   taskboard next --limit 5
    Next {
        #[arg(long, default_value_t = 10)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    /// Update task fields under optimistic concurrency.
    ///
    /// --expect must carry the version you last read; if another writer got
    /// there first the update is rejected and nothing changes. The --clear-*
    /// flags null out optional fields.
    ///
    /// Examples:
    ///   taskboard update 4f1c… --expect 3 --status Review --owner bob
    ///   taskboard update 4f1c… --expect 4 --clear-owner
    Update {
        id: String,
        /// Version you last read
        #[arg(long)]
        expect: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,
        #[arg(long)]
        clear_description: bool,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long, conflicts_with = "clear_owner")]
        owner: Option<String>,
        #[arg(long)]
        clear_owner: bool,
        #[arg(long, conflicts_with = "clear_estimate")]
        estimate: Option<i64>,
        #[arg(long)]
        clear_estimate: bool,
        /// Replace tags with this JSON object
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        index: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Move a task within or across lanes.
    ///
    /// The client computes the ordering key (midpoint of its new neighbours,
    /// or anything >= 0); the server stores it as given.
    ///
    /// Examples:
    ///   taskboard reorder 4f1c… --expect 1 --index 1500
    ///   taskboard reorder 4f1c… --expect 2 --index 500 --status Done
    Reorder {
        id: String,
        #[arg(long)]
        expect: i64,
        #[arg(long)]
        index: f64,
        /// Target lane; omit to stay in the current one
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Delete a task and its comments and activity trail.
    ///
    /// Examples:
    ///   taskboard delete 4f1c…
    Delete { id: String },
    /// Apply one change (or delete) to many tasks at once.
    ///
    /// Runs in a single transaction: items that fail with "Not found" or
    /// "Conflict" are reported individually while the rest commit together.
    ///
    /// Examples:
    ///   taskboard bulk --ids a,b,c --status Review
    ///   taskboard bulk --ids a,b --delete
    ///   taskboard bulk --ids a,b --owner carol --expect a=3 --expect b=1
    Bulk {
        /// Comma-separated task ids
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        /// Delete the tasks instead of updating fields
        #[arg(long)]
        delete: bool,
        /// Optional per-task expected version, as id=version (repeatable)
        #[arg(long)]
        expect: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Manage comments on a task.
    ///
    /// Examples:
    ///   taskboard comment add 4f1c… "looks good"
    ///   taskboard comment edit 9a2d… "looks great"
    ///   taskboard comment list 4f1c…
    Comment {
        #[command(subcommand)]
        action: CommentAction,
    },
    /// Show a task's history or the board-wide feed.
    ///
    /// Per-task history replays oldest-first in sequence order. Without a
    /// task id you get the recent-activity feed, newest first.
    ///
    /// Examples:
    ///   taskboard activity 4f1c…
    ///   taskboard activity --type moved --limit 20
    Activity {
        task_id: Option<String>,
        /// Filter by activity type (created, updated, moved, deleted, ...)
        #[arg(long = "type")]
        activity_type: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        json: bool,
    },
    /// Lane ordering maintenance.
    ///
    /// Repeated midpoint drops shrink the gaps between ordering keys.
    /// `gap` reports the smallest remaining gap in a lane; `renumber`
    /// re-spaces the lane evenly without touching task versions.
    ///
    /// Examples:
    ///   taskboard lane gap Ready
    ///   taskboard lane renumber Ready
    Lane {
        #[command(subcommand)]
        action: LaneAction,
    },
    /// Reclaim disk space in the database file.
    ///
    /// Examples:
    ///   taskboard vacuum
    Vacuum,
}

#[derive(Subcommand)]
enum CommentAction {
    /// Add a comment to a task.
    Add { task_id: String, body: String },
    /// Rewrite an existing comment's body.
    Edit { comment_id: String, body: String },
    /// List a task's comments, oldest first.
    List {
        task_id: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum LaneAction {
    /// Report the smallest gap between adjacent ordering keys in a lane.
    Gap { status: String },
    /// Re-space a lane to evenly spaced ordering keys.
    Renumber { status: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = BoardConfig::new(args.data_dir.clone(), args.log.clone(), args.actor.clone());

    // Init once — must happen before any tracing calls.
    let _file_guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);

    if let Err(e) = run(args, &config).await {
        // Distinct exit codes so scripts can branch on the failure kind:
        // 2 = not found, 3 = version conflict, 4 = invalid request, 1 = other.
        let code = match e.downcast_ref::<BoardError>() {
            Some(BoardError::NotFound) => {
                eprintln!("error: task not found");
                2
            }
            Some(BoardError::VersionConflict) => {
                eprintln!("error: version conflict — re-fetch the task and retry");
                3
            }
            Some(err @ BoardError::Validation(_)) => {
                eprintln!("error: {err}");
                4
            }
            Some(err) => {
                eprintln!("error: {err}");
                1
            }
            None => {
                eprintln!("error: {e:#}");
                1
            }
        };
        std::process::exit(code);
    }
    Ok(())
}

async fn run(args: Args, config: &BoardConfig) -> Result<()> {
    let storage = Storage::new_with_slow_query(&config.data_dir, config.slow_query_ms).await?;
    let pool = storage.pool();
    let engine = MutationEngine::new(pool.clone());
    let actor = config.actor.as_str();
    let quiet = args.quiet;

    match args.command {
        Command::Create {
            title,
            description,
            status,
            priority,
            owner,
            estimate,
            tags,
            index,
            json,
        } => {
            let tags = tags
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()
                .map_err(|e| anyhow::anyhow!("--tags must be valid JSON: {e}"))?;
            let task = engine
                .create_task(
                    TaskDraft {
                        title,
                        description,
                        status,
                        priority,
                        owner,
                        tags,
                        estimate,
                        ordering_index: index,
                    },
                    actor,
                )
                .await?;
            if json {
                println!("{}", serde_json::to_string(&task)?);
            } else if !quiet {
                println!("Created: {} — {}", task.id, task.title);
                println!("Lane: {} @ {}", task.status, task.ordering_index);
            }
        }

        Command::Get { id, json } => match store::get(&pool, &id).await? {
            None => bail!(BoardError::NotFound),
            Some(task) => {
                if json {
                    println!("{}", serde_json::to_string(&task)?);
                } else {
                    print_task_detail(&task);
                }
            }
        },

        Command::List { status, json } => {
            let status = status.as_deref().map(Status::parse).transpose()?;
            let tasks = store::list(&pool, status).await?;
            if json {
                println!("{}", serde_json::to_string(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks found.");
            } else {
                print_task_table(&tasks);
            }
        }

        Command::Next { limit, json } => {
            let tasks = store::next_up(&pool, limit).await?;
            if json {
                println!("{}", serde_json::to_string(&tasks)?);
            } else if tasks.is_empty() {
                println!("Nothing queued — no Ready or In Progress tasks.");
            } else {
                print_task_table(&tasks);
            }
        }

        Command::Update {
            id,
            expect,
            title,
            description,
            clear_description,
            status,
            priority,
            owner,
            clear_owner,
            estimate,
            clear_estimate,
            tags,
            index,
            json,
        } => {
            let tags = tags
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()
                .map_err(|e| anyhow::anyhow!("--tags must be valid JSON: {e}"))?;
            let patch = TaskPatch {
                title: opt_change(title, false),
                description: opt_change(description, clear_description),
                status: opt_change(status, false),
                priority: opt_change(priority, false),
                owner: opt_change(owner, clear_owner),
                tags: opt_change(tags, false),
                estimate: opt_change(estimate, clear_estimate),
                ordering_index: opt_change(index, false),
            };
            if patch.is_empty() {
                bail!("nothing to update — pass at least one field flag");
            }
            let task = engine.update_task(&id, patch, expect, actor).await?;
            if json {
                println!("{}", serde_json::to_string(&task)?);
            } else if !quiet {
                println!("Updated: {} (version {})", task.id, task.version);
            }
        }

        Command::Reorder {
            id,
            expect,
            index,
            status,
            json,
        } => {
            let task = engine
                .reorder_task(&id, status.as_deref(), index, expect, actor)
                .await?;
            if json {
                println!("{}", serde_json::to_string(&task)?);
            } else if !quiet {
                println!(
                    "Moved: {} to {} @ {} (version {})",
                    task.id, task.status, task.ordering_index, task.version
                );
            }
        }

        Command::Delete { id } => {
            engine.delete_task(&id, actor).await?;
            if !quiet {
                println!("Deleted: {id}");
            }
        }

        Command::Bulk {
            ids,
            status,
            priority,
            owner,
            delete,
            expect,
            json,
        } => {
            let expected = parse_expect(&expect)?;
            let fields = BulkFields {
                status,
                priority,
                owner,
            };
            let fields = if fields.is_empty() { None } else { Some(fields) };
            let result = engine
                .bulk_update(&ids, fields, delete, &expected, actor)
                .await?;
            if json {
                println!("{}", serde_json::to_string(&result)?);
            } else if !quiet {
                println!(
                    "{} updated, {} failed",
                    result.updated.len(),
                    result.failed.len()
                );
                for f in &result.failed {
                    println!("  {}: {}", f.id, f.reason);
                }
            }
        }

        Command::Comment { action } => match action {
            CommentAction::Add { task_id, body } => {
                let comment = engine.add_comment(&task_id, &body, actor).await?;
                if !quiet {
                    println!("Comment added: {}", comment.id);
                }
            }
            CommentAction::Edit { comment_id, body } => {
                let comment = engine.edit_comment(&comment_id, &body).await?;
                if !quiet {
                    println!("Comment updated: {} (version {})", comment.id, comment.version);
                }
            }
            CommentAction::List { task_id, json } => {
                let comments = engine.list_comments(&task_id).await?;
                if json {
                    println!("{}", serde_json::to_string(&comments)?);
                } else if comments.is_empty() {
                    println!("No comments.");
                } else {
                    for c in &comments {
                        println!("[{}] {} ({}): {}", c.created_at, c.actor, c.id, c.body);
                    }
                }
            }
        },

        Command::Activity {
            task_id,
            activity_type,
            limit,
            offset,
            json,
        } => {
            // With a task id and no type filter, replay history oldest-first;
            // otherwise show the newest-first feed.
            let rows = match (&task_id, &activity_type) {
                (Some(id), None) => activity::list_for_task(&pool, id, limit, offset).await?,
                _ => {
                    activity::feed(
                        &pool,
                        task_id.as_deref(),
                        activity_type.as_deref(),
                        limit,
                        offset,
                    )
                    .await?
                }
            };
            if json {
                println!("{}", serde_json::to_string(&rows)?);
            } else if rows.is_empty() {
                println!("No activity.");
            } else {
                for a in &rows {
                    println!(
                        "#{:<4} [{}] {} {} {}",
                        a.activity_seq, a.created_at, a.actor, a.activity_type, a.payload
                    );
                }
            }
        }

        Command::Lane { action } => match action {
            LaneAction::Gap { status } => {
                let status = Status::parse(&status)?;
                match taskboard::board::ordering::lane_min_gap(&pool, status).await? {
                    Some(gap) => println!("{gap}"),
                    None => println!("Lane has fewer than two tasks."),
                }
            }
            LaneAction::Renumber { status } => {
                let status = Status::parse(&status)?;
                let n = taskboard::board::ordering::renumber_lane(&pool, status).await?;
                if !quiet {
                    println!("Renumbered {n} task(s) in {}", status.as_str());
                }
            }
        },

        Command::Vacuum => {
            storage.vacuum().await?;
            if !quiet {
                println!("Vacuum complete.");
            }
        }
    }

    Ok(())
}

/// Fold a clap `Option` plus a `--clear-*` flag into a three-state change.
fn opt_change<T>(value: Option<T>, clear: bool) -> Change<T> {
    match (value, clear) {
        (Some(v), _) => Change::Set(v),
        (None, true) => Change::Clear,
        (None, false) => Change::Unchanged,
    }
}

/// Parse repeated `--expect id=version` pairs.
fn parse_expect(pairs: &[String]) -> Result<HashMap<String, i64>> {
    let mut map = HashMap::new();
    for pair in pairs {
        let (id, version) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--expect must be id=version, got '{pair}'"))?;
        let version: i64 = version
            .parse()
            .map_err(|_| anyhow::anyhow!("--expect version must be an integer, got '{pair}'"))?;
        map.insert(id.to_string(), version);
    }
    Ok(map)
}

fn print_task_detail(task: &TaskRow) {
    println!("{} — {}", task.id, task.title);
    println!("  Status:   {} @ {}", task.status, task.ordering_index);
    println!("  Priority: {}", task.priority);
    println!("  Owner:    {}", task.owner.as_deref().unwrap_or("-"));
    if let Some(est) = task.estimate {
        println!("  Estimate: {est}");
    }
    if task.tags != "{}" {
        println!("  Tags:     {}", task.tags);
    }
    if let Some(desc) = &task.description {
        println!("  {desc}");
    }
    println!("  Version {} · updated {}", task.version, task.updated_at);
}

fn print_task_table(tasks: &[TaskRow]) {
    println!("{:<13} {:<9} {:<10} TITLE", "STATUS", "PRIORITY", "OWNER");
    println!("{}", "-".repeat(72));
    for t in tasks {
        println!(
            "{:<13} {:<9} {:<10} {}",
            t.status,
            t.priority,
            t.owner.as_deref().unwrap_or("-"),
            t.title
        );
    }
    println!("\n{} task(s)", tasks.len());
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("taskboard.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            init_stdout_only(log_level, use_json);
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else {
        init_stdout_only(log_level, use_json);
        None
    }
}

fn init_stdout_only(log_level: &str, use_json: bool) {
    if use_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
    }
}
