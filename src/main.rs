use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pipes_bridge::config::{keys, load_job_conf};
use pipes_bridge::splits::{self, OpaqueSplit, SplitSource, StaticSplitSource};
use pipes_bridge::task::{MemoryRecordWriter, TextLineReader};
use pipes_bridge::testing::FakeWorker;
use pipes_bridge::{JobConf, LocalTaskContext, MapTask, PipesError, PipesInputFormat, ReduceTask};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Run map/reduce tasks in an external worker over the pipes protocol
#[derive(Parser)]
#[command(name = "pipes-bridge")]
#[command(about = "Host-side bridge for pipes workers", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pipe the lines of a text file through a worker's map function
    Map {
        #[command(flatten)]
        worker: WorkerArgs,

        /// Text file whose lines become map records
        #[arg(short, long)]
        input: PathBuf,

        /// Number of reduce tasks announced to the worker
        #[arg(long, default_value = "0")]
        reduces: u32,

        /// Which split to run when splits come from an external file
        #[arg(long, default_value = "0")]
        split_index: usize,
    },
    /// Feed tab-separated key/value lines, grouped by key, to a worker's reduce function
    Reduce {
        #[command(flatten)]
        worker: WorkerArgs,

        /// Text file of `key<TAB>value` lines, sorted by key
        #[arg(short, long)]
        input: PathBuf,

        /// Partition announced to the worker
        #[arg(long, default_value = "0")]
        partition: u32,
    },
    /// Produce or inspect external split files
    Splits {
        #[command(subcommand)]
        command: SplitCommands,
    },
    /// Minimal worker that echoes its input back (used for testing)
    #[command(hide = true)]
    EchoWorker {
        /// Echo every record back as output
        #[arg(long)]
        echo: bool,
    },
}

#[derive(clap::Args)]
struct WorkerArgs {
    /// Worker executable (path or file:// URI)
    #[arg(short, long)]
    program: String,

    /// Interpreter that runs the worker program
    #[arg(long)]
    interpreter: Option<String>,

    /// Job configuration file (TOML or JSON)
    #[arg(short = 'c', long)]
    conf: Option<PathBuf>,

    /// Where to write the output records (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Task work directory (default: a fresh directory under the system temp dir)
    #[arg(long)]
    work_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum SplitCommands {
    /// Write a split file from `code:payload` pairs
    Write {
        file: PathBuf,
        splits: Vec<String>,
    },
    /// Print the splits stored in a split file
    Dump { file: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,tokio=debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("pipes-bridge started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Map {
            worker,
            input,
            reduces,
            split_index,
        } => run_map(worker, input, reduces, split_index).await,
        Commands::Reduce {
            worker,
            input,
            partition,
        } => run_reduce(worker, input, partition).await,
        Commands::Splits { command } => run_splits_command(command).await,
        Commands::EchoWorker { echo } => run_echo_worker(echo).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        let code = e
            .downcast_ref::<PipesError>()
            .map(PipesError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

/// Job configuration for a command-line run: the optional file plus the
/// worker settings from the command line.
async fn job_conf(worker: &WorkerArgs) -> anyhow::Result<JobConf> {
    let mut conf = match &worker.conf {
        Some(path) => load_job_conf(path).await?,
        None => JobConf::new(),
    };
    conf.set(keys::EXECUTABLE, worker.program.as_str());
    if let Some(interpreter) = &worker.interpreter {
        conf.set(keys::INTERPRETER, interpreter.as_str());
    }
    if !conf.contains(keys::IS_JAVA_RECORD_WRITER) {
        conf.set_bool(keys::IS_JAVA_RECORD_WRITER, true);
    }
    Ok(conf)
}

fn task_context(worker: &WorkerArgs, kind: char) -> anyhow::Result<Arc<LocalTaskContext>> {
    let work_dir = match &worker.work_dir {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir().join(format!("pipes-bridge-{}", std::process::id())),
    };
    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("Cannot create work directory {}", work_dir.display()))?;
    let attempt = format!("attempt_local_0001_{}_000000_0", kind);
    Ok(Arc::new(LocalTaskContext::new(attempt, work_dir)))
}

async fn run_map(
    worker: WorkerArgs,
    input: PathBuf,
    reduces: u32,
    split_index: usize,
) -> anyhow::Result<()> {
    let mut conf = job_conf(&worker).await?;
    if !conf.contains(keys::IS_JAVA_RECORD_READER) {
        conf.set_bool(keys::IS_JAVA_RECORD_READER, true);
    }
    conf.set(keys::NUM_REDUCES, reduces.to_string());

    let file_split = OpaqueSplit::new(b"file".to_vec(), input.display().to_string());
    let format = PipesInputFormat::new(Box::new(StaticSplitSource::new(vec![file_split])));
    let all_splits = format.get_splits(&conf).await?;
    let Some(split) = all_splits.get(split_index) else {
        bail!(
            "Split {} requested but the job has {}",
            split_index,
            all_splits.len()
        );
    };

    let data = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Cannot read input {}", input.display()))?;
    let context = task_context(&worker, 'm')?;
    let sink = MemoryRecordWriter::new();

    info!("Running map over {}", input.display());
    MapTask::new(conf, context.clone())
        .run(
            &split.to_bytes()?,
            Box::new(TextLineReader::new(data)),
            Box::new(sink.clone()),
        )
        .await?;

    write_records(&sink, worker.output.as_deref())?;
    report_counters(&context);
    Ok(())
}

async fn run_reduce(worker: WorkerArgs, input: PathBuf, partition: u32) -> anyhow::Result<()> {
    let conf = job_conf(&worker).await?;
    let text = tokio::fs::read_to_string(&input)
        .await
        .with_context(|| format!("Cannot read input {}", input.display()))?;
    let context = task_context(&worker, 'r')?;
    let sink = MemoryRecordWriter::new();

    let mut task =
        ReduceTask::new(conf, context.clone(), Box::new(sink.clone())).partition(partition);
    let mut outcome = Ok(());
    for (key, values) in group_lines(&text) {
        outcome = task.reduce(key.as_bytes(), values).await;
        if outcome.is_err() {
            break;
        }
    }
    let finished = task.finish().await;
    outcome?;
    finished?;

    write_records(&sink, worker.output.as_deref())?;
    report_counters(&context);
    Ok(())
}

/// Consecutive `key<TAB>value` lines sharing a key.
fn group_lines(text: &str) -> Vec<(&str, Vec<&str>)> {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for line in text.lines().filter(|l| !l.is_empty()) {
        let (key, value) = line.split_once('\t').unwrap_or((line, ""));
        match groups.last_mut() {
            Some((last, values)) if *last == key => values.push(value),
            _ => groups.push((key, vec![value])),
        }
    }
    groups
}

fn render(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}

fn write_records(sink: &MemoryRecordWriter, output: Option<&Path>) -> anyhow::Result<()> {
    let mut text = String::new();
    for (key, value) in sink.records() {
        text.push_str(&render(&key));
        text.push('\t');
        text.push_str(&render(&value));
        text.push('\n');
    }

    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("Cannot write output {}", path.display()))?,
        None => std::io::stdout().write_all(text.as_bytes())?,
    }
    Ok(())
}

fn report_counters(context: &LocalTaskContext) {
    for (group, name, value) in context.counters().snapshot() {
        info!("{}.{} = {}", group, name, value);
    }
}

async fn run_splits_command(command: SplitCommands) -> anyhow::Result<()> {
    match command {
        SplitCommands::Write { file, splits: specs } => {
            let mut parsed = Vec::with_capacity(specs.len());
            for spec in &specs {
                let Some((code, payload)) = spec.split_once(':') else {
                    bail!("Expected CODE:PAYLOAD, got '{}'", spec);
                };
                parsed.push(OpaqueSplit::new(code, payload));
            }
            splits::write_split_file(&file, &parsed).await?;
            println!("Wrote {} splits to {}", parsed.len(), file.display());
        }
        SplitCommands::Dump { file } => {
            let stored = splits::read_split_file(&file).await?;
            for (index, split) in stored.iter().enumerate() {
                println!(
                    "{}\t{}\t{}\t{}",
                    index,
                    render(&split.code),
                    split.len(),
                    render(&split.payload)
                );
            }
        }
    }
    Ok(())
}

async fn run_echo_worker(echo: bool) -> anyhow::Result<()> {
    let worker = if echo {
        FakeWorker::new().echo()
    } else {
        FakeWorker::new()
    };
    let code = worker.serve(|key| std::env::var(key).ok()).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_lines() {
        let groups = group_lines("a\t1\na\t2\nb\t3\n\nc\n");
        assert_eq!(
            groups,
            vec![("a", vec!["1", "2"]), ("b", vec!["3"]), ("c", vec![""])]
        );
    }

    #[test]
    fn test_render_binary_as_hex() {
        assert_eq!(render(b"text"), "text");
        assert_eq!(render(&[0xff, 0x00]), "ff00");
    }
}
