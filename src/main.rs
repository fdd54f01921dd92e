use clap::{Parser as ClapParser, Subcommand};
use serde::Serialize;

use runlog_tui::tree::{Entry, EntryData, RunInfo, SessionManager, StatusLevel, TreeBuilder};
use runlog_tui::tui::{App, LogFollower, run_tui};

#[derive(ClapParser)]
#[command(name = "runlog-tui")]
#[command(about = "Explore structured execution run logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a run log in the interactive viewer
    View {
        /// Input run log file
        #[arg(value_name = "FILE")]
        input: String,

        /// Keep tailing the file for appended contents (live runs)
        #[arg(short, long)]
        follow: bool,
    },

    /// Parse a run log and export the structured tree as JSON
    Parse {
        /// Input run log file
        #[arg(value_name = "FILE")]
        input: String,

        /// Output file (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<String>,

        /// Pretty print JSON output
        #[arg(short, long)]
        pretty: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::View { input, follow } => {
            view_file(&input, follow);
        }
        Commands::Parse {
            input,
            output,
            pretty,
        } => {
            env_logger::Builder::new().parse_default_env().init();
            parse_file(&input, output, pretty);
        }
    }
}

fn build_tree(input: &str) -> (TreeBuilder, u64) {
    let contents = match std::fs::read_to_string(input) {
        Ok(contents) => contents,
        Err(err) => {
            eprintln!("Error reading {}: {}", input, err);
            std::process::exit(1);
        }
    };

    let manager = SessionManager::new();
    let mut builder = TreeBuilder::new(Some(input.to_string()), manager.issue());
    builder.add_initial_contents(&contents);
    (builder, contents.len() as u64)
}

fn view_file(input: &str, follow: bool) {
    let (builder, offset) = build_tree(input);
    let follower = follow.then(|| LogFollower::new(input.into(), offset));

    let app = App::new(builder, Some(input.to_string()));
    if let Err(err) = run_tui(app, follower) {
        eprintln!("Error running viewer: {}", err);
        std::process::exit(1);
    }
}

fn parse_file(input: &str, output: Option<String>, pretty: bool) {
    let (builder, _) = build_tree(input);

    let summary = generate_summary(&builder.flattened.entries, &builder.run_info);
    let errors: Vec<ParseErrorInfo> = builder
        .errors()
        .iter()
        .map(|(line, err)| ParseErrorInfo {
            line_number: *line,
            message: err.to_string(),
        })
        .collect();

    let output_data = RunLogOutput {
        run: builder.run_info.clone(),
        summary,
        entries: builder.flattened.entries,
        errors,
    };

    let json = if pretty {
        serde_json::to_string_pretty(&output_data)
    } else {
        serde_json::to_string(&output_data)
    };

    let json = match json {
        Ok(json) => json,
        Err(err) => {
            eprintln!("Error serializing to JSON: {}", err);
            std::process::exit(1);
        }
    };

    if let Some(output_path) = output {
        if let Err(err) = std::fs::write(&output_path, json) {
            eprintln!("Error writing to {}: {}", output_path, err);
            std::process::exit(1);
        }
        eprintln!("Output written to {}", output_path);
    } else {
        println!("{}", json);
    }
}

/// Output format containing all parsed data
#[derive(Serialize)]
struct RunLogOutput {
    run: RunInfo,
    summary: SummaryStats,
    entries: Vec<Entry>,
    errors: Vec<ParseErrorInfo>,
}

/// Summary statistics about the run
#[derive(Serialize)]
struct SummaryStats {
    total_entries: usize,
    tasks: usize,
    methods: usize,
    logs: usize,
    exceptions: usize,
    errored: usize,
    finish_time_delta: Option<f64>,
}

/// Information about a parse error
#[derive(Serialize)]
struct ParseErrorInfo {
    line_number: usize,
    message: String,
}

fn generate_summary(entries: &[Entry], run_info: &RunInfo) -> SummaryStats {
    let mut tasks = 0;
    let mut methods = 0;
    let mut logs = 0;
    let mut exceptions = 0;
    let mut errored = 0;

    for entry in entries {
        match &entry.data {
            EntryData::Task { .. } => tasks += 1,
            EntryData::Method(_) | EntryData::Generator(_) => methods += 1,
            EntryData::Log { .. } => logs += 1,
            EntryData::Exception { .. } => exceptions += 1,
            _ => {}
        }
        if entry.status_level().intersects(StatusLevel::ERROR) {
            errored += 1;
        }
    }

    SummaryStats {
        total_entries: entries.len(),
        tasks,
        methods,
        logs,
        exceptions,
        errored,
        finish_time_delta: run_info.finish_time_delta,
    }
}
