#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

mod table;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::error::Error;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process;

use table::{Table, load_table, write_matches};
use tcor::linalg::SubspaceIteration;
use tcor::progress::{SearchProgressObserver, SearchStage};
use tcor::{
    FilterMode, Query, RayonDispatcher, RestartState, SearchInput, SearchOptions, SearchResult,
    thresholded_correlation_with,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum FilterModeCli {
    Local,
    Distributed,
}

impl From<FilterModeCli> for FilterMode {
    fn from(mode: FilterModeCli) -> Self {
        match mode {
            FilterModeCli::Local => FilterMode::Local,
            FilterModeCli::Distributed => FilterMode::Distributed,
        }
    }
}

#[derive(Args)]
pub struct InputArgs {
    /// Matrix file: a header row of column names, then one observation per row
    #[arg(value_name = "MATRIX")]
    pub matrix: PathBuf,

    /// Second matrix with the same observations; only pairs with one column
    /// from each file are reported
    #[arg(long = "with", value_name = "Y")]
    pub with: Option<PathBuf>,

    /// TOML file of search options; flags given here take precedence
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Embedding dimension used to prune pairs
    #[arg(long, value_name = "P")]
    pub rank: Option<usize>,

    /// Worker threads (defaults to one per core)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,
}

#[derive(Args)]
pub struct SearchArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Report every pair with correlation at or above T
    #[arg(
        long,
        value_name = "T",
        allow_negative_numbers = true,
        conflicts_with = "top",
        required_unless_present = "top"
    )]
    pub threshold: Option<f64>,

    /// Report at least the N strongest pairs
    #[arg(long, value_name = "N")]
    pub top: Option<usize>,

    /// Also report pairs with correlation at or below -T
    #[arg(long)]
    pub include_anti: bool,

    /// Where exact verification runs
    #[arg(long, value_enum, value_name = "MODE")]
    pub filter: Option<FilterModeCli>,

    /// Threshold relaxation passes allowed for --top
    #[arg(long, value_name = "K")]
    pub max_iter: Option<usize>,

    /// Factorization state written by `tcor tune`
    #[arg(long, value_name = "FILE")]
    pub restart: Option<PathBuf>,

    /// Write matches here instead of stdout
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct TuneArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Threshold at which the longest candidate run is reported
    #[arg(long, value_name = "T", default_value = "0.9", allow_negative_numbers = true)]
    pub threshold: f64,

    /// Where to write the factorization state
    #[arg(long, value_name = "FILE")]
    pub save_restart: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "tcor",
    about = "Find highly correlated column pairs without computing the full correlation matrix",
    long_about = "Embeds the standardized columns with a truncated factorization, prunes \
                 pairs that cannot meet the threshold, and verifies the rest exactly."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Find correlated column pairs
    #[command(about = "Find column pairs meeting a correlation threshold (outputs: TSV)")]
    Search(SearchArgs),

    /// Factorize once and report how hard a threshold will be
    #[command(about = "Compute and save the factorization state (outputs: restart TOML)")]
    Tune(TuneArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Search(args)) => run_search(args),
        Some(Commands::Tune(args)) => run_tune(args),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

struct Inputs {
    x: Table,
    y: Option<Table>,
}

impl Inputs {
    fn search_input(&self) -> SearchInput<'_> {
        match &self.y {
            Some(y) => SearchInput::pair(self.x.values.view(), y.values.view()),
            None => SearchInput::single(self.x.values.view()),
        }
    }

    /// Names for the `j` side of a match.
    fn partner_names(&self) -> &[String] {
        self.y.as_ref().map_or(&self.x.names, |y| &y.names)
    }
}

fn prepare(args: &InputArgs) -> Result<(Inputs, SearchOptions), Box<dyn Error>> {
    let mut options = match &args.config {
        Some(path) => SearchOptions::load(path)?,
        None => SearchOptions::default(),
    };
    if let Some(rank) = args.rank {
        options.rank = rank;
    }
    if args.threads.is_some() {
        options.threads = args.threads;
    }

    eprintln!("Loading matrix from: {}", args.matrix.display());
    let x = load_table(&args.matrix)?;
    let y = args.with.as_deref().map(load_table).transpose()?;
    match &y {
        Some(y) => eprintln!(
            "Loaded {} observations of {} + {} columns",
            x.values.nrows(),
            x.names.len(),
            y.names.len()
        ),
        None => eprintln!(
            "Loaded {} observations of {} columns",
            x.values.nrows(),
            x.names.len()
        ),
    }
    Ok((Inputs { x, y }, options))
}

fn execute(
    inputs: &Inputs,
    query: Query,
    options: &SearchOptions,
    restart: Option<RestartState>,
) -> Result<SearchResult, Box<dyn Error>> {
    let dispatcher = RayonDispatcher::new(options.threads)?;
    let mut progress = BarProgress::default();
    let result = thresholded_correlation_with(
        inputs.search_input(),
        query,
        options,
        restart,
        &SubspaceIteration,
        &dispatcher,
        &mut progress,
    )?;
    Ok(result)
}

pub fn run_search(args: SearchArgs) -> Result<(), Box<dyn Error>> {
    let (inputs, mut options) = prepare(&args.input)?;
    if args.include_anti {
        options.include_anti = true;
    }
    if let Some(mode) = args.filter {
        options.filter_mode = mode.into();
    }
    if let Some(max_iter) = args.max_iter {
        options.max_iter = max_iter;
    }
    options.dry_run = false;

    let query = match (args.threshold, args.top) {
        (Some(t), None) => Query::Threshold(t),
        (None, Some(n)) => Query::Top(n),
        _ => return Err("exactly one of --threshold and --top is required".into()),
    };
    let restart = args
        .restart
        .as_deref()
        .map(RestartState::load)
        .transpose()?;

    let result = execute(&inputs, query, &options, restart)?;
    eprintln!(
        "{} pairs at threshold {:.4} | longest run {} | {} candidates over {} pass(es){} | factorization {:.3}s | total {:.3}s",
        result.matches.len(),
        result.threshold_used,
        result.longest_run,
        result.total_candidates,
        result.iterations,
        if result.exhausted { " (target not reached)" } else { "" },
        result.factorization_time.as_secs_f64(),
        result.total_time.as_secs_f64()
    );

    match &args.output {
        Some(path) => {
            write_matches(
                File::create(path)?,
                &result.matches,
                &inputs.x.names,
                inputs.partner_names(),
            )?;
            println!("Matches saved to: {}", path.display());
        }
        None => write_matches(
            io::stdout().lock(),
            &result.matches,
            &inputs.x.names,
            inputs.partner_names(),
        )?,
    }
    Ok(())
}

pub fn run_tune(args: TuneArgs) -> Result<(), Box<dyn Error>> {
    let (inputs, mut options) = prepare(&args.input)?;
    options.dry_run = true;

    let result = execute(&inputs, Query::Threshold(args.threshold), &options, None)?;
    let restart = result
        .restart
        .ok_or("the dry run returned no factorization state")?;
    restart.save(&args.save_restart)?;

    println!(
        "Rank {} | longest run at threshold {}: {} | factorization {:.3}s",
        restart.rank(),
        args.threshold,
        result.longest_run,
        result.factorization_time.as_secs_f64()
    );
    println!("Restart state saved to: {}", args.save_restart.display());
    Ok(())
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Shows one bar per search stage on stderr and notes each relaxation pass.
#[derive(Default)]
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl SearchProgressObserver for BarProgress {
    fn on_pass_start(&mut self, pass: usize, threshold: f64) {
        if pass > 1 {
            eprintln!("Relaxing to threshold {threshold:.2} (pass {pass})");
        }
    }

    fn on_stage_start(&mut self, stage: SearchStage, total: usize) {
        if let Some(previous) = self.bar.take() {
            previous.finish_and_clear();
        }
        self.bar = Some(create_progress_bar(total as u64, &stage.to_string()));
    }

    fn on_stage_advance(&mut self, _stage: SearchStage, processed: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(processed as u64);
        }
    }

    fn on_stage_finish(&mut self, _stage: SearchStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
