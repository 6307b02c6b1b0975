// ActionVM CLI - Command Line Interface
// Usage: actionvm FRAME_FILE... [OPTIONS]

use actionvm::{ActionBuffer, AvmResult, DiagnosticKind, Host, MovieClip, Vm, VmConfig};
use clap::Parser;
use colored::*;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;

/// ActionVM - Run ActionScript action bytecode
#[derive(Parser)]
#[command(name = "actionvm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run raw ActionScript action bytecode, one file per frame", long_about = None)]
struct Cli {
    /// Files holding the raw actions of each frame, in order
    #[arg(required = true)]
    frames: Vec<PathBuf>,

    /// Movie version (overrides the config file)
    #[arg(long = "swf-version")]
    swf_version: Option<u8>,

    /// JSON configuration file
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Seed for the random action
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// -v info, -vv debug with action trace, -vvv adds the parse trace
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the disassembly of each frame and exit
    #[arg(long = "disasm")]
    disasm: bool,

    /// Stop after this many frames
    #[arg(long = "frames", default_value_t = 1000)]
    max_frames: u32,
}

/// Writes log records to stderr with a colored level tag.
struct ConsoleLogger {
    level: LevelFilter,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "error".red().bold(),
            Level::Warn => "warn".yellow().bold(),
            Level::Info => "info".green(),
            Level::Debug => "debug".cyan(),
            Level::Trace => "trace".dimmed(),
        };
        eprintln!("{} {}", tag, record.args());
    }

    fn flush(&self) {}
}

fn init_logger(configured: &str, verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::from_str(configured).unwrap_or(LevelFilter::Warn),
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let logger: &'static ConsoleLogger = Box::leak(Box::new(ConsoleLogger { level }));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
    }
}

/// Trace output goes to stdout; everything else uses the logging defaults.
struct ConsoleHost;

impl Host for ConsoleHost {
    fn trace(&self, message: &str) {
        println!("{}", message);
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> AvmResult<()> {
    let mut config = match &cli.config {
        Some(path) => VmConfig::load(path)?,
        None => VmConfig::default(),
    };
    if let Some(version) = cli.swf_version {
        config.version = version;
    }
    if let Some(seed) = cli.seed {
        config.random_seed = Some(seed);
    }
    if cli.verbose >= 2 {
        config.verbose_action = true;
    }
    if cli.verbose >= 3 {
        config.verbose_parse = true;
    }
    init_logger(&config.log_level, cli.verbose);

    let buffers = cli
        .frames
        .iter()
        .map(|path| ActionBuffer::read_file(path, config.verbose_parse).map(Rc::new))
        .collect::<AvmResult<Vec<_>>>()?;

    if cli.disasm {
        for (path, buffer) in cli.frames.iter().zip(&buffers) {
            println!("{}", format!("-- {} --", path.display()).cyan());
            print!("{}", buffer.disassemble());
        }
        return Ok(());
    }

    let timeline = Rc::new(MovieClip::new());
    for buffer in buffers {
        timeline.add_frame(vec![buffer]);
    }

    let vm = Vm::new(config, Rc::new(ConsoleHost));
    let root = vm.new_clip(timeline, "_level0", None);
    vm.prepare_root(&root);

    vm.run_frame(&root);
    let mut frames = 1;
    while frames < cli.max_frames && vm.advance_frame(&root) {
        frames += 1;
    }

    log::info!(
        "ran {} frame(s): {} malformed, {} missing bindings, {} unimplemented",
        frames,
        vm.diagnostic_count(DiagnosticKind::MalformedBytecode),
        vm.diagnostic_count(DiagnosticKind::MissingBinding),
        vm.diagnostic_count(DiagnosticKind::Unimplemented)
    );
    Ok(())
}
