#![warn(clippy::pedantic)]

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use rhotrans_base::{
    code::decode::{translate_class, ListingWriter},
    data::classes::ClassUniverse,
    Config, WordSize,
};
use rhotrans_class_loaders::{
    jar_loader::JarClassFileLoader, util::CombineLoader, ClassDirectories,
};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

mod formatter;

#[derive(Debug, Parser)]
#[allow(clippy::struct_excessive_bools)]
#[clap(name = "rhotrans")]
#[clap(version = "0.1.0")]
#[clap(about = "Verifies the bytecode of a Java class and prints its translated listing")]
struct CliArgs {
    /// Class to translate, `java.lang.String` or `java/lang/String`
    #[clap(value_name = "CLASS_NAME")]
    class_name: String,
    /// Directories to search for class files, in order
    #[clap(long = "class-path", short = 'c', parse(from_os_str), value_name = "DIR")]
    class_path: Vec<PathBuf>,
    /// Jar files to search for class files, after the directories
    #[clap(long = "jar", parse(from_os_str), value_name = "JAR_FILE")]
    jars: Vec<PathBuf>,
    #[clap(
        long,
        default_value = "info",
        possible_values = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: Level,
    /// Bits in an operand stack slot on the target interpreter
    #[clap(long, default_value = "32", possible_values = ["32", "64"])]
    word_size: u8,
    #[clap(long)]
    no_line_numbers: bool,
    #[clap(long)]
    no_local_variables: bool,
    /// Only accept the `StackMap` attribute as a source of branch targets
    #[clap(long)]
    no_stack_map_table: bool,
    #[clap(long)]
    log_pseudo_opcodes: bool,
}
impl CliArgs {
    fn config(&self) -> Config {
        Config {
            word_size: if self.word_size == 64 {
                WordSize::Bits64
            } else {
                WordSize::Bits32
            },
            load_line_numbers: !self.no_line_numbers,
            load_local_variables: !self.no_local_variables,
            accept_stack_map_table: !self.no_stack_map_table,
            log_pseudo_opcodes: self.log_pseudo_opcodes,
        }
    }
}

struct EmptyWriter;
impl Write for EmptyWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn make_log_file(path: &Path) -> std::io::Result<std::sync::Arc<std::fs::File>> {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    Ok(std::sync::Arc::new(log_file))
}

fn init_logging(level: Level) -> Result<(), String> {
    let should_log_console = std::env::var("RHOTRANS_LOG_CONSOLE")
        .map(|x| x != "0")
        .unwrap_or(true);
    // Logging to a file only happens when it is given a path
    let log_file = match std::env::var_os("RHOTRANS_LOG_FILE") {
        Some(path) => Some(
            make_log_file(Path::new(&path))
                .map_err(|err| format!("failed to open log file {:?}: {}", path, err))?,
        ),
        None => None,
    };

    let console_layer = if should_log_console {
        Some(
            tracing_subscriber::fmt::Layer::default()
                .with_writer(std::io::stderr)
                .without_time()
                .event_format(formatter::Formatter),
        )
    } else {
        None
    };
    let file_layer = log_file.map(|log_file| {
        tracing_subscriber::fmt::Layer::default()
            .with_writer(log_file)
            .without_time()
            .event_format(formatter::Formatter)
    });

    let t_subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .event_format(formatter::Formatter)
        .with_writer(|| EmptyWriter)
        .finish()
        .with(console_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(t_subscriber)
        .map_err(|err| format!("failed to set global default tracing subscriber: {}", err))
}

fn main() -> ExitCode {
    // Note that clap autoexits if the arguments are bad
    let args = CliArgs::parse();

    if let Err(err) = init_logging(args.log_level) {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }

    match translate(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn translate(args: &CliArgs) -> Result<(), String> {
    let config = args.config();

    let mut class_directories = ClassDirectories::default();
    for path in &args.class_path {
        class_directories
            .add(path)
            .map_err(|err| format!("bad class directory {:?}: {}", path, err))?;
    }
    let mut jars = Vec::with_capacity(args.jars.len());
    for path in &args.jars {
        let jar = JarClassFileLoader::new(path.clone())
            .map_err(|err| format!("bad jar file {:?}: {}", path, err))?;
        jars.push(jar);
    }

    let mut universe = ClassUniverse::new(CombineLoader::new(class_directories, jars));
    universe.log_load = args.log_level >= Level::DEBUG;

    let data = universe
        .read_class_file(&args.class_name)
        .map_err(|err| format!("failed to read class {}: {}", args.class_name, err))?
        .ok_or_else(|| format!("could not find class {}", args.class_name))?;

    let stdout = std::io::stdout();
    let mut sink = ListingWriter::new(stdout.lock());
    translate_class(&data, &mut universe, &config, &mut sink)
        .map_err(|err| format!("failed to translate {}: {}", args.class_name, err))?;
    sink.into_inner()
        .flush()
        .map_err(|err| format!("failed to write listing: {}", err))?;

    Ok(())
}
