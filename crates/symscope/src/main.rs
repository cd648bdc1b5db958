use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use symscope_core::{demangle, DebugKind, Engine, EngineConfig, QueryFlags, Result as SymResult, SymError};
use symscope_utils::{debug, init_logging_with, LogFormat, LogLevel, LoggingError, LoggingOptions};

/// Resolve symbols, lines and debug-info kinds in ELF, Mach-O and PE modules.
#[derive(Parser, Debug)]
#[command(name = "symscope")]
#[command(version)]
#[command(about = "Resolve symbols, lines and debug-info kinds in ELF, Mach-O and PE modules", long_about = None)]
struct Cli
{
    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true, value_parser = parse_level)]
    log_level: Option<LogLevel>,
    /// Log format (pretty or json); overrides SYMSCOPE_LOG_FORMAT
    #[arg(long, global = true, value_parser = parse_format)]
    log_format: Option<LogFormat>,
    /// Root of the separate debug file tree
    #[arg(long, global = true)]
    debug_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

/// How symbol names are printed.
#[derive(Args, Debug, Clone, Copy)]
struct NameStyle
{
    /// Demangle with template arguments and parameter lists
    #[arg(long, conflicts_with = "raw")]
    full_demangle: bool,
    /// Print names exactly as stored in the module
    #[arg(long)]
    raw: bool,
}

impl NameStyle
{
    fn flags(self) -> QueryFlags
    {
        if self.raw {
            QueryFlags::empty()
        } else if self.full_demangle {
            QueryFlags::DEMANGLE_FULL
        } else {
            QueryFlags::DEMANGLE
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Symbol and source line at a module offset
    Lookup
    {
        module: PathBuf,
        /// Module-relative offset (hex format: 0x1000 or decimal)
        offset: String,
        #[command(flatten)]
        style: NameStyle,
    },
    /// Module offset of a symbol, as `symbol` or `module!symbol`
    Name
    {
        module: PathBuf,
        symbol: String,
    },
    /// List every symbol of a module
    Enum
    {
        module: PathBuf,
        #[command(flatten)]
        style: NameStyle,
    },
    /// List symbols matching a wildcard pattern
    Search
    {
        module: PathBuf,
        /// Pattern with `*` and `?` wildcards
        pattern: String,
        /// Include data symbols as well as functions
        #[arg(long)]
        full: bool,
        #[command(flatten)]
        style: NameStyle,
    },
    /// Dump the line tables of a module
    Lines
    {
        module: PathBuf,
    },
    /// Debug information a module carries
    Kind
    {
        module: PathBuf,
    },
    /// Demangle a linkage name
    Demangle
    {
        name: String,
        /// Keep template arguments and parameter lists
        #[arg(long)]
        full: bool,
    },
}

fn parse_level(value: &str) -> Result<LogLevel, String>
{
    value.parse().map_err(|err: LoggingError| err.to_string())
}

fn parse_format(value: &str) -> Result<LogFormat, String>
{
    value.parse().map_err(|err: LoggingError| err.to_string())
}

fn parse_offset(value: &str) -> SymResult<u64>
{
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| SymError::InvalidParameter(format!("bad offset: {value}")))
}

fn main()
{
    let cli = Cli::parse();

    let mut options = match LoggingOptions::from_env() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };
    options.level = cli.log_level.or(options.level);
    options.format = cli.log_format.unwrap_or(options.format);
    let _log_guard = match init_logging_with(options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("Error: {e} ({})", e.code());
        process::exit(1);
    }
}

fn run(cli: Cli) -> SymResult<()>
{
    // Demangling needs no module, so no engine either.
    if let Commands::Demangle { name, full } = &cli.command {
        print_demangled(name, *full);
        return Ok(());
    }

    let mut config = EngineConfig::from_env();
    if let Some(root) = cli.debug_root {
        config = config.with_debug_root(root);
    }
    let engine = Engine::global();
    engine.init(config)?;
    let result = run_query(engine, cli.command);
    engine.exit()?;
    result
}

fn run_query(engine: &Engine, command: Commands) -> SymResult<()>
{
    match command {
        Commands::Lookup { module, offset, style } => {
            let offset = parse_offset(&offset)?;
            let info = engine.lookup_address(&module, offset, style.flags())?;
            println!("{info}");
            if info.line.is_none() {
                debug!(status = %info.status(), "no line information");
            }
        }
        Commands::Name { module, symbol } => {
            let offset = engine.lookup_name(&module, &symbol)?;
            println!("0x{offset:x}");
        }
        Commands::Enum { module, style } => {
            engine.enumerate_symbols_ex(&module, style.flags(), |info| {
                println!("0x{:08x} 0x{:08x} {}", info.start_offs, info.end_offs, info.name);
                true
            })?;
        }
        Commands::Search {
            module,
            pattern,
            full,
            style,
        } => {
            let mut hits = 0usize;
            engine.search_symbols(&module, &pattern, full, style.flags(), |name, offset| {
                hits += 1;
                println!("0x{offset:08x} {name}");
                true
            })?;
            if hits == 0 {
                return Err(SymError::SymbolNotFound);
            }
        }
        Commands::Lines { module } => {
            engine.enumerate_lines(&module, |entry| {
                println!(
                    "0x{:08x} {}:{} [{}]",
                    entry.addr,
                    entry.file.as_deref().unwrap_or("??"),
                    entry.line,
                    entry.cu_name.as_deref().unwrap_or("??")
                );
                true
            })?;
        }
        Commands::Kind { module } => {
            let info = engine.module_info(&module)?;
            println!("format:     {}", info.format);
            println!("load base:  0x{:x}", info.load_base);
            println!("debug kind: {}", describe_kind(info.debug_kind));
            if let Some(debug_file) = info.debug_file {
                println!("debug file: {}", debug_file.display());
            }
        }
        Commands::Demangle { name, full } => print_demangled(&name, full),
    }
    Ok(())
}

fn print_demangled(name: &str, full: bool)
{
    let flags = if full { QueryFlags::DEMANGLE_FULL } else { QueryFlags::DEMANGLE };
    println!("{}", demangle::demangle_to_string(name, flags).unwrap_or_else(|| name.to_string()));
}

fn describe_kind(kind: DebugKind) -> String
{
    let names: Vec<&str> = kind.iter_names().map(|(name, _)| name).collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(" | ")
    }
}
