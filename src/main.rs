/// Shadowcall - rewrite and run module artifacts with deferred dispatch
use shadowcall::backend::bytecode::Module;
use shadowcall::config::{Config, CONFIG_FILE_NAME};
use shadowcall::loader::{self, Bootstrap};
use std::env;
use std::path::PathBuf;
use std::process;
use tracing::Level;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LOG_ENV: &str = "SHADOWCALL_LOG";

fn print_usage() {
    eprintln!("Shadowcall v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    shadowcall [OPTIONS] <COMMAND> <MODULE>");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("    rewrite <MODULE>     Write the shadow copy of MODULE (default: MODULE.shadow)");
    eprintln!("    run <MODULE>         Rewrite MODULE if needed and run its entry point");
    eprintln!("    disasm <MODULE>      Print a disassembly of MODULE");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help              Print this help message");
    eprintln!("    -V, --version           Print version information");
    eprintln!("    -o, --output <FILE>     Write the shadow module to FILE (rewrite only)");
    eprintln!("    -c, --config <FILE>     Read settings from FILE (default: ./{})", CONFIG_FILE_NAME);
    eprintln!("    -v, --verbose           Increase log verbosity (repeatable)");
    eprintln!("    --log-level <LEVEL>     One of error, warn, info, debug, trace");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}        Log level used when no flag is given", LOG_ENV);
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    shadowcall rewrite app.shc");
    eprintln!("    shadowcall -v run app.shc");
    eprintln!("    shadowcall disasm app.shc.shadow");
}

fn print_version() {
    println!("Shadowcall {}", VERSION);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Rewrite,
    Run,
    Disasm,
}

struct Options {
    command: Command,
    module: PathBuf,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    log_level: Option<Level>,
}

fn parse_level(s: &str) -> Result<Level, String> {
    s.parse::<Level>().map_err(|_| format!("Invalid log level: {}", s))
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut command = None;
    let mut module = None;
    let mut output = None;
    let mut config = None;
    let mut log_level = None;
    let mut verbosity = 0usize;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-V" | "--version" => {
                print_version();
                process::exit(0);
            }
            "-o" | "--output" => {
                i += 1;
                let file = args.get(i).ok_or("Missing output file after -o")?;
                output = Some(PathBuf::from(file));
            }
            "-c" | "--config" => {
                i += 1;
                let file = args.get(i).ok_or("Missing config file after --config")?;
                config = Some(PathBuf::from(file));
            }
            "--log-level" => {
                i += 1;
                let level = args.get(i).ok_or("Missing level after --log-level")?;
                log_level = Some(parse_level(level)?);
            }
            "-v" | "--verbose" => verbosity += 1,
            "-vv" => verbosity += 2,
            "-vvv" => verbosity += 3,
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            arg if command.is_none() => {
                command = Some(match arg {
                    "rewrite" => Command::Rewrite,
                    "run" => Command::Run,
                    "disasm" => Command::Disasm,
                    other => return Err(format!("Unknown command: {}", other)),
                });
            }
            arg => {
                if module.is_some() {
                    return Err("Multiple modules specified".to_string());
                }
                module = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let command = command.ok_or("Missing command")?;
    let module = module.ok_or("Missing module file")?;
    if output.is_some() && command != Command::Rewrite {
        return Err("--output is only valid with rewrite".to_string());
    }

    let log_level = log_level.or(match verbosity {
        0 => None,
        1 => Some(Level::INFO),
        2 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    });

    Ok(Options {
        command,
        module,
        output,
        config,
        log_level,
    })
}

fn init_logging(level: Option<Level>) -> Result<(), String> {
    let level = match level {
        Some(level) => level,
        None => match env::var(LOG_ENV) {
            Ok(value) => parse_level(&value)?,
            Err(_) => Level::WARN,
        },
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, String> {
    let config = match path {
        Some(path) => Config::from_file(path),
        None => Config::discover("."),
    };
    config.map_err(|e| e.to_string())
}

fn execute(options: &Options, config: &Config) -> Result<(), String> {
    match options.command {
        Command::Rewrite => {
            let written = match &options.output {
                Some(output) => loader::rewrite_file_to(&options.module, output, &config.rewrite),
                None => loader::rewrite_file(&options.module, &config.rewrite),
            }
            .map_err(|e| e.to_string())?;
            println!("{}", written.display());
        }
        Command::Run => {
            let value = Bootstrap::from_config(config)
                .run(&options.module)
                .map_err(|e| e.to_string())?;
            println!("{}", value);
        }
        Command::Disasm => {
            let module = Module::read_from(&options.module).map_err(|e| e.to_string())?;
            print!("{}", module.disassemble());
        }
    }
    Ok(())
}

fn main() {
    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(options.log_level) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let config = match load_config(options.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = execute(&options, &config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
