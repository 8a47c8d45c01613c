//! formula-slicer CLI - Compile query documents to multi-level SQL
//!
//! Usage:
//!   formula-slicer compile <query.json> [--dialect <dialect>] [--output sql|plan|json] [--config <file>]
//!   formula-slicer functions [--dialect <dialect>]
//!
//! Examples:
//!   formula-slicer compile queries/region_share.json --dialect postgres
//!   formula-slicer compile queries/region_share.json --output json
//!   formula-slicer functions --dialect mysql

use clap::{Parser, Subcommand, ValueEnum};
use formula_slicer::compile::{compile_query, CompileOptions, CompileOutput, QueryInput};
use formula_slicer::config::Settings;
use formula_slicer::registry::{Registry, Scopes};
use formula_slicer::sql::Dialect;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "formula-slicer")]
#[command(about = "Compiles typed formulas into multi-level, multi-dialect SQL")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the usual discovery locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a JSON query document
    Compile {
        /// Path to the query document
        file: PathBuf,

        /// Source dialect (overrides the settings file)
        #[arg(short, long)]
        dialect: Option<DialectArg>,

        /// Output format
        #[arg(short, long, default_value = "sql")]
        output: OutputFormat,
    },

    /// List the functions available in a dialect
    Functions {
        #[arg(short, long, default_value = "postgres")]
        dialect: DialectArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
    Tsql,
    Duckdb,
    Clickhouse,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Duckdb => Dialect::DuckDb,
            DialectArg::Clickhouse => Dialect::ClickHouse,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// SQL, one statement when possible
    Sql,
    /// Level and query summary
    Plan,
    /// The compiled plan as JSON
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Settings error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings);

    match cli.command {
        Commands::Compile {
            file,
            dialect,
            output,
        } => cmd_compile(&settings, file, dialect, output),
        Commands::Functions { dialect } => cmd_functions(dialect.into()),
    }
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = settings
            .logging
            .filter
            .clone()
            .unwrap_or_else(|| "formula_slicer=warn".to_string());
        EnvFilter::new(directive)
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_compile(
    settings: &Settings,
    file: PathBuf,
    dialect: Option<DialectArg>,
    output: OutputFormat,
) -> ExitCode {
    let source = match fs::read_to_string(&file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let input = match QueryInput::from_json(&source) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("Error in '{}': {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut options = CompileOptions::from_settings(settings);
    if let Some(dialect) = dialect {
        options = options.with_dialect(dialect.into());
    }
    let options = options.with_render(matches!(output, OutputFormat::Sql));

    let registry = Registry::default_shared();
    let compiled = match compile_query(&input, &registry, &options) {
        Ok(compiled) => compiled,
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match output {
        OutputFormat::Sql => print_sql(&compiled),
        OutputFormat::Plan => print_plan(&compiled),
        OutputFormat::Json => match serde_json::to_string_pretty(&compiled.plan) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to serialize plan: {}", e);
                return ExitCode::FAILURE;
            }
        },
    }
    ExitCode::SUCCESS
}

fn print_sql(compiled: &CompileOutput) {
    if let Some(sql) = &compiled.nested_sql {
        println!("{}", sql);
        return;
    }
    for query in &compiled.queries {
        println!("-- {} ({:?}, {})", query.id, query.level_type, query.dialect);
        println!("{};", query.sql);
        println!();
    }
}

fn print_plan(compiled: &CompileOutput) {
    println!("Columns:");
    for column in &compiled.columns {
        let mut line = format!("  - {}: {}", column.alias, column.info.data_type);
        if let Some(tz) = &column.info.params.timezone {
            line.push_str(&format!(" tz={}", tz));
        }
        if let Some(precision) = column.info.params.precision {
            line.push_str(&format!(" precision={}", precision));
        }
        println!("{}", line);
    }
    for (i, level) in compiled.plan.levels.iter().enumerate() {
        println!("Level {} ({:?}):", i, level.level_type);
        for query in &level.queries {
            let froms: Vec<_> = query.joined_from.ids().collect();
            println!("  - {} from [{}]", query.id, froms.join(", "));
            println!("      select: {}", query.column_names().join(", "));
            if !query.group_by.is_empty() {
                let dims: Vec<_> = query.group_by.iter().map(|f| f.alias.as_str()).collect();
                println!("      group by: {}", dims.join(", "));
            }
        }
    }
}

fn cmd_functions(dialect: Dialect) -> ExitCode {
    let registry = Registry::default_shared();
    let functions = registry.functions_for(dialect);

    println!("Functions for {}:", dialect);
    for def in functions {
        let mut kinds = Vec::new();
        if def.is_window {
            kinds.push("window");
        }
        if def.scopes.contains(Scopes::AGGREGATE) {
            kinds.push("aggregate");
        }
        if def.scopes.contains(Scopes::SUPPORTS_LOD) {
            kinds.push("lod");
        }
        if kinds.is_empty() {
            println!("  - {}", def.name);
        } else {
            println!("  - {} ({})", def.name, kinds.join(", "));
        }
    }
    ExitCode::SUCCESS
}
