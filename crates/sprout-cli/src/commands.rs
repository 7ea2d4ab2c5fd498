//! CLI command implementations

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use colored::Colorize;
use sprout_core::config::CONFIG_FILE_NAMES;
use sprout_core::{
    CompileError, ConfigLoader, Grammar, InterpretationValue, Interpreter, Matrix, Operations,
    Result, SproutConfig, SproutError, Step, Value, inline_grammar, parse_grammar, print_grammar,
    run_once, split, trim_grammar,
};
use tracing::{debug, info};

use crate::ConfigFormat;

/// Which normal form `normalize` prints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeMode {
    Split,
    Inline,
}

fn load_config(config_path: Option<PathBuf>) -> Result<SproutConfig> {
    ConfigLoader::load(config_path.as_deref(), None)
}

fn read_grammar(path: &Path) -> Result<(String, Grammar)> {
    let source = std::fs::read_to_string(path).map_err(|e| SproutError::io_error(path, e))?;
    let grammar =
        parse_grammar(&source).inspect_err(|e| debug!("{}: {}", path.display(), e))?;
    Ok((source, grammar))
}

/// Format command implementation
pub async fn fmt_command(
    files: Vec<PathBuf>,
    check: bool,
    write: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut unformatted = Vec::new();

    for file in &files {
        let (source, grammar) = read_grammar(file)?;
        let grammar = if config.formatter.trim {
            trim_grammar(&grammar)
        } else {
            grammar
        };
        let formatted = print_grammar(&grammar);

        if check {
            if formatted != source {
                unformatted.push(file.clone());
            }
        } else if write {
            if formatted != source {
                std::fs::write(file, &formatted).map_err(|e| SproutError::io_error(file, e))?;
                info!("Formatted {}", file.display());
            }
        } else {
            print!("{formatted}");
        }
    }

    if check {
        for file in &unformatted {
            println!("{} {}", "would reformat".yellow(), file.display());
        }
        if !unformatted.is_empty() {
            println!(
                "{} of {} file{} need formatting",
                unformatted.len(),
                files.len(),
                if files.len() == 1 { "" } else { "s" }
            );
            std::process::exit(1);
        }
        println!("{} All files are formatted correctly", "✓".green());
    }

    Ok(())
}

#[derive(Default)]
struct Identifiers {
    symbols: BTreeSet<String>,
    operations: BTreeSet<String>,
}

fn collect_identifiers(step: &Step, found: &mut Identifiers) {
    match step {
        Step::Symbol { name } => {
            found.symbols.insert(name.clone());
        }
        Step::Operation { name, .. } => {
            found.operations.insert(name.clone());
        }
        _ => {}
    }
    for child in step.children() {
        collect_identifiers(child, found);
    }
}

/// Check command implementation
///
/// Keeps going after a file fails to parse and reports the first problem
/// once every file has been checked.
pub async fn check_command(files: Vec<PathBuf>, _config_path: Option<PathBuf>) -> Result<()> {
    let mut first_error: Option<SproutError> = None;

    for file in &files {
        let grammar = match read_grammar(file) {
            Ok((_, grammar)) => grammar,
            Err(err) if err.is_recoverable() => {
                eprintln!("{}: {}", file.display(), err);
                first_error.get_or_insert(err);
                continue;
            }
            Err(err) => return Err(err),
        };
        let mut found = Identifiers::default();
        for (_, step) in grammar.rules() {
            collect_identifiers(step, &mut found);
        }

        println!("{}", file.display().to_string().bold());
        let rules: Vec<&str> = grammar.names().collect();
        println!("  rules: {}", rules.join(", "));
        println!(
            "  operations: {}",
            found.operations.iter().cloned().collect::<Vec<_>>().join(", ")
        );

        let unknown: Vec<&String> = found
            .symbols
            .iter()
            .filter(|symbol| !grammar.contains(symbol))
            .collect();
        for symbol in &unknown {
            println!("  {} unknown symbol '{}'", "error:".red(), symbol);
        }
        if let Some(symbol) = unknown.first()
            && first_error.is_none()
        {
            first_error = Some(
                CompileError::UnknownSymbol {
                    name: symbol.to_string(),
                }
                .into(),
            );
        }
        debug!(
            "{}: {} rules, {} symbols, {} operations",
            file.display(),
            grammar.len(),
            found.symbols.len(),
            found.operations.len()
        );
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    println!("{} No problems found", "✓".green());
    Ok(())
}

/// Normalize command implementation
pub async fn normalize_command(
    file: PathBuf,
    mode: NormalizeMode,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let (_, grammar) = read_grammar(&file)?;

    let normalized = match mode {
        NormalizeMode::Split => split(&grammar, &config.normalize.rule_prefix),
        NormalizeMode::Inline => trim_grammar(&inline_grammar(&grammar)?),
    };
    print!("{}", print_grammar(&normalized));
    Ok(())
}

fn input_matrix(input: &str) -> Result<Matrix<InterpretationValue<Value>>> {
    let parsed: serde_json::Value = serde_json::from_str(input)?;
    let matrix = match parsed {
        serde_json::Value::Array(items) => Matrix::from_list(
            items
                .into_iter()
                .map(|item| serde_json::from_value(item).map(InterpretationValue::new))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        ),
        scalar => Matrix::Leaf(InterpretationValue::new(serde_json::from_value(scalar)?)),
    };
    Ok(matrix)
}

/// Eval command implementation
pub async fn eval_command(
    file: PathBuf,
    input: String,
    seed: Option<u64>,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let (_, grammar) = read_grammar(&file)?;

    let mut interpreter_config = config.interpreter.clone();
    if seed.is_some() {
        interpreter_config.seed = seed;
    }
    let interpreter = Interpreter::with_config(grammar, interpreter_config, config.cache.clone());
    let pipeline = interpreter.compile(&Operations::new())?;
    let output = run_once(&pipeline, input_matrix(&input)?).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if output.is_empty() {
        println!("(empty)");
    }
    for (index, leaf) in output.entries() {
        let position = index
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        if leaf.terminated {
            println!("[{position}] {} {}", leaf.value, "(returned)".dimmed());
        } else {
            println!("[{position}] {}", leaf.value);
        }
    }
    Ok(())
}

/// Config init command implementation
pub async fn config_init_command(format: ConfigFormat, force: bool) -> Result<()> {
    debug!("Initializing configuration file with format: {:?}", format);

    let filename = match format {
        ConfigFormat::Toml => CONFIG_FILE_NAMES[0],
        ConfigFormat::Json => CONFIG_FILE_NAMES[2],
    };
    let config_path = PathBuf::from(filename);

    if config_path.exists() && !force {
        return Err(SproutError::config_error(format!(
            "Configuration file '{filename}' already exists. Use --force to overwrite."
        )));
    }

    let config = SproutConfig::default();
    let content = match format {
        ConfigFormat::Toml => config.to_toml()?,
        ConfigFormat::Json => config.to_json()?,
    };
    std::fs::write(&config_path, content).map_err(|e| SproutError::io_error(&config_path, e))?;

    println!("{} Created configuration file: {filename}", "✓".green());
    Ok(())
}

/// Config show command implementation
pub async fn config_show_command(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("{}", config.to_toml()?);
    Ok(())
}
