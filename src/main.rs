//! Command-line front-end for the CLAP plugin validator.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use clap_validator::discovery;
use clap_validator::library::PluginLibrary;
use clap_validator::suite;
use clap_validator::validator::{validate, ValidatorSettings};

#[derive(Parser)]
#[command(
    name = "clap-validator",
    version,
    about = "A conformance validator for CLAP audio plugins"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one or more CLAP plugins.
    Validate(ValidateArgs),
    /// List installed plugins, available tests, or presets.
    #[command(subcommand)]
    List(ListCommand),
}

#[derive(Args)]
struct ValidateArgs {
    /// Paths to one or more .clap plugin libraries.
    paths: Vec<PathBuf>,
    /// Only test the plugin with the specified ID.
    #[arg(long)]
    plugin_id: Option<String>,
    /// Only run tests whose name matches this case-insensitive regular
    /// expression. Patterns that fail to compile are used as literal
    /// substrings instead.
    #[arg(long = "test")]
    test_filter: Option<String>,
    /// Invert the test filter.
    #[arg(long)]
    invert_filter: bool,
    /// Output the results as JSON.
    #[arg(long)]
    json: bool,
    /// Only print tests that failed or warned.
    #[arg(long)]
    only_failed: bool,
    /// Run the plugins inside the validator's own process. This is currently
    /// the only supported mode.
    #[arg(long)]
    in_process: bool,
}

#[derive(Subcommand)]
enum ListCommand {
    /// List all installed CLAP plugins.
    Plugins {
        #[arg(long)]
        json: bool,
    },
    /// List all available test cases.
    Tests {
        #[arg(long)]
        json: bool,
    },
    /// List all available presets. Not yet implemented.
    Presets {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Usage errors exit with status 1; --help and --version are not errors.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match cli.command {
        Commands::Validate(args) => {
            if args.paths.is_empty() {
                eprintln!("Error: No plugin paths specified");
                return ExitCode::from(1);
            }

            let settings = ValidatorSettings {
                paths: args.paths,
                plugin_id: args.plugin_id,
                test_filter: args.test_filter,
                invert_filter: args.invert_filter,
                json: args.json,
                only_failed: args.only_failed,
                in_process: args.in_process,
            };

            let tally = validate(&settings);
            if tally.has_failures() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Commands::List(ListCommand::Plugins { json }) => report_errors(list_plugins(json)),
        Commands::List(ListCommand::Tests { json }) => report_errors(list_tests(json)),
        Commands::List(ListCommand::Presets { json }) => report_errors(list_presets(json)),
    }
}

fn report_errors(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

#[derive(Serialize)]
struct InstalledPlugin {
    path: String,
    id: String,
    name: String,
    version: String,
    vendor: String,
}

fn list_plugins(json: bool) -> Result<()> {
    let search_paths = discovery::plugin_search_paths();
    let plugin_paths = discovery::find_plugins(&search_paths);

    let mut plugins = Vec::new();
    for path in &plugin_paths {
        let metadata = PluginLibrary::load(path).and_then(|library| library.metadata());
        match metadata {
            Ok(metadata) => {
                for plugin in metadata.plugins {
                    plugins.push(InstalledPlugin {
                        path: path.display().to_string(),
                        id: plugin.id,
                        name: plugin.name,
                        version: plugin.version.unwrap_or_default(),
                        vendor: plugin.vendor.unwrap_or_default(),
                    });
                }
            }
            Err(err) => eprintln!("Warning: Could not load {}: {err}", path.display()),
        }
    }

    if json {
        let document = serde_json::json!({ "plugins": plugins });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!("Installed CLAP plugins:");
    println!();
    for plugin in &plugins {
        print!("  {}", plugin.name);
        if !plugin.version.is_empty() {
            print!(" v{}", plugin.version);
        }
        if !plugin.vendor.is_empty() {
            print!(" by {}", plugin.vendor);
        }
        println!();
        println!("    ID: {}", plugin.id);
        println!("    Path: {}", plugin.path);
        println!();
    }
    if plugins.is_empty() {
        println!("  No plugins found.");
    }

    Ok(())
}

fn list_tests(json: bool) -> Result<()> {
    let library_tests = suite::library::all_tests();
    let plugin_tests = suite::plugin::all_tests();

    if json {
        let to_map = |tests: &[suite::TestCaseInfo]| -> serde_json::Map<String, serde_json::Value> {
            tests
                .iter()
                .map(|test| (test.name.to_string(), test.description.clone().into()))
                .collect()
        };
        let document = serde_json::json!({
            "plugin-library-tests": to_map(&library_tests),
            "plugin-tests": to_map(&plugin_tests),
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!("Plugin library tests:");
    for test in &library_tests {
        println!("  {}", test.name);
        println!("    {}", test.description);
        println!();
    }
    println!("Plugin tests:");
    for test in &plugin_tests {
        println!("  {}", test.name);
        println!("    {}", test.description);
        println!();
    }

    Ok(())
}

fn list_presets(json: bool) -> Result<()> {
    if json {
        let document =
            serde_json::json!({ "presets": [], "note": "Preset discovery not yet implemented" });
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        println!("Preset discovery not yet implemented.");
    }

    Ok(())
}
