use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use hbs_precompiler_rs::emitter::helpers_module;
use hbs_precompiler_rs::{
    collect_partials, Config, Handlebars, HandlebarsPrecompiler, PluginOptions, TemplateCompiler,
};
use serde_json::{Map, Value};
use std::fs;

/// hbs-precompiler: A utility for precompiling Handlebars templates into ES modules
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Precompile a Handlebars template into an ES module
    Compile {
        /// Path to input Handlebars template
        #[clap(short, long)]
        input: String,

        /// Path to output module file to be created. Written to stdout if omitted
        #[clap(short, long)]
        output: Option<String>,

        /// Module id to compile the template as. Defaults to the input path
        #[clap(long)]
        id: Option<String>,

        /// Path to JSON file with plugin options
        #[clap(short, long)]
        config: Option<String>,

        /// Emit an empty source map and skip writing the .map file
        #[clap(long)]
        no_source_map: bool,
    },

    /// Write the helpers module that templates import their render wrapper from
    Helpers {
        /// Path to JSON file with plugin options
        #[clap(short, long)]
        config: Option<String>,

        /// Path to output module file to be created. Written to stdout if omitted
        #[clap(short, long)]
        output: Option<String>,
    },

    /// Print the names of the partials a template references, one per line
    Partials {
        /// Path to input Handlebars template
        #[clap(short, long)]
        input: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Compile {
            input,
            output,
            id,
            config,
            no_source_map,
        } => {
            let mut options = read_options(config.as_deref())?;
            if no_source_map {
                options.source_map = Some(Value::Bool(false));
            }
            compile(&input, output.as_deref(), id.as_deref(), options)
        }
        Commands::Helpers { config, output } => {
            let config = Config::new(read_options(config.as_deref())?)?;
            write_output(output.as_deref(), &helpers_module(&config))
        }
        Commands::Partials { input } => {
            let source = read_input(&input)?;
            let mut options = Map::new();
            options.insert("srcName".to_string(), Value::String(input.clone()));
            let ast = Handlebars.parse(&source, &options)?;
            for partial in collect_partials(&ast) {
                println!("{}", partial);
            }
            Ok(())
        }
    }
}

fn compile(
    input: &str,
    output: Option<&str>,
    id: Option<&str>,
    options: PluginOptions,
) -> anyhow::Result<()> {
    let source = read_input(input)?;
    let id = id.unwrap_or(input);
    let plugin = HandlebarsPrecompiler::new(options)?;

    let Some(result) = plugin.transform(&source, id)? else {
        bail!("{} is not matched by the template include patterns", id);
    };
    log::info!("Compiled {} ({} bytes)", id, result.code.len());

    write_output(output, &result.code)?;
    if let Some(output) = output {
        if plugin.config().source_maps_enabled() {
            let map_path = format!("{}.map", output);
            write_output(Some(&map_path), &result.map.to_json()?)?;
        }
    }
    Ok(())
}

fn read_options(path: Option<&str>) -> anyhow::Result<PluginOptions> {
    let Some(path) = path else {
        return Ok(PluginOptions::default());
    };
    let path = shellexpand::tilde(path);
    let json = fs::read_to_string(&*path)
        .with_context(|| format!("Failed to read options file: {}", path))?;
    PluginOptions::from_json(&json)
        .with_context(|| format!("Failed to parse options file as JSON: {}", path))
}

fn read_input(path: &str) -> anyhow::Result<String> {
    let path = shellexpand::tilde(path);
    fs::read_to_string(&*path).with_context(|| format!("Failed to read input file: {}", path))
}

fn write_output(path: Option<&str>, contents: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            let path = shellexpand::tilde(path);
            fs::write(&*path, contents)
                .with_context(|| format!("Failed to write output to {}", path))
        }
        None => {
            println!("{}", contents);
            Ok(())
        }
    }
}
