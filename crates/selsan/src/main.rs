mod args;

use std::env;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use miette::NamedSource;

use selsan::ir::Module;
use selsan::pass::{self, PassOptions, SelectiveRun};
use selsan::pta::{Analysis, ValueFlowGraph};
use selsan::stats::Statistics;

use crate::args::Args;

const OUTPUT_EXTENSION: &str = "sel.sir";

fn init_logger(debug: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder.init();
}

fn load_module(path: &Path) -> Result<Option<Module>> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("could not read `{}`", path.display()))?;

    match selsan::parse::parse(&source) {
        Ok(module) => Ok(Some(module)),

        Err(e) => {
            let report = miette::Report::new(e)
                .with_source_code(NamedSource::new(path.display().to_string(), source));
            eprintln!("{report:?}");

            Ok(None)
        }
    }
}

fn print_value_flow(module: &Module, analysis: &Analysis, paths: &[String]) -> Result<()> {
    let starts = paths
        .iter()
        .map(|path| {
            module
                .find_value(path)
                .ok_or_else(|| anyhow!("the module has no value `{path}`"))
        })
        .collect::<Result<Vec<_>>>()?;

    let vfg = ValueFlowGraph::build(module, analysis);

    for (path, values) in paths.iter().zip(vfg.traverse_all(&starts)) {
        println!("{path} flows to:");

        for value in values {
            println!("  {}", module.display_value(value));
        }
    }

    Ok(())
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logger(args.debug);

    let Some(mut module) = load_module(&args.input)? else {
        return Ok(ExitCode::FAILURE);
    };

    if args.unsafe_counting {
        print!("{}", pass::count_unsafe(&module));

        return Ok(ExitCode::SUCCESS);
    }

    let mut stats = Statistics::new();
    let options = PassOptions {
        strategy: args.pta.into(),
        mode: args.mode.into(),
    };

    let outcome = pass::run(&mut module, &options, &mut stats)
        .context("could not build the points-to analysis")?;

    if let Some(SelectiveRun {
        analysis,
        selection,
    }) = outcome
    {
        if args.debug {
            eprintln!("unsafe objects:");

            for &value in selection.unsafe_objects.values() {
                eprintln!("  {}", module.display_value(value));
            }
        }

        if !args.value_flow.is_empty() {
            print_value_flow(&module, &analysis, &args.value_flow)?;
        }
    }

    if args.stats {
        eprint!("{stats}");
    }

    if !args.no_output {
        let output_path = args.input.with_extension(OUTPUT_EXTENSION);
        fs::write(&output_path, module.to_string())
            .with_context(|| format!("could not write `{}`", output_path.display()))?;
        info!("wrote {}", output_path.display());
    }

    Ok(ExitCode::SUCCESS)
}
