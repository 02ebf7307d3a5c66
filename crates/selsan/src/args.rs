use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Strategy {
    #[default]
    Andersen,

    Steensgaard,

    DemandDriven,
}

impl From<Strategy> for selsan::pta::Strategy {
    fn from(value: Strategy) -> Self {
        match value {
            Strategy::Andersen => Self::Andersen,
            Strategy::Steensgaard => Self::Steensgaard,
            Strategy::DemandDriven => Self::DemandDriven,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    #[default]
    Selective,

    Baseline,

    Naive,
}

impl From<Mode> for selsan::pass::Mode {
    fn from(value: Mode) -> Self {
        match value {
            Mode::Selective => Self::Selective,
            Mode::Baseline => Self::Baseline,
            Mode::Naive => Self::Naive,
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Selective sanitizer instrumentation for .sir modules")]
pub struct Args {
    /// Points-to analysis used to propagate unsafety.
    #[arg(long, value_enum, default_value_t)]
    pub pta: Strategy,

    #[arg(long, value_enum, default_value_t)]
    pub mode: Mode,

    /// Report how much of the module is marked unsafe and exit.
    #[arg(long)]
    pub unsafe_counting: bool,

    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Do not write the instrumented module.
    #[arg(long)]
    pub no_output: bool,

    /// Print instruction and object statistics.
    #[arg(long)]
    pub stats: bool,

    /// Print the values a value may flow to (`@global` or `func/%local`).
    #[arg(long, value_name = "VALUE")]
    pub value_flow: Vec<String>,

    pub input: PathBuf,
}
