//! mask-op: edit a binary mask with a sequence of morphology commands.
//!
//! Commands run in the order they appear on the command line, and may
//! repeat:
//!
//! ```text
//! mask-op in.png out.png -n -i 2 -B -O 5
//! ```
//!
//! negates, insets by 2 (Euclidean), clears border-touching regions and
//! outsets by 5 (city-block). Negative widths swap inset and outset.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};
use vellum_pipeline::{DistanceNorm, MaskCommand, Raster};
use vellum_tools::ToolError;
use vellum_tools::args::Verbosity;

const NAME: &str = "mask-op";

/// Apply ordered morphology commands to a mask image.
#[derive(Parser)]
#[command(name = NAME, version)]
struct Cli {
    /// Input mask (nonzero is foreground).
    input: PathBuf,

    /// Output mask.
    output: PathBuf,

    /// Negate the mask.
    #[arg(
        short = 'n',
        long = "neg",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        action = ArgAction::Append
    )]
    neg: Vec<bool>,

    /// Clear foreground regions touching the border.
    #[arg(
        short = 'B',
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        action = ArgAction::Append
    )]
    border_fill: Vec<bool>,

    /// Inset by W (Euclidean).
    #[arg(short = 'i', long, value_name = "W", allow_negative_numbers = true)]
    inset: Vec<f64>,

    /// Inset by W (city-block).
    #[arg(short = 'I', long = "inset-L1", value_name = "W", allow_negative_numbers = true)]
    inset_l1: Vec<f64>,

    /// Outset by W (Euclidean).
    #[arg(short = 'o', long, value_name = "W", allow_negative_numbers = true)]
    outset: Vec<f64>,

    /// Outset by W (city-block).
    #[arg(short = 'O', long = "outset-L1", value_name = "W", allow_negative_numbers = true)]
    outset_l1: Vec<f64>,

    #[command(flatten)]
    verbosity: Verbosity,
}

impl Cli {
    fn command_count(&self) -> usize {
        self.neg.len()
            + self.border_fill.len()
            + self.inset.len()
            + self.inset_l1.len()
            + self.outset.len()
            + self.outset_l1.len()
    }
}

type Distanced = fn(f64) -> MaskCommand;

/// Recover the command-line order of every command argument.
///
/// Flags are appended rather than counted so every occurrence keeps its
/// own index.
fn ordered_commands(matches: &ArgMatches) -> Vec<MaskCommand> {
    let mut ordered: Vec<(usize, MaskCommand)> = Vec::new();

    for (id, command) in [
        ("neg", MaskCommand::Negate),
        ("border_fill", MaskCommand::ClearBorder),
    ] {
        if let Some(indices) = matches.indices_of(id) {
            ordered.extend(indices.map(|i| (i, command)));
        }
    }

    let distanced: [(&str, Distanced); 4] = [
        ("inset", |distance| MaskCommand::Inset {
            distance,
            norm: DistanceNorm::L2,
        }),
        ("inset_l1", |distance| MaskCommand::Inset {
            distance,
            norm: DistanceNorm::L1,
        }),
        ("outset", |distance| MaskCommand::Outset {
            distance,
            norm: DistanceNorm::L2,
        }),
        ("outset_l1", |distance| MaskCommand::Outset {
            distance,
            norm: DistanceNorm::L1,
        }),
    ];
    for (id, make) in distanced {
        if let (Some(indices), Some(values)) = (matches.indices_of(id), matches.get_many::<f64>(id)) {
            ordered.extend(indices.zip(values.map(|&d| make(d))));
        }
    }

    ordered.sort_by_key(|&(i, _)| i);
    ordered.into_iter().map(|(_, c)| c.normalized()).collect()
}

fn run(cli: &Cli, commands: &[MaskCommand]) -> Result<(), ToolError> {
    if commands.is_empty() {
        tracing::warn!("no mask commands given, copying input");
    }
    let mut mask = vellum_tools::read_gray(&cli.input)?;
    vellum_pipeline::morphology::apply_commands(&mut mask, commands)?;
    vellum_tools::save_output(&cli.output, Raster::Gray(mask))
}

fn main() -> ExitCode {
    let matches = Cli::command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };
    vellum_tools::init_logging(cli.verbosity.verbose);
    let commands = ordered_commands(&matches);
    debug_assert_eq!(commands.len(), cli.command_count());
    tracing::info!(count = commands.len(), "mask commands parsed");
    match run(&cli, &commands) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => vellum_tools::fail(NAME, &e),
    }
}
