use std::io::stdout;

use anyhow::Result;
use clap::{crate_version, value_parser, Arg, Command};
use clap_complete::{generate, Shell};

mod subcommands;

pub mod traits;
use traits::GraphormerApp;

fn main() -> Result<()> {
    // Known subapplications.
    let apps = vec![subcommands::ForwardApp::app()];

    env_logger::init();

    let cli = Command::new("graphormer")
        .about("Graphormer encoder layers")
        .version(crate_version!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommands(apps)
        .subcommand(
            Command::new("completions")
                .about("Generate completion scripts for your shell")
                .arg_required_else_help(true)
                .arg(Arg::new("shell").value_parser(value_parser!(Shell))),
        );
    let matches = cli.clone().get_matches();

    match matches.subcommand() {
        Some(("completions", completion_matches)) => {
            if let Some(shell) = completion_matches.get_one::<Shell>("shell") {
                write_completion_script(cli, *shell);
            }
            Ok(())
        }
        Some(("forward", forward_matches)) => subcommands::ForwardApp::parse(forward_matches)?.run(),
        _unknown => unreachable!(),
    }
}

fn write_completion_script(mut cli: Command, shell: Shell) {
    generate(shell, &mut cli, "graphormer", &mut stdout());
}
