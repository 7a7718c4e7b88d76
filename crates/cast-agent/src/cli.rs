use std::path::PathBuf;

use anyhow::{Context, Result};
use cast_core::AgentConfig;
use clap::{value_parser, Arg, ArgMatches, Command};

use crate::agent::{Agent, Kind};

pub fn build_cli() -> Command {
    Command::new("cast-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect and manage the resources of a Cast deployment agent")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file layered over the global one"),
        )
        .subcommand(Command::new("config").about("Print the effective configuration"))
        .subcommand(
            Command::new("list")
                .about("Print the state of every resource of a kind")
                .arg(kind_arg()),
        )
        .subcommand(
            Command::new("get")
                .about("Print the state of one resource")
                .arg(kind_arg())
                .arg(name_arg()),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove one resource and print the finished job")
                .arg(kind_arg())
                .arg(name_arg()),
        )
}

fn kind_arg() -> Arg {
    Arg::new("kind")
        .required(true)
        .value_parser(Kind::NAMES)
        .help("Resource kind")
}

fn name_arg() -> Arg {
    Arg::new("name").required(true).help("Resource name")
}

pub async fn dispatch(matches: &ArgMatches, config: &AgentConfig) -> Result<()> {
    match matches.subcommand() {
        Some(("config", _)) => {
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
        Some(("list", sub_m)) => {
            let agent = Agent::start(config).await?;
            let states = agent.list(kind(sub_m)?).await?;
            print_json(&states)
        }
        Some(("get", sub_m)) => {
            let agent = Agent::start(config).await?;
            let state = agent.get(kind(sub_m)?, name(sub_m)?).await?;
            print_json(&state)
        }
        Some(("remove", sub_m)) => {
            let agent = Agent::start(config).await?;
            let view = agent.remove(kind(sub_m)?, name(sub_m)?).await?;
            print_json(&view)?;
            match view.result {
                Some(cast_core::jobs::JobResultView::Error(err)) => anyhow::bail!(err),
                _ => Ok(()),
            }
        }
        _ => anyhow::bail!("Unknown command. Run 'cast-agent --help' for usage."),
    }
}

fn kind(matches: &ArgMatches) -> Result<Kind> {
    let name = matches
        .get_one::<String>("kind")
        .context("Missing resource kind")?;
    Kind::parse(name)
}

fn name(matches: &ArgMatches) -> Result<&str> {
    matches
        .get_one::<String>("name")
        .map(String::as_str)
        .context("Missing resource name")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
