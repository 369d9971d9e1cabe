// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Command-line entry point: `sync` optimizes every configured template and
//! commits the result to the host firewall; `show` runs the same
//! optimization but only prints the resulting service documents.

use clap::{App, Arg, ArgMatches, SubCommand};
use failure::Fail;
use fwdsvc::config::Config;
use fwdsvc::error::Error;
use fwdsvc::service_set::ServiceSet;
use fwdsvc::{cache, logging, optimizer, process, sync, xml};
use slog::Logger;
use std::path::PathBuf;
use std::process::exit;

const DEFAULT_CONFIG_PATH: &str = "/etc/fwdsvc.toml";

fn main() {
    let matches = App::new("fwdsvc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Service-set optimizer and synchronizer for host firewall daemons")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Path to the configuration file")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Increase logging verbosity, repeatable"),
        )
        .subcommand(
            SubCommand::with_name("sync")
                .about("Optimize every configured template and commit it to the firewall")
                .arg(
                    Arg::with_name("watch")
                        .long("watch")
                        .help("After the first commit, re-run on every SIGHUP instead of exiting"),
                ),
        )
        .subcommand(
            SubCommand::with_name("show")
                .about("Print the optimized service XML documents without committing"),
        )
        .get_matches();

    let verbosity = logging::Verbosity::from_occurrences(matches.occurrences_of("verbose"));
    let logger = logging::build(verbosity);

    if let Err(e) = run(&matches, &logger) {
        log_error_chain(&logger, &e);
        exit(1);
    }
}

fn log_error_chain(logger: &Logger, e: &Error) {
    slog::error!(logger, "fatal error"; "error" => %e);
    for cause in e.causes().skip(1) {
        slog::error!(logger, "caused by"; "error" => %cause);
    }
}

fn run(matches: &ArgMatches, logger: &Logger) -> Result<(), Error> {
    let config_path = PathBuf::from(matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH));
    let config = Config::load(&config_path)?;
    let sets = build_service_sets(&config)?;

    match matches.subcommand() {
        ("show", Some(_)) => show(&sets),
        ("sync", Some(sync_matches)) => {
            let synchronizer = build_synchronizer(&config);
            let zones = config.zones();

            let commit_once = || -> Result<(), Error> {
                let report = synchronizer.commit(logger, &sets, &zones)?;
                slog::info!(logger, "commit finished";
                    "added" => report.added.len(),
                    "removed" => report.removed.len(),
                    "rewritten" => report.rewritten.len(),
                );
                Ok(())
            };

            commit_once()?;
            if sync_matches.is_present("watch") {
                process::watch_reload_signal(logger, commit_once)?;
            }
            Ok(())
        }
        _ => {
            eprintln!("no subcommand given; run with --help for usage");
            Ok(())
        }
    }
}

fn build_service_sets(config: &Config) -> Result<Vec<ServiceSet>, Error> {
    config
        .templates
        .iter()
        .map(|template_set| {
            let template = template_set.template_service()?;
            let targets = template_set.parsed_targets()?;
            optimizer::optimize(&template, targets)
        })
        .collect()
}

fn build_synchronizer(config: &Config) -> sync::Synchronizer {
    sync::Synchronizer::new(
        process::FirewallCmd::new(config.firewall_cmd.clone()),
        cache::ServiceCache::new(),
        config.system_dir.clone(),
        config.local_dir.clone(),
    )
}

fn show(sets: &[ServiceSet]) -> Result<(), Error> {
    for set in sets {
        for service in set.services() {
            println!("{}", xml::emit_service(service)?);
        }
    }
    Ok(())
}
