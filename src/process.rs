// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! A thin wrapper around the external firewall control program
//! (`firewall-cmd` by default), its `--list-all-zones` output parser, and an
//! optional `SIGHUP` watcher for re-running a commit on demand.

use crate::error::Error;
use regex::Regex;
use slog::{debug, error, info, Logger};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;

/// The external-control-program collaborator [`sync::Synchronizer`] talks
/// to, factored out as a trait so tests can substitute a recording fake in
/// place of actually spawning `firewall-cmd`.
///
/// [`sync::Synchronizer`]: crate::sync::Synchronizer
pub trait FirewallControl {
    /// Queries the per-zone service listing.
    fn list_all_zones(&self, logger: &Logger) -> Result<BTreeMap<String, BTreeSet<String>>, Error>;
    /// Permanently enables `service` in `zone`.
    fn add_service(&self, logger: &Logger, zone: &str, service: &str) -> Result<(), Error>;
    /// Permanently disables `service` in `zone`.
    fn remove_service(&self, logger: &Logger, zone: &str, service: &str) -> Result<(), Error>;
    /// Reloads the daemon so permanent changes take effect at runtime.
    fn reload(&self, logger: &Logger) -> Result<(), Error>;
}

/// Invokes the external control program, serializing every call through an
/// owned commit lock so two concurrent `sync`s never interleave their
/// invocations.
#[derive(Debug)]
pub struct FirewallCmd {
    program: PathBuf,
    commit_lock: Mutex<()>,
}

impl FirewallCmd {
    /// Builds a handle that invokes `program` (e.g. `/usr/bin/firewall-cmd`).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        FirewallCmd {
            program: program.into(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Runs `--permanent --list-all-zones` and parses its output into a map
    /// of zone name to the set of services currently enabled in it.
    pub fn list_all_zones(&self, logger: &Logger) -> Result<BTreeMap<String, BTreeSet<String>>, Error> {
        let output = self.run(logger, &["--permanent", "--list-all-zones"])?;
        Ok(parse_list_all_zones(&output))
    }

    /// Runs `--permanent --zone=<zone> --add-service=<service>`.
    pub fn add_service(&self, logger: &Logger, zone: &str, service: &str) -> Result<(), Error> {
        let zone_arg = format!("--zone={}", zone);
        let service_arg = format!("--add-service={}", service);
        self.run(logger, &["--permanent", &zone_arg, &service_arg])
            .map(|_| ())
    }

    /// Runs `--permanent --zone=<zone> --remove-service=<service>`.
    pub fn remove_service(&self, logger: &Logger, zone: &str, service: &str) -> Result<(), Error> {
        let zone_arg = format!("--zone={}", zone);
        let service_arg = format!("--remove-service={}", service);
        self.run(logger, &["--permanent", &zone_arg, &service_arg])
            .map(|_| ())
    }

    /// Runs `--reload`.
    pub fn reload(&self, logger: &Logger) -> Result<(), Error> {
        self.run(logger, &["--reload"]).map(|_| ())
    }

    fn run(&self, logger: &Logger, args: &[&str]) -> Result<String, Error> {
        let _guard = self.commit_lock.lock().unwrap();
        debug!(logger, "invoking control program";
            "program" => %self.program.display(),
            "args" => args.join(" "),
        );

        let output = Command::new(&self.program).args(args).output().map_err(|e| {
            Error::ExternalFailure(format!(
                "failed to spawn '{}': {}",
                self.program.display(),
                e
            ))
        })?;

        if !output.status.success() {
            return Err(Error::ExternalFailure(format!(
                "'{} {}' exited with {}: {}",
                self.program.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim(),
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl FirewallControl for FirewallCmd {
    fn list_all_zones(&self, logger: &Logger) -> Result<BTreeMap<String, BTreeSet<String>>, Error> {
        FirewallCmd::list_all_zones(self, logger)
    }

    fn add_service(&self, logger: &Logger, zone: &str, service: &str) -> Result<(), Error> {
        FirewallCmd::add_service(self, logger, zone, service)
    }

    fn remove_service(&self, logger: &Logger, zone: &str, service: &str) -> Result<(), Error> {
        FirewallCmd::remove_service(self, logger, zone, service)
    }

    fn reload(&self, logger: &Logger) -> Result<(), Error> {
        FirewallCmd::reload(self, logger)
    }
}

/// Parses the line-oriented output of `--list-all-zones` (§6): zones begin
/// at column 0, optionally suffixed with ` (active)`; an indented `
/// services:` line enumerates that zone's space-separated service names.
fn parse_list_all_zones(output: &str) -> BTreeMap<String, BTreeSet<String>> {
    let zone_header = Regex::new(r"^(\S+)(?:\s+\(active\))?\s*$").unwrap();
    let mut zones: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        let is_indented = line.starts_with(' ') || line.starts_with('\t');
        if !is_indented && !line.trim().is_empty() {
            if let Some(caps) = zone_header.captures(line) {
                let name = caps[1].to_owned();
                zones.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
        }

        if let Some(zone) = &current {
            if let Some(rest) = line.trim_start().strip_prefix("services:") {
                let entry = zones.entry(zone.clone()).or_default();
                entry.extend(rest.split_whitespace().map(str::to_owned));
            }
        }
    }

    zones
}

/// Blocks the calling thread, re-invoking `on_signal` once per received
/// `SIGHUP`. Intended for the CLI's `sync` subcommand when run as a
/// long-lived process; never returns under normal operation.
pub fn watch_reload_signal<F>(logger: &Logger, mut on_signal: F) -> Result<(), Error>
where
    F: FnMut() -> Result<(), Error>,
{
    let signals = signal_hook::iterator::Signals::new(&[signal_hook::SIGHUP]).map_err(|e| {
        Error::ExternalFailure(format!("failed to register SIGHUP handler: {}", e))
    })?;

    for _ in signals.forever() {
        info!(logger, "received SIGHUP, re-running commit");
        if let Err(e) = on_signal() {
            error!(logger, "commit triggered by SIGHUP failed"; "error" => %e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_zone_with_active_suffix_and_services() {
        let output = "\
public (active)
  target: default
  icmp-block-inversion: no
  interfaces: eth0
  sources:
  services: ssh dhcpv6-client
  ports:
";
        let zones = parse_list_all_zones(output);
        let public = zones.get("public").expect("public zone present");
        assert!(public.contains("ssh"));
        assert!(public.contains("dhcpv6-client"));
    }

    #[test]
    fn parses_multiple_zones() {
        let output = "\
public
  services: ssh
internal (active)
  services: ssh mdns
";
        let zones = parse_list_all_zones(output);
        assert_eq!(zones.len(), 2);
        assert_eq!(zones["internal"].len(), 2);
    }

    #[test]
    fn zone_with_no_services_line_is_empty() {
        let output = "dmz\n  target: DROP\n";
        let zones = parse_list_all_zones(output);
        assert!(zones["dmz"].is_empty());
    }

    #[test]
    fn empty_output_yields_no_zones() {
        assert!(parse_list_all_zones("").is_empty());
    }
}
