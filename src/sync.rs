// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! The service-set synchronizer: reconciles a desired set of [`ServiceSet`]s
//! against the on-disk service directories and the live firewall
//! configuration (§4.6).

use crate::cache::ServiceCache;
use crate::error::Error;
use crate::process::{FirewallCmd, FirewallControl};
use crate::service_set::ServiceSet;
use crate::xml;
use regex::Regex;
use slog::{info, Logger};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

/// What one `commit` call actually did, for logging and for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// `zone:service` pairs that were permanently enabled.
    pub added: Vec<String>,
    /// `zone:service` pairs that were permanently disabled.
    pub removed: Vec<String>,
    /// Service file stems that were written or deleted on disk.
    pub rewritten: Vec<String>,
}

impl SyncReport {
    /// `true` iff nothing changed: no additions, removals, or rewrites.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.rewritten.is_empty()
    }
}

/// Reconciles a collection of [`ServiceSet`]s against the host, holding the
/// external-control-program collaborator, the file-parse cache, and the
/// configured service directories.
pub struct Synchronizer<F: FirewallControl = FirewallCmd> {
    firewall: F,
    cache: ServiceCache,
    system_dir: PathBuf,
    local_dir: PathBuf,
}

fn managed_suffix_pattern() -> Regex {
    Regex::new(r"^(?P<base>.+)-(?P<idx>[0-9]+)$").unwrap()
}

impl<F: FirewallControl> Synchronizer<F> {
    /// Builds a synchronizer over the given collaborators and directories.
    pub fn new(firewall: F, cache: ServiceCache, system_dir: PathBuf, local_dir: PathBuf) -> Self {
        Synchronizer {
            firewall,
            cache,
            system_dir,
            local_dir,
        }
    }

    /// Runs the §4.6 algorithm: refuses duplicate template names, removes
    /// services this system used to manage but no longer wants, rewrites
    /// local overrides, reloads, adds missing services per zone, and
    /// reloads again if anything was added.
    pub fn commit(&self, logger: &Logger, sets: &[ServiceSet], zones: &[String]) -> Result<SyncReport, Error> {
        let mut report = SyncReport::default();

        // 1. Refuse duplicate template names.
        let mut template_names: BTreeSet<&str> = BTreeSet::new();
        for set in sets {
            if !template_names.insert(set.template().name()) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate template name '{}' across input service sets",
                    set.template().name()
                )));
            }
        }

        self.check_no_conflicting_system_overrides(&template_names)?;

        // 2. Collect the union of service names to install.
        let mut desired_names: BTreeSet<String> = BTreeSet::new();
        let mut desired: BTreeMap<String, &crate::service::Service> = BTreeMap::new();
        for set in sets {
            for (idx, service) in set.services().iter().enumerate() {
                let name = ServiceSet::service_name(set.template().name(), idx + 1);
                desired_names.insert(name.clone());
                desired.insert(name, service);
            }
        }

        // 3. Query current per-zone services.
        let current = self.firewall.list_all_zones(logger)?;

        // 4. Remove services matching our templates that are no longer
        //    desired.
        let pattern = managed_suffix_pattern();
        let mut changed_runtime = false;
        for zone in zones {
            let enabled = current.get(zone).cloned().unwrap_or_default();
            for service_name in &enabled {
                if desired_names.contains(service_name) {
                    continue;
                }
                let base: &str = pattern
                    .captures(service_name)
                    .map(|caps| caps.name("base").unwrap().as_str())
                    .unwrap_or(service_name.as_str());
                if !template_names.contains(base) {
                    continue;
                }
                self.firewall.remove_service(logger, zone, service_name)?;
                report.removed.push(format!("{}:{}", zone, service_name));
                changed_runtime = true;
            }
        }

        // 5. Delete stale local `<template>-<k>.xml` files.
        if self.local_dir.is_dir() {
            for path in glob_xml_files(&self.local_dir)? {
                let stem = match path.file_stem().and_then(|s| s.to_str()) {
                    Some(stem) => stem.to_owned(),
                    None => continue,
                };
                let base = match pattern.captures(&stem) {
                    Some(caps) => caps.name("base").unwrap().as_str().to_owned(),
                    None => continue,
                };
                if template_names.contains(base.as_str()) && !desired_names.contains(&stem) {
                    std::fs::remove_file(&path)?;
                    self.cache.invalidate(&path);
                    report.rewritten.push(stem);
                    changed_runtime = true;
                }
            }
        }

        // 6. Write or elide a local override for each desired service.
        for (name, service) in &desired {
            let local_path = self.local_dir.join(format!("{}.xml", name));
            let is_root_of_its_set = !pattern.is_match(name);

            if is_root_of_its_set {
                let system_path = self.system_dir.join(format!("{}.xml", name));
                if let Some(system_service) = self.cache.load(logger, &system_path)? {
                    if &system_service == *service {
                        if local_path.exists() {
                            std::fs::remove_file(&local_path)?;
                            self.cache.invalidate(&local_path);
                            report.rewritten.push(name.clone());
                            changed_runtime = true;
                        }
                        continue;
                    }
                }
            }

            let unchanged = self
                .cache
                .load(logger, &local_path)?
                .map(|existing| &existing == *service)
                .unwrap_or(false);
            if unchanged {
                continue;
            }

            let rendered = xml::emit_service(service)?;
            write_atomically(&local_path, rendered.as_bytes())?;
            self.cache.invalidate(&local_path);
            report.rewritten.push(name.clone());
            changed_runtime = true;
        }

        // 7. Reload before additions reference newly-written services.
        if changed_runtime {
            self.firewall.reload(logger)?;
            info!(logger, "reloaded firewall after removals and rewrites");
        }

        // 8. Add missing services per zone.
        let mut added_any = false;
        for zone in zones {
            let enabled = current.get(zone).cloned().unwrap_or_default();
            for name in &desired_names {
                if !enabled.contains(name) {
                    self.firewall.add_service(logger, zone, name)?;
                    report.added.push(format!("{}:{}", zone, name));
                    added_any = true;
                }
            }
        }

        // 9. Reload once more if anything was added.
        if added_any {
            self.firewall.reload(logger)?;
            info!(logger, "reloaded firewall after additions");
        }

        Ok(report)
    }

    fn check_no_conflicting_system_overrides(&self, template_names: &BTreeSet<&str>) -> Result<(), Error> {
        if !self.system_dir.is_dir() {
            return Ok(());
        }
        let pattern = managed_suffix_pattern();
        for path in glob_xml_files(&self.system_dir)? {
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            if let Some(caps) = pattern.captures(stem) {
                let base = caps.name("base").unwrap().as_str();
                if template_names.contains(base) {
                    return Err(Error::Conflict { path });
                }
            }
        }
        Ok(())
    }
}

/// Lists every `*.xml` file directly inside `dir`, in the same spirit as the
/// teacher's use of `glob` for pattern-matched directory scans.
fn glob_xml_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let pattern = format!("{}/*.xml", dir.display());
    glob::glob(&pattern)
        .map_err(|e| Error::Assertion(format!("invalid glob pattern '{}': {}", pattern, e)))?
        .map(|entry| entry.map_err(|e| Error::from(e.into_error())))
        .collect()
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.persist(path).map_err(|e| Error::from(e.error))?;
    Ok(())
}
