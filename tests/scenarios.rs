// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! End-to-end scenarios driving the full pipeline through its public,
//! crate-external surface: a TOML configuration document in, optimized
//! service sets, on-disk XML files, and a synchronized firewall out.

use fwdsvc::cache::ServiceCache;
use fwdsvc::config::Config;
use fwdsvc::error::Error;
use fwdsvc::optimizer;
use fwdsvc::process::FirewallControl;
use fwdsvc::service_set::ServiceSet;
use fwdsvc::sync::Synchronizer;
use fwdsvc::xml;
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

fn test_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

fn build_sets(config: &Config) -> Result<Vec<ServiceSet>, Error> {
    config
        .templates
        .iter()
        .map(|template| {
            let service = template.template_service()?;
            let targets = template.parsed_targets()?;
            optimizer::optimize(&service, targets)
        })
        .collect()
}

// `Synchronizer` owns its `FirewallControl` collaborator by value, so a test
// that needs to inspect calls after `commit` has to keep its own handle to
// the shared state rather than reaching back through the synchronizer.
#[derive(Debug, Clone, Default)]
struct FakeFirewall {
    zones: Arc<Mutex<BTreeMap<String, BTreeSet<String>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeFirewall {
    fn new() -> Self {
        FakeFirewall::default()
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl FirewallControl for FakeFirewall {
    fn list_all_zones(&self, _logger: &Logger) -> Result<BTreeMap<String, BTreeSet<String>>, Error> {
        Ok(self.zones.lock().unwrap().clone())
    }

    fn add_service(&self, _logger: &Logger, zone: &str, service: &str) -> Result<(), Error> {
        self.zones
            .lock()
            .unwrap()
            .entry(zone.to_owned())
            .or_default()
            .insert(service.to_owned());
        self.calls
            .lock()
            .unwrap()
            .push(format!("add {}:{}", zone, service));
        Ok(())
    }

    fn remove_service(&self, _logger: &Logger, zone: &str, service: &str) -> Result<(), Error> {
        if let Some(services) = self.zones.lock().unwrap().get_mut(zone) {
            services.remove(service);
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("remove {}:{}", zone, service));
        Ok(())
    }

    fn reload(&self, _logger: &Logger) -> Result<(), Error> {
        self.calls.lock().unwrap().push("reload".to_owned());
        Ok(())
    }
}

#[test]
fn config_to_optimized_service_matches_declared_target() {
    let config = Config::parse(
        r#"
        [[service]]
        name = "ssh"
        short_name = "SSH"
        targets = ["0.0.0.0/0 22/tcp"]
        "#,
    )
    .unwrap();

    let sets = build_sets(&config).unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].services().len(), 1);
    let service = &sets[0].services()[0];
    assert_eq!(service.name(), "ssh");
    assert_eq!(service.short_name(), Some("SSH"));
}

#[test]
fn config_to_optimized_service_coalesces_dual_stack_ports() {
    let config = Config::parse(
        r#"
        [[service]]
        name = "ssh"
        targets = [
            "0.0.0.0/0 22/tcp",
            "0.0.0.0/0 23/tcp",
            "1:2:3:4:5:6:7:8/128 22/tcp",
            "1:2:3:4:5:6:7:8/128 23/tcp",
        ]
        "#,
    )
    .unwrap();

    let sets = build_sets(&config).unwrap();
    assert_eq!(sets[0].services().len(), 1);
    let service = &sets[0].services()[0];
    assert_eq!(service.ports().len(), 1);
    let range = service.ports().iter().next().unwrap();
    assert_eq!((range.from(), range.to()), (22, 23));
}

#[test]
fn emitted_xml_round_trips_through_disk() {
    let config = Config::parse(
        r#"
        [[service]]
        name = "ssh"
        targets = ["10.0.0.0/8 22/tcp", "10.0.1.0/24 24/tcp"]
        "#,
    )
    .unwrap();
    let sets = build_sets(&config).unwrap();
    assert_eq!(sets[0].services().len(), 2);

    let dir = tempfile::tempdir().unwrap();
    for (idx, service) in sets[0].services().iter().enumerate() {
        let name = ServiceSet::service_name("ssh", idx + 1);
        let rendered = xml::emit_service(service).unwrap();
        std::fs::write(dir.path().join(format!("{}.xml", name)), rendered).unwrap();
    }

    for (idx, service) in sets[0].services().iter().enumerate() {
        let name = ServiceSet::service_name("ssh", idx + 1);
        let contents = std::fs::read(dir.path().join(format!("{}.xml", name))).unwrap();
        let reloaded = xml::load_service(&name, contents.as_slice()).unwrap();
        assert_eq!(&reloaded, service);
    }
}

#[test]
fn full_commit_writes_local_overrides_and_enables_services() {
    let config = Config::parse(
        r#"
        zones = ["public"]

        [[service]]
        name = "ssh"
        targets = ["0.0.0.0/0 22/tcp", "10.0.0.0/8 24/tcp"]
        "#,
    )
    .unwrap();
    let sets = build_sets(&config).unwrap();
    assert_eq!(sets[0].services().len(), 2, "disjoint destinations stay split");

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("system")).unwrap();
    std::fs::create_dir_all(dir.path().join("local")).unwrap();

    let firewall = FakeFirewall::new();
    let synchronizer = Synchronizer::new(
        firewall.clone(),
        ServiceCache::new(),
        dir.path().join("system"),
        dir.path().join("local"),
    );

    let report = synchronizer
        .commit(&test_logger(), &sets, &config.zones())
        .unwrap();

    assert_eq!(report.added.len(), 2);
    assert!(dir.path().join("local/ssh.xml").exists());
    assert!(dir.path().join("local/ssh-2.xml").exists());
    assert!(firewall.calls().iter().any(|c| c == "reload"));
}

#[test]
fn second_commit_of_same_config_is_a_no_op() {
    let config = Config::parse(
        r#"
        [[service]]
        name = "ssh"
        targets = ["0.0.0.0/0 22/tcp"]
        "#,
    )
    .unwrap();
    let sets = build_sets(&config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("system")).unwrap();
    std::fs::create_dir_all(dir.path().join("local")).unwrap();

    let synchronizer = Synchronizer::new(
        FakeFirewall::new(),
        ServiceCache::new(),
        dir.path().join("system"),
        dir.path().join("local"),
    );

    synchronizer
        .commit(&test_logger(), &sets, &config.zones())
        .unwrap();
    let second = synchronizer
        .commit(&test_logger(), &sets, &config.zones())
        .unwrap();
    assert!(second.is_empty());
}

#[test]
fn local_override_is_elided_when_it_matches_the_system_file() {
    let config = Config::parse(
        r#"
        [[service]]
        name = "ssh"
        targets = ["0.0.0.0/0 22/tcp"]
        "#,
    )
    .unwrap();
    let sets = build_sets(&config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("system")).unwrap();
    std::fs::create_dir_all(dir.path().join("local")).unwrap();

    let rendered = xml::emit_service(&sets[0].services()[0]).unwrap();
    std::fs::write(dir.path().join("system/ssh.xml"), &rendered).unwrap();
    // A stale local override that should disappear once it's seen to match
    // the system-provided file.
    std::fs::write(dir.path().join("local/ssh.xml"), &rendered).unwrap();

    let synchronizer = Synchronizer::new(
        FakeFirewall::new(),
        ServiceCache::new(),
        dir.path().join("system"),
        dir.path().join("local"),
    );
    let report = synchronizer
        .commit(&test_logger(), &sets, &config.zones())
        .unwrap();

    assert!(!dir.path().join("local/ssh.xml").exists());
    assert!(report.rewritten.contains(&"ssh".to_owned()));
}

#[test]
fn modules_only_template_commits_without_any_targets() {
    let config = Config::parse(
        r#"
        [[service]]
        name = "ipsec"
        modules = ["nf_conntrack_ipsec"]
        "#,
    )
    .unwrap();
    let sets = build_sets(&config).unwrap();
    assert!(sets[0].is_empty());

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("system")).unwrap();
    std::fs::create_dir_all(dir.path().join("local")).unwrap();
    let synchronizer = Synchronizer::new(
        FakeFirewall::new(),
        ServiceCache::new(),
        dir.path().join("system"),
        dir.path().join("local"),
    );

    let report = synchronizer
        .commit(&test_logger(), &sets, &config.zones())
        .unwrap();
    assert!(report.is_empty());
}
