// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! The four-phase reduction from an arbitrary multiset of [`Target`]s to a
//! minimal [`ServiceSet`] sharing a template's metadata.

use crate::atom::Atom;
use crate::error::Error;
use crate::port::PortRange;
use crate::prefix::{Family, Prefix};
use crate::protocol::Protocol;
use crate::service::{Service, ServiceBuilder};
use crate::service_set::ServiceSet;
use crate::target::Target;
use std::collections::{BTreeMap, BTreeSet};

/// Runs the optimizer over `template` and `targets`, producing a
/// [`ServiceSet`] whose services define the same union of admitted traffic
/// as `targets` and are minimal under the coalesce laws of §3.
pub fn optimize<I>(template: &Service, targets: I) -> Result<ServiceSet, Error>
where
    I: IntoIterator<Item = Target>,
{
    let by_destination = phase1_coalesce_atoms_by_destination(targets);
    let by_atomset = phase2_coalesce_destinations_by_atomset(by_destination);
    let split = phase3_split_by_family(by_atomset);
    let services = phase4_emit_services(template, split)?;
    Ok(ServiceSet::new(template.clone(), services))
}

/// Re-runs the optimizer over an existing service set's own targets and
/// template. Per §8's idempotence property, the result is equal to `set`
/// when `set` is already minimal; this function always returns a freshly
/// built (but, in that case, equal) `ServiceSet` — Rust value types have no
/// identity to preserve across the call.
pub fn reoptimize(set: &ServiceSet) -> Result<ServiceSet, Error> {
    optimize(set.template(), set.targets().iter().copied())
}

/// Phase 1 — Coalesce atoms by destination.
///
/// Builds a map `destination -> pairwise non-coalescible atom set` by
/// repeatedly popping the minimum pending target, merging it into its
/// destination's current atom set, and re-enqueuing any atom(s) that
/// coalesce with it.
fn phase1_coalesce_atoms_by_destination<I>(targets: I) -> BTreeMap<Prefix, BTreeSet<Atom>>
where
    I: IntoIterator<Item = Target>,
{
    let mut queue: BTreeSet<Target> = targets.into_iter().collect();
    let mut map: BTreeMap<Prefix, BTreeSet<Atom>> = BTreeMap::new();

    while let Some(&target) = queue.iter().next() {
        queue.remove(&target);
        let dest = target.destination();
        let atom = target.atom();
        let entry = map.entry(dest).or_insert_with(BTreeSet::new);

        let coalescible: Vec<Atom> = entry
            .iter()
            .copied()
            .filter(|existing| existing.coalesce(&atom).is_some())
            .collect();

        if coalescible.is_empty() {
            entry.insert(atom);
        } else {
            for existing in coalescible {
                entry.remove(&existing);
                let merged = existing
                    .coalesce(&atom)
                    .expect("already filtered for coalescibility");
                queue.insert(Target::new(dest, merged));
            }
        }
    }

    map
}

/// Phase 2 — Coalesce destinations by atom-set.
///
/// First groups destinations by their (already-reduced) atom set via plain
/// key equality, then, independently within each group, coalesces the
/// destinations themselves: pop the minimum pending destination, and if it
/// coalesces with exactly one destination already accepted into the group,
/// replace both with the merge and re-enqueue it — at most one coalesce per
/// outer step, per the design notes in §9.
fn phase2_coalesce_destinations_by_atomset(
    by_destination: BTreeMap<Prefix, BTreeSet<Atom>>,
) -> BTreeMap<Vec<Atom>, BTreeSet<Prefix>> {
    let mut grouped: BTreeMap<Vec<Atom>, BTreeSet<Prefix>> = BTreeMap::new();
    for (dest, atoms) in by_destination {
        let key: Vec<Atom> = atoms.into_iter().collect();
        grouped.entry(key).or_insert_with(BTreeSet::new).insert(dest);
    }

    let mut result: BTreeMap<Vec<Atom>, BTreeSet<Prefix>> = BTreeMap::new();
    for (key, destinations) in grouped {
        let mut queue = destinations;
        let mut accepted: BTreeSet<Prefix> = BTreeSet::new();

        while let Some(&dest) = queue.iter().next() {
            queue.remove(&dest);

            let coalesce_with = accepted
                .iter()
                .find_map(|existing| dest.coalesce(existing).map(|merged| (*existing, merged)));

            match coalesce_with {
                Some((existing, merged)) => {
                    accepted.remove(&existing);
                    queue.insert(merged);
                }
                None => {
                    accepted.insert(dest);
                }
            }
        }

        result.insert(key, accepted);
    }

    result
}

/// Phase 3 — Split destinations by address family.
fn phase3_split_by_family(
    by_atomset: BTreeMap<Vec<Atom>, BTreeSet<Prefix>>,
) -> Vec<(Vec<Atom>, Vec<Prefix>, Vec<Prefix>)> {
    by_atomset
        .into_iter()
        .map(|(atoms, destinations)| {
            let mut v4: Vec<Prefix> = Vec::new();
            let mut v6: Vec<Prefix> = Vec::new();
            for dest in destinations {
                match dest.family() {
                    Family::Ipv4 => v4.push(dest),
                    Family::Ipv6 => v6.push(dest),
                }
            }
            v4.sort();
            v6.sort();
            (atoms, v4, v6)
        })
        .collect()
}

/// Phase 4 — Emit services.
///
/// Iterates the outer map order (already the `BTreeMap` iteration order
/// from phase 3, hence atom-set order), zips each group's IPv4/IPv6
/// destination lists pairwise, and numbers the resulting flattened sequence
/// of services globally: the first takes the template's name unchanged,
/// every subsequent one is `name + "-" + k`.
fn phase4_emit_services(
    template: &Service,
    groups: Vec<(Vec<Atom>, Vec<Prefix>, Vec<Prefix>)>,
) -> Result<Vec<Service>, Error> {
    let mut raw: Vec<(BTreeSet<PortRange>, BTreeSet<Protocol>, Option<Prefix>, Option<Prefix>)> =
        Vec::new();

    for (atoms, v4, v6) in groups {
        let ports: BTreeSet<PortRange> = atoms.iter().filter_map(Atom::port_range).collect();
        let protocols: BTreeSet<Protocol> = atoms
            .iter()
            .filter(|a| a.is_bare_protocol())
            .map(|a| a.protocol())
            .collect();

        let count = v4.len().max(v6.len());
        for i in 0..count {
            raw.push((
                ports.clone(),
                protocols.clone(),
                v4.get(i).copied(),
                v6.get(i).copied(),
            ));
        }
    }

    raw.into_iter()
        .enumerate()
        .map(|(idx, (ports, protocols, dest4, dest6))| {
            build_emitted_service(template, idx + 1, ports, protocols, dest4, dest6)
        })
        .collect()
}

fn build_emitted_service(
    template: &Service,
    k: usize,
    ports: BTreeSet<PortRange>,
    protocols: BTreeSet<Protocol>,
    destination_ipv4: Option<Prefix>,
    destination_ipv6: Option<Prefix>,
) -> Result<Service, Error> {
    let mut builder = ServiceBuilder::default();
    builder.name(ServiceSet::service_name(template.name(), k));
    if let Some(version) = template.version() {
        builder.version(version.to_owned());
    }
    if let Some(short_name) = template.short_name() {
        builder.short_name(ServiceSet::short_name(short_name, k));
    }
    if let Some(description) = template.description() {
        builder.description(description.to_owned());
    }
    builder.ports(ports.into_iter().collect::<Vec<_>>());
    builder.protocols(protocols.into_iter().collect::<Vec<_>>());
    builder.source_ports(template.source_ports().iter().copied().collect::<Vec<_>>());
    builder.modules(template.modules().iter().cloned().collect::<Vec<_>>());
    if let Some(dest) = destination_ipv4 {
        builder.destination_ipv4(dest);
    }
    if let Some(dest) = destination_ipv6 {
        builder.destination_ipv6(dest);
    }

    builder.build().map_err(|e| {
        Error::Assertion(format!(
            "optimizer produced an invalid service for '{}' #{}: {}",
            template.name(),
            k,
            e
        ))
    })
}
