// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! A template plus the family of [`Service`]s emitted for it, under the
//! `template`, `template-2`, … naming convention.

use crate::service::Service;
use crate::target::Target;
use std::collections::BTreeSet;

/// A template plus an ordered family of [`Service`]s sharing that
/// template's metadata.
///
/// Two service sets are equal iff their `services` are equal; the template
/// is excluded from equality, matching §3.
#[derive(Debug, Clone)]
pub struct ServiceSet {
    template: Service,
    services: Vec<Service>,
    targets: BTreeSet<Target>,
}

impl ServiceSet {
    /// Builds a service set from an already-ordered list of services. Used
    /// by the optimizer (§4.5) and by the loader (§4.7); both are
    /// responsible for satisfying the naming convention themselves.
    pub fn new(template: Service, services: Vec<Service>) -> Self {
        let targets = services
            .iter()
            .flat_map(|s| s.targets().iter().copied())
            .collect();
        ServiceSet {
            template,
            services,
            targets,
        }
    }

    /// The template whose metadata every emitted service carries.
    pub fn template(&self) -> &Service {
        &self.template
    }

    /// The ordered family of services. The first entry bears the
    /// template's name; the k-th (k >= 2) bears `name + "-" + k`.
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// The union of every service's targets.
    pub fn targets(&self) -> &BTreeSet<Target> {
        &self.targets
    }

    /// `true` iff this service set has no services (and hence no targets).
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// The expected on-disk file stem for the k-th (1-based) service of a
    /// set templated on `template_name`: `template_name` for `k == 1`,
    /// `template_name-k` otherwise.
    pub fn service_name(template_name: &str, k: usize) -> String {
        if k <= 1 {
            template_name.to_owned()
        } else {
            format!("{}-{}", template_name, k)
        }
    }

    /// The expected short name for the k-th (1-based) service, given the
    /// template's short name: unchanged for `k == 1`, `short_name + " #" +
    /// k` otherwise.
    pub fn short_name(template_short_name: &str, k: usize) -> String {
        if k <= 1 {
            template_short_name.to_owned()
        } else {
            format!("{} #{}", template_short_name, k)
        }
    }
}

impl PartialEq for ServiceSet {
    fn eq(&self, other: &Self) -> bool {
        let mine: BTreeSet<&Service> = self.services.iter().collect();
        let theirs: BTreeSet<&Service> = other.services.iter().collect();
        mine == theirs
    }
}

impl Eq for ServiceSet {}
