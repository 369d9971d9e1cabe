// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! A parse cache for on-disk service documents, keyed by each file's
//! modification time and length so either changing invalidates the cached
//! value, and a missing file evicts its entry outright.

use crate::error::Error;
use crate::service::Service;
use crate::xml;
use slog::{debug, Logger};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

#[derive(Debug, Clone)]
struct CacheEntry {
    service: Service,
    modified: SystemTime,
    len: u64,
}

/// Caches parsed [`Service`] values per file path.
#[derive(Debug, Default)]
pub struct ServiceCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl ServiceCache {
    /// Builds an empty cache.
    pub fn new() -> Self {
        ServiceCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Loads and parses the service document at `path`, reusing a cached
    /// parse when the file's modification time and length both match the
    /// cached entry. Returns `Ok(None)` if `path` does not exist, evicting
    /// any stale entry for it rather than treating absence as an error.
    pub fn load(&self, logger: &Logger, path: &Path) -> Result<Option<Service>, Error> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.entries.lock().unwrap().remove(path);
                return Ok(None);
            }
            Err(e) => return Err(Error::from(e)),
        };
        let modified = metadata.modified()?;
        let len = metadata.len();

        {
            let entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get(path) {
                if entry.modified == modified && entry.len == len {
                    debug!(logger, "service cache hit"; "path" => %path.display());
                    return Ok(Some(entry.service.clone()));
                }
            }
        }

        debug!(logger, "service cache miss, parsing"; "path" => %path.display());
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_owned();
        let file = File::open(path)?;
        let service = xml::load_service(&name, BufReader::new(file))?;

        self.entries.lock().unwrap().insert(
            path.to_owned(),
            CacheEntry {
                service: service.clone(),
                modified,
                len,
            },
        );
        Ok(Some(service))
    }

    /// Evicts any cached entry for `path`, forcing the next [`Self::load`]
    /// to re-parse it regardless of its metadata.
    pub fn invalidate(&self, path: &Path) {
        self.entries.lock().unwrap().remove(path);
    }
}
