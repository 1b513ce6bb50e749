//! Descriptor extraction from fetched payloads
//!
//! Payload bytes arrive as plain text subscription lists: one descriptor
//! URI per line, mixed with comments, headers and junk. Extraction keeps
//! lines with a known scheme prefix and drops exact duplicates.

use crate::error::{Error, Result};
use crate::proxy::models::{Descriptor, Protocol};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Extractor and plain-text serializer for descriptor lists
pub struct DescriptorExtractor;

impl DescriptorExtractor {
    /// Extract descriptors from raw payload text
    ///
    /// Order of first appearance is preserved; exact duplicate URIs within
    /// the payload are dropped.
    pub fn extract(content: &str) -> Vec<Descriptor> {
        let mut seen = HashSet::new();
        let mut descriptors = Vec::new();

        for line in content.lines() {
            if let Some(descriptor) = Descriptor::parse(line) {
                if seen.insert(descriptor.uri.clone()) {
                    descriptors.push(descriptor);
                }
            }
        }

        descriptors
    }

    /// Merge descriptor lists, dropping exact duplicates while preserving
    /// first-seen order
    pub fn dedup(descriptors: impl IntoIterator<Item = Descriptor>) -> Vec<Descriptor> {
        let mut seen = HashSet::new();
        descriptors
            .into_iter()
            .filter(|d| seen.insert(d.uri.clone()))
            .collect()
    }

    /// Count descriptors per protocol
    pub fn protocol_counts(descriptors: &[Descriptor]) -> BTreeMap<Protocol, usize> {
        let mut counts = BTreeMap::new();
        for descriptor in descriptors {
            *counts.entry(descriptor.protocol).or_insert(0) += 1;
        }
        counts
    }

    /// Load descriptors from a file, one URI per line
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Vec<Descriptor>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        Ok(Self::extract(&content))
    }

    /// Save descriptors to a file, one URI per line
    pub fn save_to_file<P: AsRef<Path>>(descriptors: &[Descriptor], path: P) -> Result<usize> {
        let path = path.as_ref();
        let mut content = String::new();
        for descriptor in descriptors {
            content.push_str(&descriptor.uri);
            content.push('\n');
        }
        fs::write(path, content).map_err(|e| io_error(path, e))?;
        Ok(descriptors.len())
    }
}

fn io_error(path: &Path, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound {
            resource: path.display().to_string(),
        }
    } else {
        Error::Parse {
            message: format!("cannot access {}: {err}", path.display()),
        }
    }
}
