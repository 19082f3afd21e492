// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Open file discovery through `/proc`
//!
//! Walks the descriptor tables of a process and all its descendants
//! (`/proc/<pid>/task/<tid>/children`) and keeps regular files under a prefix.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::runtime::{OpenFileLister, RuntimeError};

pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcFs {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `root_pid` followed by every descendant, breadth first.
    pub fn process_tree(&self, root_pid: u32) -> Vec<u32> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root_pid]);

        while let Some(pid) = queue.pop_front() {
            if !seen.insert(pid) {
                continue;
            }
            order.push(pid);

            let Ok(tasks) = std::fs::read_dir(self.root.join(pid.to_string()).join("task")) else {
                continue;
            };
            for task in tasks.flatten() {
                let Ok(children) = std::fs::read_to_string(task.path().join("children")) else {
                    continue;
                };
                queue.extend(children.split_whitespace().filter_map(|c| c.parse::<u32>().ok()));
            }
        }

        order
    }
}

impl OpenFileLister for ProcFs {
    fn open_files(&self, root_pid: u32, prefix: &Path) -> Result<Vec<PathBuf>, RuntimeError> {
        let mut files = BTreeSet::new();

        for pid in self.process_tree(root_pid) {
            let fd_dir = self.root.join(pid.to_string()).join("fd");
            let entries = match std::fs::read_dir(&fd_dir) {
                Ok(entries) => entries,
                // process exited while walking the tree
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            for entry in entries.flatten() {
                let Ok(target) = std::fs::read_link(entry.path()) else {
                    continue;
                };
                if !target.starts_with(prefix) {
                    continue;
                }
                if std::fs::metadata(&target).map(|m| m.is_file()).unwrap_or(false) {
                    files.insert(target);
                }
            }
        }

        debug!(root_pid, count = files.len(), "Collected open files");
        Ok(files.into_iter().collect())
    }
}
