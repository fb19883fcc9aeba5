//! In-memory hart for unit tests.

use std::collections::HashMap;
use std::vec::Vec;

use super::{Csr, Hart};

#[derive(Debug, Default)]
pub struct MockHart {
    csrs: HashMap<Csr, u64>,
    pub mtime: u64,
    pub mtimecmp: u64,
    pub console: Vec<u8>,
}

impl MockHart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn console_text(&self) -> &str {
        core::str::from_utf8(&self.console).unwrap()
    }
}

impl Hart for MockHart {
    fn read_csr(&self, csr: Csr) -> u64 {
        self.csrs.get(&csr).copied().unwrap_or(0)
    }

    fn write_csr(&mut self, csr: Csr, value: u64) {
        self.csrs.insert(csr, value);
    }

    fn mtime(&self) -> u64 {
        self.mtime
    }

    fn set_mtimecmp(&mut self, deadline: u64) {
        self.mtimecmp = deadline;
    }

    fn console_write(&mut self, bytes: &[u8]) {
        self.console.extend_from_slice(bytes);
    }
}
