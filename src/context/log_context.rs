//! Per-level logging context.
//!
//! Every message emitted by a level carries the prefix `"MG level N (CPU): "` with a
//! 1-based level number. Verbosity maps onto `log` levels: `Summarize` → `info`,
//! `Verbose` → `debug`, `Debug` → `trace`. A level set to `Silent` emits nothing even
//! when the global logger would accept it.

use crate::config::{Location, Verbosity};
use std::fmt;

#[derive(Debug, Clone)]
pub struct LevelContext {
    pub level: usize,
    pub verbosity: Verbosity,
    prefix: String,
}

impl LevelContext {
    pub fn new(level: usize, location: Location, verbosity: Verbosity) -> Self {
        Self {
            level,
            verbosity,
            prefix: format!("MG level {} ({}): ", level + 1, location),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn enabled(&self, v: Verbosity) -> bool {
        v != Verbosity::Silent && self.verbosity >= v
    }

    pub fn summarize(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Verbosity::Summarize) {
            log::info!("{}{}", self.prefix, args);
        }
    }

    pub fn verbose(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Verbosity::Verbose) {
            log::debug!("{}{}", self.prefix, args);
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Verbosity::Debug) {
            log::trace!("{}{}", self.prefix, args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_one_based() {
        let ctx = LevelContext::new(0, Location::Host, Verbosity::Summarize);
        assert_eq!(ctx.prefix(), "MG level 1 (CPU): ");
        let ctx = LevelContext::new(2, Location::Device, Verbosity::Silent);
        assert_eq!(ctx.prefix(), "MG level 3 (GPU): ");
    }

    #[test]
    fn verbosity_gates_messages() {
        let ctx = LevelContext::new(1, Location::Host, Verbosity::Verbose);
        assert!(ctx.enabled(Verbosity::Summarize));
        assert!(ctx.enabled(Verbosity::Verbose));
        assert!(!ctx.enabled(Verbosity::Debug));
        assert!(!ctx.enabled(Verbosity::Silent));
    }
}
