use log::{debug, info, warn};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

/// How a capability was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    Canonical(String),
    Alternate(String),
    Vendored(PathBuf),
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canonical(name) => write!(f, "package '{name}'"),
            Self::Alternate(name) => write!(f, "alternate package '{name}'"),
            Self::Vendored(dir) => write!(f, "vendored directory {dir:?}"),
        }
    }
}

/// One way of locating a capability. Returning `None` hands over to the next
/// strategy.
pub struct Strategy<'a, T> {
    pub name: String,
    pub attempt: Box<dyn Fn() -> Option<T> + 'a>,
}

impl<'a, T> Strategy<'a, T> {
    pub fn new(name: impl Into<String>, attempt: impl Fn() -> Option<T> + 'a) -> Self {
        Self {
            name: name.into(),
            attempt: Box::new(attempt),
        }
    }
}

/// Runs strategies in order and returns the first hit. A panic inside one
/// strategy is logged and counts as a miss.
pub fn first_available<T>(what: &str, strategies: &[Strategy<'_, T>]) -> Option<T> {
    for strategy in strategies {
        debug!("{what}: trying {}", strategy.name);
        match catch_unwind(AssertUnwindSafe(|| (strategy.attempt)())) {
            Ok(Some(found)) => {
                info!("{what}: acquired via {}", strategy.name);
                return Some(found);
            }
            Ok(None) => debug!("{what}: {} not available", strategy.name),
            Err(_) => warn!("{what}: {} panicked, trying next strategy", strategy.name),
        }
    }
    None
}
