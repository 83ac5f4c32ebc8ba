// Window sizing and tail-mapping configuration for `WindowedReader`.
use serde::Serialize;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_WINDOW_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_ELASTICITY: usize = 4 * 1024 * 1024;

/// How much of the window to map when the file is shorter than the window.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TailPolicy {
    /// Map the whole window even past EOF. Fails on platforms that refuse such mappings.
    #[default]
    MapFull,
    /// Map only the bytes present and re-map at the same base once the file grows.
    MapAvailable,
}

/// Sizing of the mapped window.
///
/// `window_size - elasticity` (the slack) must hold the largest record the
/// consumer reads; a record starting just before the elasticity boundary has
/// to fit in the window, or the consumer never sees it whole. The reader
/// cannot check this since it does not know the record format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct WindowOptions {
    pub window_size: usize,
    pub elasticity: usize,
    pub tail_policy: TailPolicy,
}

impl WindowOptions {
    pub fn new(window_size: usize, elasticity: usize) -> Self {
        Self {
            window_size,
            elasticity,
            tail_policy: TailPolicy::default(),
        }
    }

    pub fn with_tail_policy(mut self, tail_policy: TailPolicy) -> Self {
        self.tail_policy = tail_policy;
        self
    }

    pub fn slack(&self) -> usize {
        self.window_size.saturating_sub(self.elasticity)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.elasticity == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("elasticity must be greater than zero"));
        }
        if self.elasticity >= self.window_size {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("elasticity must be smaller than window size")
                .with_hint("Leave slack for the largest record (e.g. 5M window, 4M elasticity)."));
        }
        Ok(())
    }
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE, DEFAULT_ELASTICITY)
    }
}
