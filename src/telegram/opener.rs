//! Opens deep links outside the process.

use std::{fmt, io};
use tracing::debug;

pub trait LinkOpener: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns an error if the link could not be handed to a browser.
    fn open(&self, url: &str) -> io::Result<()>;
}

/// Hands links to the desktop's default handler.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemOpener;

impl LinkOpener for SystemOpener {
    fn open(&self, url: &str) -> io::Result<()> {
        open::that(url)
    }
}

/// Headless opener; the caller shows the link instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopOpener;

impl LinkOpener for NoopOpener {
    fn open(&self, url: &str) -> io::Result<()> {
        debug!("not opening deep link {url}");
        Ok(())
    }
}
