//! The seam between the engine and a page-automation backend.
//!
//! The engine only waits, clicks and navigates through these traits. Everything it
//! reads comes from an HTML snapshot (`content`) parsed with `scraper`.

pub mod chrome;

use std::ops::Deref;
use std::time::Duration;

use tracing::warn;

use crate::error::DriverError;

pub use chrome::{ChromeSession, ChromeTab, LaunchConfig};

pub trait PageView {
    /// Waits until `selector` matches, for at most `timeout`.
    fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Current DOM serialized as HTML.
    fn content(&self) -> Result<String, DriverError>;

    fn url(&self) -> String;
}

/// A secondary tab opened for one detail view.
pub trait DetailTab: PageView {
    fn close(&mut self) -> Result<(), DriverError>;
}

/// The listing tab, exclusively owned by one run.
pub trait BrowserSession: PageView {
    type Tab: DetailTab;

    fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    fn click(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Clicks `selector` and waits for the new tab it opens.
    fn open_popup(&mut self, selector: &str, timeout: Duration)
        -> Result<Self::Tab, DriverError>;

    /// Opens `url` in a fresh tab.
    fn open_tab(&mut self, url: &str, timeout: Duration) -> Result<Self::Tab, DriverError>;
}

/// Owns a detail tab for the extraction of one record.
///
/// The tab is closed exactly once: by [`DetailHandle::close`], or on drop if the
/// fetch bailed out early.
pub struct DetailHandle<T: DetailTab> {
    tab: T,
    closed: bool,
}

impl<T: DetailTab> DetailHandle<T> {
    pub fn new(tab: T) -> Self {
        Self { tab, closed: false }
    }

    pub fn close(mut self) -> Result<(), DriverError> {
        self.closed = true;
        self.tab.close()
    }
}

impl<T: DetailTab> Deref for DetailHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.tab
    }
}

impl<T: DetailTab> Drop for DetailHandle<T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.tab.close() {
            warn!(error = %e, url = %self.tab.url(), "failed to close detail tab");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingTab {
        closes: Rc<Cell<usize>>,
    }

    impl PageView for CountingTab {
        fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<(), DriverError> {
            Ok(())
        }

        fn content(&self) -> Result<String, DriverError> {
            Ok(String::new())
        }

        fn url(&self) -> String {
            "about:blank".into()
        }
    }

    impl DetailTab for CountingTab {
        fn close(&mut self) -> Result<(), DriverError> {
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn explicit_close_does_not_close_again_on_drop() {
        let closes = Rc::new(Cell::new(0));
        let handle = DetailHandle::new(CountingTab {
            closes: closes.clone(),
        });
        handle.close().unwrap();
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn drop_closes_unclosed_tab() {
        let closes = Rc::new(Cell::new(0));
        {
            let handle = DetailHandle::new(CountingTab {
                closes: closes.clone(),
            });
            assert_eq!(handle.url(), "about:blank");
        }
        assert_eq!(closes.get(), 1);
    }
}
