//! Change-origin disambiguation
//!
//! A write we make on behalf of the browser produces a change notification
//! just like a keystroke in the editor does. The filter tells the two apart
//! so remote text is never bounced back to the browser.

use crate::buffer::NotifyOrdering;

#[derive(Debug, Clone)]
pub struct EchoFilter {
    ordering: NotifyOrdering,
    last_remote_text: Option<String>,
    /// Self-inflicted notifications still expected (unordered hosts only)
    pending_self_writes: usize,
}

impl EchoFilter {
    pub fn new(ordering: NotifyOrdering) -> Self {
        Self {
            ordering,
            last_remote_text: None,
            pending_self_writes: 0,
        }
    }

    pub fn last_remote_text(&self) -> Option<&str> {
        self.last_remote_text.as_deref()
    }

    /// Call right before writing remote text while the change observer is live
    pub fn before_write(&mut self) {
        if self.ordering == NotifyOrdering::Unordered {
            self.pending_self_writes += 1;
        }
    }

    /// Undo `before_write` for a write that did not happen
    pub fn write_failed(&mut self) {
        if self.ordering == NotifyOrdering::Unordered {
            self.pending_self_writes = self.pending_self_writes.saturating_sub(1);
        }
    }

    /// Record remote text once it has been written to the buffer
    pub fn record_remote(&mut self, text: String) {
        self.last_remote_text = Some(text);
    }

    /// Decide whether a change notification is the echo of our own write.
    /// Consumes one expected self-write on unordered hosts.
    pub fn is_echo(&mut self, current_text: &str) -> bool {
        match self.ordering {
            NotifyOrdering::WriteBeforeNotify => {
                self.last_remote_text.as_deref() == Some(current_text)
            }
            NotifyOrdering::Unordered => {
                if self.pending_self_writes > 0 {
                    self.pending_self_writes -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_gate() {
        let mut filter = EchoFilter::new(NotifyOrdering::WriteBeforeNotify);
        assert!(!filter.is_echo(""));

        filter.before_write();
        filter.record_remote("hello".into());

        assert!(filter.is_echo("hello"));
        // Text gate does not consume anything
        assert!(filter.is_echo("hello"));
        assert!(!filter.is_echo("hello world"));
        assert_eq!(filter.last_remote_text(), Some("hello"));
    }

    #[test]
    fn test_counter_gate() {
        let mut filter = EchoFilter::new(NotifyOrdering::Unordered);

        filter.before_write();
        filter.record_remote("a".into());
        filter.before_write();
        filter.record_remote("b".into());

        assert!(filter.is_echo("whatever"));
        assert!(filter.is_echo("whatever"));
        assert!(!filter.is_echo("b"));
    }

    #[test]
    fn test_failed_write_is_not_expected() {
        let mut filter = EchoFilter::new(NotifyOrdering::Unordered);

        filter.before_write();
        filter.write_failed();
        filter.write_failed();

        assert!(!filter.is_echo("local"));
    }
}
