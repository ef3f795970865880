//! Suppression of anchor echoes at the start of a continuation.

/// Holds back the first characters of a continuation step until it can tell
/// whether the backend restated text that already ends the buffer.
#[derive(Debug)]
pub(crate) struct EchoGuard {
    /// Tail of the buffer before this step (at most `window` chars).
    tail: String,
    anchor_len: usize,
    window: usize,
    held: String,
    held_chars: usize,
    released: bool,
}

impl EchoGuard {
    pub(crate) fn new(buffer: &str, anchor: &str, window: usize) -> Self {
        let window = window.max(anchor.chars().count());
        Self {
            tail: super::tail_chars(buffer, window).to_string(),
            anchor_len: anchor.len(),
            window,
            held: String::new(),
            held_chars: 0,
            released: false,
        }
    }

    /// Feed a delta; returns the text that may be forwarded now.
    pub(crate) fn push(&mut self, text: &str) -> String {
        if self.released {
            return text.to_string();
        }
        self.held.push_str(text);
        self.held_chars += text.chars().count();
        if self.held_chars >= self.window {
            self.release()
        } else {
            String::new()
        }
    }

    /// Release whatever is still held (end of the step).
    pub(crate) fn finish(mut self) -> String {
        if self.released {
            String::new()
        } else {
            self.release()
        }
    }

    fn release(&mut self) -> String {
        self.released = true;
        let held = std::mem::take(&mut self.held);
        let echoed = self.echoed_prefix_len(&held);
        if echoed > 0 {
            tracing::debug!(chars = held[..echoed].chars().count(), "dropping echoed anchor");
        }
        held[echoed..].to_string()
    }

    /// Longest prefix of `held` that covers the anchor and repeats the end
    /// of the buffer.
    fn echoed_prefix_len(&self, held: &str) -> usize {
        if self.anchor_len == 0 {
            return 0;
        }
        let mut ends: Vec<usize> = held
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(held.len()))
            .filter(|end| *end >= self.anchor_len)
            .collect();
        ends.reverse();
        ends.into_iter()
            .find(|end| self.tail.ends_with(&held[..*end]))
            .unwrap_or(0)
    }
}
