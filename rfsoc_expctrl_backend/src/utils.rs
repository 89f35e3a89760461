use std::cmp::min;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Incomplete,
    Complete,
    /// More words arrived than the run can produce.
    Overrun,
}

/// Tracks how many streamed words have arrived out of the expected total.
pub struct WordCounter {
    received: usize,
    expected: usize,
}

impl WordCounter {
    pub fn new(expected: usize) -> Self {
        Self {
            received: 0,
            expected,
        }
    }

    pub fn add(&mut self, n_words: usize) -> Progress {
        self.received += n_words;
        self.progress()
    }

    pub fn progress(&self) -> Progress {
        match self.received.cmp(&self.expected) {
            std::cmp::Ordering::Less => Progress::Incomplete,
            std::cmp::Ordering::Equal => Progress::Complete,
            std::cmp::Ordering::Greater => Progress::Overrun,
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn remaining(&self) -> usize {
        self.expected - min(self.received, self.expected)
    }

    pub fn reset(&mut self) {
        self.received = 0;
    }
}
