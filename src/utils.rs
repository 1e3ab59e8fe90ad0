use std::collections::HashMap;
use std::io::{IsTerminal, Write};

/// Running count printed to stderr every `interval` items.
pub struct ProgressCounter {
    label: &'static str,
    interval: u64,
    count: u64,
    interactive: bool,
}

impl ProgressCounter {
    pub fn new(label: &'static str, interval: u64) -> Self {
        let counter = Self {
            label,
            interval: interval.max(1),
            count: 0,
            interactive: std::io::stderr().is_terminal(),
        };
        counter.print();
        counter
    }

    pub fn inc(&mut self, delta: u64) {
        let prev = self.count;
        self.count += delta;
        // Print if we crossed an interval boundary
        if prev / self.interval < self.count / self.interval {
            self.print();
        }
    }

    pub fn finish(&self) -> u64 {
        if self.interactive {
            self.print();
            eprintln!();
        }
        self.count
    }

    fn print(&self) {
        // Redrawing a line only makes sense on a terminal
        if !self.interactive {
            return;
        }
        eprint!("\r{}: {}", self.label, self.count);
        let _ = std::io::stderr().flush();
    }
}

pub fn build_tag_map<'a, I>(tags: I) -> HashMap<String, String>
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    tags.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Cut `value` to at most `max_bytes` bytes without splitting a character.
pub fn truncate_to_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
