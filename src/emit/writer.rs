//! Indent-aware string builder for plan rendering.
//!
//! Plans use 2-space indentation.

pub struct PlanWriter {
    buf: String,
    indent_level: usize,
}

impl PlanWriter {
    pub fn new() -> Self {
        Self {
            buf: String::with_capacity(1024),
            indent_level: 0,
        }
    }

    /// Write a complete line (appends newline).
    pub fn line(&mut self, text: &str) {
        for _ in 0..self.indent_level {
            self.buf.push_str("  ");
        }
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    /// Write a heading line and indent what follows.
    pub fn section(&mut self, text: &str) {
        self.line(text);
        self.indent();
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

impl Default for PlanWriter {
    fn default() -> Self {
        Self::new()
    }
}
