//! Bounded per-pane scrollback.

/// Text buffer that keeps only the most recent `cap` bytes.
///
/// Trimming always lands on a char boundary, so the retained suffix may be
/// up to three bytes shorter than the cap but is never invalid UTF-8.
#[derive(Debug, Clone)]
pub struct Scrollback {
    text: String,
    cap: usize,
}

impl Scrollback {
    pub fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            cap,
        }
    }

    /// Appends output and trims from the front to stay within the cap.
    pub fn push(&mut self, chunk: &str) {
        if chunk.len() >= self.cap {
            self.text.clear();
            self.text.push_str(crate::classify::tail(chunk, self.cap));
            return;
        }

        self.text.push_str(chunk);
        if self.text.len() > self.cap {
            let mut cut = self.text.len() - self.cap;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_cap_keeps_everything() {
        let mut sb = Scrollback::new(16);
        sb.push("abc");
        sb.push("def");
        assert_eq!(sb.as_str(), "abcdef");
    }

    #[test]
    fn test_keeps_most_recent_bytes() {
        let mut sb = Scrollback::new(8);
        for i in 0..10 {
            sb.push(&i.to_string());
        }
        sb.push("XYZ");
        assert_eq!(sb.as_str(), "56789XYZ");
        assert_eq!(sb.as_str().len(), 8);
    }

    #[test]
    fn test_single_oversized_chunk() {
        let mut sb = Scrollback::new(4);
        sb.push("ab");
        sb.push("0123456789");
        assert_eq!(sb.as_str(), "6789");
    }

    #[test]
    fn test_never_exceeds_cap_with_multibyte() {
        let mut sb = Scrollback::new(5);
        for _ in 0..20 {
            sb.push("é⠋x");
            assert!(sb.as_str().len() <= 5);
        }
        assert!(sb.as_str().ends_with('x'));
    }
}
