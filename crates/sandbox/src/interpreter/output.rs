use super::errors::{Exception, ExceptionKind};

/// Captured standard output with a hard size cap.
#[derive(Debug)]
pub struct OutputBuffer {
    text: String,
    limit: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
        }
    }

    /// Appends `chunk`, keeping whatever fits when the cap is reached.
    pub fn write(&mut self, chunk: &str) -> Result<(), Exception> {
        let room = self.limit.saturating_sub(self.text.len());
        if chunk.len() <= room {
            self.text.push_str(chunk);
            return Ok(());
        }
        let mut cut = room;
        while !chunk.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&chunk[..cut]);
        Err(Exception::new(
            ExceptionKind::OutputLimitError,
            format!("output exceeded {} bytes", self.limit),
        ))
    }

    /// The captured text without its final newline.
    pub fn finish(mut self) -> String {
        if self.text.ends_with('\n') {
            self.text.pop();
        }
        self.text
    }
}
