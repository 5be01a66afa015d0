//! Port discovery on the service's stdout.
//!
//! The service announces its port exactly once as a line `PORT:<n>`. Output
//! arrives in arbitrary chunks, so the scanner buffers partial lines and only
//! interprets complete ones.

const ANNOUNCEMENT_PREFIX: &str = "PORT:";

/// One interpreted stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanItem {
    /// The first valid port announcement.
    Port(u16),
    /// Any other line, including repeated announcements.
    Diagnostic(String),
}

/// Incremental line scanner for the port announcement.
#[derive(Debug, Default)]
pub struct PortScanner {
    pending: Vec<u8>,
    announced: Option<u16>,
}

impl PortScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The port announced so far, if any.
    pub fn announced(&self) -> Option<u16> {
        self.announced
    }

    /// Feed a chunk of raw output and return the complete lines it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ScanItem> {
        self.pending.extend_from_slice(chunk);

        let mut items = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            items.push(self.classify(&line[..newline]));
        }
        items
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<ScanItem> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(self.classify(&line))
    }

    fn classify(&mut self, raw: &[u8]) -> ScanItem {
        let decoded = String::from_utf8_lossy(raw);
        let line = decoded.strip_suffix('\r').unwrap_or(&*decoded);

        match (self.announced, parse_announcement(line)) {
            (None, Some(port)) => {
                self.announced = Some(port);
                ScanItem::Port(port)
            }
            _ => ScanItem::Diagnostic(line.to_string()),
        }
    }
}

/// Parse a `PORT:<n>` line. Surrounding whitespace is tolerated; the port
/// must be a nonzero 16-bit decimal.
pub fn parse_announcement(line: &str) -> Option<u16> {
    let digits = line.trim().strip_prefix(ANNOUNCEMENT_PREFIX)?.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match digits.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}
