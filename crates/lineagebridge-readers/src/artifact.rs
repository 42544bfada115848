//! Raw artifacts handed to the readers

/// A named text blob (file content, command output, API response body)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Identifier used for keying and diagnostics (file name, object name)
    pub name: String,
    pub content: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Decode bytes, replacing invalid UTF-8 and dropping a byte-order mark
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
        Self::new(name, String::from_utf8_lossy(bytes).into_owned())
    }

    /// Lowercase file extension, if the name has one
    pub fn extension(&self) -> Option<String> {
        let file = self.file_name();
        file.rfind('.')
            .filter(|&idx| idx > 0)
            .map(|idx| file[idx + 1..].to_ascii_lowercase())
    }

    /// File name without directories or extension
    pub fn stem(&self) -> &str {
        let file = self.file_name();
        match file.rfind('.') {
            Some(idx) if idx > 0 => &file[..idx],
            _ => file,
        }
    }

    fn file_name(&self) -> &str {
        self.name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.name)
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_parts() {
        let a = Artifact::new("exports/graphs/load_orders.XFR", "");
        assert_eq!(a.extension().as_deref(), Some("xfr"));
        assert_eq!(a.stem(), "load_orders");

        let b = Artifact::new(r"C:\pkgs\Daily.Load.dtsx", "");
        assert_eq!(b.stem(), "Daily.Load");

        let c = Artifact::new(".hidden", "");
        assert_eq!(c.extension(), None);
    }

    #[test]
    fn decodes_bom_and_invalid_bytes() {
        let a = Artifact::from_bytes("x.jil", &[0xEF, 0xBB, 0xBF, b'o', b'k', 0xFF]);
        assert!(a.content.starts_with("ok"));
        assert!(!a.is_blank());
    }
}
