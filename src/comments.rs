use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Free-text notes per phone id, persisted as a JSON object.
#[derive(Debug, Default)]
pub struct CommentBook {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl CommentBook {
    /// A missing or malformed file starts an empty book at that path.
    pub fn load(path: Option<PathBuf>) -> Self {
        let entries = path
            .as_deref()
            .and_then(|p| fs::read(p).ok())
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        Self { path, entries }
    }

    pub fn get(&self, phone_id: &str) -> &str {
        self.entries.get(phone_id).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, phone_id: &str, text: &str) {
        self.entries.insert(phone_id.to_string(), text.trim().to_string());
    }

    /// Adds a line below any existing comment and returns the full text.
    pub fn append_line(&mut self, phone_id: &str, line: &str) -> String {
        let existing = self.get(phone_id).trim();
        let combined = if existing.is_empty() {
            line.to_string()
        } else {
            format!("{}\n{}", existing, line)
        };
        self.entries.insert(phone_id.to_string(), combined.clone());
        combined
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = self.path.as_deref() else { return Ok(()) };
        save_to(path, &self.entries)
    }
}

/// Tracks which phone id the notes editor is showing and whether the
/// operator changed it since it was loaded.
#[derive(Debug, Default)]
pub struct NotesDraft {
    owner: Option<String>,
    dirty: bool,
}

impl NotesDraft {
    /// Points the editor at a new contact, dropping any unsaved flag.
    pub fn open(&mut self, owner: Option<&str>) {
        self.owner = owner.map(str::to_string);
        self.dirty = false;
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = self.owner.is_some();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Stores `text` under the owner regardless of edits. Returns false when
    /// no contact is open.
    pub fn commit(&mut self, book: &mut CommentBook, text: &str) -> bool {
        let Some(owner) = self.owner.as_deref() else { return false };
        book.set(owner, text);
        self.dirty = false;
        true
    }

    /// Like `commit`, but only when there are unsaved edits.
    pub fn flush(&mut self, book: &mut CommentBook, text: &str) -> bool {
        self.dirty && self.commit(book, text)
    }
}

fn save_to(path: &Path, entries: &BTreeMap<String, String>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    fs::write(path, json)
}

/// `"<when>\n<status>"`, the note left when an operator labels a contact.
pub fn status_line(status: &str) -> String {
    format!("{}\n{}", crate::utils::timestamp_now("%B %d, %Y, %H:%M"), status)
}

pub fn campaign_sent_line() -> String {
    format!("{} - Campaign sent", crate::utils::timestamp_now("%B %d, %H:%M %Y"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_joins_with_newline() {
        let mut book = CommentBook::default();
        assert_eq!(book.append_line("11999", "first"), "first");
        assert_eq!(book.append_line("11999", "second"), "first\nsecond");
        book.set("11999", "   ");
        assert_eq!(book.append_line("11999", "fresh"), "fresh");
    }

    #[test]
    fn persists_unicode_and_reloads() {
        let dir = std::env::temp_dir().join(format!("huby-comments-{}", std::process::id()));
        let path = dir.join("comments.json");
        let mut book = CommentBook::load(Some(path.clone()));
        assert_eq!(book.get("11987654321"), "");
        book.set("11987654321", " Ligar às 14h ");
        book.save().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Ligar às 14h"));
        let reloaded = CommentBook::load(Some(path));
        assert_eq!(reloaded.get("11987654321"), "Ligar às 14h");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn malformed_file_starts_empty() {
        let dir = std::env::temp_dir().join(format!("huby-comments-bad-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("comments.json");
        fs::write(&path, "{not json").unwrap();
        let book = CommentBook::load(Some(path));
        assert_eq!(book.get("anything"), "");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn pending_edit_is_stored_under_the_contact_it_was_typed_for() {
        let mut book = CommentBook::default();
        book.set("111", "old note");
        book.set("222", "other note");
        let mut draft = NotesDraft::default();

        draft.open(Some("111"));
        draft.mark_dirty();
        assert!(draft.flush(&mut book, "edited note"));
        draft.open(Some("222"));
        assert!(!draft.flush(&mut book, "other note"));

        assert_eq!(book.get("111"), "edited note");
        assert_eq!(book.get("222"), "other note");
        assert_eq!(draft.owner(), Some("222"));
    }

    #[test]
    fn draft_without_contact_writes_nothing() {
        let mut book = CommentBook::default();
        let mut draft = NotesDraft::default();
        draft.mark_dirty();
        assert!(!draft.is_dirty());
        assert!(!draft.commit(&mut book, "stray"));
        assert_eq!(book.get(""), "");
    }

    #[test]
    fn campaign_line_is_timestamped() {
        assert!(campaign_sent_line().ends_with(" - Campaign sent"));
        assert!(status_line("Voicemail").ends_with("\nVoicemail"));
    }
}
