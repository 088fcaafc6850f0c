//! In-memory contact list backed by a CSV file.
//!
//! The file layout is `name, <unused>, phone id, status, ...` with a header
//! row. Each contact remembers its row number so edits can be written back
//! in place without disturbing the other rows or columns.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::utils::{digits_only, format_phone, title_case};

const COL_NAME: usize = 0;
const COL_PHONE: usize = 2;
const COL_STATUS: usize = 3;

#[derive(Debug, Error)]
pub enum ContactsError {
    #[error("No contact file loaded")]
    NoFile,
    #[error("Could not access {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Row {0} does not exist in the file")]
    RowOutOfRange(String),
    #[error("Unknown contact {0}")]
    UnknownContact(String),
    #[error("Name and phone are required")]
    MissingFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    Failed,
}

impl SendOutcome {
    pub fn label(self) -> &'static str {
        match self {
            SendOutcome::Success => "Success",
            SendOutcome::Failed => "Failed",
        }
    }

    pub fn progress_label(self) -> &'static str {
        match self {
            SendOutcome::Success => "✓ Success",
            SendOutcome::Failed => "✗ Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    /// Zero-padded row number, e.g. `"007"`.
    pub n: String,
    pub name: String,
    pub phone_display: String,
    pub status: String,
    pub phone_id: String,
    pub outcome: Option<SendOutcome>,
    pub progress: String,
}

impl Contact {
    fn from_row(row_number: usize, fields: &[String]) -> Self {
        let field = |i: usize| fields.get(i).cloned().unwrap_or_default();
        let phone_id = field(COL_PHONE);
        Self {
            n: format!("{:03}", row_number),
            name: field(COL_NAME),
            phone_display: format_phone(&phone_id),
            status: field(COL_STATUS),
            phone_id,
            outcome: None,
            progress: String::new(),
        }
    }

    pub fn row_number(&self) -> usize {
        self.n.parse().unwrap_or(0)
    }

    pub fn outcome_label(&self) -> &'static str {
        self.outcome.map(SendOutcome::label).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    N,
    Name,
    Phone,
    Progress,
    Status,
    Outcome,
}

impl SortColumn {
    pub const ALL: [SortColumn; 6] = [
        SortColumn::N,
        SortColumn::Name,
        SortColumn::Phone,
        SortColumn::Progress,
        SortColumn::Status,
        SortColumn::Outcome,
    ];

    pub fn title(self) -> &'static str {
        match self {
            SortColumn::N => "N",
            SortColumn::Name => "Name",
            SortColumn::Phone => "Phone",
            SortColumn::Progress => "Send progress",
            SortColumn::Status => "Status",
            SortColumn::Outcome => "Outcome",
        }
    }

    fn text_key(self, c: &Contact) -> String {
        match self {
            SortColumn::N => c.n.clone(),
            SortColumn::Name => c.name.to_lowercase(),
            SortColumn::Phone => c.phone_display.to_lowercase(),
            SortColumn::Progress => c.progress.to_lowercase(),
            SortColumn::Status => c.status.to_lowercase(),
            SortColumn::Outcome => c.outcome_label().to_lowercase(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ContactStore {
    path: Option<PathBuf>,
    contacts: Vec<Contact>,
}

fn io_err(path: &Path, source: std::io::Error) -> ContactsError {
    ContactsError::Io { path: path.display().to_string(), source }
}

/// Splits the file into physical records. A newline inside a quoted field
/// does not end a record, and a blank line stays as an empty record so row
/// numbers match the line layout of the file.
fn split_records(text: &str) -> Vec<&str> {
    let mut records = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, ch) in text.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '\n' if !quoted => {
                records.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < text.len() {
        records.push(&text[start..]);
    }
    records
}

fn parse_record(line: &str) -> Result<Vec<String>, ContactsError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(record) => Ok(record?.iter().map(str::to_string).collect()),
        None => Ok(Vec::new()),
    }
}

fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, ContactsError> {
    let text = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    split_records(&text).into_iter().map(parse_record).collect()
}

fn write_rows(path: &Path, rows: &[Vec<String>]) -> Result<(), ContactsError> {
    let mut out = Vec::new();
    for row in rows {
        if row.is_empty() {
            out.push(b'\n');
            continue;
        }
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
        writer.write_record(row)?;
        out.extend(writer.into_inner().map_err(|e| io_err(path, e.into_error()))?);
    }
    fs::write(path, out).map_err(|e| io_err(path, e))
}

impl ContactStore {
    /// Loads a contact file. The first row is a header; rows with no fields
    /// are skipped but keep their row number.
    pub fn load(path: &Path) -> Result<Self, ContactsError> {
        let rows = read_rows(path)?;
        let contacts = rows
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, row)| row.iter().any(|f| !f.is_empty()))
            .map(|(i, row)| Contact::from_row(i, row))
            .collect();
        log::info!("loaded {} contacts from {}", rows.len().saturating_sub(1), path.display());
        Ok(Self { path: Some(path.to_path_buf()), contacts })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn file_name(&self) -> Option<String> {
        self.path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|f| f.to_string_lossy().to_string())
    }

    pub fn all(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn get(&self, n: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.n == n)
    }

    pub fn position(&self, n: &str) -> Option<usize> {
        self.contacts.iter().position(|c| c.n == n)
    }

    fn get_mut(&mut self, n: &str) -> Result<&mut Contact, ContactsError> {
        self.contacts
            .iter_mut()
            .find(|c| c.n == n)
            .ok_or_else(|| ContactsError::UnknownContact(n.to_string()))
    }

    /// Contacts whose name contains `term`, ignoring case, in list order.
    pub fn filter(&self, term: &str) -> Vec<&Contact> {
        let term = term.to_lowercase();
        self.contacts
            .iter()
            .filter(|c| term.is_empty() || c.name.to_lowercase().contains(&term))
            .collect()
    }

    /// Orders `keys` (a visible subset) by a column. Row numbers compare
    /// numerically, everything else as lowercase text.
    pub fn sorted(&self, keys: &[String], column: SortColumn, reverse: bool) -> Vec<String> {
        let mut visible: Vec<&Contact> = keys.iter().filter_map(|k| self.get(k)).collect();
        // Descending order keeps ties in their current order.
        match (column, reverse) {
            (SortColumn::N, false) => visible.sort_by_key(|c| c.row_number()),
            (SortColumn::N, true) => visible.sort_by(|a, b| b.row_number().cmp(&a.row_number())),
            (other, false) => visible.sort_by_key(|c| other.text_key(c)),
            (other, true) => visible.sort_by(|a, b| other.text_key(b).cmp(&other.text_key(a))),
        }
        visible.into_iter().map(|c| c.n.clone()).collect()
    }

    fn write_cell(&self, n: &str, column: usize, value: &str) -> Result<(), ContactsError> {
        let path = self.path.as_deref().ok_or(ContactsError::NoFile)?;
        let mut rows = read_rows(path)?;
        let index: usize = n.parse().map_err(|_| ContactsError::RowOutOfRange(n.to_string()))?;
        if index == 0 || index >= rows.len() {
            return Err(ContactsError::RowOutOfRange(n.to_string()));
        }
        let row = &mut rows[index];
        if row.len() <= column {
            row.resize(column + 1, String::new());
        }
        row[column] = value.to_string();
        write_rows(path, &rows)
    }

    pub fn set_status(&mut self, n: &str, status: &str) -> Result<(), ContactsError> {
        self.get_mut(n)?.status = status.to_string();
        self.write_cell(n, COL_STATUS, status)
    }

    /// Title-cases the new name and stores it. Returns the stored form.
    pub fn rename(&mut self, n: &str, new_name: &str) -> Result<String, ContactsError> {
        let formatted = title_case(new_name.trim());
        self.get_mut(n)?.name = formatted.clone();
        self.write_cell(n, COL_NAME, &formatted)?;
        Ok(formatted)
    }

    /// Stores the digits of `new_phone` as the phone id. Returns the display form.
    pub fn change_phone(&mut self, n: &str, new_phone: &str) -> Result<String, ContactsError> {
        let phone_id = digits_only(new_phone);
        let display = format_phone(&phone_id);
        let contact = self.get_mut(n)?;
        contact.phone_id = phone_id.clone();
        contact.phone_display = display.clone();
        self.write_cell(n, COL_PHONE, &phone_id)?;
        Ok(display)
    }

    /// Appends a new row to the file. The caller reloads to pick it up.
    pub fn append(&self, name: &str, phone: &str) -> Result<(), ContactsError> {
        let path = self.path.as_deref().ok_or(ContactsError::NoFile)?;
        let name = name.trim();
        let phone = digits_only(phone.trim());
        if name.is_empty() || phone.is_empty() {
            return Err(ContactsError::MissingFields);
        }
        let needs_newline = fs::read(path)
            .map(|bytes| !bytes.is_empty() && !bytes.ends_with(b"\n"))
            .unwrap_or(false);
        let mut file = OpenOptions::new().append(true).open(path).map_err(|e| io_err(path, e))?;
        if needs_newline {
            std::io::Write::write_all(&mut file, b"\n").map_err(|e| io_err(path, e))?;
        }
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        writer.write_record([name, "", phone.as_str()])?;
        writer.flush().map_err(|e| io_err(path, e))?;
        Ok(())
    }

    pub fn set_outcome(&mut self, n: &str, outcome: SendOutcome) {
        if let Ok(c) = self.get_mut(n) {
            c.outcome = Some(outcome);
        }
    }

    pub fn set_progress(&mut self, n: &str, label: &str) {
        if let Ok(c) = self.get_mut(n) {
            c.progress = label.to_string();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn scratch_csv(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("huby-contacts-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("list.csv");
        fs::write(&path, body).unwrap();
        path
    }

    const SAMPLE: &str = "nome,email,telefone,status,cidade\n\
        maria silva,m@x.com,11987654321,,Santos\n\
        Dr. João,,1187654321,Caixa postal,Recife\n\
        Ana,,5511912345678\n";

    #[test]
    fn loads_rows_with_padded_numbers() {
        let path = scratch_csv("load", SAMPLE);
        let store = ContactStore::load(&path).unwrap();
        assert_eq!(store.len(), 3);
        let first = &store.all()[0];
        assert_eq!(first.n, "001");
        assert_eq!(first.name, "maria silva");
        assert_eq!(first.phone_display, "(11) 98765-4321");
        assert_eq!(first.phone_id, "11987654321");
        assert_eq!(store.all()[1].status, "Caixa postal");
        assert_eq!(store.all()[2].status, "");
        assert_eq!(store.all()[2].phone_display, "+55 (11) 91234-5678");
    }

    #[test]
    fn status_write_back_preserves_other_columns() {
        let path = scratch_csv("status", SAMPLE);
        let mut store = ContactStore::load(&path).unwrap();
        store.set_status("003", "Sem interesse").unwrap();
        store.set_status("001", "").unwrap();

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], vec!["nome", "email", "telefone", "status", "cidade"]);
        assert_eq!(rows[1], vec!["maria silva", "m@x.com", "11987654321", "", "Santos"]);
        assert_eq!(rows[3], vec!["Ana", "", "5511912345678", "Sem interesse"]);

        let reloaded = ContactStore::load(&path).unwrap();
        assert_eq!(reloaded.get("003").unwrap().status, "Sem interesse");
    }

    #[test]
    fn rename_and_phone_edits_round_trip() {
        let path = scratch_csv("edit", SAMPLE);
        let mut store = ContactStore::load(&path).unwrap();
        assert_eq!(store.rename("001", "  MARIA de souza ").unwrap(), "Maria De Souza");
        assert_eq!(store.change_phone("002", "(21) 3456-7890").unwrap(), "(21) 3456-7890");

        let reloaded = ContactStore::load(&path).unwrap();
        assert_eq!(reloaded.get("001").unwrap().name, "Maria De Souza");
        assert_eq!(reloaded.get("002").unwrap().phone_id, "2134567890");
        assert_eq!(reloaded.get("002").unwrap().status, "Caixa postal");
    }

    #[test]
    fn writes_outside_the_file_are_rejected() {
        let path = scratch_csv("range", SAMPLE);
        let store = ContactStore::load(&path).unwrap();
        assert!(matches!(store.write_cell("000", 0, "x"), Err(ContactsError::RowOutOfRange(_))));
        assert!(matches!(store.write_cell("042", 0, "x"), Err(ContactsError::RowOutOfRange(_))));
    }

    #[test]
    fn append_adds_row_at_the_end() {
        let path = scratch_csv("append", "nome,x,telefone\nAna,,11999990000");
        let store = ContactStore::load(&path).unwrap();
        store.append("Bruno Lima", "+55 (11) 98888-7777").unwrap();
        assert!(matches!(store.append("  ", "123"), Err(ContactsError::MissingFields)));

        let reloaded = ContactStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        let added = reloaded.get("002").unwrap();
        assert_eq!(added.name, "Bruno Lima");
        assert_eq!(added.phone_id, "5511988887777");
    }

    #[test]
    fn filter_is_case_insensitive_on_name() {
        let path = scratch_csv("filter", SAMPLE);
        let store = ContactStore::load(&path).unwrap();
        let hits: Vec<&str> = store.filter("JO").iter().map(|c| c.n.as_str()).collect();
        assert_eq!(hits, vec!["002"]);
        assert_eq!(store.filter("").len(), 3);
        assert!(store.filter("zzz").is_empty());
    }

    #[test]
    fn sorting_uses_numeric_row_order() {
        let path = scratch_csv("sort", SAMPLE);
        let store = ContactStore::load(&path).unwrap();
        let keys: Vec<String> = store.all().iter().map(|c| c.n.clone()).collect();
        assert_eq!(store.sorted(&keys, SortColumn::Name, false), vec!["003", "002", "001"]);
        assert_eq!(store.sorted(&keys, SortColumn::N, true), vec!["003", "002", "001"]);
        let subset = vec!["003".to_string(), "001".to_string()];
        assert_eq!(store.sorted(&subset, SortColumn::N, false), vec!["001", "003"]);
    }

    #[test]
    fn blank_lines_keep_their_row_numbers() {
        let path = scratch_csv(
            "blank",
            "nome,x,tel,status\nAna,,11911110000,\n\nBeto,,11922220000,\n",
        );
        let mut store = ContactStore::load(&path).unwrap();
        let numbers: Vec<&str> = store.all().iter().map(|c| c.n.as_str()).collect();
        assert_eq!(numbers, vec!["001", "003"]);

        store.set_status("001", "X").unwrap();
        store.set_status("003", "Y").unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "nome,x,tel,status\nAna,,11911110000,X\n\nBeto,,11922220000,Y\n"
        );
    }

    #[test]
    fn quoted_newlines_stay_inside_one_row() {
        let path = scratch_csv(
            "quoted",
            "nome,x,tel,status\n\"Ana\nMaria\",,11911110000,\nBeto,,11922220000,\n",
        );
        let mut store = ContactStore::load(&path).unwrap();
        assert_eq!(store.get("001").unwrap().name, "Ana\nMaria");
        assert_eq!(store.get("002").unwrap().name, "Beto");
        store.set_status("002", "Z").unwrap();
        let reloaded = ContactStore::load(&path).unwrap();
        assert_eq!(reloaded.get("001").unwrap().name, "Ana\nMaria");
        assert_eq!(reloaded.get("002").unwrap().status, "Z");
    }

    #[test]
    fn descending_sort_keeps_ties_in_order() {
        let path = scratch_csv(
            "ties",
            "nome,x,tel,status\nAna,,1,Voicemail\nBeto,,2,\nCaio,,3,Voicemail\nDora,,4,\n",
        );
        let store = ContactStore::load(&path).unwrap();
        let keys: Vec<String> = store.all().iter().map(|c| c.n.clone()).collect();
        assert_eq!(store.sorted(&keys, SortColumn::Status, true), vec!["001", "003", "002", "004"]);
        assert_eq!(store.sorted(&keys, SortColumn::Status, false), vec!["002", "004", "001", "003"]);
    }

    #[test]
    fn outcomes_and_progress_stay_in_memory() {
        let path = scratch_csv("outcome", SAMPLE);
        let mut store = ContactStore::load(&path).unwrap();
        store.set_outcome("002", SendOutcome::Failed);
        store.set_progress("002", SendOutcome::Failed.progress_label());
        assert_eq!(store.get("002").unwrap().outcome_label(), "Failed");
        assert_eq!(store.get("002").unwrap().progress, "✗ Failed");
        let reloaded = ContactStore::load(&path).unwrap();
        assert_eq!(reloaded.get("002").unwrap().outcome, None);
    }
}
