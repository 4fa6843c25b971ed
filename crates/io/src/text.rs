// Plain-text `.sprd` format
//
// One file per spreadsheet. Each record starts with a marker line:
//
//   CELL            name / content / history count / history lines (newest first)
//   CELL_EDIT       cell name / prior content            (undo log, newest first)
//
// Values are single lines: `\` is written as `\\`, newline as `\n` and
// carriage return as `\r`.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use cellsync_engine::{CellEdit, CellSnapshot};

use crate::{validate_name, Storage, StorageError, StoredSpreadsheet};

const EXTENSION: &str = "sprd";
const CELL_MARKER: &str = "CELL";
const EDIT_MARKER: &str = "CELL_EDIT";

/// Directory of `<name>.sprd` files.
#[derive(Debug, Clone)]
pub struct TextStorage {
    dir: PathBuf,
}

impl TextStorage {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{EXTENSION}"))
    }
}

impl Storage for TextStorage {
    fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<StoredSpreadsheet, StorageError> {
        validate_name(name)?;
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(StoredSpreadsheet::default());
        }
        let text = fs::read_to_string(&path)?;
        let sheet = parse(&text)?;
        log::debug!(
            "Loaded {} ({} cells, {} edits) from {}",
            name,
            sheet.cells.len(),
            sheet.edits.len(),
            path.display()
        );
        Ok(sheet)
    }

    fn save(&self, name: &str, sheet: &StoredSpreadsheet) -> Result<(), StorageError> {
        validate_name(name)?;
        let path = self.path_for(name);
        let tmp = self.dir.join(format!(".{name}.{EXTENSION}.tmp"));

        {
            let mut out = BufWriter::new(fs::File::create(&tmp)?);
            write_sheet(&mut out, sheet)?;
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        log::debug!("Saved {} to {}", name, path.display());
        Ok(())
    }
}

fn write_sheet<W: Write>(out: &mut W, sheet: &StoredSpreadsheet) -> std::io::Result<()> {
    for cell in &sheet.cells {
        writeln!(out, "{CELL_MARKER}")?;
        writeln!(out, "{}", escape(&cell.name))?;
        writeln!(out, "{}", escape(&cell.content))?;
        writeln!(out, "{}", cell.history.len())?;
        for prior in &cell.history {
            writeln!(out, "{}", escape(prior))?;
        }
    }
    for edit in &sheet.edits {
        writeln!(out, "{EDIT_MARKER}")?;
        writeln!(out, "{}", escape(&edit.cell_name))?;
        writeln!(out, "{}", escape(&edit.prior_content))?;
    }
    Ok(())
}

/// Line cursor that reports 1-based positions in errors.
struct Lines<'a> {
    inner: std::iter::Enumerate<std::str::Split<'a, char>>,
    line: usize,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        let body = text.strip_suffix('\n').unwrap_or(text);
        Self {
            inner: body.split('\n').enumerate(),
            line: 0,
        }
    }

    fn next_raw(&mut self) -> Option<&'a str> {
        let (idx, line) = self.inner.next()?;
        self.line = idx + 1;
        Some(line)
    }

    fn value(&mut self, what: &str) -> Result<String, StorageError> {
        match self.next_raw() {
            Some(raw) => unescape(raw).map_err(|message| self.corrupt(message)),
            None => Err(self.corrupt(format!("unexpected end of file, expected {what}"))),
        }
    }

    fn corrupt(&self, message: impl Into<String>) -> StorageError {
        StorageError::Corrupt {
            line: self.line,
            message: message.into(),
        }
    }
}

fn parse(text: &str) -> Result<StoredSpreadsheet, StorageError> {
    let mut sheet = StoredSpreadsheet::default();
    if text.is_empty() {
        return Ok(sheet);
    }

    let mut lines = Lines::new(text);
    while let Some(marker) = lines.next_raw() {
        match marker {
            CELL_MARKER => {
                let name = lines.value("cell name")?;
                let content = lines.value("cell content")?;
                let count_line = lines.value("history length")?;
                let count: usize = count_line
                    .parse()
                    .map_err(|_| lines.corrupt(format!("bad history length {count_line:?}")))?;
                let mut history = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    history.push(lines.value("history entry")?);
                }
                sheet.cells.push(CellSnapshot {
                    name,
                    content,
                    history,
                });
            }
            EDIT_MARKER => {
                let cell_name = lines.value("edited cell name")?;
                let prior = lines.value("prior content")?;
                sheet.edits.push(CellEdit::new(cell_name, prior));
            }
            other => return Err(lines.corrupt(format!("unknown record {other:?}"))),
        }
    }
    Ok(sheet)
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(format!("unknown escape \\{other}")),
            None => return Err("dangling backslash".to_string()),
        }
    }
    Ok(out)
}
