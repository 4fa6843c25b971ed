//! Synchronized spreadsheet state.
//!
//! One [`SpreadsheetState`] exists per open spreadsheet and is shared by
//! every connection working on it. All data sits behind a single
//! `RwLock`, and each public operation takes that lock exactly once for its
//! whole duration: validation, cycle check and commit of an edit happen
//! under one write guard, so no other writer can commit between the check
//! and the act. Internal helpers operate on an already-locked
//! [`SheetInner`] and never lock.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellSnapshot, CellValue};
use crate::cell_name::CellName;
use crate::dep_graph::DependencyGraph;
use crate::edit_log::{CellEdit, EditLog, HistoryPolicy};
use crate::error::SheetError;
use crate::formula::{self, Formula};
use crate::request::{CellUpdate, ClientId, Outcome, Request, RequestKind};

/// Consistent copy of everything that gets persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    /// Live cells, ordered by name.
    pub cells: Vec<CellSnapshot>,
    /// Edit log, most recent first.
    pub edits: Vec<CellEdit>,
}

impl SheetSnapshot {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.edits.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SpreadsheetState {
    inner: RwLock<SheetInner>,
}

#[derive(Debug, Default)]
struct SheetInner {
    cells: BTreeMap<String, Cell>,
    deps: DependencyGraph,
    selections: FxHashMap<ClientId, String>,
    edits: EditLog,
    policy: HistoryPolicy,
}

impl SpreadsheetState {
    /// Empty spreadsheet.
    pub fn new(policy: HistoryPolicy) -> Self {
        Self {
            inner: RwLock::new(SheetInner {
                edits: EditLog::new(policy.max_edits),
                policy,
                ..SheetInner::default()
            }),
        }
    }

    /// Rebuild a spreadsheet from persisted cells and edit log.
    ///
    /// Cells with malformed names are skipped, dead cells are dropped, and
    /// formulas that no longer parse keep their text but contribute no
    /// dependencies. Retention limits from `policy` are applied.
    pub fn restore(snapshot: SheetSnapshot, policy: HistoryPolicy) -> Self {
        let mut inner = SheetInner {
            edits: EditLog::new(policy.max_edits),
            policy,
            ..SheetInner::default()
        };

        for mut cell in snapshot.cells {
            let Some(name) = CellName::parse(&cell.name) else {
                log::warn!("Skipping stored cell with invalid name {:?}", cell.name);
                continue;
            };
            if let Some(max) = policy.max_cell_history {
                cell.history.truncate(max);
            }
            let cell = Cell::with_history(name.as_str(), cell.content, cell.history);
            if cell.is_dead() {
                continue;
            }
            let vars = formula::content_variables(cell.content()).unwrap_or_else(|e| {
                log::warn!("Stored formula in {} does not parse: {}", name, e);
                Vec::new()
            });
            inner.deps.replace_dependees(name.as_str(), &vars);
            inner.cells.insert(name.into_string(), cell);
        }

        let edits = snapshot.edits.into_iter().filter_map(|edit| {
            let name = CellName::parse(&edit.cell_name)?;
            Some(CellEdit::new(name.into_string(), edit.prior_content))
        });
        inner.edits = EditLog::from_entries(edits, policy.max_edits);

        Self {
            inner: RwLock::new(inner),
        }
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Record `cell_name` as the client's current selection.
    ///
    /// Last write wins; several clients may select the same cell. Returns
    /// the normalised cell name.
    pub fn select_cell(&self, client: ClientId, cell_name: &str) -> Result<String, SheetError> {
        let name = parse_name(cell_name)?;
        self.inner.write().selections.insert(client, name.as_str().to_string());
        Ok(name.into_string())
    }

    /// Drop a client's selection (on disconnect).
    pub fn deselect(&self, client: ClientId) {
        self.inner.write().selections.remove(&client);
    }

    pub fn client_selected_cell(&self, client: ClientId, cell_name: &str) -> bool {
        let Some(name) = CellName::parse(cell_name) else {
            return false;
        };
        self.inner.read().is_selected(client, name.as_str())
    }

    pub fn selection(&self, client: ClientId) -> Option<String> {
        self.inner.read().selections.get(&client).cloned()
    }

    /// All current selections, ordered by client id.
    pub fn selections(&self) -> Vec<(ClientId, String)> {
        let inner = self.inner.read();
        let mut out: Vec<(ClientId, String)> = inner
            .selections
            .iter()
            .map(|(client, cell)| (*client, cell.clone()))
            .collect();
        out.sort_unstable_by_key(|(client, _)| *client);
        out
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Set a cell's content on behalf of a client that has it selected.
    pub fn edit_cell(
        &self,
        client: ClientId,
        cell_name: &str,
        content: &str,
    ) -> Result<CellUpdate, SheetError> {
        let name = parse_name(cell_name)?;
        let mut inner = self.inner.write();

        if !inner.is_selected(client, name.as_str()) {
            return Err(SheetError::NotSelected {
                client,
                cell: name.into_string(),
            });
        }

        let (content, vars) = normalize_content(content)?;
        if inner.would_create_cycle(name.as_str(), &vars) {
            return Err(SheetError::CircularDependency {
                cell: name.into_string(),
            });
        }

        let prior = inner.content_of(name.as_str()).to_string();
        inner.edits.push(CellEdit::new(name.as_str(), prior));
        Ok(inner.commit(name.as_str(), content, &vars))
    }

    /// Swap a cell's content with its most recent prior content.
    pub fn revert_cell(&self, cell_name: &str) -> Result<CellUpdate, SheetError> {
        let name = parse_name(cell_name)?;
        let mut inner = self.inner.write();

        let cell = inner
            .cells
            .get(name.as_str())
            .ok_or_else(|| SheetError::CellNotFound(name.as_str().to_string()))?;
        let previous = cell
            .previous()
            .ok_or_else(|| SheetError::NothingToRevert(name.as_str().to_string()))?;
        let current = cell.content().to_string();

        // Other cells may have changed since `previous` was current.
        let vars = formula::content_variables(previous).map_err(SheetError::InvalidContent)?;
        if inner.would_create_cycle(name.as_str(), &vars) {
            return Err(SheetError::CircularDependency {
                cell: name.into_string(),
            });
        }

        inner.edits.push(CellEdit::new(name.as_str(), current));
        let content = match inner.cells.get_mut(name.as_str()) {
            Some(cell) => {
                cell.revert();
                cell.content().to_string()
            }
            None => return Err(SheetError::CellNotFound(name.into_string())),
        };
        inner.deps.replace_dependees(name.as_str(), &vars);
        inner.remove_if_dead(name.as_str());

        Ok(CellUpdate {
            cell_name: name.into_string(),
            content,
        })
    }

    /// Undo the most recent edit anywhere in the spreadsheet.
    ///
    /// On failure the log entry stays in place.
    pub fn undo_last_edit(&self) -> Result<CellUpdate, SheetError> {
        let mut inner = self.inner.write();

        let edit = inner.edits.peek().ok_or(SheetError::NoEditsToUndo)?;
        let vars = formula::content_variables(&edit.prior_content)
            .map_err(SheetError::InvalidContent)?;
        if inner.would_create_cycle(&edit.cell_name, &vars) {
            return Err(SheetError::CircularDependency {
                cell: edit.cell_name.clone(),
            });
        }

        let edit = inner.edits.pop().ok_or(SheetError::NoEditsToUndo)?;
        Ok(inner.commit(&edit.cell_name, edit.prior_content, &vars))
    }

    /// Run a decoded request and fold any failure into the outcome.
    pub fn apply(&self, request: &Request) -> Outcome {
        let result = match request.kind {
            RequestKind::SelectCell => self
                .select_cell(request.client, &request.cell_name)
                .map(Outcome::selected),
            RequestKind::EditCell => self
                .edit_cell(request.client, &request.cell_name, &request.content)
                .map(Outcome::updated),
            RequestKind::RevertCell => self.revert_cell(&request.cell_name).map(Outcome::updated),
            RequestKind::Undo => self.undo_last_edit().map(Outcome::updated),
        };

        result.unwrap_or_else(|err| {
            log::debug!(
                "Rejected {:?} from client {} on {:?}: {}",
                request.kind,
                request.client,
                request.cell_name,
                err
            );
            let target = match request.kind {
                RequestKind::Undo => None,
                _ => Some(
                    CellName::parse(&request.cell_name)
                        .map(CellName::into_string)
                        .unwrap_or_else(|| request.cell_name.clone()),
                ),
            };
            Outcome::rejected(target, &err)
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current content of a non-empty cell.
    pub fn get_cell(&self, cell_name: &str) -> Result<String, SheetError> {
        let name = parse_name(cell_name)?;
        let inner = self.inner.read();
        match inner.cells.get(name.as_str()) {
            Some(cell) if !cell.content().is_empty() => Ok(cell.content().to_string()),
            _ => Err(SheetError::CellNotFound(name.into_string())),
        }
    }

    /// Computed value of a cell. Referenced formulas are evaluated first.
    pub fn cell_value(&self, cell_name: &str) -> Result<CellValue, SheetError> {
        let name = parse_name(cell_name)?;
        let inner = self.inner.read();
        let content = inner.content_of(name.as_str());
        if content.starts_with('=') {
            let formula = formula::parse(content).map_err(SheetError::Formula)?;
            let values = inner.numeric_values(formula.variables());
            formula
                .evaluate(|var| values.get(var).copied().flatten())
                .map(CellValue::Number)
                .map_err(SheetError::Formula)
        } else {
            Ok(CellValue::from_literal(content))
        }
    }

    /// Every live cell (including emptied cells that can still be reverted),
    /// ordered by name.
    pub fn populated_cells(&self) -> Vec<CellSnapshot> {
        self.inner.read().cells.values().map(Cell::snapshot).collect()
    }

    /// Edit log, most recent first.
    pub fn edit_history(&self) -> Vec<CellEdit> {
        self.inner.read().edits.iter().cloned().collect()
    }

    /// Cells and edit log taken under a single read guard.
    pub fn snapshot(&self) -> SheetSnapshot {
        let inner = self.inner.read();
        SheetSnapshot {
            cells: inner.cells.values().map(Cell::snapshot).collect(),
            edits: inner.edits.iter().cloned().collect(),
        }
    }

    /// Cells whose formulas reference `cell_name`, sorted.
    pub fn dependents(&self, cell_name: &str) -> Vec<String> {
        let Some(name) = CellName::parse(cell_name) else {
            return Vec::new();
        };
        let inner = self.inner.read();
        sorted_names(inner.deps.dependents(name.as_str()))
    }

    /// Cells referenced by `cell_name`'s formula, sorted.
    pub fn dependees(&self, cell_name: &str) -> Vec<String> {
        let Some(name) = CellName::parse(cell_name) else {
            return Vec::new();
        };
        let inner = self.inner.read();
        sorted_names(inner.deps.dependees(name.as_str()))
    }

    pub fn cell_count(&self) -> usize {
        self.inner.read().cells.len()
    }

    pub fn edit_count(&self) -> usize {
        self.inner.read().edits.len()
    }

    /// Check graph invariants and that the graph mirrors stored formulas.
    #[cfg(any(test, feature = "test-util"))]
    pub fn assert_consistent(&self) {
        let inner = self.inner.read();
        inner.deps.assert_consistent();
        for (name, cell) in &inner.cells {
            assert!(!cell.is_dead(), "dead cell {name} kept in map");
            let mut expected = formula::content_variables(cell.content()).unwrap_or_default();
            expected.sort();
            assert_eq!(sorted_names(inner.deps.dependees(name)), expected, "edges of {name}");
        }
    }
}

impl SheetInner {
    fn is_selected(&self, client: ClientId, name: &str) -> bool {
        self.selections.get(&client).is_some_and(|s| s == name)
    }

    fn content_of(&self, name: &str) -> &str {
        self.cells.get(name).map_or("", Cell::content)
    }

    /// True if giving `cell` references to `vars` would let `cell` reach
    /// itself through the committed graph.
    fn would_create_cycle(&self, cell: &str, vars: &[String]) -> bool {
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut stack: Vec<&str> = vars.iter().map(String::as_str).collect();

        while let Some(current) = stack.pop() {
            if current == cell {
                return true;
            }
            if visited.insert(current) {
                stack.extend(self.deps.dependees(current));
            }
        }
        false
    }

    /// Write already-validated content and rewire the cell's dependencies.
    fn commit(&mut self, name: &str, content: String, vars: &[String]) -> CellUpdate {
        let max_history = self.policy.max_cell_history;
        match self.cells.get_mut(name) {
            Some(cell) => {
                cell.set_content(content.clone(), max_history);
            }
            None => {
                self.cells.insert(name.to_string(), Cell::new(name, content.clone()));
            }
        }
        self.deps.replace_dependees(name, vars);
        self.remove_if_dead(name);

        CellUpdate {
            cell_name: name.to_string(),
            content,
        }
    }

    fn remove_if_dead(&mut self, name: &str) {
        if self.cells.get(name).is_some_and(Cell::is_dead) {
            self.cells.remove(name);
        }
    }

    /// Numeric values of `roots` and everything they reference, or `None`
    /// for cells without one.
    ///
    /// Iterative post-order walk: each cell is evaluated once, after its
    /// references. Cells on a cycle (only possible in persisted data) get
    /// `None`.
    fn numeric_values(&self, roots: Vec<String>) -> FxHashMap<String, Option<f64>> {
        enum Frame {
            Visit(String),
            Finish(String, Formula),
        }

        let mut values: FxHashMap<String, Option<f64>> = FxHashMap::default();
        let mut pending: FxHashSet<String> = FxHashSet::default();
        let mut stack: Vec<Frame> = roots.into_iter().map(Frame::Visit).collect();

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Visit(name) => {
                    if values.contains_key(&name) {
                        continue;
                    }
                    if pending.contains(&name) {
                        values.insert(name, None);
                        continue;
                    }
                    let content = self.content_of(&name);
                    if !content.starts_with('=') {
                        let value = CellValue::from_literal(content).as_number();
                        values.insert(name, value);
                        continue;
                    }
                    let Ok(parsed) = formula::parse(content) else {
                        values.insert(name, None);
                        continue;
                    };
                    let refs = parsed.variables();
                    pending.insert(name.clone());
                    stack.push(Frame::Finish(name, parsed));
                    stack.extend(
                        refs.into_iter()
                            .filter(|r| !values.contains_key(r))
                            .map(Frame::Visit),
                    );
                }
                Frame::Finish(name, parsed) => {
                    pending.remove(&name);
                    if values.contains_key(&name) {
                        continue;
                    }
                    let value = parsed
                        .evaluate(|var| values.get(var).copied().flatten())
                        .ok();
                    values.insert(name, value);
                }
            }
        }
        values
    }
}

fn parse_name(raw: &str) -> Result<CellName, SheetError> {
    CellName::parse(raw).ok_or_else(|| SheetError::InvalidCellName(raw.to_string()))
}

/// Canonicalise content and extract its references.
///
/// Formulas are stored in their canonical form; anything else verbatim.
fn normalize_content(content: &str) -> Result<(String, Vec<String>), SheetError> {
    if content.starts_with('=') {
        let formula = formula::parse(content).map_err(SheetError::InvalidContent)?;
        Ok((formula.to_string(), formula.variables()))
    } else {
        Ok((content.to_string(), Vec::new()))
    }
}

fn sorted_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = names.map(str::to_string).collect();
    out.sort();
    out
}
