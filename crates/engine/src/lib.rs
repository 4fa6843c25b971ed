pub mod cell;
pub mod cell_name;
pub mod dep_graph;
pub mod edit_log;
pub mod error;
pub mod formula;
pub mod request;
pub mod state;

pub use cell::{Cell, CellSnapshot, CellValue};
pub use cell_name::CellName;
pub use dep_graph::DependencyGraph;
pub use edit_log::{CellEdit, EditLog, HistoryPolicy};
pub use error::{ErrorKind, SheetError};
pub use formula::{Formula, FormulaError};
pub use request::{CellUpdate, ClientId, Outcome, Request, RequestKind};
pub use state::{SheetSnapshot, SpreadsheetState};
