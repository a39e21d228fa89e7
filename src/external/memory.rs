//! In-process spreadsheet automation surface
//!
//! Emulates enough of the spreadsheet application's automation model for the
//! adapter to run end to end without the real program: workbooks with sheets,
//! the page/layer collections, and every member the creation and write chains
//! call. Members can be removed or made to raise, which is how tests pin down
//! the fallback order. The `memory` backend uses it for dry runs.
//!
//! Addressing conventions of this surface: rows are 1-based everywhere except
//! the `PutWorksheet` start row, which is 0-based. Columns are 1-based except
//! for `PutCell` and `Columns(c)`, which are 0-based.
//!
//! Every call is recorded as `Type.Member` (host calls as
//! `Host.Attach(prog_id)` / `Host.Launch(prog_id)`), and faults are keyed the
//! same way.

use super::dispatch::{AutomationHost, Dispatch, DispatchError, DispatchResult, Variant};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_SHEET: &str = "Sheet1";

#[derive(Debug, Clone)]
enum Fault {
    Missing,
    Raise,
    /// Raise on the calls whose 0-based sequence number is in the range
    RaiseCalls(Range<usize>),
}

#[derive(Debug)]
struct SheetData {
    name: String,
    cells: BTreeMap<(u32, u32), f64>,
}

impl SheetData {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cells: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct BookData {
    name: String,
    sheets: Vec<SheetData>,
}

#[derive(Debug, Default)]
struct SurfaceState {
    books: Vec<BookData>,
    calls: Vec<String>,
    call_counts: HashMap<String, usize>,
    faults: HashMap<String, Fault>,
    running: bool,
    accepted_prog_ids: Option<Vec<String>>,
}

impl SurfaceState {
    /// Record a member access and apply any configured fault
    fn enter(&mut self, member: &str) -> DispatchResult<()> {
        self.calls.push(member.to_string());
        let counter = self.call_counts.entry(member.to_string()).or_insert(0);
        let seq = *counter;
        *counter += 1;

        match self.faults.get(member) {
            None => Ok(()),
            Some(Fault::Missing) => Err(DispatchError::MemberNotFound(member.to_string())),
            Some(Fault::Raise) => Err(DispatchError::raised(member, "injected failure")),
            Some(Fault::RaiseCalls(calls)) if calls.contains(&seq) => {
                Err(DispatchError::raised(member, format!("injected failure on call {}", seq)))
            }
            Some(Fault::RaiseCalls(_)) => Ok(()),
        }
    }

    fn book(&self, name: &str) -> Option<&BookData> {
        self.books.iter().find(|b| b.name == name)
    }

    fn sheet_mut(&mut self, loc: &SheetLoc) -> DispatchResult<&mut SheetData> {
        self.books
            .iter_mut()
            .find(|b| b.name == loc.book)
            .and_then(|b| b.sheets.get_mut(loc.sheet))
            .ok_or_else(|| DispatchError::raised("Worksheet", format!("[{}] no longer exists", loc.book)))
    }

    fn add_book(&mut self, requested: &str) -> String {
        let mut name = requested.to_string();
        let mut n = 1;
        while self.book(&name).is_some() {
            name = format!("{}{}", requested, n);
            n += 1;
        }
        self.books.push(BookData {
            name: name.clone(),
            sheets: vec![SheetData::new(DEFAULT_SHEET)],
        });
        name
    }

    fn set_cell(&mut self, loc: &SheetLoc, member: &str, row: i64, col: i64, value: &Variant) -> DispatchResult<()> {
        if row < 1 || col < 1 {
            return Err(DispatchError::raised(member, format!("cell ({}, {}) out of range", row, col)));
        }
        let v = value
            .as_f64()
            .ok_or_else(|| DispatchError::type_mismatch(member, "a number"))?;
        self.sheet_mut(loc)?.cells.insert((row as u32, col as u32), v);
        Ok(())
    }
}

/// Shared handle to an emulated application
///
/// Clones share state, so a test keeps one handle for inspection while the
/// host built from another runs on the external-sink worker thread.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether an instance is already running (attach succeeds)
    pub fn with_running_instance(self, running: bool) -> Self {
        self.lock().running = running;
        self
    }

    /// Only these prog ids are registered
    pub fn with_accepted_prog_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().accepted_prog_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Pre-existing workbook
    pub fn with_book(self, name: &str) -> Self {
        self.lock().add_book(name);
        self
    }

    /// Remove `Type.Member` from the surface
    pub fn without_member(self, member: &str) -> Self {
        self.lock().faults.insert(member.to_string(), Fault::Missing);
        self
    }

    /// Make every call to `Type.Member` raise
    pub fn raising(self, member: &str) -> Self {
        self.lock().faults.insert(member.to_string(), Fault::Raise);
        self
    }

    /// Make the calls to `Type.Member` numbered by `calls` (0-based) raise
    pub fn raising_calls(self, member: &str, calls: Range<usize>) -> Self {
        self.lock()
            .faults
            .insert(member.to_string(), Fault::RaiseCalls(calls));
        self
    }

    /// Host entry point for the connect chain
    pub fn host(&self) -> MemoryHost {
        MemoryHost {
            surface: self.clone(),
        }
    }

    /// Every recorded member access, in call order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded accesses to `Type.Member`
    pub fn call_count(&self, member: &str) -> usize {
        self.lock().call_counts.get(member).copied().unwrap_or(0)
    }

    pub fn clear_calls(&self) {
        let mut state = self.lock();
        state.calls.clear();
        state.call_counts.clear();
    }

    /// Workbook names, in creation order
    pub fn books(&self) -> Vec<String> {
        self.lock().books.iter().map(|b| b.name.clone()).collect()
    }

    pub fn remove_book(&self, name: &str) {
        self.lock().books.retain(|b| b.name != name);
    }

    /// Value of one cell of the first sheet of `book`
    pub fn cell(&self, book: &str, row: u32, col: u32) -> Option<f64> {
        let state = self.lock();
        state
            .book(book)
            .and_then(|b| b.sheets.first())
            .and_then(|s| s.cells.get(&(row, col)).copied())
    }

    /// Columns 1..=3 of `row` in the first sheet of `book`
    pub fn row_values(&self, book: &str, row: u32) -> Vec<Option<f64>> {
        (1..=3).map(|col| self.cell(book, row, col)).collect()
    }

    /// Rows holding at least one value, ascending
    pub fn used_rows(&self, book: &str) -> Vec<u32> {
        let state = self.lock();
        let mut rows: Vec<u32> = state
            .book(book)
            .and_then(|b| b.sheets.first())
            .map(|s| s.cells.keys().map(|(row, _)| *row).collect())
            .unwrap_or_default();
        rows.dedup();
        rows
    }

    fn enter(&self, member: &str) -> DispatchResult<()> {
        self.lock().enter(member)
    }

    fn object(&self, obj: impl Dispatch + 'static) -> Variant {
        Variant::Object(Rc::new(obj))
    }
}

// ==================== Host ====================

/// [`AutomationHost`] backed by a [`MemorySurface`]
#[derive(Debug, Clone)]
pub struct MemoryHost {
    surface: MemorySurface,
}

impl MemoryHost {
    fn check_prog_id(&self, prog_id: &str) -> DispatchResult<()> {
        let state = self.surface.lock();
        match &state.accepted_prog_ids {
            Some(ids) if !ids.iter().any(|id| id == prog_id) => {
                Err(DispatchError::raised(prog_id, "class not registered"))
            }
            _ => Ok(()),
        }
    }

    fn app(&self) -> Rc<dyn Dispatch> {
        Rc::new(MemoryApp {
            surface: self.surface.clone(),
        })
    }
}

impl AutomationHost for MemoryHost {
    fn is_available(&self) -> bool {
        true
    }

    fn attach(&self, prog_id: &str) -> DispatchResult<Rc<dyn Dispatch>> {
        self.surface.lock().calls.push(format!("Host.Attach({})", prog_id));
        self.check_prog_id(prog_id)?;
        if !self.surface.lock().running {
            return Err(DispatchError::raised(prog_id, "operation unavailable"));
        }
        Ok(self.app())
    }

    fn launch(&self, prog_id: &str) -> DispatchResult<Rc<dyn Dispatch>> {
        self.surface.lock().calls.push(format!("Host.Launch({})", prog_id));
        self.check_prog_id(prog_id)?;
        self.surface.lock().running = true;
        Ok(self.app())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ==================== Argument helpers ====================

fn arg<'a>(args: &'a [Variant], index: usize, member: &str) -> DispatchResult<&'a Variant> {
    args.get(index)
        .ok_or_else(|| DispatchError::raised(member, format!("missing argument {}", index)))
}

fn arg_i64(args: &[Variant], index: usize, member: &str) -> DispatchResult<i64> {
    arg(args, index, member)?
        .as_i64()
        .ok_or_else(|| DispatchError::type_mismatch(member, "an integer"))
}

fn arg_str<'a>(args: &'a [Variant], index: usize, member: &str) -> DispatchResult<&'a str> {
    arg(args, index, member)?
        .as_str()
        .ok_or_else(|| DispatchError::type_mismatch(member, "a string"))
}

fn not_found(member: &str) -> DispatchError {
    DispatchError::MemberNotFound(member.to_string())
}

/// `A` -> 1, `Z` -> 26, `AA` -> 27
fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        let c = c.to_ascii_uppercase();
        c.is_ascii_uppercase()
            .then(|| acc * 26 + (c as u32 - 'A' as u32 + 1))
    })
}

/// `B7` -> (7, 2)
fn parse_cell_ref(text: &str) -> Option<(u32, u32)> {
    let split = text.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = text.split_at(split);
    Some((digits.parse().ok()?, column_index(letters)?))
}

/// Parse `col(A)[1] = 2; col(B)[1] = 3.5;` into (row, col, value) triples
fn parse_labtalk(command: &str) -> Option<Vec<(u32, u32, f64)>> {
    command
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|stmt| {
            let rest = stmt.strip_prefix("col(")?;
            let (letters, rest) = rest.split_once(")[")?;
            let (row, rest) = rest.split_once(']')?;
            let value = rest.trim().strip_prefix('=')?.trim();
            Some((row.trim().parse().ok()?, column_index(letters.trim())?, value.parse().ok()?))
        })
        .collect()
}

// ==================== Objects ====================

#[derive(Debug, Clone)]
struct SheetLoc {
    book: String,
    sheet: usize,
}

struct MemoryApp {
    surface: MemorySurface,
}

impl Dispatch for MemoryApp {
    fn invoke(&self, member: &str, args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Application.{}", member);
        self.surface.enter(&qualified)?;
        match member {
            "CreatePage" => {
                let kind = arg_i64(args, 0, &qualified)?;
                let name = arg_str(args, 1, &qualified)?;
                if kind != 1 && kind != 2 {
                    return Err(DispatchError::raised(&qualified, format!("unsupported page type {}", kind)));
                }
                Ok(Variant::Text(self.surface.lock().add_book(name)))
            }
            "PutWorksheet" => {
                let path = arg_str(args, 0, &qualified)?;
                let data = arg(args, 1, &qualified)?;
                let start_row = args.get(2).and_then(Variant::as_i64).unwrap_or(0);
                let start_col = args.get(3).and_then(Variant::as_i64).unwrap_or(0);

                let Some(loc) = resolve_path(&self.surface, path) else {
                    return Ok(Variant::Bool(false));
                };
                put_matrix(&self.surface, &loc, &qualified, data, start_row, start_col)?;
                Ok(Variant::Bool(true))
            }
            _ => Err(not_found(&qualified)),
        }
    }

    fn get(&self, property: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Application.{}", property);
        self.surface.enter(&qualified)?;
        match property {
            "Worksheets" => Ok(self.surface.object(MemoryWorksheets {
                surface: self.surface.clone(),
            })),
            "WorksheetPages" => Ok(self.surface.object(MemoryPages {
                surface: self.surface.clone(),
            })),
            _ => Err(not_found(&qualified)),
        }
    }

    fn put(&self, property: &str, _args: &[Variant], _value: Variant) -> DispatchResult<()> {
        let qualified = format!("Application.{}", property);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn type_name(&self) -> &str {
        "Application"
    }
}

/// Resolve `[book]sheet`
fn resolve_path(surface: &MemorySurface, path: &str) -> Option<SheetLoc> {
    let rest = path.strip_prefix('[')?;
    let (book, sheet) = rest.split_once(']')?;
    let state = surface.lock();
    let index = state.book(book)?.sheets.iter().position(|s| s.name == sheet)?;
    Some(SheetLoc {
        book: book.to_string(),
        sheet: index,
    })
}

/// Write a 2-D array with a 0-based start row/column
fn put_matrix(
    surface: &MemorySurface,
    loc: &SheetLoc,
    member: &str,
    data: &Variant,
    start_row: i64,
    start_col: i64,
) -> DispatchResult<()> {
    let rows = data
        .as_array()
        .ok_or_else(|| DispatchError::type_mismatch(member, "a 2-D array"))?;
    let mut state = surface.lock();
    for (r, row) in rows.iter().enumerate() {
        let cells = row
            .as_array()
            .ok_or_else(|| DispatchError::type_mismatch(member, "a 2-D array"))?;
        for (c, value) in cells.iter().enumerate() {
            state.set_cell(loc, member, start_row + r as i64 + 1, start_col + c as i64 + 1, value)?;
        }
    }
    Ok(())
}

struct MemoryWorksheets {
    surface: MemorySurface,
}

impl Dispatch for MemoryWorksheets {
    fn invoke(&self, member: &str, args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Worksheets.{}", member);
        self.surface.enter(&qualified)?;
        match member {
            "Add" => {
                let name = arg_str(args, 0, &qualified)?;
                let book = self.surface.lock().add_book(name);
                Ok(self.surface.object(MemorySheet {
                    surface: self.surface.clone(),
                    loc: SheetLoc { book, sheet: 0 },
                }))
            }
            _ => Err(not_found(&qualified)),
        }
    }

    fn get(&self, property: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Worksheets.{}", property);
        self.surface.enter(&qualified)?;
        match property {
            "Count" => Ok(Variant::Int(self.surface.lock().books.len() as i64)),
            _ => Err(not_found(&qualified)),
        }
    }

    fn put(&self, property: &str, _args: &[Variant], _value: Variant) -> DispatchResult<()> {
        let qualified = format!("Worksheets.{}", property);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn type_name(&self) -> &str {
        "Worksheets"
    }
}

struct MemoryPages {
    surface: MemorySurface,
}

impl MemoryPages {
    fn item(&self, member: &str, key: &Variant) -> DispatchResult<Variant> {
        let state = self.surface.lock();
        let book = match key {
            Variant::Text(name) => state.book(name).map(|b| b.name.clone()),
            other => other
                .as_i64()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| state.books.get(i))
                .map(|b| b.name.clone()),
        };
        drop(state);

        match book {
            Some(book) => Ok(self.surface.object(MemoryPage {
                surface: self.surface.clone(),
                book,
            })),
            None => Err(DispatchError::raised(member, format!("no page {:?}", key))),
        }
    }
}

impl Dispatch for MemoryPages {
    fn invoke(&self, member: &str, args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("WorksheetPages.{}", member);
        self.surface.enter(&qualified)?;
        match member {
            "Item" => self.item(&qualified, arg(args, 0, &qualified)?),
            _ => Err(not_found(&qualified)),
        }
    }

    fn get(&self, property: &str, args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("WorksheetPages.{}", property);
        self.surface.enter(&qualified)?;
        match property {
            "Count" => Ok(Variant::Int(self.surface.lock().books.len() as i64)),
            "Item" => self.item(&qualified, arg(args, 0, &qualified)?),
            _ => Err(not_found(&qualified)),
        }
    }

    fn put(&self, property: &str, _args: &[Variant], _value: Variant) -> DispatchResult<()> {
        let qualified = format!("WorksheetPages.{}", property);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn type_name(&self) -> &str {
        "WorksheetPages"
    }
}

struct MemoryPage {
    surface: MemorySurface,
    book: String,
}

impl Dispatch for MemoryPage {
    fn invoke(&self, member: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("WorksheetPage.{}", member);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn get(&self, property: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("WorksheetPage.{}", property);
        self.surface.enter(&qualified)?;
        match property {
            "Name" => Ok(Variant::Text(self.book.clone())),
            "Layers" => Ok(self.surface.object(MemoryLayers {
                surface: self.surface.clone(),
                book: self.book.clone(),
            })),
            _ => Err(not_found(&qualified)),
        }
    }

    fn put(&self, property: &str, _args: &[Variant], _value: Variant) -> DispatchResult<()> {
        let qualified = format!("WorksheetPage.{}", property);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn type_name(&self) -> &str {
        "WorksheetPage"
    }
}

struct MemoryLayers {
    surface: MemorySurface,
    book: String,
}

impl Dispatch for MemoryLayers {
    fn invoke(&self, member: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Layers.{}", member);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn get(&self, property: &str, args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Layers.{}", property);
        self.surface.enter(&qualified)?;
        let count = self
            .surface
            .lock()
            .book(&self.book)
            .map(|b| b.sheets.len())
            .unwrap_or(0);
        match property {
            "Count" => Ok(Variant::Int(count as i64)),
            "Item" => {
                let index = arg_i64(args, 0, &qualified)?;
                match usize::try_from(index) {
                    Ok(sheet) if sheet < count => Ok(self.surface.object(MemorySheet {
                        surface: self.surface.clone(),
                        loc: SheetLoc {
                            book: self.book.clone(),
                            sheet,
                        },
                    })),
                    _ => Err(DispatchError::raised(&qualified, format!("no layer {}", index))),
                }
            }
            _ => Err(not_found(&qualified)),
        }
    }

    fn put(&self, property: &str, _args: &[Variant], _value: Variant) -> DispatchResult<()> {
        let qualified = format!("Layers.{}", property);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn type_name(&self) -> &str {
        "Layers"
    }
}

struct MemorySheet {
    surface: MemorySurface,
    loc: SheetLoc,
}

impl MemorySheet {
    fn set(&self, member: &str, row: i64, col: i64, value: &Variant) -> DispatchResult<()> {
        self.surface.lock().set_cell(&self.loc, member, row, col, value)
    }

    /// `member(row, col, value)` with the column shifted by `col_base`
    fn set_from_args(&self, member: &str, args: &[Variant], col_base: i64) -> DispatchResult<Variant> {
        let row = arg_i64(args, 0, member)?;
        let col = arg_i64(args, 1, member)? + col_base;
        self.set(member, row, col, arg(args, 2, member)?)?;
        Ok(Variant::Empty)
    }

    fn child(&self, obj: impl Dispatch + 'static) -> Variant {
        self.surface.object(obj)
    }
}

impl Dispatch for MemorySheet {
    fn invoke(&self, member: &str, args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Worksheet.{}", member);
        self.surface.enter(&qualified)?;
        match member {
            "Execute" => {
                let command = arg_str(args, 0, &qualified)?;
                let assignments = parse_labtalk(command)
                    .ok_or_else(|| DispatchError::raised(&qualified, "syntax error"))?;
                for (row, col, value) in assignments {
                    self.set(&qualified, i64::from(row), i64::from(col), &Variant::Float(value))?;
                }
                Ok(Variant::Bool(true))
            }
            "SetBinaryStorageData" | "SetCell" => self.set_from_args(&qualified, args, 0),
            "PutCell" => self.set_from_args(&qualified, args, 1),
            "SetData" => {
                let row = arg_i64(args, 0, &qualified)?;
                let col = arg_i64(args, 1, &qualified)?;
                match arg(args, 2, &qualified)? {
                    Variant::Array(values) => {
                        for (offset, value) in values.iter().enumerate() {
                            self.set(&qualified, row, col + offset as i64, value)?;
                        }
                    }
                    value => self.set(&qualified, row, col, value)?,
                }
                Ok(Variant::Empty)
            }
            "PutWorksheet" => {
                let data = arg(args, 0, &qualified)?;
                let start_row = args.get(1).and_then(Variant::as_i64).unwrap_or(0);
                let start_col = args.get(2).and_then(Variant::as_i64).unwrap_or(0);
                put_matrix(&self.surface, &self.loc, &qualified, data, start_row, start_col)?;
                Ok(Variant::Bool(true))
            }
            "NewDataRange" => Ok(self.child(MemoryDataRange {
                surface: self.surface.clone(),
                loc: self.loc.clone(),
            })),
            _ => Err(not_found(&qualified)),
        }
    }

    fn get(&self, property: &str, args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Worksheet.{}", property);
        self.surface.enter(&qualified)?;
        match property {
            "Name" => {
                let mut state = self.surface.lock();
                Ok(Variant::Text(state.sheet_mut(&self.loc)?.name.clone()))
            }
            "Cols" | "Columns" => {
                let base = if property == "Columns" { 1 } else { 0 };
                let col = arg_i64(args, 0, &qualified)? + base;
                Ok(self.child(MemoryColumn {
                    surface: self.surface.clone(),
                    loc: self.loc.clone(),
                    col,
                }))
            }
            "Cells" => {
                let row = arg_i64(args, 0, &qualified)?;
                let col = arg_i64(args, 1, &qualified)?;
                Ok(self.child(MemoryCell {
                    surface: self.surface.clone(),
                    loc: self.loc.clone(),
                    row,
                    col,
                }))
            }
            "Range" => {
                let address = arg_str(args, 0, &qualified)?;
                let (first, last) = address.split_once(':').unwrap_or((address, address));
                let bad = || DispatchError::raised(&qualified, format!("bad address {}", address));
                let (row, first_col) = parse_cell_ref(first).ok_or_else(bad)?;
                let (last_row, last_col) = parse_cell_ref(last).ok_or_else(bad)?;
                if row != last_row || last_col < first_col {
                    return Err(bad());
                }
                Ok(self.child(MemoryRange {
                    surface: self.surface.clone(),
                    loc: self.loc.clone(),
                    row,
                    first_col,
                    last_col,
                }))
            }
            _ => Err(not_found(&qualified)),
        }
    }

    fn put(&self, property: &str, _args: &[Variant], value: Variant) -> DispatchResult<()> {
        let qualified = format!("Worksheet.{}", property);
        self.surface.enter(&qualified)?;
        match property {
            "Name" => {
                let name = value
                    .as_str()
                    .ok_or_else(|| DispatchError::type_mismatch(&qualified, "a string"))?;
                let mut state = self.surface.lock();
                state.sheet_mut(&self.loc)?.name = name.to_string();
                Ok(())
            }
            _ => Err(not_found(&qualified)),
        }
    }

    fn type_name(&self) -> &str {
        "Worksheet"
    }
}

/// Column reached through `Cols(c)` or `Columns(c)`; `col` is already 1-based
struct MemoryColumn {
    surface: MemorySurface,
    loc: SheetLoc,
    col: i64,
}

impl Dispatch for MemoryColumn {
    fn invoke(&self, member: &str, args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Column.{}", member);
        self.surface.enter(&qualified)?;
        match member {
            "SetCell" => {
                let row = arg_i64(args, 0, &qualified)?;
                let value = arg(args, 1, &qualified)?;
                self.surface.lock().set_cell(&self.loc, &qualified, row, self.col, value)?;
                Ok(Variant::Empty)
            }
            _ => Err(not_found(&qualified)),
        }
    }

    fn get(&self, property: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Column.{}", property);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn put(&self, property: &str, args: &[Variant], value: Variant) -> DispatchResult<()> {
        let qualified = format!("Column.{}", property);
        self.surface.enter(&qualified)?;
        match property {
            "Item" => {
                let row = arg_i64(args, 0, &qualified)?;
                self.surface.lock().set_cell(&self.loc, &qualified, row, self.col, &value)
            }
            _ => Err(not_found(&qualified)),
        }
    }

    fn type_name(&self) -> &str {
        "Column"
    }
}

struct MemoryDataRange {
    surface: MemorySurface,
    loc: SheetLoc,
}

impl Dispatch for MemoryDataRange {
    fn invoke(&self, member: &str, args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("DataRange.{}", member);
        self.surface.enter(&qualified)?;
        match member {
            "SetData" => {
                let row = arg_i64(args, 0, &qualified)?;
                let col = arg_i64(args, 1, &qualified)?;
                let value = arg(args, 2, &qualified)?;
                self.surface.lock().set_cell(&self.loc, &qualified, row, col, value)?;
                Ok(Variant::Empty)
            }
            _ => Err(not_found(&qualified)),
        }
    }

    fn get(&self, property: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("DataRange.{}", property);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn put(&self, property: &str, _args: &[Variant], _value: Variant) -> DispatchResult<()> {
        let qualified = format!("DataRange.{}", property);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn type_name(&self) -> &str {
        "DataRange"
    }
}

struct MemoryRange {
    surface: MemorySurface,
    loc: SheetLoc,
    row: u32,
    first_col: u32,
    last_col: u32,
}

impl Dispatch for MemoryRange {
    fn invoke(&self, member: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Range.{}", member);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn get(&self, property: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Range.{}", property);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn put(&self, property: &str, _args: &[Variant], value: Variant) -> DispatchResult<()> {
        let qualified = format!("Range.{}", property);
        self.surface.enter(&qualified)?;
        match property {
            "Value" => {
                let width = (self.last_col - self.first_col + 1) as usize;
                let values = value
                    .as_array()
                    .filter(|v| v.len() == width)
                    .ok_or_else(|| DispatchError::type_mismatch(&qualified, "one value per cell"))?;
                let mut state = self.surface.lock();
                for (offset, v) in values.iter().enumerate() {
                    let col = i64::from(self.first_col) + offset as i64;
                    state.set_cell(&self.loc, &qualified, i64::from(self.row), col, v)?;
                }
                Ok(())
            }
            _ => Err(not_found(&qualified)),
        }
    }

    fn type_name(&self) -> &str {
        "Range"
    }
}

struct MemoryCell {
    surface: MemorySurface,
    loc: SheetLoc,
    row: i64,
    col: i64,
}

impl Dispatch for MemoryCell {
    fn invoke(&self, member: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Cell.{}", member);
        self.surface.enter(&qualified)?;
        Err(not_found(&qualified))
    }

    fn get(&self, property: &str, _args: &[Variant]) -> DispatchResult<Variant> {
        let qualified = format!("Cell.{}", property);
        self.surface.enter(&qualified)?;
        match property {
            "Value" => {
                let mut state = self.surface.lock();
                let sheet = state.sheet_mut(&self.loc)?;
                let value = u32::try_from(self.row)
                    .ok()
                    .zip(u32::try_from(self.col).ok())
                    .and_then(|key| sheet.cells.get(&key).copied());
                Ok(value.map(Variant::Float).unwrap_or(Variant::Empty))
            }
            _ => Err(not_found(&qualified)),
        }
    }

    fn put(&self, property: &str, _args: &[Variant], value: Variant) -> DispatchResult<()> {
        let qualified = format!("Cell.{}", property);
        self.surface.enter(&qualified)?;
        match property {
            "Value" => self
                .surface
                .lock()
                .set_cell(&self.loc, &qualified, self.row, self.col, &value),
            _ => Err(not_found(&qualified)),
        }
    }

    fn type_name(&self) -> &str {
        "Cell"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A"), Some(1));
        assert_eq!(column_index("c"), Some(3));
        assert_eq!(column_index("AA"), Some(27));
        assert_eq!(column_index("1"), None);
        assert_eq!(column_index(""), None);
    }

    #[test]
    fn test_parse_labtalk() {
        assert_eq!(
            parse_labtalk("col(A)[2] = 1000; col(B)[2] = 21.5; col(C)[2] = -0.1;"),
            Some(vec![(2, 1, 1000.0), (2, 2, 21.5), (2, 3, -0.1)])
        );
        assert_eq!(parse_labtalk("worksheet -a 3"), None);
    }

    #[test]
    fn test_parse_cell_ref() {
        assert_eq!(parse_cell_ref("C12"), Some((12, 3)));
        assert_eq!(parse_cell_ref("12"), None);
    }

    #[test]
    fn test_faults_and_call_log() {
        let surface = MemorySurface::new()
            .without_member("Application.Worksheets")
            .raising_calls("Application.CreatePage", 1..2);
        let app = surface.host().launch("Origin.Application").unwrap();

        assert_eq!(
            app.get("Worksheets", &[]).err(),
            Some(DispatchError::MemberNotFound("Application.Worksheets".to_string()))
        );
        let args = [Variant::Int(2), Variant::from("Book"), Variant::from("origin")];
        assert!(app.invoke("CreatePage", &args).is_ok());
        assert!(app.invoke("CreatePage", &args).is_err());
        assert!(app.invoke("CreatePage", &args).is_ok());

        assert_eq!(surface.call_count("Application.CreatePage"), 3);
        assert_eq!(surface.books(), vec!["Book", "Book1"]);
    }

    #[test]
    fn test_attach_requires_running_instance() {
        let surface = MemorySurface::new();
        assert!(surface.host().attach("Origin.Application").is_err());
        surface.host().launch("Origin.Application").unwrap();
        assert!(surface.host().attach("Origin.Application").is_ok());
    }

    #[test]
    fn test_cells_reject_column_zero() {
        let surface = MemorySurface::new();
        let app = surface.host().launch("Origin.Application").unwrap();
        let sheets = app.get("Worksheets", &[]).unwrap().into_object("Worksheets").unwrap();
        let sheet = sheets.invoke("Add", &[Variant::from("S")]).unwrap().into_object("Add").unwrap();

        let cell = sheet
            .get("Cells", &[Variant::Int(1), Variant::Int(0)])
            .unwrap()
            .into_object("Cells")
            .unwrap();
        assert!(cell.put("Value", &[], Variant::Float(1.0)).is_err());

        let cell = sheet
            .get("Cells", &[Variant::Int(1), Variant::Int(1)])
            .unwrap()
            .into_object("Cells")
            .unwrap();
        cell.put("Value", &[], Variant::Float(1.0)).unwrap();
        assert_eq!(surface.cell("S", 1, 1), Some(1.0));
        assert_eq!(surface.used_rows("S"), vec![1]);
    }
}
