//! Per-session worksheet creation
//!
//! Application versions disagree on how a fresh sheet is created, so creation
//! walks an ordered list of [`CreateStrategy`]s and keeps the first one that
//! hands back a sheet object.

use super::connect::AppHandle;
use super::dispatch::{Dispatch, DispatchError, DispatchResult, Variant};
use crate::error::ErrorClass;
use chrono::{DateTime, Local};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Page type code for a workbook
const PAGE_WORKBOOK: i64 = 2;
/// Page type code for a worksheet page
const PAGE_WORKSHEET: i64 = 1;
/// Template argument passed to `CreatePage`
const PAGE_TEMPLATE: &str = "origin";
/// Book used by the last-resort strategy
const FALLBACK_BOOK: &str = "TempBook";
/// Sheet name assumed when the sheet does not report one
const DEFAULT_SHEET: &str = "Sheet1";

/// Resource name for a session started at `started`
pub fn resource_name(started: &DateTime<Local>) -> String {
    format!("Measurement_{}", started.format("%Y%m%d_%H%M%S"))
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CreateError {
    #[error("every worksheet creation strategy failed ({} tried)", failures.len())]
    AllStrategiesFailed {
        failures: Vec<(&'static str, DispatchError)>,
    },
}

impl CreateError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::OptionalIntegration
    }
}

/// Sheet produced by a creation strategy
pub struct CreatedSheet {
    pub sheet: Rc<dyn Dispatch>,
    /// Book holding the sheet, used for `[book]sheet` addressing
    pub book: String,
}

/// One way of creating a fresh sheet
pub trait CreateStrategy {
    fn name(&self) -> &'static str;

    fn create(&self, app: &dyn Dispatch, name: &str) -> DispatchResult<CreatedSheet>;
}

/// Sheet created for one session, with its row cursor
pub struct ExternalResource {
    name: String,
    book: String,
    sheet_name: String,
    sheet: Rc<dyn Dispatch>,
    created_by: &'static str,
    row_cursor: u32,
    winning_strategy: Option<usize>,
}

impl ExternalResource {
    pub fn new(name: impl Into<String>, created: CreatedSheet, created_by: &'static str) -> Self {
        let sheet_name = created
            .sheet
            .get("Name", &[])
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_SHEET.to_string());

        Self {
            name: name.into(),
            book: created.book,
            sheet_name,
            sheet: created.sheet,
            created_by,
            row_cursor: 1,
            winning_strategy: None,
        }
    }

    /// Session name the resource was created for
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sheet(&self) -> &dyn Dispatch {
        self.sheet.as_ref()
    }

    /// `[book]sheet` reference understood by application-level calls
    pub fn sheet_path(&self) -> String {
        format!("[{}]{}", self.book, self.sheet_name)
    }

    /// Creation strategy that produced this resource
    pub fn created_by(&self) -> &'static str {
        self.created_by
    }

    /// Next row to write (1-based)
    pub fn row_cursor(&self) -> u32 {
        self.row_cursor
    }

    pub(crate) fn advance(&mut self) {
        self.row_cursor += 1;
    }

    pub(crate) fn winning_strategy(&self) -> Option<usize> {
        self.winning_strategy
    }

    pub(crate) fn set_winning_strategy(&mut self, index: usize) {
        self.winning_strategy = Some(index);
    }
}

impl fmt::Debug for ExternalResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalResource")
            .field("name", &self.name)
            .field("path", &self.sheet_path())
            .field("created_by", &self.created_by)
            .field("row_cursor", &self.row_cursor)
            .finish()
    }
}

/// Run the strategies in order and wrap the first sheet obtained
pub fn create_resource(
    app: &AppHandle,
    name: &str,
    strategies: &[Box<dyn CreateStrategy>],
) -> Result<ExternalResource, CreateError> {
    let mut failures = Vec::new();

    for strategy in strategies {
        match strategy.create(app.app.as_ref(), name) {
            Ok(created) => {
                let resource = ExternalResource::new(name, created, strategy.name());
                tracing::info!("Created {} via {}", resource.sheet_path(), strategy.name());
                return Ok(resource);
            }
            Err(e) => {
                tracing::debug!("Sheet creation via {} failed: {}", strategy.name(), e);
                failures.push((strategy.name(), e));
            }
        }
    }

    Err(CreateError::AllStrategiesFailed { failures })
}

/// The built-in creation chain, most direct first
pub fn default_create_strategies() -> Vec<Box<dyn CreateStrategy>> {
    vec![
        Box::new(AddWorksheet),
        Box::new(NewWorkbook),
        Box::new(NewWorksheetPage),
        Box::new(ReuseFirstPage),
        Box::new(FallbackWorkbook),
    ]
}

// ==================== Helpers ====================

/// First layer of the page called `page`
fn first_layer(app: &dyn Dispatch, page: &str) -> DispatchResult<Rc<dyn Dispatch>> {
    let pages = app.get("WorksheetPages", &[])?.into_object("WorksheetPages")?;
    let page = pages.get("Item", &[Variant::from(page)])?.into_object("WorksheetPages.Item")?;
    first_layer_of(page.as_ref())
}

fn first_layer_of(page: &dyn Dispatch) -> DispatchResult<Rc<dyn Dispatch>> {
    let layers = page.get("Layers", &[])?.into_object("Layers")?;
    layers.get("Item", &[Variant::Int(0)])?.into_object("Layers.Item")
}

/// Create a page and return the name the application actually gave it
fn create_page(app: &dyn Dispatch, kind: i64, requested: &str) -> DispatchResult<String> {
    let created = app.invoke(
        "CreatePage",
        &[Variant::Int(kind), Variant::from(requested), Variant::from(PAGE_TEMPLATE)],
    )?;
    match created {
        Variant::Text(actual) if !actual.is_empty() => Ok(actual),
        Variant::Empty | Variant::Text(_) => Ok(requested.to_string()),
        other if other.is_truthy() => Ok(requested.to_string()),
        _ => Err(DispatchError::raised("CreatePage", "returned false")),
    }
}

/// Renaming is cosmetic; failures are logged and ignored
fn rename(sheet: &dyn Dispatch, name: &str) {
    if let Err(e) = sheet.put("Name", &[], Variant::from(name)) {
        tracing::debug!("Could not rename sheet to {}: {}", name, e);
    }
}

// ==================== Strategies ====================

/// `Worksheets.Add(name)`
pub struct AddWorksheet;

impl CreateStrategy for AddWorksheet {
    fn name(&self) -> &'static str {
        "worksheets-add"
    }

    fn create(&self, app: &dyn Dispatch, name: &str) -> DispatchResult<CreatedSheet> {
        let sheets = app.get("Worksheets", &[])?.into_object("Worksheets")?;
        let sheet = sheets.invoke("Add", &[Variant::from(name)])?.into_object("Worksheets.Add")?;
        Ok(CreatedSheet {
            sheet,
            book: name.to_string(),
        })
    }
}

/// New workbook `Book_<name>`, first layer renamed to `name`
pub struct NewWorkbook;

impl CreateStrategy for NewWorkbook {
    fn name(&self) -> &'static str {
        "create-workbook"
    }

    fn create(&self, app: &dyn Dispatch, name: &str) -> DispatchResult<CreatedSheet> {
        let book = create_page(app, PAGE_WORKBOOK, &format!("Book_{}", name))?;
        let sheet = first_layer(app, &book)?;
        rename(sheet.as_ref(), name);
        Ok(CreatedSheet { sheet, book })
    }
}

/// New worksheet page called `name`
pub struct NewWorksheetPage;

impl CreateStrategy for NewWorksheetPage {
    fn name(&self) -> &'static str {
        "create-worksheet-page"
    }

    fn create(&self, app: &dyn Dispatch, name: &str) -> DispatchResult<CreatedSheet> {
        let book = create_page(app, PAGE_WORKSHEET, name)?;
        let sheet = first_layer(app, &book)?;
        Ok(CreatedSheet { sheet, book })
    }
}

/// First layer of the first existing worksheet page
pub struct ReuseFirstPage;

impl CreateStrategy for ReuseFirstPage {
    fn name(&self) -> &'static str {
        "reuse-first-page"
    }

    fn create(&self, app: &dyn Dispatch, name: &str) -> DispatchResult<CreatedSheet> {
        let pages = app.get("WorksheetPages", &[])?.into_object("WorksheetPages")?;
        let count = pages
            .get("Count", &[])?
            .as_i64()
            .ok_or_else(|| DispatchError::type_mismatch("WorksheetPages.Count", "an integer"))?;
        if count <= 0 {
            return Err(DispatchError::raised("WorksheetPages", "no existing pages"));
        }

        let page = pages.get("Item", &[Variant::Int(0)])?.into_object("WorksheetPages.Item")?;
        let book = page
            .get("Name", &[])
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let sheet = first_layer_of(page.as_ref())?;
        rename(sheet.as_ref(), name);
        Ok(CreatedSheet { sheet, book })
    }
}

/// Workbook with a fixed name, first layer renamed to `name`
pub struct FallbackWorkbook;

impl CreateStrategy for FallbackWorkbook {
    fn name(&self) -> &'static str {
        "fallback-workbook"
    }

    fn create(&self, app: &dyn Dispatch, name: &str) -> DispatchResult<CreatedSheet> {
        let book = create_page(app, PAGE_WORKBOOK, FALLBACK_BOOK)?;
        let sheet = first_layer(app, &book)?;
        rename(sheet.as_ref(), name);
        Ok(CreatedSheet { sheet, book })
    }
}
