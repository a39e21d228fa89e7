//! Write strategies for one sample row
//!
//! Each strategy is one concrete way of getting three values into a row of
//! the session sheet. Which of them work depends on the application version,
//! so the adapter tries them in the order of [`default_write_strategies`].
//! A strategy only reports success or failure; the row cursor belongs to the
//! adapter.

use super::dispatch::{Dispatch, DispatchError, DispatchResult, Variant};
use super::resource::ExternalResource;
use crate::types::Sample;

/// Everything a strategy may touch for one write
pub struct WriteContext<'a> {
    pub app: &'a dyn Dispatch,
    pub resource: &'a ExternalResource,
    /// Target row (1-based)
    pub row: u32,
}

impl WriteContext<'_> {
    fn sheet(&self) -> &dyn Dispatch {
        self.resource.sheet()
    }
}

/// One tactic for writing a sample row
pub trait WriteStrategy {
    /// Stable identifier, reported with every write result
    fn name(&self) -> &'static str;

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()>;
}

/// The three row values in column order
fn row_values(sample: &Sample) -> [Variant; 3] {
    [
        Variant::from(sample.elapsed_ms),
        Variant::from(sample.temperature),
        Variant::from(sample.rate_of_change),
    ]
}

/// Pairs of (column index, value) starting at `first_column`
fn columns_from(first_column: i64, sample: &Sample) -> impl Iterator<Item = (i64, Variant)> {
    (first_column..).zip(row_values(sample))
}

/// Invoke `member(row, column, value)` on `target` for each column
fn per_cell_invoke(
    target: &dyn Dispatch,
    member: &str,
    row: u32,
    first_column: i64,
    sample: &Sample,
) -> DispatchResult<()> {
    for (col, value) in columns_from(first_column, sample) {
        target.invoke(member, &[Variant::from(row), Variant::Int(col), value])?;
    }
    Ok(())
}

/// `Cells(row, column).Value = value` for each column
fn per_cell_value(ctx: &WriteContext<'_>, first_column: i64, sample: &Sample) -> DispatchResult<()> {
    for (col, value) in columns_from(first_column, sample) {
        let cell = ctx
            .sheet()
            .get("Cells", &[Variant::from(ctx.row), Variant::Int(col)])?
            .into_object("Cells")?;
        cell.put("Value", &[], value)?;
    }
    Ok(())
}

/// One-row 2-D array for the `PutWorksheet` family
fn single_row_matrix(sample: &Sample) -> Variant {
    Variant::Array(vec![Variant::Array(row_values(sample).to_vec())])
}

/// LabTalk text assigning the row through `col(X)[row]`
pub fn labtalk_row_command(row: u32, sample: &Sample) -> String {
    format!(
        "col(A)[{row}] = {}; col(B)[{row}] = {:?}; col(C)[{row}] = {:?};",
        sample.elapsed_ms, sample.temperature, sample.rate_of_change
    )
}

// ==================== Strategies ====================

/// LabTalk command run through the sheet's `Execute`
pub struct LabTalkExecute;

impl WriteStrategy for LabTalkExecute {
    fn name(&self) -> &'static str {
        "labtalk-execute"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        let command = labtalk_row_command(ctx.row, sample);
        let result = ctx.sheet().invoke("Execute", &[Variant::from(command)])?;
        if matches!(result, Variant::Bool(false)) {
            return Err(DispatchError::raised("Execute", "command rejected"));
        }
        Ok(())
    }
}

/// `Cols(c)[row] = value`, columns 1-based
pub struct ColsItem;

impl WriteStrategy for ColsItem {
    fn name(&self) -> &'static str {
        "cols-item"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        for (col, value) in columns_from(1, sample) {
            let column = ctx.sheet().get("Cols", &[Variant::Int(col)])?.into_object("Cols")?;
            column.put("Item", &[Variant::from(ctx.row)], value)?;
        }
        Ok(())
    }
}

/// `NewDataRange().SetData(row, c, value)`
pub struct NewDataRangeSetData;

impl WriteStrategy for NewDataRangeSetData {
    fn name(&self) -> &'static str {
        "new-data-range"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        let range = ctx.sheet().invoke("NewDataRange", &[])?.into_object("NewDataRange")?;
        per_cell_invoke(range.as_ref(), "SetData", ctx.row, 1, sample)
    }
}

/// `SetBinaryStorageData(row, c, value)`
pub struct SetBinaryStorageData;

impl WriteStrategy for SetBinaryStorageData {
    fn name(&self) -> &'static str {
        "set-binary-storage-data"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        per_cell_invoke(ctx.sheet(), "SetBinaryStorageData", ctx.row, 1, sample)
    }
}

/// `Range("A{row}:C{row}").Value = [..]`
pub struct RangeValue;

impl WriteStrategy for RangeValue {
    fn name(&self) -> &'static str {
        "range-value"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        let address = format!("A{row}:C{row}", row = ctx.row);
        let range = ctx.sheet().get("Range", &[Variant::from(address)])?.into_object("Range")?;
        range.put("Value", &[], Variant::Array(row_values(sample).to_vec()))
    }
}

/// `SetData(row, c, value)` for each column
pub struct SetDataCells;

impl WriteStrategy for SetDataCells {
    fn name(&self) -> &'static str {
        "set-data-cells"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        per_cell_invoke(ctx.sheet(), "SetData", ctx.row, 1, sample)
    }
}

/// `SetData(row, 1, [..])`
pub struct SetDataArray;

impl WriteStrategy for SetDataArray {
    fn name(&self) -> &'static str {
        "set-data-array"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        ctx.sheet().invoke(
            "SetData",
            &[
                Variant::from(ctx.row),
                Variant::Int(1),
                Variant::Array(row_values(sample).to_vec()),
            ],
        )?;
        Ok(())
    }
}

/// `Cells(row, 1..=3).Value`
pub struct CellsOneBased;

impl WriteStrategy for CellsOneBased {
    fn name(&self) -> &'static str {
        "cells-one-based"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        per_cell_value(ctx, 1, sample)
    }
}

/// Application-level `PutWorksheet("[book]sheet", rows, start_row, 0)`
///
/// Reports success through its return value.
pub struct AppPutWorksheet;

impl WriteStrategy for AppPutWorksheet {
    fn name(&self) -> &'static str {
        "app-put-worksheet"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        let ok = ctx.app.invoke(
            "PutWorksheet",
            &[
                Variant::from(ctx.resource.sheet_path()),
                single_row_matrix(sample),
                Variant::from(ctx.row - 1),
                Variant::Int(0),
            ],
        )?;
        if !ok.is_truthy() {
            return Err(DispatchError::raised("PutWorksheet", "returned false"));
        }
        Ok(())
    }
}

/// Sheet-level `PutWorksheet(rows, start_row, 0)`
pub struct SheetPutWorksheet;

impl WriteStrategy for SheetPutWorksheet {
    fn name(&self) -> &'static str {
        "sheet-put-worksheet"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        ctx.sheet().invoke(
            "PutWorksheet",
            &[single_row_matrix(sample), Variant::from(ctx.row - 1), Variant::Int(0)],
        )?;
        Ok(())
    }
}

/// `SetCell(row, 1..=3, value)`
pub struct SetCellOneBased;

impl WriteStrategy for SetCellOneBased {
    fn name(&self) -> &'static str {
        "set-cell-one-based"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        per_cell_invoke(ctx.sheet(), "SetCell", ctx.row, 1, sample)
    }
}

/// `PutCell(row, 0..=2, value)`
pub struct PutCellZeroBased;

impl WriteStrategy for PutCellZeroBased {
    fn name(&self) -> &'static str {
        "put-cell-zero-based"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        per_cell_invoke(ctx.sheet(), "PutCell", ctx.row, 0, sample)
    }
}

/// `Cells(row, 0..=2).Value`
pub struct CellsZeroBased;

impl WriteStrategy for CellsZeroBased {
    fn name(&self) -> &'static str {
        "cells-zero-based"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        per_cell_value(ctx, 0, sample)
    }
}

/// `SetCell(row, 0..=2, value)`
pub struct SetCellZeroBased;

impl WriteStrategy for SetCellZeroBased {
    fn name(&self) -> &'static str {
        "set-cell-zero-based"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        per_cell_invoke(ctx.sheet(), "SetCell", ctx.row, 0, sample)
    }
}

/// `Columns(c).SetCell(row, value)`, columns 0-based
pub struct ColumnsSetCell;

impl WriteStrategy for ColumnsSetCell {
    fn name(&self) -> &'static str {
        "columns-set-cell"
    }

    fn write(&self, ctx: &WriteContext<'_>, sample: &Sample) -> DispatchResult<()> {
        for (col, value) in columns_from(0, sample) {
            let column = ctx.sheet().get("Columns", &[Variant::Int(col)])?.into_object("Columns")?;
            column.invoke("SetCell", &[Variant::from(ctx.row), value])?;
        }
        Ok(())
    }
}

/// The built-in write chain, in probe order
pub fn default_write_strategies() -> Vec<Box<dyn WriteStrategy>> {
    vec![
        Box::new(LabTalkExecute),
        Box::new(ColsItem),
        Box::new(NewDataRangeSetData),
        Box::new(SetBinaryStorageData),
        Box::new(RangeValue),
        Box::new(SetDataCells),
        Box::new(SetDataArray),
        Box::new(CellsOneBased),
        Box::new(AppPutWorksheet),
        Box::new(SheetPutWorksheet),
        Box::new(SetCellOneBased),
        Box::new(PutCellZeroBased),
        Box::new(CellsZeroBased),
        Box::new(SetCellZeroBased),
        Box::new(ColumnsSetCell),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::connect::{connect, AppHandle};
    use crate::external::memory::MemorySurface;
    use crate::external::resource::{create_resource, default_create_strategies};
    use std::collections::HashSet;

    fn session(surface: &MemorySurface) -> (AppHandle, ExternalResource) {
        let app = connect(&surface.host(), &["Origin.Application".to_string()]).unwrap();
        let res = create_resource(&app, "M", &default_create_strategies()).unwrap();
        (app, res)
    }

    #[test]
    fn test_strategy_names_are_unique() {
        let strategies = default_write_strategies();
        let names: HashSet<_> = strategies.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), strategies.len());
        assert_eq!(strategies.len(), 15);
        assert_eq!(strategies[0].name(), "labtalk-execute");
    }

    #[test]
    fn test_labtalk_command() {
        assert_eq!(
            labtalk_row_command(4, &Sample::new(3000, 21.8, 0.1)),
            "col(A)[4] = 3000; col(B)[4] = 21.8; col(C)[4] = 0.1;"
        );
    }

    #[test]
    fn test_every_strategy_writes_the_target_row() {
        // The memory surface supports every tactic; each one must land in
        // the row it was given.
        for (i, strategy) in default_write_strategies().iter().enumerate() {
            let surface = MemorySurface::new();
            let (app, res) = session(&surface);
            let row = 3 + i as u32;
            let ctx = WriteContext {
                app: app.app.as_ref(),
                resource: &res,
                row,
            };

            let result = strategy.write(&ctx, &Sample::new(1000, 21.5, -0.25));
            if ["cells-zero-based", "set-cell-zero-based"].contains(&strategy.name()) {
                // Zero-based cell addressing is rejected by this surface
                assert!(result.is_err(), "{}", strategy.name());
                continue;
            }
            assert!(result.is_ok(), "{}: {:?}", strategy.name(), result);
            assert_eq!(
                surface.row_values("M", row),
                vec![Some(1000.0), Some(21.5), Some(-0.25)],
                "{}",
                strategy.name()
            );
        }
    }

    #[test]
    fn test_app_put_worksheet_false_is_failure() {
        let surface = MemorySurface::new();
        let (app, res) = session(&surface);
        surface.remove_book("M");
        let ctx = WriteContext {
            app: app.app.as_ref(),
            resource: &res,
            row: 1,
        };
        let err = AppPutWorksheet.write(&ctx, &Sample::new(0, 20.0, 0.0)).unwrap_err();
        assert!(matches!(err, DispatchError::Raised { .. }));
    }
}
