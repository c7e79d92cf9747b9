use comfy_table::{presets, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::app::GlobalOptions;

/// Writes `data` as pretty JSON under `--json`, otherwise hands it to `display_fn`.
pub fn print_output<T: Serialize>(
    data: &T,
    opts: &GlobalOptions,
    display_fn: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if opts.json {
        let json = serde_json::to_string_pretty(data)?;
        println!("{json}");
    } else {
        display_fn(data);
    }
    Ok(())
}

/// Horizontal placement of a column's cells.
#[derive(Clone, Copy)]
pub enum Align {
    Left,
    Right,
}

/// Borderless table for segment, import and export listings.
pub struct TabWriter {
    table: Table,
    indent: String,
    rows: usize,
}

impl TabWriter {
    /// Creates a table with one `(header, alignment)` pair per column.
    pub fn new(columns: &[(&str, Align)]) -> Self {
        let mut table = Table::new();
        table
            .load_preset(presets::NOTHING)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(columns.iter().map(|(name, _)| *name).collect::<Vec<_>>());

        let last = columns.len().saturating_sub(1);
        for (index, (_, align)) in columns.iter().enumerate() {
            let Some(column) = table.column_mut(index) else {
                continue;
            };
            column.set_cell_alignment(match align {
                Align::Left => CellAlignment::Left,
                Align::Right => CellAlignment::Right,
            });
            // Flush with the indent on the left, no trailing padding on the right
            column.set_padding((u16::from(index != 0), u16::from(index != last)));
        }

        Self {
            table,
            indent: String::new(),
            rows: 0,
        }
    }

    /// Prefixes every printed line with `prefix`.
    pub fn indent(mut self, prefix: &str) -> Self {
        self.indent = prefix.to_string();
        self
    }

    /// Appends a row, one cell per column.
    pub fn row<I, T>(&mut self, cells: I)
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        self.table
            .add_row(cells.into_iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
        self.rows += 1;
    }

    /// Prints the table to stdout, skipping it entirely when there are no rows.
    pub fn print(&self) {
        if self.rows == 0 {
            return;
        }
        for line in self.table.to_string().lines() {
            println!("{}{}", self.indent, line.trim_end());
        }
    }
}
