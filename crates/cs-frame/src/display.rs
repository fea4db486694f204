use std::fmt;

use cs_types::Element;

use crate::{DataFrame, Series};

/// Series longer than this print as a head and tail of `PREVIEW_EDGE` each.
const PREVIEW_LEN: usize = 10;
const PREVIEW_EDGE: usize = PREVIEW_LEN / 2;

/// Rows printed by the frame formatter.
const FRAME_PREVIEW_ROWS: usize = 5;

const RULE: &str = "----------------------------------------";

fn write_cell<T: Element>(
    f: &mut fmt::Formatter<'_>,
    series: &Series<T>,
    idx: usize,
) -> fmt::Result {
    match series.get_valid(idx) {
        Some(value) => write!(f, "{value}"),
        None => f.write_str("null"),
    }
}

impl<T: Element> fmt::Display for Series<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.len();
        let positions: Vec<Option<usize>> = if len <= PREVIEW_LEN {
            (0..len).map(Some).collect()
        } else {
            (0..PREVIEW_EDGE)
                .map(Some)
                .chain(std::iter::once(None))
                .chain((len - PREVIEW_EDGE..len).map(Some))
                .collect()
        };

        f.write_str("[")?;
        for (slot, position) in positions.iter().enumerate() {
            if slot > 0 {
                f.write_str(", ")?;
            }
            match position {
                Some(idx) => write_cell(f, self, *idx)?,
                None => f.write_str("...")?,
            }
        }
        f.write_str("]")
    }
}

impl fmt::Display for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rows, cols) = self.shape();
        writeln!(f, "DataFrame: {rows} rows x {cols} columns")?;
        writeln!(f, "{RULE}")?;
        for name in self.column_names() {
            write!(f, "{name}\t")?;
        }
        writeln!(f)?;
        writeln!(f, "{RULE}")?;
        for row in 0..rows.min(FRAME_PREVIEW_ROWS) {
            for (_, column) in self.iter() {
                write!(f, "{}\t", column.cell(row))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
