use std::fmt::{self, Write};

/// Placeholder printed for an empty cell
pub(crate) const EMPTY_CELL: &str = "-";

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Alignment {
    #[default]
    Left,
    Right,
}

pub(crate) struct Row {
    cells: Vec<String>,
}

impl Row {
    fn is_awk_safe(&self) -> bool {
        !self
            .cells
            .iter()
            .any(|cell| cell.is_empty() || cell.contains(char::is_whitespace))
    }

    fn columns(&self) -> usize {
        self.cells.len()
    }
}

impl From<Vec<String>> for Row {
    fn from(cells: Vec<String>) -> Self {
        let cells = cells
            .into_iter()
            .map(|cell| match cell.is_empty() {
                true => EMPTY_CELL.to_string(),
                false => cell,
            })
            .collect();

        Row { cells }
    }
}

impl From<Vec<&str>> for Row {
    fn from(value: Vec<&str>) -> Self {
        value
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<String>>()
            .into()
    }
}

/// A whitespace separated table whose columns line up, suitable for both
/// reading and `awk`
pub(crate) struct Table {
    body: Vec<Row>,
    header: Option<Row>,
    alignment: Vec<Alignment>,
    print_header: bool,
}

impl Table {
    pub(crate) fn new() -> Table {
        Table {
            body: Vec::new(),
            header: None,
            alignment: Vec::new(),
            print_header: true,
        }
    }

    fn num_columns(&self) -> Option<usize> {
        self.header
            .as_ref()
            .or(self.body.first())
            .map(Row::columns)
    }

    fn check_columns(&self, row: &Row) {
        if let Some(expected) = self.num_columns() {
            assert_eq!(
                expected,
                row.columns(),
                "table has {} columns but a row with {} columns was inserted",
                expected,
                row.columns()
            );
        }
    }

    pub(crate) fn print_header(&mut self, print_header: bool) {
        self.print_header = print_header;
    }

    /// Right-align the column at `index`, used for numbers
    pub(crate) fn align_right(&mut self, index: usize) {
        if self.alignment.len() <= index {
            self.alignment.resize(index + 1, Alignment::Left);
        }

        self.alignment[index] = Alignment::Right;
    }

    pub(crate) fn add_row<R: Into<Row>>(&mut self, row: R) {
        let row = row.into();

        self.check_columns(&row);

        self.body.push(row);
    }

    pub(crate) fn set_header<R: Into<Row>>(&mut self, header: R) {
        let header = header.into();

        self.check_columns(&header);

        assert!(header.is_awk_safe(), "table header contains whitespace");

        self.header.replace(header);
    }

    fn visible_rows(&self) -> impl Iterator<Item = &Row> {
        let header = match self.print_header {
            true => self.header.as_ref(),
            false => None,
        };

        header.into_iter().chain(self.body.iter())
    }

    /// Widths cover the header even when it is hidden so both layouts agree
    fn column_widths(&self) -> Vec<usize> {
        let mut widths = vec![0usize; self.num_columns().unwrap_or(0)];

        for row in self.header.iter().chain(self.body.iter()) {
            for (width, cell) in widths.iter_mut().zip(&row.cells) {
                *width = (*width).max(cell.chars().count());
            }
        }

        widths
    }

    fn alignment(&self, index: usize) -> Alignment {
        self.alignment.get(index).copied().unwrap_or_default()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = self.column_widths();

        for row in self.visible_rows() {
            let last = row.cells.len().saturating_sub(1);

            for (i, cell) in row.cells.iter().enumerate() {
                match (self.alignment(i), i == last) {
                    (Alignment::Right, _) => write!(f, "{:>width$}", cell, width = widths[i])?,
                    (Alignment::Left, true) => f.write_str(cell)?,
                    (Alignment::Left, false) => write!(f, "{:<width$}", cell, width = widths[i])?,
                }

                if i != last {
                    f.write_str("  ")?;
                }
            }

            f.write_char('\n')?;
        }

        Ok(())
    }
}

pub(crate) trait IntoTable: Into<Table> + Sized {
    fn into_table(self) -> Table {
        self.into()
    }
}

impl<T> IntoTable for T where T: Into<Table> + Sized {}
