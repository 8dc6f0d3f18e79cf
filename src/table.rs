use crate::error::OctalError;

/// Named `f64` columns in insertion order.
///
/// Columns may have different lengths: a table built column by column (one
/// laser sweep per set point) can hold runs with different point counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementTable {
    columns: Vec<(String, Vec<f64>)>,
}

impl MeasurementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table with the given column names.
    pub fn with_columns<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            columns: names
                .iter()
                .map(|n| (n.as_ref().to_string(), Vec::new()))
                .collect(),
        }
    }

    /// Append one value per column.
    pub fn push_row(&mut self, row: &[f64]) -> Result<(), OctalError> {
        if row.len() != self.columns.len() {
            return Err(OctalError::Parse(format!(
                "Row has {} values but the table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for ((_, col), v) in self.columns.iter_mut().zip(row) {
            col.push(*v);
        }
        Ok(())
    }

    /// Insert a column, replacing any existing column of the same name.
    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<f64>) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, col)) => *col = values,
            None => self.columns.push((name, values)),
        }
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_slice())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c.as_slice()))
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows, i.e. the length of the longest column.
    pub fn len(&self) -> usize {
        self.columns.iter().map(|(_, c)| c.len()).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row `i`; `None` where a shorter column has no value.
    pub fn row(&self, i: usize) -> Vec<Option<f64>> {
        self.columns.iter().map(|(_, c)| c.get(i).copied()).collect()
    }

    /// Whether every column whose name starts with `prefix` holds the same values.
    pub fn columns_equal(&self, prefix: &str) -> bool {
        let mut matching = self
            .columns
            .iter()
            .filter(|(n, _)| n.starts_with(prefix))
            .map(|(_, c)| c);
        match matching.next() {
            Some(first) => matching.all(|c| c == first),
            None => true,
        }
    }
}
