use textplots::{Chart, Plot, Shape};

use crate::error::OctalError;
use crate::table::MeasurementTable;

/// Determine the best scale and unit prefix for a given maximum value
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value >= 1.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else if max_value >= 1e-6 {
        (1e6, "μ")
    } else if max_value >= 1e-9 {
        (1e9, "n")
    } else {
        (1e12, "p")
    }
}

fn finite_bounds(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Plot values against their sample index with automatic SI scaling
///
/// # Examples
/// ```
/// use rusty_octal::plotting::plot_values;
///
/// let currents = vec![1e-6, 2e-6, 1.5e-6, 3e-6];
/// plot_values(&currents, Some("Heater current [A]"), None, None).unwrap();
/// ```
pub fn plot_values(
    values: &[f64],
    title: Option<&str>,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), OctalError> {
    let index: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    plot_xy(&index, values, title.or(Some("Data Plot")), width, height)
}

/// Plot `y` against `x`, scaling `y` to an SI prefix. Non-finite points
/// (blank CSV cells) are skipped.
pub fn plot_xy(
    x: &[f64],
    y: &[f64],
    title: Option<&str>,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), OctalError> {
    let points: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .collect();
    if points.is_empty() {
        return Err(OctalError::Analysis("Cannot plot empty data".into()));
    }

    let width = width.unwrap_or(140);
    let height = height.unwrap_or(60);

    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let (y_min, y_max) = finite_bounds(&ys).unwrap_or((0.0, 0.0));
    let (x_min, mut x_max) = finite_bounds(&xs).unwrap_or((0.0, 0.0));
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }

    let (scale, unit) = determine_scale(y_max.abs().max(y_min.abs()));
    let frame: Vec<(f32, f32)> = points
        .iter()
        .map(|(a, b)| (*a as f32, (b * scale) as f32))
        .collect();

    println!("{}", title.unwrap_or("Data Plot"));
    println!(
        "{} points | Values: {:.3} to {:.3} {}units",
        points.len(),
        y_min * scale,
        y_max * scale,
        unit
    );
    println!("{}", "─".repeat(width));

    Chart::new(width as u32, height as u32, x_min as f32, x_max as f32)
        .lineplot(&Shape::Lines(&frame))
        .nice();

    Ok(())
}

/// Plot each of `columns` (all but the first when empty) against the
/// table's first column.
pub fn plot_table(table: &MeasurementTable, columns: &[String]) -> Result<(), OctalError> {
    let mut all = table.columns();
    let (x_name, x) = all
        .next()
        .ok_or_else(|| OctalError::Analysis("Table has no columns".into()))?;

    let selected: Vec<(&str, &[f64])> = if columns.is_empty() {
        all.collect()
    } else {
        columns
            .iter()
            .map(|name| {
                table
                    .column(name)
                    .map(|c| (name.as_str(), c))
                    .ok_or_else(|| OctalError::Analysis(format!("No column named '{name}'")))
            })
            .collect::<Result<_, _>>()?
    };

    for (name, y) in selected {
        plot_xy(x, y, Some(&format!("{name} vs {x_name}")), None, None)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_scale() {
        assert_eq!(determine_scale(5.0), (1.0, ""));
        assert_eq!(determine_scale(0.005), (1e3, "m"));
        assert_eq!(determine_scale(5e-6), (1e6, "μ"));
        assert_eq!(determine_scale(5e-9), (1e9, "n"));
        assert_eq!(determine_scale(5e-12), (1e12, "p"));
    }

    #[test]
    fn test_plot_values_basic() {
        let data = vec![1.0, 2.0, 3.0, 2.0, 1.0];
        assert!(plot_values(&data, Some("Test Plot"), None, None).is_ok());
    }

    #[test]
    fn test_plot_empty_data() {
        assert!(plot_values(&[], None, None, None).is_err());
        assert!(plot_xy(&[1.0], &[f64::NAN], None, None, None).is_err());
    }

    #[test]
    fn test_plot_table_columns() {
        let mut table = MeasurementTable::with_columns(&["Voltage [V]", "Current [A]"]);
        table.push_row(&[0.0, 1e-3]).unwrap();
        table.push_row(&[0.5, 2e-3]).unwrap();

        assert!(plot_table(&table, &[]).is_ok());
        assert!(plot_table(&table, &["Current [A]".to_string()]).is_ok());
        assert!(plot_table(&table, &["Power [W]".to_string()]).is_err());
        assert!(plot_table(&MeasurementTable::new(), &[]).is_err());
    }
}
