use std::collections::BTreeMap;

use cs_columnar::ColumnError;
use cs_types::{DType, Element, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Series;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("column '{name}' has length {column_len} but frame length is {frame_len}")]
    LengthMismatch {
        name: String,
        frame_len: usize,
        column_len: usize,
    },
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
    #[error("column '{0}' not found")]
    ColumnNotFound(String),
    #[error("column '{0}' is stored but missing from the column order")]
    UnlistedColumn(String),
    #[error("column '{name}' holds {found}, requested {expected}")]
    ColumnTypeMismatch {
        name: String,
        expected: DType,
        found: DType,
    },
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// A series of one of the supported element types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "series", rename_all = "snake_case")]
pub enum AnySeries {
    Int32(Series<i32>),
    Int64(Series<i64>),
    Float32(Series<f32>),
    Float64(Series<f64>),
}

macro_rules! dispatch {
    ($value:expr, $series:ident => $body:expr) => {
        match $value {
            AnySeries::Int32($series) => $body,
            AnySeries::Int64($series) => $body,
            AnySeries::Float32($series) => $body,
            AnySeries::Float64($series) => $body,
        }
    };
}

impl AnySeries {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        dispatch!(self, series => series.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_null(&self, idx: usize) -> bool {
        dispatch!(self, series => series.is_null(idx))
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        dispatch!(self, series => series.valid_count())
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        dispatch!(self, series => series.null_count())
    }

    /// Typed view of the wrapped series.
    pub fn as_series<T: ColumnElement>(&self) -> Result<&Series<T>, TypeError> {
        T::unwrap_ref(self).ok_or(TypeError::DtypeMismatch {
            expected: T::DTYPE,
            found: self.dtype(),
        })
    }

    pub fn as_series_mut<T: ColumnElement>(&mut self) -> Result<&mut Series<T>, TypeError> {
        let found = self.dtype();
        T::unwrap_mut(self).ok_or(TypeError::DtypeMismatch {
            expected: T::DTYPE,
            found,
        })
    }

    /// Cell text for tabular display; nulls render as `null`.
    pub(crate) fn cell(&self, idx: usize) -> String {
        dispatch!(self, series => match series.get_valid(idx) {
            Some(value) => value.to_string(),
            None => "null".to_owned(),
        })
    }
}

/// Element types a [`DataFrame`] column can hold.
pub trait ColumnElement: Element {
    fn wrap(series: Series<Self>) -> AnySeries;
    fn unwrap_ref(column: &AnySeries) -> Option<&Series<Self>>;
    fn unwrap_mut(column: &mut AnySeries) -> Option<&mut Series<Self>>;
}

macro_rules! column_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl ColumnElement for $ty {
            fn wrap(series: Series<Self>) -> AnySeries {
                AnySeries::$variant(series)
            }

            fn unwrap_ref(column: &AnySeries) -> Option<&Series<Self>> {
                match column {
                    AnySeries::$variant(series) => Some(series),
                    _ => None,
                }
            }

            fn unwrap_mut(column: &mut AnySeries) -> Option<&mut Series<Self>> {
                match column {
                    AnySeries::$variant(series) => Some(series),
                    _ => None,
                }
            }
        }
    )*};
}

column_element!(i32 => Int32, i64 => Int64, f32 => Float32, f64 => Float64);

impl<T: ColumnElement> From<Series<T>> for AnySeries {
    fn from(series: Series<T>) -> Self {
        T::wrap(series)
    }
}

/// Named, ordered collection of equal-length series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameSnapshot")]
pub struct DataFrame {
    columns: BTreeMap<String, AnySeries>,
    column_order: Vec<String>,
}

impl DataFrame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `series` under `name`.
    ///
    /// The first column fixes the frame length; later columns must match it.
    pub fn add<T: ColumnElement>(
        &mut self,
        name: impl Into<String>,
        series: Series<T>,
    ) -> Result<&mut Self, FrameError> {
        self.add_any(name, series.into())
    }

    pub fn add_any(
        &mut self,
        name: impl Into<String>,
        column: AnySeries,
    ) -> Result<&mut Self, FrameError> {
        let name = name.into();
        if self.columns.contains_key(&name) {
            return Err(FrameError::DuplicateColumn(name));
        }
        if !self.is_empty() && column.len() != self.length() {
            return Err(FrameError::LengthMismatch {
                name,
                frame_len: self.length(),
                column_len: column.len(),
            });
        }
        log::debug!(
            "registered column '{name}' ({}, {} rows)",
            column.dtype(),
            column.len()
        );
        self.column_order.push(name.clone());
        self.columns.insert(name, column);
        Ok(self)
    }

    /// Typed access to a column.
    pub fn column<T: ColumnElement>(&self, name: &str) -> Result<&Series<T>, FrameError> {
        let column = self
            .columns
            .get(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_owned()))?;
        column
            .as_series()
            .map_err(|err| column_type_mismatch(name, err))
    }

    pub fn column_mut<T: ColumnElement>(
        &mut self,
        name: &str,
    ) -> Result<&mut Series<T>, FrameError> {
        let column = self
            .columns
            .get_mut(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_owned()))?;
        column
            .as_series_mut()
            .map_err(|err| column_type_mismatch(name, err))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AnySeries> {
        self.columns.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Column names in insertion order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnySeries)> + '_ {
        self.column_order
            .iter()
            .filter_map(|name| self.columns.get(name).map(|column| (name.as_str(), column)))
    }

    #[must_use]
    pub fn dtypes(&self) -> Vec<(&str, DType)> {
        self.iter()
            .map(|(name, column)| (name, column.dtype()))
            .collect()
    }

    /// Row count, 0 for a frame without columns.
    #[must_use]
    pub fn length(&self) -> usize {
        self.iter().next().map_or(0, |(_, column)| column.len())
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.column_order.len()
    }

    /// `(rows, columns)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.length(), self.width())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column_order.is_empty()
    }
}

/// Wire form of a [`DataFrame`]; rebuilt through [`DataFrame::add_any`] so a
/// decoded frame obeys the same rules as one built in code.
#[derive(Deserialize)]
struct FrameSnapshot {
    columns: BTreeMap<String, AnySeries>,
    column_order: Vec<String>,
}

impl TryFrom<FrameSnapshot> for DataFrame {
    type Error = FrameError;

    fn try_from(snapshot: FrameSnapshot) -> Result<Self, Self::Error> {
        let FrameSnapshot {
            mut columns,
            column_order,
        } = snapshot;
        let mut frame = Self::new();
        for name in column_order {
            if frame.contains(&name) {
                return Err(FrameError::DuplicateColumn(name));
            }
            let column = columns
                .remove(&name)
                .ok_or_else(|| FrameError::ColumnNotFound(name.clone()))?;
            frame.add_any(name, column)?;
        }
        if let Some(name) = columns.into_keys().next() {
            return Err(FrameError::UnlistedColumn(name));
        }
        Ok(frame)
    }
}

fn column_type_mismatch(name: &str, err: TypeError) -> FrameError {
    match err {
        TypeError::DtypeMismatch { expected, found } => FrameError::ColumnTypeMismatch {
            name: name.to_owned(),
            expected,
            found,
        },
    }
}

#[cfg(test)]
mod tests {
    use cs_types::{DType, TypeError};

    use super::{AnySeries, DataFrame, FrameError};
    use crate::Series;

    fn sample_frame() -> DataFrame {
        let mut frame = DataFrame::new();
        frame
            .add("id", Series::new(vec![1_i32, 2, 3]))
            .expect("first column")
            .add("score", Series::new(vec![0.5_f64, 1.5, 2.5]))
            .expect("matching length");
        frame
    }

    #[test]
    fn empty_frame_has_zero_shape() {
        let frame = DataFrame::new();
        assert!(frame.is_empty());
        assert_eq!(frame.shape(), (0, 0));
        assert!(frame.column_names().is_empty());
    }

    #[test]
    fn add_tracks_shape_and_order() {
        let frame = sample_frame();
        assert_eq!(frame.shape(), (3, 2));
        assert_eq!(frame.column_names(), &["id".to_owned(), "score".to_owned()]);
        assert_eq!(
            frame.dtypes(),
            vec![("id", DType::Int32), ("score", DType::Float64)]
        );
    }

    #[test]
    fn insertion_order_survives_sorted_storage() {
        let mut frame = DataFrame::new();
        for name in ["zeta", "alpha", "mid"] {
            frame
                .add(name, Series::new(vec![0_i64; 2]))
                .expect("equal lengths");
        }
        let names: Vec<&str> = frame.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn add_rejects_length_mismatch() {
        let mut frame = sample_frame();
        let err = frame
            .add("short", Series::new(vec![1.0_f32]))
            .expect_err("length differs");
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                name: "short".to_owned(),
                frame_len: 3,
                column_len: 1,
            }
        );
        assert_eq!(frame.width(), 2);
    }

    #[test]
    fn add_rejects_duplicate_name() {
        let mut frame = sample_frame();
        let err = frame
            .add("id", Series::new(vec![7_i64, 8, 9]))
            .expect_err("duplicate");
        assert_eq!(err, FrameError::DuplicateColumn("id".to_owned()));
        assert_eq!(frame.column::<i32>("id").expect("first column kept")[0], 1);
    }

    #[test]
    fn typed_lookup_checks_tag() {
        let frame = sample_frame();
        let ids = frame.column::<i32>("id").expect("int32 column");
        assert_eq!(ids.as_slice(), &[1, 2, 3]);

        let err = frame.column::<f64>("id").expect_err("wrong type");
        assert_eq!(
            err,
            FrameError::ColumnTypeMismatch {
                name: "id".to_owned(),
                expected: DType::Float64,
                found: DType::Int32,
            }
        );
        assert!(matches!(
            frame.column::<i32>("missing"),
            Err(FrameError::ColumnNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn column_mut_edits_in_place() {
        let mut frame = sample_frame();
        frame
            .column_mut::<f64>("score")
            .expect("float64 column")
            .mul_scalar(2.0)
            .set_null(0);
        let score = frame.get("score").expect("present");
        assert_eq!(score.null_count(), 1);
        assert!(score.is_null(0));
        assert!(frame.column_mut::<i64>("score").is_err());
    }

    #[test]
    fn erased_column_reports_its_tag() {
        let column = AnySeries::from(Series::new(vec![1.0_f32, 2.0]));
        assert_eq!(column.dtype(), DType::Float32);
        assert_eq!(column.len(), 2);
        assert_eq!(column.valid_count(), 2);
        assert_eq!(
            column.as_series::<i32>().expect_err("float32 column"),
            TypeError::DtypeMismatch {
                expected: DType::Int32,
                found: DType::Float32,
            }
        );
    }

    #[test]
    fn type_errors_convert_into_frame_errors() {
        fn first_int(column: &AnySeries) -> Result<i64, FrameError> {
            Ok(column.as_series::<i64>()?[0])
        }
        let column = AnySeries::from(Series::new(vec![4_i64]));
        assert_eq!(first_int(&column).expect("int64 column"), 4);
        let wrong = AnySeries::from(Series::new(vec![4_i32]));
        assert!(matches!(first_int(&wrong), Err(FrameError::Type(_))));
    }

    #[test]
    fn add_any_accepts_prebuilt_column() {
        let mut frame = DataFrame::new();
        frame
            .add_any("x", AnySeries::Int64(Series::new(vec![1, 2])))
            .expect("first column");
        assert!(frame.contains("x"));
        assert_eq!(frame.length(), 2);
    }

    const INT_COLUMN_3: &str = r#"{"dtype":"int32","series":{"data":[1,2,3],"validity":{"bits":[]},"policy":"seq"}}"#;
    const INT_COLUMN_1: &str = r#"{"dtype":"int32","series":{"data":[7],"validity":{"bits":[]},"policy":"seq"}}"#;

    fn decode(columns: &[(&str, &str)], order: &[&str]) -> Result<DataFrame, serde_json::Error> {
        let columns: Vec<String> = columns
            .iter()
            .map(|(name, column)| format!(r#""{name}":{column}"#))
            .collect();
        let order: Vec<String> = order.iter().map(|name| format!(r#""{name}""#)).collect();
        let json = format!(
            r#"{{"columns":{{{}}},"column_order":[{}]}}"#,
            columns.join(","),
            order.join(",")
        );
        serde_json::from_str(&json)
    }

    #[test]
    fn decoding_accepts_consistent_frame() {
        let frame = decode(&[("a", INT_COLUMN_3), ("b", INT_COLUMN_3)], &["b", "a"])
            .expect("consistent frame");
        assert_eq!(frame.shape(), (3, 2));
        assert_eq!(frame.column_names(), &["b".to_owned(), "a".to_owned()]);
    }

    #[test]
    fn decoding_rejects_unknown_name_in_order() {
        let err = decode(&[("a", INT_COLUMN_3)], &["a", "ghost"]).expect_err("ghost column");
        assert!(err.to_string().contains("column 'ghost' not found"), "{err}");
    }

    #[test]
    fn decoding_rejects_unequal_column_lengths() {
        let err = decode(&[("a", INT_COLUMN_3), ("b", INT_COLUMN_1)], &["a", "b", "ghost"])
            .expect_err("lengths differ");
        assert!(err.to_string().contains("column 'b' has length 1"), "{err}");
    }

    #[test]
    fn decoding_rejects_column_missing_from_order() {
        let err = decode(&[("a", INT_COLUMN_3), ("b", INT_COLUMN_3)], &["a"])
            .expect_err("unlisted column");
        assert!(err.to_string().contains("column 'b' is stored"), "{err}");
    }

    #[test]
    fn decoding_rejects_repeated_name_in_order() {
        let err = decode(&[("a", INT_COLUMN_3)], &["a", "a"]).expect_err("repeated name");
        assert!(err.to_string().contains("duplicate column name 'a'"), "{err}");
    }

    #[test]
    fn decoding_rejects_overlong_validity_mask() {
        let column = r#"{"dtype":"float64","series":{"data":[1.0],"validity":{"bits":[true,false]},"policy":"par"}}"#;
        let err = decode(&[("x", column)], &["x"]).expect_err("mask overruns data");
        assert!(err.to_string().contains("2 flags for 1 values"), "{err}");
    }

    #[test]
    fn frame_round_trips_through_json() {
        let mut frame = sample_frame();
        frame
            .column_mut::<i32>("id")
            .expect("int32 column")
            .set_null(1);
        let json = serde_json::to_string(&frame).expect("serialize");
        let back: DataFrame = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, frame);
        assert_eq!(back.column_names(), frame.column_names());
    }
}
