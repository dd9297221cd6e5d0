//! # Data Loading and Validation Module
//!
//! Reads the two tab-separated tables describing a cohort and turns them into the
//! `ndarray` structures used by the pipeline.
//!
//! - Connectome table: one row per subject, an optional `sample_id` column, and
//!   every other column numeric. Columns are grouped into `networks` consecutive
//!   blocks of equal width, giving a `[subjects, networks, features]` array.
//! - Phenotype table: one row per subject, an optional `sample_id` column, a
//!   binary `label` column (required for training), confound columns and optional
//!   extra covariate columns.
//!
//! Failures are assumed to be user-input errors, so `DataError` describes exactly
//! which column or row is at fault.

use crate::pipeline::Subjects;
use ndarray::{Array2, Array3};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

const SAMPLE_ID_COLUMN: &str = "sample_id";
const LABEL_COLUMN: &str = "label";
const MINIMUM_ROWS: usize = 2;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Input file contains only {found} data rows, but at least {required} are required.")]
    InsufficientRows { found: usize, required: usize },
    #[error("The 'label' column must contain only 0 and 1, but row {row} holds {value}.")]
    NonBinaryLabel { row: usize, value: f64 },
    #[error(
        "The connectome table has {columns} value columns, which cannot be split into {networks} networks of equal size."
    )]
    UnevenNetworks { columns: usize, networks: usize },
    #[error("The connectome table has {connectomes} rows but the phenotype table has {phenotypes}.")]
    RowCountMismatch {
        connectomes: usize,
        phenotypes: usize,
    },
    #[error(
        "Sample ids disagree at row {row}: '{connectome_id}' in the connectome table, '{phenotype_id}' in the phenotype table."
    )]
    SampleIdMismatch {
        row: usize,
        connectome_id: String,
        phenotype_id: String,
    },
}

/// Column choices for the phenotype table.
#[derive(Debug, Clone, Default)]
pub struct PhenotypeColumns {
    /// Confound columns. `None` means every numeric column that is not the
    /// label, the sample id or an extra covariate.
    pub confounds: Option<Vec<String>>,
    /// Extra covariates appended to the selected subtype weights.
    pub extra: Vec<String>,
}

/// A validated cohort, ready for the pipeline.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub sample_ids: Vec<String>,
    /// `[subjects, networks, features]`
    pub connectomes: Array3<f64>,
    pub labels: Option<Vec<usize>>,
    pub confounds: Array2<f64>,
    pub confound_names: Vec<String>,
    pub extra: Option<Array2<f64>>,
    pub extra_names: Vec<String>,
}

impl Cohort {
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    pub fn subjects(&self) -> Subjects<'_> {
        Subjects {
            connectomes: self.connectomes.view(),
            confounds: self.confounds.view(),
            extra: self.extra.as_ref().map(|e| e.view()),
        }
    }

    /// Labels, or an error naming the missing column.
    pub fn require_labels(&self) -> Result<&[usize], DataError> {
        self.labels
            .as_deref()
            .ok_or_else(|| DataError::ColumnNotFound(LABEL_COLUMN.to_string()))
    }
}

/// Loads a cohort. `require_labels` makes the `label` column mandatory.
pub fn load_cohort(
    connectome_path: &str,
    phenotype_path: &str,
    networks: usize,
    columns: &PhenotypeColumns,
    require_labels: bool,
) -> Result<Cohort, DataError> {
    let connectome_df = internal::read_tsv(connectome_path)?;
    let phenotype_df = internal::read_tsv(phenotype_path)?;

    if connectome_df.height() != phenotype_df.height() {
        return Err(DataError::RowCountMismatch {
            connectomes: connectome_df.height(),
            phenotypes: phenotype_df.height(),
        });
    }
    let n = connectome_df.height();

    let connectome_ids = internal::sample_ids(&connectome_df)?;
    let phenotype_ids = internal::sample_ids(&phenotype_df)?;
    let sample_ids = match (connectome_ids, phenotype_ids) {
        (Some(a), Some(b)) => {
            if let Some(row) = (0..n).find(|&i| a[i] != b[i]) {
                return Err(DataError::SampleIdMismatch {
                    row: row + 1,
                    connectome_id: a[row].clone(),
                    phenotype_id: b[row].clone(),
                });
            }
            a
        }
        (Some(ids), None) | (None, Some(ids)) => ids,
        (None, None) => (1..=n).map(|i| i.to_string()).collect(),
    };

    let connectomes = internal::connectome_array(&connectome_df, networks)?;

    let present: HashSet<String> = phenotype_df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let labels = if present.contains(LABEL_COLUMN) {
        Some(internal::binary_labels(&phenotype_df)?)
    } else if require_labels {
        return Err(DataError::ColumnNotFound(LABEL_COLUMN.to_string()));
    } else {
        None
    };

    for name in &columns.extra {
        if !present.contains(name) {
            return Err(DataError::ColumnNotFound(name.clone()));
        }
    }

    let confound_names: Vec<String> = match &columns.confounds {
        Some(names) => {
            for name in names {
                if !present.contains(name) {
                    return Err(DataError::ColumnNotFound(name.clone()));
                }
            }
            names.clone()
        }
        None => phenotype_df
            .get_columns()
            .iter()
            .filter(|column| internal::is_numeric(column.dtype()))
            .map(|column| column.name().to_string())
            .filter(|name| {
                name != SAMPLE_ID_COLUMN && name != LABEL_COLUMN && !columns.extra.contains(name)
            })
            .collect(),
    };

    let confounds = internal::numeric_matrix(&phenotype_df, &confound_names)?;
    let extra = if columns.extra.is_empty() {
        None
    } else {
        Some(internal::numeric_matrix(&phenotype_df, &columns.extra)?)
    };

    log::info!(
        "Loaded {} subjects: {} networks x {} features, {} confound(s), {} extra covariate(s)",
        n,
        connectomes.dim().1,
        connectomes.dim().2,
        confound_names.len(),
        columns.extra.len()
    );

    Ok(Cohort {
        sample_ids,
        connectomes,
        labels,
        confounds,
        confound_names,
        extra,
        extra_names: columns.extra.clone(),
    })
}

/// Internal module for shared data loading logic.
mod internal {
    use super::*;

    pub(super) fn read_tsv(path: &str) -> Result<DataFrame, DataError> {
        let df = CsvReader::new(File::open(Path::new(path))?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
            )
            .finish()?;
        if df.height() < MINIMUM_ROWS {
            return Err(DataError::InsufficientRows {
                found: df.height(),
                required: MINIMUM_ROWS,
            });
        }
        Ok(df)
    }

    pub(super) fn is_numeric(dtype: &DataType) -> bool {
        matches!(
            dtype,
            DataType::Float64
                | DataType::Float32
                | DataType::Int64
                | DataType::Int32
                | DataType::UInt64
                | DataType::UInt32
        )
    }

    pub(super) fn numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
        let column = df
            .column(column_name)
            .map_err(|_| DataError::ColumnNotFound(column_name.to_string()))?;
        if column.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let casted = column
            .cast(&DataType::Float64)
            .map_err(|_| DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", column.dtype()),
            })?;
        if casted.null_count() > 0 {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", column.dtype()),
            });
        }

        let values: Vec<f64> = casted.f64()?.rechunk().into_no_null_iter().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(values)
    }

    pub(super) fn numeric_matrix(
        df: &DataFrame,
        names: &[String],
    ) -> Result<Array2<f64>, DataError> {
        let n = df.height();
        let mut matrix = Array2::zeros((n, names.len()));
        for (j, name) in names.iter().enumerate() {
            let values = numeric_column(df, name)?;
            for (i, v) in values.into_iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }
        Ok(matrix)
    }

    pub(super) fn sample_ids(df: &DataFrame) -> Result<Option<Vec<String>>, DataError> {
        let Ok(column) = df.column(SAMPLE_ID_COLUMN) else {
            return Ok(None);
        };
        let as_text = column.cast(&DataType::String)?;
        let ids = as_text
            .str()?
            .into_iter()
            .enumerate()
            .map(|(i, value)| match value {
                Some(text) if !text.is_empty() => text.to_string(),
                _ => (i + 1).to_string(),
            })
            .collect();
        Ok(Some(ids))
    }

    pub(super) fn binary_labels(df: &DataFrame) -> Result<Vec<usize>, DataError> {
        numeric_column(df, LABEL_COLUMN)?
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                if value == 0.0 {
                    Ok(0)
                } else if value == 1.0 {
                    Ok(1)
                } else {
                    Err(DataError::NonBinaryLabel {
                        row: row + 1,
                        value,
                    })
                }
            })
            .collect()
    }

    pub(super) fn connectome_array(
        df: &DataFrame,
        networks: usize,
    ) -> Result<Array3<f64>, DataError> {
        let names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .filter(|name| name != SAMPLE_ID_COLUMN)
            .collect();
        if networks == 0 || names.is_empty() || names.len() % networks != 0 {
            return Err(DataError::UnevenNetworks {
                columns: names.len(),
                networks,
            });
        }
        let features = names.len() / networks;
        let flat = numeric_matrix(df, &names)?;
        let n = flat.nrows();
        Ok(Array3::from_shape_fn((n, networks, features), |(i, net, feat)| {
            flat[[i, net * features + feat]]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_tsv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        write!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn path(file: &NamedTempFile) -> &str {
        file.path().to_str().unwrap()
    }

    const CONNECTOMES: &str = "sample_id\ta1\ta2\tb1\tb2\n\
                               s1\t0.1\t0.2\t0.3\t0.4\n\
                               s2\t1.1\t1.2\t1.3\t1.4\n\
                               s3\t2.1\t2.2\t2.3\t2.4\n";

    #[test]
    fn loads_connectomes_confounds_and_labels() {
        let connectomes = create_test_tsv(CONNECTOMES).unwrap();
        let phenotypes = create_test_tsv(
            "sample_id\tlabel\tage\tmotion\tscore\n\
             s1\t0\t30\t0.1\t5\n\
             s2\t1\t40\t0.2\t6\n\
             s3\t1\t50\t0.3\t7\n",
        )
        .unwrap();
        let columns = PhenotypeColumns {
            confounds: None,
            extra: vec!["score".to_string()],
        };
        let cohort = load_cohort(path(&connectomes), path(&phenotypes), 2, &columns, true).unwrap();

        assert_eq!(cohort.sample_ids, vec!["s1", "s2", "s3"]);
        assert_eq!(cohort.connectomes.dim(), (3, 2, 2));
        assert_eq!(cohort.connectomes[[1, 1, 0]], 1.3);
        assert_eq!(cohort.labels, Some(vec![0, 1, 1]));
        assert_eq!(cohort.confound_names, vec!["age", "motion"]);
        assert_eq!(cohort.confounds[[2, 0]], 50.0);
        assert_eq!(cohort.extra.as_ref().unwrap()[[0, 0]], 5.0);
    }

    #[test]
    fn explicit_confounds_must_exist() {
        let connectomes = create_test_tsv(CONNECTOMES).unwrap();
        let phenotypes = create_test_tsv("label\tage\n0\t1\n1\t2\n0\t3\n").unwrap();
        let columns = PhenotypeColumns {
            confounds: Some(vec!["sex".to_string()]),
            extra: Vec::new(),
        };
        let err = load_cohort(path(&connectomes), path(&phenotypes), 2, &columns, true).unwrap_err();
        assert!(matches!(err, DataError::ColumnNotFound(name) if name == "sex"));
    }

    #[test]
    fn non_binary_labels_are_rejected() {
        let connectomes = create_test_tsv(CONNECTOMES).unwrap();
        let phenotypes = create_test_tsv("label\tage\n0\t1\n2\t2\n0\t3\n").unwrap();
        let err = load_cohort(
            path(&connectomes),
            path(&phenotypes),
            2,
            &PhenotypeColumns::default(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::NonBinaryLabel { row: 2, .. }));
    }

    #[test]
    fn labels_are_optional_for_prediction() {
        let connectomes = create_test_tsv(CONNECTOMES).unwrap();
        let phenotypes = create_test_tsv("age\n1\n2\n3\n").unwrap();
        let cohort = load_cohort(
            path(&connectomes),
            path(&phenotypes),
            1,
            &PhenotypeColumns::default(),
            false,
        )
        .unwrap();
        assert!(cohort.labels.is_none());
        assert!(cohort.require_labels().is_err());
        assert_eq!(cohort.connectomes.dim(), (3, 1, 4));
        assert_eq!(cohort.sample_ids, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn uneven_network_split_is_rejected() {
        let connectomes = create_test_tsv(CONNECTOMES).unwrap();
        let phenotypes = create_test_tsv("label\n0\n1\n0\n").unwrap();
        let err = load_cohort(
            path(&connectomes),
            path(&phenotypes),
            3,
            &PhenotypeColumns::default(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::UnevenNetworks { columns: 4, networks: 3 }));
    }

    #[test]
    fn mismatched_sample_ids_are_reported() {
        let connectomes = create_test_tsv(CONNECTOMES).unwrap();
        let phenotypes = create_test_tsv("sample_id\tlabel\ns1\t0\nsX\t1\ns3\t0\n").unwrap();
        let err = load_cohort(
            path(&connectomes),
            path(&phenotypes),
            2,
            &PhenotypeColumns::default(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::SampleIdMismatch { row: 2, .. }));
    }

    #[test]
    fn missing_values_are_rejected() {
        let connectomes = create_test_tsv(
            "a1\ta2\n0.1\t0.2\n\t1.2\n2.1\t2.2\n",
        )
        .unwrap();
        let phenotypes = create_test_tsv("label\n0\n1\n0\n").unwrap();
        let err = load_cohort(
            path(&connectomes),
            path(&phenotypes),
            1,
            &PhenotypeColumns::default(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::MissingValuesFound(name) if name == "a1"));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let connectomes = create_test_tsv(CONNECTOMES).unwrap();
        let phenotypes = create_test_tsv("label\tage\n0\t1.5\n1\tinf\n0\t3.0\n").unwrap();
        let err = load_cohort(
            path(&connectomes),
            path(&phenotypes),
            2,
            &PhenotypeColumns::default(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::NonFiniteValuesFound(name) if name == "age"));
    }

    #[test]
    fn extra_covariates_must_exist() {
        let connectomes = create_test_tsv(CONNECTOMES).unwrap();
        let phenotypes = create_test_tsv("label\tage\n0\t1\n1\t2\n0\t3\n").unwrap();
        let columns = PhenotypeColumns {
            confounds: None,
            extra: vec!["missing".to_string()],
        };
        let err = load_cohort(path(&connectomes), path(&phenotypes), 2, &columns, true).unwrap_err();
        assert!(matches!(err, DataError::ColumnNotFound(name) if name == "missing"));
    }
}
