//! Path atoms: `field[:index][#id]`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::FetchError;

/// A parsed path atom. `users`, `friends:0` and `photos:2#Photo_3` parse to
/// the field, an optional list position, and an optional object identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointData {
    pub field: String,
    pub index: Option<usize>,
    pub id: Option<String>,
}

impl PointData {
    /// The id may itself contain `:`, so the `#` split happens first.
    pub fn parse(point: &str) -> Result<PointData, FetchError> {
        let (field_part, id) = match point.split_once('#') {
            Some((field_part, id)) => (field_part, Some(id.to_string())),
            None => (point, None),
        };

        let (field, index) = match field_part.split_once(':') {
            Some((field, index)) => {
                let index = index.parse::<usize>().map_err(|error| {
                    FetchError::stitching(format!("invalid list index in point {point}: {error}"))
                })?;
                (field.to_string(), Some(index))
            }
            None => (field_part.to_string(), None),
        };

        Ok(PointData { field, index, id })
    }
}

impl fmt::Display for PointData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field)?;
        if let Some(index) = self.index {
            write!(f, ":{index}")?;
        }
        if let Some(id) = &self.id {
            write!(f, "#{id}")?;
        }
        Ok(())
    }
}

/// True when the atom addresses a list position.
pub(crate) fn is_list_element(point: &str) -> bool {
    let field_part = match point.split_once('#') {
        Some((field_part, _)) => field_part,
        None => point,
    };
    field_part.contains(':')
}

/// A memoizing parser. Insertion points repeat heavily across a depth, so
/// parsed atoms are shared behind a read/write lock.
#[derive(Debug, Default)]
pub struct CachedPointDataExtractor {
    cache: RwLock<HashMap<String, Arc<PointData>>>,
}

impl CachedPointDataExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract(&self, point: &str) -> Result<Arc<PointData>, FetchError> {
        if let Some(data) = self.cache.read().get(point) {
            return Ok(data.clone());
        }

        let data = Arc::new(PointData::parse(point)?);
        self.cache
            .write()
            .insert(point.to_string(), data.clone());
        Ok(data)
    }
}
