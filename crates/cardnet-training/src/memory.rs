//! In-memory data source backed by a JSON instance table.

use std::collections::BTreeSet;

use rand::{SeedableRng as _, seq::SliceRandom as _};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::data_source::{
    CategoryQuery, DataSource, DataSourceError, Partition, Row, RowScan, RowSource, ScanOrder,
};

/// A table of labelled instances, one value per column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceTable {
    pub columns: Vec<String>,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub category: String,
    /// Deterministic key deciding the partition of the instance.
    pub partition_key: f64,
    pub values: Vec<f64>,
}

impl InstanceTable {
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, skipping instances too short to have it.
    pub fn column_values(&self, name: &str) -> Result<Vec<f64>, DataSourceError> {
        let index = self
            .column_index(name)
            .ok_or_else(|| DataSourceError::UnknownColumn {
                column: name.to_owned(),
            })?;
        Ok(self
            .instances
            .iter()
            .filter_map(|instance| instance.values.get(index).copied())
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDataSource {
    table: InstanceTable,
}

impl MemoryDataSource {
    #[must_use]
    pub fn new(table: InstanceTable) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn table(&self) -> &InstanceTable {
        &self.table
    }
}

impl DataSource for MemoryDataSource {
    type Rows = MemoryRows;

    fn columns(&self) -> Vec<String> {
        self.table.columns.clone()
    }

    fn categories(&self) -> Vec<String> {
        self.table
            .instances
            .iter()
            .map(|instance| instance.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn open(&self, query: &CategoryQuery<'_>) -> Result<MemoryRows, DataSourceError> {
        let lookup = |name: &str| {
            self.table
                .column_index(name)
                .ok_or_else(|| DataSourceError::UnknownColumn {
                    column: name.to_owned(),
                })
        };
        let feature_indices = query
            .features
            .iter()
            .map(|name| lookup(name))
            .collect::<Result<Vec<_>, _>>()?;
        let label_index = lookup(query.output)?;

        let mut partitions: [Vec<StoredRow>; 3] = Default::default();
        for (id, instance) in self.table.instances.iter().enumerate() {
            if !query.category.matches(&instance.category) {
                continue;
            }
            let partition = query.split.partition_of(instance.partition_key);
            partitions[partition.index()].push(StoredRow {
                id,
                values: instance.values.clone(),
            });
        }

        Ok(MemoryRows {
            width: self.table.columns.len(),
            feature_indices,
            label_index,
            partitions,
        })
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    id: usize,
    values: Vec<f64>,
}

/// Rows of one category, owned independently of the source they came from.
#[derive(Debug, Clone)]
pub struct MemoryRows {
    width: usize,
    feature_indices: Vec<usize>,
    label_index: usize,
    partitions: [Vec<StoredRow>; 3],
}

impl MemoryRows {
    fn extract(&self, stored: &StoredRow) -> Result<Row, DataSourceError> {
        if stored.values.len() != self.width {
            return Err(DataSourceError::MalformedRow {
                row: stored.id,
                reason: format!(
                    "expected {} values, found {}",
                    self.width,
                    stored.values.len()
                ),
            });
        }
        let label = stored.values[self.label_index];
        let features = self
            .feature_indices
            .iter()
            .map(|&i| stored.values[i])
            .collect::<Vec<_>>();
        if let Some(bad) = features.iter().chain([&label]).find(|v| !v.is_finite()) {
            return Err(DataSourceError::MalformedRow {
                row: stored.id,
                reason: format!("non-finite value {bad}"),
            });
        }
        Ok(Row {
            id: stored.id,
            features,
            label,
        })
    }
}

impl RowSource for MemoryRows {
    fn row_count(&self, partition: Partition) -> usize {
        self.partitions[partition.index()].len()
    }

    fn scan(&self, partition: Partition, order: ScanOrder) -> RowScan<'_> {
        let rows = &self.partitions[partition.index()];
        let mut indices = (0..rows.len()).collect::<Vec<_>>();
        if let ScanOrder::Shuffled { seed } = order {
            indices.shuffle(&mut Pcg64::seed_from_u64(seed));
        }
        Box::new(indices.into_iter().map(move |i| self.extract(&rows[i])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::{CategoryKey, PartitionSplit};

    fn table() -> InstanceTable {
        let columns = ["copper_acquired", "village_acquired", "player_final_score"]
            .map(str::to_owned)
            .to_vec();
        let instances = (0..60)
            .map(|i| Instance {
                category: if i % 3 == 0 { "Village" } else { "Smithy" }.to_owned(),
                partition_key: f64::from(i),
                values: vec![f64::from(i % 5), f64::from(i % 2), f64::from(i)],
            })
            .collect();
        InstanceTable { columns, instances }
    }

    fn open(source: &MemoryDataSource, category: &CategoryKey) -> MemoryRows {
        let features = ["village_acquired".to_owned(), "copper_acquired".to_owned()];
        source
            .open(&CategoryQuery {
                category,
                features: &features,
                output: "player_final_score",
                split: PartitionSplit::default(),
            })
            .unwrap()
    }

    fn ids(rows: &MemoryRows, partition: Partition, order: ScanOrder) -> Vec<usize> {
        rows.scan(partition, order).map(|r| r.unwrap().id).collect()
    }

    #[test]
    fn test_partitions_are_disjoint_and_complete() {
        let source = MemoryDataSource::new(table());
        let category = CategoryKey::parse("Smithy");
        let rows = open(&source, &category);

        let mut seen = BTreeSet::new();
        for partition in Partition::ALL {
            for id in ids(&rows, partition, ScanOrder::Sequential) {
                assert!(seen.insert(id), "row {id} appears in two partitions");
            }
        }
        let expected = (0..60).filter(|i| i % 3 != 0).collect::<BTreeSet<_>>();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_all_category_sees_every_row() {
        let source = MemoryDataSource::new(table());
        let rows = open(&source, &CategoryKey::All);
        let total = Partition::ALL
            .into_iter()
            .map(|p| rows.row_count(p))
            .sum::<usize>();
        assert_eq!(total, 60);
        // keys 0..=9 validate, 10..=47 train, 48.. test
        assert_eq!(rows.row_count(Partition::Validation), 10);
        assert_eq!(rows.row_count(Partition::Training), 38);
        assert_eq!(rows.row_count(Partition::Testing), 12);
    }

    #[test]
    fn test_row_values_follow_query_order() {
        let source = MemoryDataSource::new(table());
        let rows = open(&source, &CategoryKey::All);
        let row = rows
            .scan(Partition::Training, ScanOrder::Sequential)
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(row.id, 10);
        assert_eq!(row.features, vec![0.0, 0.0]);
        assert_eq!(row.label, 10.0);
    }

    #[test]
    fn test_shuffled_scan_is_a_seeded_permutation() {
        let source = MemoryDataSource::new(table());
        let rows = open(&source, &CategoryKey::All);
        let sequential = ids(&rows, Partition::Training, ScanOrder::Sequential);
        let shuffled = ids(&rows, Partition::Training, ScanOrder::Shuffled { seed: 3 });
        let again = ids(&rows, Partition::Training, ScanOrder::Shuffled { seed: 3 });
        assert_eq!(shuffled, again);
        assert_ne!(shuffled, sequential);
        let mut sorted = shuffled;
        sorted.sort_unstable();
        assert_eq!(sorted, sequential);
    }

    #[test]
    fn test_unknown_column_and_malformed_row() {
        let mut table = table();
        table.instances[12].values.pop();
        let source = MemoryDataSource::new(table);
        let features = ["missing".to_owned()];
        let err = source
            .open(&CategoryQuery {
                category: &CategoryKey::All,
                features: &features,
                output: "player_final_score",
                split: PartitionSplit::default(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            DataSourceError::UnknownColumn {
                column: "missing".to_owned()
            }
        );

        let rows = open(&source, &CategoryKey::All);
        let results = rows
            .scan(Partition::Training, ScanOrder::Sequential)
            .collect::<Vec<_>>();
        assert!(matches!(
            results[2],
            Err(DataSourceError::MalformedRow { row: 12, .. })
        ));
    }

    #[test]
    fn test_categories_are_sorted_and_distinct() {
        let source = MemoryDataSource::new(table());
        assert_eq!(source.categories(), vec!["Smithy", "Village"]);
    }
}
