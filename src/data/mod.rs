/// Data layer: core table types, loading, filtering and joins.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Table
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  Table    │  ordered columns, rows of Value
///   └──────────┘
///        │
///        ├──────────────┐
///        ▼              ▼
///   ┌──────────┐   ┌──────────┐
///   │  filter   │   │   ops     │  isin / left_join / group_indices
///   └──────────┘   └──────────┘
/// ```

pub mod loader;
pub mod model;
pub mod filter;
pub mod ops;
