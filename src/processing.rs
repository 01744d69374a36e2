//! Named table transformations.
//!
//! A [`Processor`] turns one table into another. The web app and the CLI
//! only ever look processors up by name through a [`StrategyRegistry`], so
//! adding a new transformation means implementing the trait and registering
//! it.

use crate::alignment::AlignmentMap;
use crate::daily::clean_numeric_columns;
use crate::error::{Result, SheetError};
use crate::table::Table;
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named transformation of one table into another
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// One-line description shown next to the name
    fn description(&self) -> &str {
        ""
    }

    fn process(&self, table: &Table) -> Result<Table>;
}

/// Returns the input unchanged
pub struct PassThrough;

impl Processor for PassThrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn description(&self) -> &str {
        "Return the table unchanged"
    }

    fn process(&self, table: &Table) -> Result<Table> {
        Ok(table.clone())
    }
}

/// Drops repeated rows, keeping the first of each
pub struct DropDuplicates;

impl Processor for DropDuplicates {
    fn name(&self) -> &str {
        "dedupe"
    }

    fn description(&self) -> &str {
        "Remove exact duplicate rows"
    }

    fn process(&self, table: &Table) -> Result<Table> {
        let mut result = table.clone();
        let dropped = result.drop_duplicate_rows();
        info!("Dropped {} duplicate rows", dropped);
        Ok(result)
    }
}

pub struct NormalizeHeaders;

impl Processor for NormalizeHeaders {
    fn name(&self) -> &str {
        "normalize-headers"
    }

    fn description(&self) -> &str {
        "Trim and upper-case column names"
    }

    fn process(&self, table: &Table) -> Result<Table> {
        let mut result = table.clone();
        result.normalize_headers();
        Ok(result)
    }
}

/// Strips currency signs and separators from the amount columns
pub struct CleanAmounts;

impl Processor for CleanAmounts {
    fn name(&self) -> &str {
        "clean-amounts"
    }

    fn description(&self) -> &str {
        "Read PAST DUE, PRINCIPAL and the other amount columns as numbers"
    }

    fn process(&self, table: &Table) -> Result<Table> {
        let mut result = table.clone();
        result.normalize_headers();
        clean_numeric_columns(&mut result);
        Ok(result)
    }
}

/// Maps input columns onto the standard upload layout
pub struct AlignHeaders {
    map: Arc<AlignmentMap>,
}

impl AlignHeaders {
    pub fn new(map: Arc<AlignmentMap>) -> Self {
        AlignHeaders { map }
    }
}

impl Processor for AlignHeaders {
    fn name(&self) -> &str {
        "align-headers"
    }

    fn description(&self) -> &str {
        "Map columns onto the standard header list"
    }

    fn process(&self, table: &Table) -> Result<Table> {
        Ok(self.map.align(table))
    }
}

/// Processors by name
pub struct StrategyRegistry {
    processors: BTreeMap<String, Box<dyn Processor>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        StrategyRegistry {
            processors: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in processor
    pub fn with_defaults(map: Arc<AlignmentMap>) -> Self {
        let mut registry = StrategyRegistry::empty();
        registry.register(Box::new(PassThrough));
        registry.register(Box::new(DropDuplicates));
        registry.register(Box::new(NormalizeHeaders));
        registry.register(Box::new(CleanAmounts));
        registry.register(Box::new(AlignHeaders::new(map)));
        registry
    }

    /// Add a processor, replacing any registered under the same name
    pub fn register(&mut self, processor: Box<dyn Processor>) {
        self.processors
            .insert(processor.name().to_string(), processor);
    }

    pub fn get(&self, name: &str) -> Result<&dyn Processor> {
        self.processors
            .get(name)
            .map(|p| p.as_ref())
            .ok_or_else(|| SheetError::UnknownStrategy(name.to_string()))
    }

    /// `(name, description)` pairs, sorted by name
    pub fn names(&self) -> Vec<(String, String)> {
        self.processors
            .values()
            .map(|p| (p.name().to_string(), p.description().to_string()))
            .collect()
    }

    /// Look up and run a processor
    pub fn run(&self, name: &str, table: &Table) -> Result<Table> {
        let processor = self.get(name)?;
        let result = processor.process(table)?;
        info!(
            "Strategy {} produced {} rows x {} columns",
            name,
            result.height(),
            result.width()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;

    fn registry() -> StrategyRegistry {
        StrategyRegistry::with_defaults(Arc::new(AlignmentMap::default()))
    }

    fn sample() -> Table {
        Table::from_rows(
            ["id", "value"],
            vec![
                vec![CellValue::Int(1), CellValue::Int(10)],
                vec![CellValue::Int(2), CellValue::Int(20)],
                vec![CellValue::Int(2), CellValue::Int(20)],
            ],
        )
    }

    #[test]
    fn passthrough_is_identity() {
        let table = sample();
        assert_eq!(registry().run("passthrough", &table).unwrap(), table);

        let header_only = Table::new(vec!["id".into()]);
        assert_eq!(PassThrough.process(&header_only).unwrap(), header_only);
    }

    #[test]
    fn dedupe_keeps_first() {
        let result = registry().run("dedupe", &sample()).unwrap();
        assert_eq!(result.height(), 2);
    }

    #[test]
    fn unknown_strategy_is_an_error() {
        assert!(matches!(
            registry().run("sort", &sample()),
            Err(SheetError::UnknownStrategy(name)) if name == "sort"
        ));
    }

    #[test]
    fn names_are_sorted() {
        let names: Vec<String> = registry().names().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["align-headers", "clean-amounts", "dedupe", "normalize-headers", "passthrough"]
        );
    }

    #[test]
    fn clean_amounts_reads_formatted_numbers() {
        let table = Table::from_rows(
            ["lan", "past due"],
            vec![vec![CellValue::from("001"), CellValue::from("₱2,500.00")]],
        );
        let result = registry().run("clean-amounts", &table).unwrap();
        assert_eq!(result.columns, vec!["LAN", "PAST DUE"]);
        assert_eq!(result.rows[0], vec![CellValue::from("001"), CellValue::Int(2500)]);
    }

    #[test]
    fn custom_processor_replaces_builtin() {
        struct Reverse;
        impl Processor for Reverse {
            fn name(&self) -> &str {
                "passthrough"
            }
            fn process(&self, table: &Table) -> Result<Table> {
                let mut t = table.clone();
                t.rows.reverse();
                Ok(t)
            }
        }

        let mut registry = registry();
        registry.register(Box::new(Reverse));
        let result = registry.run("passthrough", &sample()).unwrap();
        assert_eq!(result.rows[0][0], CellValue::Int(2));
        assert_eq!(registry.names().len(), 5);
    }
}
