// Vegetation statistics stage.
//
// Filters the base transformer and conductor layers down to one site's
// circuits, runs the intersection stage on the filtered views, sums conductor
// length and customer counts per (circuit, municipality), then fills the
// derived key/miles/site columns on both summary tables.
use log::{error, info};

use crate::engine::DataStore;
use crate::error::{Result, Stage};
use crate::intersection::{
    delete_if_exists, IntersectionOutputs, IntersectionStage, DEFAULT_ATTEMPTS, PRICOND_MCD,
    XFMR_MCD,
};
use crate::types::{FieldDef, FieldType, Row, StatField, Substation, Value, Workspace};
use crate::util::feet_to_miles;

pub const CIRCUIT_FIELD: &str = "CIRCUIT1";
pub const CASE_FIELDS: [&str; 3] = [CIRCUIT_FIELD, "MCD_CODE", "MCD_NAME"];

pub const KEY_FIELD: &str = "Circuit_MCD";
pub const MILES_FIELD: &str = "Miles";
pub const SITE_FIELD: &str = "SUB";

pub const DERIVED_FIELDS: [FieldDef; 3] = [
    FieldDef {
        name: KEY_FIELD,
        field_type: FieldType::Text,
        length: Some(150),
    },
    FieldDef {
        name: MILES_FIELD,
        field_type: FieldType::Double,
        length: None,
    },
    FieldDef {
        name: SITE_FIELD,
        field_type: FieldType::Text,
        length: Some(20),
    },
];

pub fn conductor_summary_table(sub: &Substation) -> String {
    format!("PriCond_{}_MCD_Sum", sub)
}

pub fn transformer_summary_table(sub: &Substation) -> String {
    format!("XFMR_{}_MCD_Sum", sub)
}

/// What a successful run left behind in the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct VegetationSummary {
    pub conductor_table: String,
    pub transformer_table: String,
    pub conductor_rows: usize,
    pub transformer_rows: usize,
}

pub struct VegetationStage<'a, S: DataStore + ?Sized> {
    store: &'a S,
    workspace: &'a Workspace,
    mcd_layer: String,
    attempts: u32,
}

impl<'a, S: DataStore + ?Sized> VegetationStage<'a, S> {
    pub fn new(store: &'a S, workspace: &'a Workspace, mcd_layer: impl Into<String>) -> Self {
        VegetationStage {
            store,
            workspace,
            mcd_layer: mcd_layer.into(),
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn process_vegetation(&self, sub: &Substation, expression: &str) -> Result<VegetationSummary> {
        self.run(sub, expression).map_err(|e| {
            error!("Error processing vegetation data for {} ({}): {}", sub, e.kind(), e);
            e
        })
    }

    fn run(&self, sub: &Substation, expression: &str) -> Result<VegetationSummary> {
        self.workspace.ensure_exists()?;
        let ws = self.workspace;

        let xfmr_view = format!("{}_{}", XFMR_MCD, sub);
        let cond_view = format!("{}_{}", PRICOND_MCD, sub);
        for (source, view) in [(XFMR_MCD, &xfmr_view), (PRICOND_MCD, &cond_view)] {
            delete_if_exists(self.store, ws, view)?;
            self.store.make_feature_layer(ws, source, view, expression)?;
        }

        let outputs = IntersectionOutputs::for_site(sub);
        let intersection = IntersectionStage::new(self.store, ws, self.mcd_layer.as_str())
            .with_attempts(self.attempts);
        intersection
            .intersect(&xfmr_view, &cond_view, &outputs)
            .map_err(|e| e.in_stage(Stage::Intersection))?;

        let summary = self.summarize(sub, &outputs);
        intersection.cleanup(&outputs);
        summary
    }

    fn summarize(&self, sub: &Substation, outputs: &IntersectionOutputs) -> Result<VegetationSummary> {
        let ws = self.workspace;
        let conductor_table = conductor_summary_table(sub);
        let transformer_table = transformer_summary_table(sub);

        // Summary tables from the previous run are rebuilt from scratch.
        delete_if_exists(self.store, ws, &conductor_table)?;
        delete_if_exists(self.store, ws, &transformer_table)?;
        self.store.statistics(
            ws,
            &outputs.conductor_copy,
            &conductor_table,
            &[StatField::sum("SHAPE_Length")],
            &CASE_FIELDS,
        )?;
        self.store.statistics(
            ws,
            &outputs.intersected,
            &transformer_table,
            &[StatField::sum("CUSTOMER_COUNT")],
            &CASE_FIELDS,
        )?;

        for table in [&conductor_table, &transformer_table] {
            self.ensure_derived_fields(table)?;
        }

        let tag = sub.as_str();
        let conductor_rows = self.store.update_rows(
            ws,
            &conductor_table,
            &[KEY_FIELD, CIRCUIT_FIELD, "MCD_NAME", MILES_FIELD, "SUM_SHAPE_Length", SITE_FIELD],
            &mut |row| derive_conductor_row(row, tag),
        )?;
        info!("Updated {} rows in {}", conductor_rows, conductor_table);

        let transformer_rows = self.store.update_rows(
            ws,
            &transformer_table,
            &[KEY_FIELD, CIRCUIT_FIELD, "MCD_NAME", SITE_FIELD],
            &mut |row| derive_transformer_row(row, tag),
        )?;
        info!("Updated {} rows in {}", transformer_rows, transformer_table);

        Ok(VegetationSummary {
            conductor_table,
            transformer_table,
            conductor_rows,
            transformer_rows,
        })
    }

    fn ensure_derived_fields(&self, table: &str) -> Result<()> {
        let existing = self.store.list_fields(self.workspace, table)?;
        for field in DERIVED_FIELDS.iter() {
            if !existing.iter().any(|f| f.eq_ignore_ascii_case(field.name)) {
                self.store.add_field(self.workspace, table, field)?;
            }
        }
        Ok(())
    }
}

fn circuit_key(circuit: &Value, mcd_name: &Value) -> Value {
    Value::Text(format!("{}_{}", circuit.to_text(), mcd_name.to_text()))
}

/// `[Circuit_MCD, CIRCUIT1, MCD_NAME, Miles, SUM_SHAPE_Length, SUB]`
fn derive_conductor_row(row: &mut Row, tag: &str) {
    if let [key, circuit, mcd_name, miles, length, site] = row.as_mut_slice() {
        *key = circuit_key(circuit, mcd_name);
        *miles = match length.as_f64() {
            Some(feet) => Value::Double(feet_to_miles(feet)),
            None => Value::Null,
        };
        *site = Value::from(tag);
    }
}

/// `[Circuit_MCD, CIRCUIT1, MCD_NAME, SUB]`
fn derive_transformer_row(row: &mut Row, tag: &str) {
    if let [key, circuit, mcd_name, site] = row.as_mut_slice() {
        *key = circuit_key(circuit, mcd_name);
        *site = Value::from(tag);
    }
}
