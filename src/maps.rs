// Map generation pipeline.
//
// For one site and year: read the site's circuits from its last conductor
// summary, build the selection expression, rerun the vegetation statistics,
// then export the four layout templates to PDF. Any failure stops the run;
// later layouts are not attempted once one fails.
use log::{error, info};
use std::path::PathBuf;

use crate::config::{Config, PathsConfig};
use crate::engine::{DataStore, DocumentRenderer};
use crate::error::{Error, Result, Stage};
use crate::intersection::{IntersectionOutputs, IntersectionStage, DEFAULT_ATTEMPTS};
use crate::processor::FileProcessor;
use crate::progress::ProgressTracker;
use crate::types::{DocumentKind, LayoutType, MapRunSummary, Substation, Value, Workspace};
use crate::util::sql_literal;
use crate::vegetation::{conductor_summary_table, VegetationStage, VegetationSummary, CIRCUIT_FIELD};

/// Underground cable is never drawn on the vegetation maps.
pub const ORIENTATION_FILTER: &str = "ORIENTATION <> 'UNDERGROUND CABLE'";

const PAGE_SIZE: &str = "11x17";
const DEFAULT_RESOLUTION: u32 = 300;

/// Selection expression limiting the base layers to `circuits`.
pub fn build_expression(circuits: &[String]) -> String {
    let list: Vec<String> = circuits.iter().map(|c| sql_literal(c)).collect();
    format!(
        "{} AND {} IN ({})",
        ORIENTATION_FILTER,
        CIRCUIT_FIELD,
        list.join(",")
    )
}

fn template_dir(workspace: &Workspace, year: &str) -> PathBuf {
    workspace.parent().join("MXD").join(year)
}

/// `{parent}/MXD/{year}/Template{Layout}_{year}_11x17.mxd`, or the `.aprx`
/// sibling when only that one exists.
pub fn template_path(workspace: &Workspace, layout: LayoutType, year: &str) -> PathBuf {
    let stem = format!("Template{}_{}_{}", layout, year, PAGE_SIZE);
    let dir = template_dir(workspace, year);
    DocumentKind::ALL
        .iter()
        .map(|kind| dir.join(format!("{}.{}", stem, kind.extension())))
        .find(|p| p.exists())
        .unwrap_or_else(|| dir.join(format!("{}.{}", stem, DocumentKind::Mxd.extension())))
}

pub fn export_dir(workspace: &Workspace, sub: &Substation, year: &str) -> PathBuf {
    template_dir(workspace, year).join("Export").join(sub.as_str())
}

pub fn output_path(workspace: &Workspace, sub: &Substation, layout: LayoutType, year: &str) -> PathBuf {
    export_dir(workspace, sub, year).join(format!("{}_{}_{}_{}.pdf", sub, layout, year, PAGE_SIZE))
}

/// Source layers for the standalone intersection pre-step.
#[derive(Debug, Clone)]
pub struct SourceLayers {
    pub transformer: String,
    pub conductor: String,
    pub mcd: String,
}

impl SourceLayers {
    pub fn from_paths(paths: &PathsConfig) -> Self {
        SourceLayers {
            transformer: paths.transformer_layer.clone(),
            conductor: paths.conductor_layer.clone(),
            mcd: paths.mcd_layer.clone(),
        }
    }
}

pub struct MapGenerator<'a, S: DataStore + ?Sized, R: DocumentRenderer + ?Sized> {
    store: &'a S,
    renderer: &'a R,
    workspace: Workspace,
    sources: SourceLayers,
    resolution: u32,
    attempts: u32,
}

impl<'a, S, R> MapGenerator<'a, S, R>
where
    S: DataStore + ?Sized,
    R: DocumentRenderer + ?Sized,
{
    pub fn new(store: &'a S, renderer: &'a R, workspace: Workspace, sources: SourceLayers) -> Self {
        MapGenerator {
            store,
            renderer,
            workspace,
            sources,
            resolution: DEFAULT_RESOLUTION,
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    pub fn from_config(config: &Config, store: &'a S, renderer: &'a R) -> Self {
        MapGenerator::new(
            store,
            renderer,
            config.workspace(),
            SourceLayers::from_paths(&config.paths),
        )
        .with_resolution(config.options.resolution)
        .with_attempts(config.options.intersection_attempts)
    }

    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Run the whole pipeline for one site and year.
    pub fn generate_maps(&self, sub: &Substation, year: &str) -> Result<MapRunSummary> {
        info!("Generating maps for {} ({})", sub, year);
        let mut progress = ProgressTracker::new(2 + LayoutType::ALL.len(), format!("Maps {}", sub));

        let circuits = self
            .get_circuits(sub)
            .map_err(|e| e.in_stage(Stage::BuildExpression))?;
        let expression = build_expression(&circuits);
        info!("Selection for {}: {} circuits", sub, circuits.len());
        progress.update("expression built");

        self.vegetation_stage()
            .process_vegetation(sub, &expression)
            .map_err(|e| e.in_stage(Stage::Vegetation))?;
        progress.update("vegetation statistics");

        std::fs::create_dir_all(export_dir(&self.workspace, sub, year))?;
        let mut outputs = Vec::with_capacity(LayoutType::ALL.len());
        for layout in LayoutType::ALL {
            let pdf = self.process_map(sub, layout, year).map_err(|e| {
                error!("Failed to process {} map for {}", layout, sub);
                Error::Layout {
                    layout,
                    source: Box::new(e),
                }
            })?;
            outputs.push(pdf);
            progress.update(layout.as_str());
        }
        progress.complete(&format!("{} maps written", outputs.len()));

        Ok(MapRunSummary {
            substation: sub.to_string(),
            year: year.to_string(),
            circuits,
            expression,
            outputs,
            finished_at: chrono::Local::now(),
        })
    }

    /// Distinct circuits of the site's conductor summary, in table order.
    pub fn get_circuits(&self, sub: &Substation) -> Result<Vec<String>> {
        self.workspace.ensure_exists()?;
        let table = conductor_summary_table(sub);
        let no_circuits = || Error::NoCircuits {
            site: sub.to_string(),
            table: table.clone(),
        };
        if !self.store.exists(&self.workspace, &table)? {
            return Err(no_circuits());
        }

        let mut circuits: Vec<String> = Vec::new();
        for row in self.store.search_rows(&self.workspace, &table, &[CIRCUIT_FIELD])? {
            let circuit = match row.first() {
                Some(Value::Null) | None => continue,
                Some(value) => value.to_text(),
            };
            if !circuits.contains(&circuit) {
                circuits.push(circuit);
            }
        }
        if circuits.is_empty() {
            return Err(no_circuits());
        }
        Ok(circuits)
    }

    pub fn vegetation_stage(&self) -> VegetationStage<'_, S> {
        VegetationStage::new(self.store, &self.workspace, self.sources.mcd.as_str())
            .with_attempts(self.attempts)
    }

    /// Vegetation statistics on their own; explicit circuits seed a site that
    /// has no summary table yet.
    pub fn process_vegetation(&self, sub: &Substation, circuits: &[String]) -> Result<VegetationSummary> {
        let circuits = match circuits {
            [] => self
                .get_circuits(sub)
                .map_err(|e| e.in_stage(Stage::BuildExpression))?,
            given => given.to_vec(),
        };
        self.vegetation_stage()
            .process_vegetation(sub, &build_expression(&circuits))
            .map_err(|e| e.in_stage(Stage::Vegetation))
    }

    /// Build the workspace base layers from the configured source layers.
    pub fn process_intersections(&self) -> Result<()> {
        self.workspace.ensure_exists()?;
        IntersectionStage::new(self.store, &self.workspace, self.sources.mcd.as_str())
            .with_attempts(self.attempts)
            .intersect(
                &self.sources.transformer,
                &self.sources.conductor,
                &IntersectionOutputs::base(),
            )
            .map_err(|e| e.in_stage(Stage::Intersection))
    }

    fn process_map(&self, sub: &Substation, layout: LayoutType, year: &str) -> Result<PathBuf> {
        let template = template_path(&self.workspace, layout, year);
        let output = output_path(&self.workspace, sub, layout, year);
        FileProcessor::new(self.renderer).process_file(&template, &output, self.resolution)
    }
}

/// Where the JSON record of a run goes.
pub fn run_summary_path(workspace: &Workspace, sub: &Substation, year: &str) -> PathBuf {
    export_dir(workspace, sub, year).join(format!("{}_{}_run.json", sub, year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intersection::{PRICOND_MCD, XFMR_MCD};
    use crate::engine::EngineError;
    use crate::testing::{FakeRenderer, FakeStore};
    use crate::types::Row;
    use std::fs;

    const MCD: &str = "src/MCD";

    struct Fixture {
        _dir: tempfile::TempDir,
        workspace: Workspace,
    }

    impl Fixture {
        fn new(year: &str) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let ws_path = dir.path().join("Workspace.gdb");
            fs::create_dir_all(&ws_path).unwrap();
            let workspace = Workspace::new(&ws_path);
            let templates = template_dir(&workspace, year);
            fs::create_dir_all(&templates).unwrap();
            for layout in LayoutType::ALL {
                let name = format!("Template{}_{}_11x17.mxd", layout, year);
                fs::write(templates.join(name), b"").unwrap();
            }
            Fixture {
                _dir: dir,
                workspace,
            }
        }
    }

    fn sources() -> SourceLayers {
        SourceLayers {
            transformer: "src/Transformer".to_string(),
            conductor: "src/PriCond".to_string(),
            mcd: MCD.to_string(),
        }
    }

    fn alpha() -> Substation {
        Substation::resolve("alpha", &["ALPHA".to_string(), "BETA".to_string()]).unwrap()
    }

    const SUMMARY_FIELDS: [&str; 4] = ["CIRCUIT1", "MCD_CODE", "MCD_NAME", "SUM_SHAPE_Length"];

    fn history_rows() -> Vec<Row> {
        vec![
            vec![Value::from("1201"), "0301".into(), "Springfield".into(), 5280.0.into()],
            vec![Value::from("1202"), "0301".into(), "Springfield".into(), 10.0.into()],
            vec![Value::from("1201"), "0302".into(), "Shelby".into(), 20.0.into()],
        ]
    }

    fn store_with_history() -> FakeStore {
        FakeStore::new()
            .with_table(XFMR_MCD, &["CIRCUIT1", "CUSTOMER_COUNT"], vec![])
            .with_table(PRICOND_MCD, &["CIRCUIT1", "SHAPE_Length"], vec![])
            .with_table(MCD, &["MCD_CODE", "MCD_NAME"], vec![])
            .with_table("PriCond_ALPHA_MCD_Sum", &SUMMARY_FIELDS, history_rows())
    }

    #[test]
    fn test_build_expression() {
        let circuits = vec!["1201".to_string(), "O'HARE".to_string()];
        assert_eq!(
            build_expression(&circuits),
            "ORIENTATION <> 'UNDERGROUND CABLE' AND CIRCUIT1 IN ('1201','O''HARE')"
        );
    }

    #[test]
    fn test_path_conventions() {
        let ws = Workspace::new("/data/veg/Workspace.gdb");
        let sub = alpha();
        assert_eq!(
            template_path(&ws, LayoutType::InternalOverview, "2024"),
            PathBuf::from("/data/veg/MXD/2024/TemplateInternalOverview_2024_11x17.mxd")
        );
        assert_eq!(
            output_path(&ws, &sub, LayoutType::External, "2024"),
            PathBuf::from("/data/veg/MXD/2024/Export/ALPHA/ALPHA_External_2024_11x17.pdf")
        );
    }

    #[test]
    fn test_template_falls_back_to_aprx() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("ws.gdb"));
        let templates = template_dir(&ws, "2025");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join("TemplateExternal_2025_11x17.aprx"), b"").unwrap();
        assert_eq!(
            template_path(&ws, LayoutType::External, "2025"),
            templates.join("TemplateExternal_2025_11x17.aprx")
        );
    }

    #[test]
    fn test_get_circuits_distinct_in_order() {
        let fx = Fixture::new("2024");
        let store = store_with_history();
        let renderer = FakeRenderer::new();
        let generator = MapGenerator::new(&store, &renderer, fx.workspace.clone(), sources());
        assert_eq!(generator.get_circuits(&alpha()).unwrap(), vec!["1201", "1202"]);
    }

    #[test]
    fn test_generate_maps_writes_four_pdfs() {
        let fx = Fixture::new("2024");
        let store = store_with_history();
        let renderer = FakeRenderer::new();
        let generator = MapGenerator::new(&store, &renderer, fx.workspace.clone(), sources());

        let summary = generator.generate_maps(&alpha(), "2024").unwrap();
        assert_eq!(summary.substation, "ALPHA");
        assert_eq!(summary.circuits, vec!["1201", "1202"]);
        assert_eq!(summary.outputs.len(), 4);
        for layout in LayoutType::ALL {
            let pdf = output_path(&fx.workspace, &alpha(), layout, "2024");
            assert!(pdf.exists(), "missing {}", pdf.display());
            assert!(pdf
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("ALPHA_"));
        }
        assert_eq!(
            store.layer_filter("PriCond_MCD_ALPHA").as_deref(),
            Some(summary.expression.as_str())
        );
    }

    #[test]
    fn test_second_run_over_existing_summary() {
        let fx = Fixture::new("2024");
        let store = store_with_history().with_statistics_result(
            "PriCond_ALPHA_MCD_Sum",
            &SUMMARY_FIELDS,
            history_rows(),
        );
        let renderer = FakeRenderer::new();
        let generator = MapGenerator::new(&store, &renderer, fx.workspace.clone(), sources());

        generator.generate_maps(&alpha(), "2024").unwrap();
        let calls = store.calls();
        let deleted = calls
            .iter()
            .position(|c| c == "delete PriCond_ALPHA_MCD_Sum")
            .expect("summary deleted");
        let rebuilt = calls
            .iter()
            .position(|c| c == "statistics PriCond_ALPHA_MCD_Sum")
            .expect("summary rebuilt");
        assert!(deleted < rebuilt);

        let second = generator.generate_maps(&alpha(), "2024").unwrap();
        assert_eq!(second.circuits, vec!["1201", "1202"]);
        assert_eq!(renderer.count_calls("export_document"), 8);
    }

    #[test]
    fn test_vegetation_failure_skips_exports() {
        let fx = Fixture::new("2024");
        let store = store_with_history();
        store.fail_next("statistics", EngineError::new(Some(999999), "aggregation failed"));
        let renderer = FakeRenderer::new();
        let generator = MapGenerator::new(&store, &renderer, fx.workspace.clone(), sources());

        let err = generator.generate_maps(&alpha(), "2024").unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Vegetation));
        assert!(renderer.calls().is_empty());
        assert!(!export_dir(&fx.workspace, &alpha(), "2024").exists());
    }

    #[test]
    fn test_layout_failure_stops_sequence() {
        let fx = Fixture::new("2024");
        let store = store_with_history();
        let renderer = FakeRenderer::new().fail_exports_matching("_External_");
        let generator = MapGenerator::new(&store, &renderer, fx.workspace.clone(), sources());

        let err = generator.generate_maps(&alpha(), "2024").unwrap_err();
        assert!(matches!(err, Error::Layout { layout: LayoutType::External, .. }));
        assert_eq!(renderer.count_calls("open"), 2);
        assert!(output_path(&fx.workspace, &alpha(), LayoutType::Internal, "2024").exists());
        assert!(!output_path(&fx.workspace, &alpha(), LayoutType::InternalOverview, "2024").exists());
    }

    #[test]
    fn test_missing_template_fails_layout() {
        let fx = Fixture::new("2024");
        fs::remove_file(template_path(&fx.workspace, LayoutType::Internal, "2024")).unwrap();
        let store = store_with_history();
        let renderer = FakeRenderer::new();
        let generator = MapGenerator::new(&store, &renderer, fx.workspace.clone(), sources());

        let err = generator.generate_maps(&alpha(), "2024").unwrap_err();
        assert!(matches!(err, Error::Layout { layout: LayoutType::Internal, .. }));
        assert!(renderer.calls().is_empty());
    }

    #[test]
    fn test_no_history_fails_before_vegetation() {
        let fx = Fixture::new("2024");
        let store = FakeStore::new().with_table(XFMR_MCD, &["CIRCUIT1"], vec![]);
        let renderer = FakeRenderer::new();
        let generator = MapGenerator::new(&store, &renderer, fx.workspace.clone(), sources());

        let err = generator.generate_maps(&alpha(), "2024").unwrap_err();
        assert_eq!(err.stage(), Some(Stage::BuildExpression));
        assert_eq!(store.count_calls("make_feature_layer"), 0);
    }

    #[test]
    fn test_process_vegetation_with_seed_circuits() {
        let fx = Fixture::new("2024");
        let store = FakeStore::new()
            .with_table(XFMR_MCD, &["CIRCUIT1", "CUSTOMER_COUNT"], vec![])
            .with_table(PRICOND_MCD, &["CIRCUIT1", "SHAPE_Length"], vec![])
            .with_table(MCD, &["MCD_CODE", "MCD_NAME"], vec![]);
        let renderer = FakeRenderer::new();
        let generator = MapGenerator::new(&store, &renderer, fx.workspace.clone(), sources());

        let summary = generator
            .process_vegetation(&alpha(), &["9001".to_string()])
            .unwrap();
        assert_eq!(summary.conductor_table, "PriCond_ALPHA_MCD_Sum");
        assert_eq!(
            store.layer_filter("XFMR_MCD_ALPHA").as_deref(),
            Some("ORIENTATION <> 'UNDERGROUND CABLE' AND CIRCUIT1 IN ('9001')")
        );
    }

    #[test]
    fn test_process_intersections_builds_base_layers() {
        let fx = Fixture::new("2024");
        let store = FakeStore::new()
            .with_table("src/Transformer", &["CIRCUIT1"], vec![])
            .with_table("src/PriCond", &["CIRCUIT1"], vec![])
            .with_table(MCD, &["MCD_CODE"], vec![]);
        let renderer = FakeRenderer::new();
        let generator = MapGenerator::new(&store, &renderer, fx.workspace.clone(), sources());

        generator.process_intersections().unwrap();
        assert!(store.has_table(XFMR_MCD));
        assert!(store.has_table(PRICOND_MCD));
    }
}
