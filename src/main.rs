use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use pamflow::config::PipelineConfig;
use pamflow::data::loader::{ensure_parent, load_file, save_csv, save_file};
use pamflow::data::model::format_float;
use pamflow::pamdp::deployments::DEPLOYMENTS;
use pamflow::pamdp::field_deployments::FIELD_DEPLOYMENTS;
use pamflow::pamdp::media::MEDIA;
use pamflow::pamdp::observations::OBSERVATIONS;
use pamflow::pamdp::target_species::TARGET_SPECIES;
use pamflow::pamdp::{PamDataset, PamSchema};
use pamflow::pipelines::data_preparation::{
    field_deployments_sheet_to_deployments, get_media_file, get_media_summary, save_media_summary,
};
use pamflow::pipelines::data_science::{apply_thresholds, find_thresholds, load_thresholds, save_thresholds};
use pamflow::pipelines::export::{deployments_to_csa_events, deployments_to_dwc_events};
use pamflow::pipelines::quality_control::{get_timelapse, sensor_performance, survey_effort};
use pamflow::pipelines::species_detection::{
    BirdnetAnalyzer, create_manual_annotation_formats, create_segments, create_segments_folder,
    filter_observations, species_detection_parallel, species_folder_name,
};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            eprintln!("pamflow error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "pamflow", about = "Passive acoustic monitoring workflow")]
struct Cli {
    /// Pipeline configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a table against its pamDP schema.
    Validate(ValidateArgs),
    /// Build Media, the media summary and Deployments from the audio folders.
    Prepare,
    /// Sensor performance, survey effort and the audio timelapse.
    QualityControl,
    /// Run the species classifier over every recording.
    Detect,
    /// Keep target species with enough observations.
    Filter,
    /// Sample segments per species and write the annotation sheets.
    Segments,
    /// Fit per-species confidence thresholds from manual annotations.
    Thresholds(ThresholdsArgs),
    /// Split observations per species at their fitted thresholds.
    ApplyThresholds,
    /// Write the deployments as CSA and Darwin Core event tables.
    Export,
    /// Convert a table between CSV, JSON and Parquet.
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[arg(long, value_enum)]
    kind: TableKind,
    #[arg(long)]
    file: PathBuf,
}

#[derive(Args, Debug)]
struct ThresholdsArgs {
    /// Folder of filled-in annotation sheets (CSV).
    #[arg(long)]
    annotations: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum TableKind {
    Media,
    Deployments,
    Observations,
    FieldDeployments,
    TargetSpecies,
}

impl TableKind {
    fn schema(self) -> PamSchema {
        match self {
            TableKind::Media => MEDIA,
            TableKind::Deployments => DEPLOYMENTS,
            TableKind::Observations => OBSERVATIONS,
            TableKind::FieldDeployments => FIELD_DEPLOYMENTS,
            TableKind::TargetSpecies => TARGET_SPECIES,
        }
    }
}

// ---------------------------------------------------------------------------
// Output layout
// ---------------------------------------------------------------------------

struct Layout {
    root: PathBuf,
}

impl Layout {
    fn preparation(&self, name: &str) -> PathBuf {
        self.root.join("data_preparation").join(name)
    }

    fn quality(&self, name: &str) -> PathBuf {
        self.root.join("quality_control").join(name)
    }

    fn detection(&self, name: &str) -> PathBuf {
        self.root.join("species_detection").join(name)
    }

    fn science(&self, name: &str) -> PathBuf {
        self.root.join("data_science").join(name)
    }

    fn export(&self, name: &str) -> PathBuf {
        self.root.join("export").join(name)
    }
}

impl Cli {
    fn execute(self) -> Result<()> {
        let config = PipelineConfig::load_or_default(self.config.as_deref())?;
        let layout = Layout { root: config.paths.output_dir.clone() };
        match self.command {
            Command::Validate(args) => validate(&config, args),
            Command::Prepare => prepare(&config, &layout),
            Command::QualityControl => quality_control(&config, &layout),
            Command::Detect => detect(&config, &layout),
            Command::Filter => filter(&config, &layout),
            Command::Segments => segments(&config, &layout),
            Command::Thresholds(args) => thresholds(&config, &layout, args),
            Command::ApplyThresholds => apply(&config, &layout),
            Command::Export => export(&config, &layout),
            Command::Convert(args) => {
                let table = load_file(&args.input)?;
                save_file(&table, &args.output)?;
                log::info!("Converted {} rows to {}", table.len(), args.output.display());
                Ok(())
            }
        }
    }
}

fn write_rows<T: Serialize>(rows: &[T], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating CSV {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn validate(config: &PipelineConfig, args: ValidateArgs) -> Result<()> {
    let schema = args.kind.schema();
    let table = PamDataset::new(schema, &args.file, config.time.offset()?).load()?;
    println!("{} is a valid pamDP.{} table with {} rows", args.file.display(), schema.name, table.len());
    Ok(())
}

fn prepare(config: &PipelineConfig, layout: &Layout) -> Result<()> {
    let offset = config.time.offset()?;
    let sheet = PamDataset::new(FIELD_DEPLOYMENTS, &config.paths.field_deployments, offset).load()?;

    let media = get_media_file(&config.paths.audio_root, &sheet, offset, config.metadata.n_jobs)?;
    PamDataset::new(MEDIA, layout.preparation("media.csv"), offset).save(&media)?;

    let summaries = get_media_summary(&media);
    save_media_summary(&summaries, &layout.preparation("media_summary.csv"))?;

    let deployments = field_deployments_sheet_to_deployments(&sheet, &summaries, offset)?;
    PamDataset::new(DEPLOYMENTS, layout.preparation("deployments.csv"), offset).save(&deployments)
}

fn quality_control(config: &PipelineConfig, layout: &Layout) -> Result<()> {
    let offset = config.time.offset()?;
    let media = PamDataset::new(MEDIA, layout.preparation("media.csv"), offset).load()?;
    let deployments = PamDataset::new(DEPLOYMENTS, layout.preparation("deployments.csv"), offset).load()?;

    let daily = sensor_performance(&media);
    write_rows(&daily, &layout.quality("sensor_performance.csv"))?;

    let effort = survey_effort(&get_media_summary(&media), &deployments, &media);
    let effort_path = layout.quality("survey_effort.json");
    ensure_parent(&effort_path)?;
    std::fs::write(&effort_path, serde_json::to_string_pretty(&effort)?)
        .with_context(|| format!("writing {}", effort_path.display()))?;

    let written = get_timelapse(
        &media,
        &daily,
        config.timelapse.sample_length,
        config.timelapse.period()?,
        config.timelapse.date()?,
        &layout.quality("timelapse"),
    )?;
    write_rows(&written, &layout.quality("timelapse.csv"))
}

fn detect(config: &PipelineConfig, layout: &Layout) -> Result<()> {
    let offset = config.time.offset()?;
    let media = PamDataset::new(MEDIA, layout.preparation("media.csv"), offset).load()?;
    let deployments = PamDataset::new(DEPLOYMENTS, layout.preparation("deployments.csv"), offset).load()?;

    let detector = BirdnetAnalyzer::new(config.species_detection.birdnet.clone());
    let now = Utc::now().with_timezone(&offset);
    let observations =
        species_detection_parallel(&media, &deployments, config.species_detection.n_jobs, &detector, now)?;
    PamDataset::new(OBSERVATIONS, layout.detection("unfiltered_observations.csv"), offset).save(&observations)
}

fn filter(config: &PipelineConfig, layout: &Layout) -> Result<()> {
    let offset = config.time.offset()?;
    let settings = &config.species_detection;
    let observations =
        PamDataset::new(OBSERVATIONS, layout.detection("unfiltered_observations.csv"), offset).load()?;
    let targets = PamDataset::new(TARGET_SPECIES, &config.paths.target_species, offset).load()?;

    let kept = filter_observations(&observations, &targets, settings.minimum_observations, settings.segment_size)?;
    PamDataset::new(OBSERVATIONS, layout.detection("observations.csv"), offset).save(&kept)
}

fn segments(config: &PipelineConfig, layout: &Layout) -> Result<()> {
    let offset = config.time.offset()?;
    let settings = &config.species_detection;
    let observations = PamDataset::new(OBSERVATIONS, layout.detection("observations.csv"), offset).load()?;
    let media = PamDataset::new(MEDIA, layout.preparation("media.csv"), offset).load()?;

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let segments = create_segments(&observations, &media, settings.segment_size, &mut rng)?;
    save_csv(&segments, &layout.detection("segments.csv"))?;

    let outcome = create_segments_folder(&segments, &layout.detection("segments"), settings.n_jobs)?;
    if !outcome.failures.is_empty() {
        log::warn!("{} segments could not be written", outcome.failures.len());
    }

    for (name, sheet) in create_manual_annotation_formats(&segments, &settings.manual_annotations_file_name) {
        save_csv(&sheet, &layout.detection("manual_annotations").join(name))?;
    }
    Ok(())
}

fn thresholds(config: &PipelineConfig, layout: &Layout, args: ThresholdsArgs) -> Result<()> {
    let settings = &config.data_science;
    let dir = args.annotations.unwrap_or_else(|| layout.detection("manual_annotations"));

    let mut sheets: Vec<PathBuf> = std::fs::read_dir(&dir)
        .with_context(|| format!("reading annotations folder {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
        .collect();
    sheets.sort();
    let Some((first, rest)) = sheets.split_first() else {
        bail!("no annotation sheets found in {}", dir.display());
    };

    let mut annotations = load_file(first)?;
    for sheet in rest {
        annotations.append(&load_file(sheet)?);
    }
    log::info!("Loaded {} annotations from {} sheets", annotations.len(), sheets.len());

    let found = find_thresholds(
        &annotations,
        &settings.correct_column,
        &settings.confidence_column,
        settings.probability,
        settings.n_jobs,
    )?;
    save_thresholds(&found, &layout.science("thresholds.csv"))
}

fn apply(config: &PipelineConfig, layout: &Layout) -> Result<()> {
    let offset = config.time.offset()?;
    let observations = PamDataset::new(OBSERVATIONS, layout.detection("observations.csv"), offset).load()?;
    let thresholds = load_thresholds(&layout.science("thresholds.csv"))?;

    let by_species = apply_thresholds(&observations, &thresholds);
    for t in &thresholds {
        if let Some(table) = by_species.get(&t.species) {
            let name = format!("{}_{}.csv", species_folder_name(&t.species), format_float(t.threshold));
            save_csv(table, &layout.science("filtered").join(name))?;
        }
    }
    Ok(())
}

fn export(config: &PipelineConfig, layout: &Layout) -> Result<()> {
    let offset = config.time.offset()?;
    let deployments = PamDataset::new(DEPLOYMENTS, layout.preparation("deployments.csv"), offset).load()?;
    let media = PamDataset::new(MEDIA, layout.preparation("media.csv"), offset).load()?;
    let sheet = PamDataset::new(FIELD_DEPLOYMENTS, &config.paths.field_deployments, offset).load()?;

    let csa = deployments_to_csa_events(&deployments, &media, &sheet, offset)?;
    save_csv(&csa, &layout.export("csa_events.csv"))?;
    let dwc = deployments_to_dwc_events(&deployments, offset)?;
    save_csv(&dwc, &layout.export("dwc_events.csv"))
}
