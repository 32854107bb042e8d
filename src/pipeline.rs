//! The export and convert stages of a single book.
//!
//! [`process_book`] owns its copy of the task and hands it back finished;
//! it never touches the batch result directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::fs;
use tokio::task::spawn_blocking;

use crate::batch::BatchConfig;
use crate::discovery::{audio_path_for, output_dir_for};
use crate::document::SourceBook;
use crate::error::{Error, Result};
use crate::extractor::{ExtractedStructure, StructureExtractor};
use crate::path_utils::{
    prepare_long_path, sanitize_filename, structure_output_path, text_output_path,
};
use crate::synthesis::{
    ConcatPackager, Packager, PostProcessor, SynthesisPlan, SynthesisRequest, Synthesizer,
};
use crate::task::BookTask;
use crate::tree::ChapterOutline;
use crate::types::{BookMetadata, StructureReport};

/// Collaborators shared by every book of a batch.
#[derive(Clone)]
pub(crate) struct Services {
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    pub post_processors: Vec<Arc<dyn PostProcessor>>,
    pub packager: Arc<dyn Packager>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            synthesizer: None,
            post_processors: Vec::new(),
            packager: Arc::new(ConcatPackager),
        }
    }
}

/// Structure export written next to the text export.
#[derive(Debug, Serialize)]
struct StructureExport<'a> {
    metadata: &'a BookMetadata,
    report: &'a StructureReport,
    chapters: Vec<ChapterOutline>,
}

/// Runs one book through export and (unless `export_only`) conversion.
/// The returned task is COMPLETED or FAILED.
pub(crate) async fn process_book(
    mut task: BookTask,
    config: Arc<BatchConfig>,
    services: Services,
) -> BookTask {
    if let Err(e) = run_stages(&mut task, &config, &services).await {
        if let Err(transition) = task.fail(e.to_string()) {
            warn!("{:?}: {}", task.source_path, transition);
        }
    }
    task
}

async fn run_stages(task: &mut BookTask, config: &BatchConfig, services: &Services) -> Result<()> {
    task.begin_export()?;
    info!("Exporting {:?}", task.source_path);

    let (book, structure) = load_structure(task.source_path.clone(), config).await?;
    let selection = config.chapter_selection()?;
    let plan = SynthesisPlan::from_tree(
        &structure.tree,
        config.hierarchy_style,
        config.max_depth,
        selection.as_ref(),
        Some(&config.content_filter),
    );
    if plan.is_empty() {
        return Err(Error::Other(format!(
            "No chapters left to process out of {} detected",
            structure.tree.len()
        )));
    }
    task.chapter_count = plan.len();

    let output_dir = output_dir_for(&task.source_path, config);
    fs::create_dir_all(&output_dir).await?;
    let basename = task.basename();

    let text_path = prepare_long_path(&text_output_path(&output_dir, &basename))?;
    plan.write_text(&book.metadata, &text_path).await?;
    write_structure(&output_dir, &basename, &book.metadata, &structure).await?;
    debug!("Wrote {} chapter(s) to {:?}", plan.len(), text_path);
    task.derived_text_path = Some(text_path);

    if config.export_only {
        task.complete()?;
        return Ok(());
    }

    let synthesizer = services
        .synthesizer
        .clone()
        .ok_or_else(|| Error::Other("No synthesizer configured for conversion".to_string()))?;

    task.begin_convert()?;
    info!("Converting {:?} ({} chapters)", task.source_path, plan.len());

    let audio_path = prepare_long_path(&audio_path_for(&task.source_path, config))?;
    let work_dir = output_dir.join(format!(".{}.chapters", sanitize_filename(&basename)));
    fs::create_dir_all(&work_dir).await?;

    let converted = convert(
        &plan,
        config,
        services,
        synthesizer.as_ref(),
        &work_dir,
        &audio_path,
    )
    .await;
    if let Err(e) = fs::remove_dir_all(&work_dir).await {
        warn!("Failed to remove working directory {:?}: {}", work_dir, e);
    }
    converted?;

    task.derived_audio_path = Some(audio_path);
    task.complete()?;
    Ok(())
}

/// Loads the book and extracts its chapter tree on a blocking thread.
async fn load_structure(
    path: PathBuf,
    config: &BatchConfig,
) -> Result<(SourceBook, ExtractedStructure)> {
    let method = config.detection_method;
    spawn_blocking(move || {
        let book = SourceBook::open(&path)?;
        let structure = StructureExtractor::new(method).extract(&book)?;
        if structure.report.fallback_used {
            info!(
                "{:?}: used {} detection instead of {}",
                path, structure.report.method_applied, structure.report.method_requested
            );
        }
        Ok((book, structure))
    })
    .await?
}

async fn write_structure(
    output_dir: &Path,
    basename: &str,
    metadata: &BookMetadata,
    structure: &ExtractedStructure,
) -> Result<()> {
    let tree = &structure.tree;
    let root = tree.root();
    let export = StructureExport {
        metadata,
        report: &structure.report,
        chapters: tree[root]
            .children()
            .iter()
            .map(|&child| tree.to_outline(child))
            .collect(),
    };
    let path = prepare_long_path(&structure_output_path(output_dir, basename))?;
    fs::write(path, serde_json::to_string_pretty(&export)?).await?;
    Ok(())
}

async fn convert(
    plan: &SynthesisPlan,
    config: &BatchConfig,
    services: &Services,
    synthesizer: &dyn Synthesizer,
    work_dir: &Path,
    audio_path: &Path,
) -> Result<()> {
    let extension = config.output_extension.trim_start_matches('.');
    let mut files = Vec::with_capacity(plan.len());

    for chapter in plan.iter() {
        let request = SynthesisRequest {
            text: chapter.text(),
            voice: config.voice.clone(),
            rate: config.rate.clone(),
            volume: config.volume.clone(),
        };
        let audio = synthesizer.synthesize(&request).await.map_err(|e| {
            if matches!(e, Error::Synthesis(_)) {
                e
            } else {
                Error::Synthesis(format!("chapter {} '{}': {}", chapter.index, chapter.title, e))
            }
        })?;
        let file = work_dir.join(format!("{:04}.{}", chapter.index, extension));
        fs::write(&file, audio).await?;
        files.push(file);
    }

    for processor in &services.post_processors {
        debug!("Running post-processor '{}'", processor.name());
        let processed = processor.process(&files, work_dir).await?;
        if processed.len() != files.len() {
            return Err(Error::Other(format!(
                "Post-processor '{}' returned {} file(s) for {} chapter(s)",
                processor.name(),
                processed.len(),
                files.len()
            )));
        }
        files = processed;
    }

    services.packager.package(&files, plan, audio_path).await
}
