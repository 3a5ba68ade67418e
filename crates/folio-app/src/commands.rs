// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command implementations. Results go to stdout as JSON; logs and progress
// go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use folio_core::{PipelineConfig, TextRecognizer};
use folio_pipeline::{BatchDocument, Coordinator, JsonDirectoryArchive, PipelineEvent};
use folio_restore::{analyze_layout, codec};

pub struct AnalyzeOptions {
    pub models: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub lite: bool,
    pub progress: bool,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Restore one page and report what was found and done.
pub fn restore(image: &Path, output: Option<&Path>) -> Result<()> {
    let page = codec::open(image).with_context(|| format!("opening {}", image.display()))?;
    let profile = folio_restore::analyze(&page);
    let result = folio_restore::restore(&page, &profile);
    let layout = analyze_layout(&result.enhanced_image);

    if let Some(output) = output {
        let png = codec::encode_png(&result.enhanced_image)?;
        std::fs::write(output, png).with_context(|| format!("writing {}", output.display()))?;
        info!(path = %output.display(), "Restored page written");
    }

    print_json(&serde_json::json!({
        "profile": profile,
        "operations_applied": result.operations_applied,
        "layout": layout,
    }))
}

#[cfg(feature = "ocr")]
fn recognizer(models: Option<&Path>) -> Result<Arc<dyn TextRecognizer>> {
    use folio_restore::{LocalRecognizer, ModelPaths};

    let paths = models.map(ModelPaths::from_dir).unwrap_or_default();
    Ok(Arc::new(LocalRecognizer::load(&paths)?))
}

#[cfg(not(feature = "ocr"))]
fn recognizer(_models: Option<&Path>) -> Result<Arc<dyn TextRecognizer>> {
    anyhow::bail!("folio was built without the `ocr` feature; no text recognizer available")
}

fn print_progress(mut events: mpsc::Receiver<PipelineEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PipelineEvent::Message(message) => eprintln!("[{}] {}", message.stage, message.text),
                PipelineEvent::State { run_id, state } => debug!(%run_id, ?state, "State"),
                PipelineEvent::Failed { error, .. } => eprintln!("run failed: {}", error),
            }
        }
    })
}

/// Run the pipeline over every page given on the command line.
pub async fn analyze(config: PipelineConfig, images: &[PathBuf], options: AnalyzeOptions) -> Result<()> {
    let mut coordinator = Coordinator::new(config, recognizer(options.models.as_deref())?);
    if let Some(dir) = &options.archive {
        coordinator = coordinator.with_archive(Arc::new(JsonDirectoryArchive::new(dir)?));
    }

    let mut documents = Vec::with_capacity(images.len());
    for path in images {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        documents.push(BatchDocument::new(path.display().to_string(), bytes));
    }

    if options.lite {
        let mut records = Vec::with_capacity(documents.len());
        for document in &documents {
            records.push(coordinator.run_lite(&document.bytes).await?);
        }
        return print_json(&records);
    }

    if let [document] = documents.as_slice() {
        let record = if options.progress {
            let (tx, rx) = mpsc::channel(256);
            let printer = print_progress(rx);
            let record = coordinator.run_streaming(&document.bytes, tx).await;
            printer.await?;
            record?
        } else {
            coordinator.run(&document.bytes).await?
        };
        return print_json(&record);
    }

    let report = coordinator.run_batch(documents).await?;
    let records: Vec<_> = report.outcomes.iter().filter_map(|o| o.record.as_ref()).collect();
    print_json(&serde_json::json!({
        "report": report,
        "records": records,
    }))
}
