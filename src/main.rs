// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::path::PathBuf;

use lodtiler::{
    convert_inputs,
    Diagnostics,
    Exporter,
    Tiler,
    TilerError,
    TilerOptions,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or(TilerError::MissingConfig("configuration file argument"))?;
    let options = TilerOptions::load(&config)?;

    let filter = EnvFilter::try_new(&options.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)?;

    options.validate()?;
    let output = options
        .output
        .clone()
        .ok_or(TilerError::MissingConfig("output"))?;

    info!(config = %config.display(), inputs = options.inputs.len(), "converting inputs");
    let begin_time = std::time::Instant::now();

    let mut diagnostics = Diagnostics::default();
    let scenes = convert_inputs(&options, &mut diagnostics)?;
    info!(
        scenes = scenes.len(),
        skipped = diagnostics.skipped_instances.len(),
        elapsed_ms = begin_time.elapsed().as_millis(),
        "conversion finished"
    );

    let mut run = Tiler::new(options)?.run(scenes)?;
    run.diagnostics.merge(diagnostics);
    Exporter::new(output).write(&mut run)?;

    info!(
        nodes = run.tree.nodes.len(),
        contents = run.tree.content_count(),
        clean = run.diagnostics.is_clean(),
        elapsed_s = begin_time.elapsed().as_secs_f32(),
        "tileset written"
    );
    Ok(())
}
