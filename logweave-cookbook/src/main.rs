use logweave::PipelineConfig;
use logweave_cookbook::{report_fatal, BootstrapError, Pipeline};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let loaded = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::default()),
    };
    let built = loaded
        .map_err(BootstrapError::from)
        .and_then(|config| Pipeline::build(&config).map(|pipeline| (config, pipeline)));
    let (config, pipeline) = match built {
        Ok(built) => built,
        Err(err) => {
            report_fatal(None, &err).await;
            return ExitCode::FAILURE;
        }
    };

    match run(&config, &pipeline).await {
        Ok(()) => {
            pipeline.shutdown().await;
            ExitCode::SUCCESS
        }
        Err(err) => {
            if let Some(exporter) = &pipeline.exporter {
                exporter.shutdown().await;
            }
            report_fatal(Some(&pipeline), &err).await;
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &PipelineConfig, pipeline: &Pipeline) -> Result<(), BootstrapError> {
    pipeline.announce().await;
    let generator = match &config.generator {
        Some(startup) => Some(pipeline.start_generator(startup)?),
        None => None,
    };
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "logweave::selflog", error = %err, "cannot listen for ctrl-c");
    }
    if let Some(generator) = generator {
        generator.cancel();
        let emitted = generator.join().await?;
        tracing::info!(target: "logweave::selflog", emitted, "generator stopped");
    }
    Ok(())
}
