use anyhow::{Context, Result};
use clap::Parser;
use revivir::{
    cli::Cli,
    config::EngineConfig,
    filter::DEFAULT_SOURCE_EXTENSION,
    interp::Interp,
    ir::Program,
    recorder::TraceSession,
    rewriter,
};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Build the effective configuration from the CLI surface
///
/// A raw activation string wins over the individual flags; either way the
/// artifact directory comes from `--out-dir`.
fn build_config(cli: &Cli) -> EngineConfig {
    let mut config = match &cli.agent_args {
        Some(raw) => EngineConfig::from_activation_str(raw),
        None => {
            let mut config = EngineConfig {
                traverse: cli.traverse,
                package: cli.package.clone(),
                source_dir: cli.path.as_deref().map(revivir::config::absolutize),
                ..EngineConfig::default()
            };
            config.extensions = std::iter::once(DEFAULT_SOURCE_EXTENSION.to_string())
                .chain(cli.extensions.iter().cloned())
                .collect();
            config
        }
    };
    config.artifact_dir = cli.out_dir.clone();
    config
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = build_config(&cli);
    config.print_banner();

    let text = std::fs::read_to_string(&cli.image)
        .with_context(|| format!("failed to read image {}", cli.image.display()))?;
    let program: Program = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse image {}", cli.image.display()))?;

    let entry = cli
        .entry
        .clone()
        .or_else(|| program.classes.first().map(|c| c.name.clone()))
        .context("image contains no classes")?
        .replace('.', "/");

    let filter = config.filter();
    let mut session = TraceSession::new(&config);

    let instrumented = rewriter::instrument_program(&program, &filter, &mut session);

    let mut interp = Interp::new(&instrumented, &mut session);
    interp
        .run(&entry)
        .with_context(|| format!("execution of {entry} failed"))?;

    session.shutdown();
    Ok(())
}
