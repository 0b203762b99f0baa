use anyhow::{Context, Result};
use tracing::info;

use crate::catalog::{
    MetricCatalog, PlotSummary, RecordingRegistrar, index_definitions, role_plots,
};
use crate::cli::CatalogArgs;
use crate::model::CatalogDump;
use crate::util::{now_utc_string, write_json_pretty};

pub fn run(args: CatalogArgs) -> Result<()> {
    let plots = if args.register {
        let mut catalog = MetricCatalog::new();
        let mut registrar = RecordingRegistrar::default();
        catalog
            .register(&mut registrar)
            .context("failed to register metric catalog")?;
        registrar.plots
    } else {
        let plans = role_plots();
        index_definitions(&plans).context("metric catalog is inconsistent")?;
        RecordingRegistrar::summarize(&plans)
    };

    let plots: Vec<PlotSummary> = plots
        .into_iter()
        .filter(|plot| args.role.matches(&plot.role))
        .collect();
    let dump = CatalogDump {
        generated_at: now_utc_string(),
        registered: args.register,
        plot_count: plots.len(),
        metric_count: plots.iter().map(|plot| plot.queries.len()).sum(),
        plots,
    };

    match &args.output_path {
        Some(path) => {
            write_json_pretty(path, &dump)?;
            info!(path = %path.display(), "wrote metric catalog");
        }
        None => {
            let rendered =
                serde_json::to_string_pretty(&dump).context("failed to serialize metric catalog")?;
            println!("{rendered}");
        }
    }

    info!(
        role = ?args.role,
        plots = dump.plot_count,
        metrics = dump.metric_count,
        "catalog completed"
    );

    Ok(())
}
