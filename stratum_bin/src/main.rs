// Copyright (C) 2024, 2025 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use stratum::config::Config;
use stratum::difficulty_adjuster::{
    DifficultyAdjuster, DifficultyAdjusterTrait, create_difficulty_channel,
};
use stratum::emission::{EmissionReceiver, create_emission_channel};
use stratum::logging::setup_logging;
use stratum::server::StratumServerBuilder;
use stratum::session_registry::SessionRegistry;
use stratum::share_validator::ShareValidator;
use stratum::work::notify::{JobBroadcaster, start_job_poller};
use stratum::work::template::JsonFileTemplateSource;
use stratum::work::tracker::{JobTracker, start_tracker_cleanup};
use tracing::{error, info};

/// How often retired jobs are purged from the tracker
const TRACKER_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config: String,
}

/// Accounting stand-in: log every accepted share.
async fn drain_solutions(mut solutions_rx: EmissionReceiver) {
    while let Some(solution) = solutions_rx.recv().await {
        info!(
            "Solution from {} ({}) job {} hash {} difficulty {:.3}",
            solution.worker_name,
            solution.session_id,
            solution.job_id,
            solution.block_hash,
            solution.difficulty
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            return Err(format!("Failed to load config: {err}").into());
        }
    };
    let _guard = setup_logging(&config.logging)?;
    info!("Starting stratum pool...");

    let registry = Arc::new(SessionRegistry::new(
        config.stratum.extranonce2_size,
        config.stratum.start_difficulty,
        config.stratum.credentials.clone(),
    ));
    let tracker = Arc::new(JobTracker::new(
        config.jobs.recent_jobs_capacity,
        Duration::from_secs(config.jobs.clean_grace_secs),
    ));
    let broadcaster = Arc::new(JobBroadcaster::new(tracker.clone(), registry.clone()));

    let (updates_tx, updates_rx) = create_difficulty_channel(config.difficulty.update_channel_capacity);
    let adjuster: Arc<dyn DifficultyAdjusterTrait> =
        Arc::new(DifficultyAdjuster::new(config.retarget_config(), updates_tx));

    let (solutions_tx, solutions_rx) = create_emission_channel(config.validator.solution_sink_capacity);
    let validator = Arc::new(ShareValidator::new(
        config.validator_config(),
        registry.clone(),
        tracker.clone(),
        adjuster.clone(),
        solutions_tx,
    ));

    let source = JsonFileTemplateSource::new(&config.jobs.template_file);
    let poller = start_job_poller(
        source,
        broadcaster.clone(),
        Duration::from_secs(config.jobs.template_poll_secs.max(1)),
    );
    let cleanup = start_tracker_cleanup(tracker, TRACKER_CLEANUP_INTERVAL);
    let accounting = tokio::spawn(drain_solutions(solutions_rx));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut server = match StratumServerBuilder::default()
        .hostname(config.stratum.hostname.clone())
        .port(config.stratum.port)
        .limits(config.connection_limits())
        .timeouts(config.session_timeouts())
        .version_mask(config.stratum.version_mask)
        .shutdown_rx(shutdown_rx)
        .registry(registry)
        .broadcaster(broadcaster)
        .validator(validator)
        .adjuster(adjuster)
        .difficulty_updates_rx(updates_rx)
        .build()
        .await
    {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to build Stratum server: {e}");
            return Err(e.to_string().into());
        }
    };

    let mut server_handle = tokio::spawn(async move {
        info!("Starting Stratum server...");
        if let Err(e) = server.start(None).await {
            error!("Failed to start Stratum server: {}", e);
        }
        info!("Stratum server stopped");
    });

    let result: Result<(), Box<dyn Error>> = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutting down");
            // The server may already have stopped
            let _ = shutdown_tx.send(());
            let _ = (&mut server_handle).await;
            Ok(())
        }
        _ = &mut server_handle => Err("Stratum server exited".into()),
    };

    poller.abort();
    cleanup.abort();
    accounting.abort();
    result
}
