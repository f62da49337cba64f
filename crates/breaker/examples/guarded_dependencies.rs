//! Guards a flaky dependency with a circuit breaker and prints the metrics
//! the admin surface would serve.
//!
//! ```text
//! cargo run -p tripwire-breaker --example guarded_dependencies -- --calls 20
//! RUST_LOG=debug cargo run -p tripwire-breaker --example guarded_dependencies -- --config tripwire.toml
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use tripwire_breaker::{
    BreakerEvent, BreakerSettings, CircuitBreakerRegistry, HealthCheckError, execute_with_fallback,
};

/// Drive a flaky dependency through its circuit breaker.
#[derive(Parser, Debug)]
#[command(name = "guarded_dependencies")]
struct Cli {
    /// Path to the TOML settings file. Defaults are used when it does not exist.
    #[arg(short, long, default_value = "tripwire.toml")]
    config: String,

    /// Number of calls to make.
    #[arg(long, default_value_t = 12)]
    calls: u32,

    /// Every n-th call succeeds while the dependency is degraded.
    #[arg(long, default_value_t = 4)]
    success_every: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("upstream returned 503")]
struct Unavailable;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = BreakerSettings::load(&cli.config)?;
    let registry = CircuitBreakerRegistry::new();

    // The dependency recovers once the health probe has been asked twice.
    let recovered = Arc::new(AtomicBool::new(false));
    let probes = Arc::new(AtomicU32::new(0));
    let health = {
        let recovered = Arc::clone(&recovered);
        let probes = Arc::clone(&probes);
        move || {
            let recovered = Arc::clone(&recovered);
            let probes = Arc::clone(&probes);
            async move {
                if probes.fetch_add(1, Ordering::SeqCst) >= 1 {
                    recovered.store(true, Ordering::SeqCst);
                }
                Ok::<_, HealthCheckError>(recovered.load(Ordering::SeqCst))
            }
        }
    };

    let database = registry.create(
        settings
            .config_for("database")
            .with_failure_threshold(3)
            .with_reset_timeout(Duration::from_secs(30))
            .with_monitoring_interval(Duration::from_millis(200))
            .with_health_check(health)
            .with_fallback(|ctx| serde_json::json!({"degraded": true, "breaker": ctx.breaker})),
    )?;
    // Everything else named in the settings file gets file-only configuration.
    settings.register_all(&registry)?;

    let mut events = database.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let BreakerEvent::StateChanged(t) = event {
                info!(
                    breaker = %t.name,
                    from = %t.from,
                    to = %t.to,
                    cause = ?t.cause,
                    "state changed"
                );
            }
        }
    });

    for call in 1..=cli.calls {
        let healthy = recovered.load(Ordering::SeqCst) || call % cli.success_every.max(1) == 0;
        let value = execute_with_fallback(&database, || async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            if healthy {
                Ok(serde_json::json!({"rows": call}))
            } else {
                Err(Unavailable)
            }
        })
        .await?;

        if value.get("degraded").is_some() {
            warn!(call, state = %database.state(), %value, "served fallback");
        } else {
            info!(call, state = %database.state(), %value, "call succeeded");
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("{}", serde_json::to_string_pretty(&registry.all_metrics())?);
    registry.shutdown().await;
    Ok(())
}
