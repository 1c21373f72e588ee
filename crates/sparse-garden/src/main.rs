use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use sparse_garden::config::GardenConfig;
use sparse_garden::persistence::GardenSnapshot;
use sparse_garden::Gardener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Random walk standing in for optimizer updates between garden cycles.
const JITTER: f32 = 0.02;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sparse_garden=info".parse()?))
        .init();

    let config = GardenConfig::from_env().context("loading garden configuration")?;
    info!(?config, "starting sparse garden");

    let mut rng = Pcg64::seed_from_u64(config.seed);
    let mut model = config.build_model(&mut rng)?;
    let mut gardener = Gardener::new(&mut model);

    if let Some(ref path) = config.snapshot_path {
        let snapshot = GardenSnapshot::load_from_file(path)?;
        if !snapshot.parameters.is_empty() {
            let restored = snapshot.restore(&mut gardener)?;
            info!(restored, saved_at = %snapshot.saved_at, "resumed from snapshot");
        }
    }

    for cycle in 0..config.cycles {
        for (_, param) in gardener.sparse_parameters_mut() {
            param.map_values(|w| w + rng.random_range(-JITTER..JITTER));
        }

        let pruned = gardener.prune_all(&config.prune)?;
        let counts: Vec<usize> = pruned
            .iter()
            .map(|outcome| match &outcome.result {
                Ok(n) => *n,
                Err(e) => {
                    warn!(name = %outcome.name, error = %e, "prune failed, skipping regrowth");
                    0
                }
            })
            .collect();

        let regrown = gardener.regrow_random_all(&mut rng, &counts, 0.0)?;
        let truncated = regrown
            .iter()
            .filter(|o| matches!(o.result, Ok(false)))
            .count();

        info!(
            cycle,
            pruned = counts.iter().sum::<usize>(),
            truncated,
            active = gardener.total_active(),
            inactive = gardener.total_inactive(),
            "garden cycle complete"
        );
    }

    for (name, param) in gardener.sparse_parameters() {
        param
            .check_invariants()
            .with_context(|| format!("parameter {}", name))?;
        println!(
            "{:<12} capacity={:<6} active={:<6} density={:.3}",
            name,
            param.capacity(),
            param.total_active(),
            param.density()
        );
    }

    if let Some(ref path) = config.snapshot_path {
        GardenSnapshot::capture(&gardener).save_to_file(path)?;
    }

    Ok(())
}
