use std::{env, fs, sync::Arc};

use anyhow::{Context, bail};
use client::{ClientConfig, HttpRegistry, ServiceOutcome, Session};
use log::{info, warn};
use machine_learning::{Dataset, LinearRegressionBuilder};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::signal;

const X_SIZE: usize = 4;
const Y_SIZE: usize = 1;
const TRAINING_SAMPLES: usize = 100;
const TEST_SAMPLES: usize = 20;

fn load_config() -> anyhow::Result<ClientConfig> {
    match env::args().nth(1) {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))
        }
        None => Ok(ClientConfig::from_env()?),
    }
}

/// Noisy samples of a fixed linear function, this device's local data.
fn synthetic_samples(rng: &mut StdRng, rows: usize) -> anyhow::Result<Dataset> {
    const WEIGHTS: [f32; X_SIZE] = [0.5, -1.0, 2.0, 0.25];
    const BIAS: f32 = 1.0;

    let mut data = Vec::with_capacity(rows * (X_SIZE + Y_SIZE));
    for _ in 0..rows {
        let x: [f32; X_SIZE] = rng.random();
        let y = x.iter().zip(WEIGHTS).map(|(x, w)| x * w).sum::<f32>() + BIAS;

        data.extend_from_slice(&x);
        data.push(y + rng.random_range(-0.05..0.05));
    }

    Ok(Dataset::new(data, X_SIZE, Y_SIZE)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = load_config()?;
    info!("backend at {}", config.backend_url);

    let registry = Arc::new(HttpRegistry::new(&config.backend_url)?);
    let builder = LinearRegressionBuilder::new(X_SIZE, Y_SIZE);
    let mut session = Session::new(registry, builder, config.session_options());

    if let Some(device_id) = config.device_id {
        session.enable_telemetry(device_id);
    }

    let (model, path) = session
        .prepare_model(&config.data_type, &config.storage_root)
        .await?;

    let assignment = session.fetch_server_assignment(config.start_fresh).await?;
    let Some(address) = assignment.address(&config.server_host) else {
        bail!(
            "no training server assigned for model {} ({})",
            model.name,
            assignment.status
        );
    };

    let buffer = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let trainer = session
        .open_session(&buffer, &address, config.use_tls)
        .await?;

    {
        let mut rng = StdRng::from_os_rng();
        let mut trainer = trainer.lock();
        trainer.load_training(synthetic_samples(&mut rng, TRAINING_SAMPLES)?)?;
        trainer.load_test(synthetic_samples(&mut rng, TEST_SAMPLES)?)?;
    }

    let handle = session.start(|status| info!("{status}"))?;

    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = signal::ctrl_c() => {
            info!("received SIGINT, closing the session");
            handle.close();
            handle.wait().await
        }
    };

    match outcome {
        ServiceOutcome::Failed(e) => bail!("training session failed: {e}"),
        ServiceOutcome::Reconnect => warn!("the server asked to reconnect, run again to rejoin"),
        other => info!("training session finished: {other:?}"),
    }

    Ok(())
}
