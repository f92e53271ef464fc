use std::sync::OnceLock;

use anyhow::{bail, Result};
use tracing::info;

use crate::reference::{LeakyPredictor, ReferenceConfig, ScrollingDenoiser};

static RUNTIME: OnceLock<InferenceRuntime> = OnceLock::new();

/// Process-wide capability handles shared by every environment.
#[derive(Debug)]
pub(crate) struct InferenceRuntime {
    denoiser: ScrollingDenoiser,
    predictor: LeakyPredictor,
}

impl InferenceRuntime {
    /// Initialises the process-wide runtime. Fails when called twice.
    pub(crate) fn initialise(config: &ReferenceConfig) -> Result<&'static Self> {
        install(&RUNTIME, config)
    }

    pub(crate) fn denoiser(&self) -> &ScrollingDenoiser {
        &self.denoiser
    }

    pub(crate) fn predictor(&self) -> &LeakyPredictor {
        &self.predictor
    }
}

fn install<'a>(
    slot: &'a OnceLock<InferenceRuntime>,
    config: &ReferenceConfig,
) -> Result<&'a InferenceRuntime> {
    let runtime = InferenceRuntime {
        denoiser: ScrollingDenoiser::new(config),
        predictor: LeakyPredictor::new(config),
    };
    if slot.set(runtime).is_err() {
        bail!("inference runtime already initialised");
    }
    match slot.get() {
        Some(runtime) => {
            info!(?config, "inference runtime ready");
            Ok(runtime)
        }
        None => bail!("inference runtime missing after initialisation"),
    }
}
