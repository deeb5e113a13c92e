//! Monitor event loop.
//!
//! Drives the core from a tokio timer: a pump tick rescheduled with the
//! interval the core returns, a simulated source update, and a periodic
//! report of every curve.

use crate::config::{ChannelConfig, Config};
use crate::metrics::{self, TickTimer};
use crate::model::CurveModel;
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use stripdaq_client::{SimClient, SimConfig, SourceId};
use stripdaq_core::{CurveId, DaqError, StripDaq};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

type Daq = StripDaq<SimClient, CurveModel>;

/// Slow oscillation applied to every simulated channel.
struct Drift {
    base: HashMap<String, (f64, f64)>,
    started: Instant,
}

impl Drift {
    fn new(sim: &SimConfig) -> Self {
        let base = sim
            .channels
            .iter()
            .map(|c| {
                let info = &c.info;
                let amplitude = if info.display.is_usable() {
                    (info.display.upper - info.display.lower) / 4.0
                } else if info.value != 0.0 {
                    info.value.abs() / 20.0
                } else {
                    1.0
                };
                (c.name.clone(), (info.value, amplitude))
            })
            .collect();
        Self {
            base,
            started: Instant::now(),
        }
    }

    fn apply(&self, client: &mut SimClient) {
        let phase = self.started.elapsed().as_secs_f64() / 5.0;
        for (name, (value, amplitude)) in &self.base {
            client.set_value(name, value + amplitude * phase.sin());
        }
    }
}

/// Run the monitor until interrupted.
///
/// # Errors
///
/// Returns an error if the client cannot be initialized.
pub async fn run(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let mut model = CurveModel::new();
    let curves: Vec<(CurveId, &ChannelConfig)> = config
        .channels
        .iter()
        .map(|c| (model.add_curve(c), c))
        .collect();

    let mut daq = StripDaq::initialize(client(&config), model, config.daq.clone())?;

    for (curve, channel) in curves {
        connect(&mut daq, curve, &channel.name);
    }
    metrics::set_stats(&daq.stats());
    info!(
        curves = daq.host().len(),
        slots = daq.stats().slots_in_use,
        "Monitor started"
    );

    let drift = Drift::new(&config.sim);
    let mut update = interval(config.daq.tick_interval() * 5);
    update.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = interval(config.report.interval());
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_tick = Duration::ZERO;

    loop {
        tokio::select! {
            () = sleep(next_tick) => {
                let _timer = TickTimer::start();
                next_tick = daq.on_tick();
                metrics::set_stats(&daq.stats());
            }

            _ = update.tick() => {
                drift.apply(daq.client_mut());
                let ready: Vec<SourceId> = daq.watched_sources().collect();
                for source in ready {
                    daq.on_source_ready(source);
                }
            }

            _ = report.tick() => {
                daq.host().report();
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    let (_, model) = daq.terminate();
    info!(
        curves = model.len(),
        dropped = model.released(),
        "Monitor stopped"
    );
    Ok(())
}

/// Build the simulated client, serving descriptions where the core looks.
fn client(config: &Config) -> SimClient {
    SimClient::from_config(&config.sim).with_description_suffix(&config.daq.description_suffix)
}

fn connect(daq: &mut Daq, curve: CurveId, name: &str) {
    metrics::record_connect_attempt();
    match daq.request_connect(curve, name) {
        Ok(slot) => info!(channel = %name, %curve, slot = slot.index(), "Connect requested"),
        Err(e) => {
            let reason = if e.is_capacity() {
                "capacity"
            } else if matches!(e, DaqError::InvalidName { .. }) {
                "invalid_name"
            } else {
                "client"
            };
            warn!(channel = %name, %curve, reason, "Connect rejected: {}", e);
            metrics::record_connect_rejected(reason);
            daq.host_mut().remove_curve(curve);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stripdaq_core::SlotState;

    fn config() -> Config {
        toml::from_str(
            r#"
            [daq]
            max_slots = 2
            fetch_descriptions = false

            [[channels]]
            name = "PV:A"

            [[channels]]
            name = "PV:B"
            units = "mA"

            [[channels]]
            name = "PV:C"

            [[sim.channels]]
            name = "PV:A"
            value = 10.0
            units = "V"

            [[sim.channels]]
            name = "PV:B"
            value = 0.0
            units = "A"
            "#,
        )
        .unwrap()
    }

    fn start(config: &Config) -> (Daq, Vec<CurveId>) {
        let mut model = CurveModel::new();
        let ids: Vec<CurveId> = config.channels.iter().map(|c| model.add_curve(c)).collect();
        let mut daq = StripDaq::initialize(client(config), model, config.daq.clone()).unwrap();
        for (id, channel) in ids.iter().zip(&config.channels) {
            connect(&mut daq, *id, &channel.name);
        }
        (daq, ids)
    }

    #[test]
    fn test_capacity_rejection_removes_curve() {
        let config = config();
        let (daq, ids) = start(&config);

        assert_eq!(daq.host().len(), 2);
        assert!(daq.host().curve(ids[2]).is_none());
        assert_eq!(daq.slot_state(ids[0]), Some(SlotState::Live));
    }

    #[test]
    fn test_pinned_units_survive() {
        let config = config();
        let (daq, ids) = start(&config);

        assert_eq!(daq.host().curve(ids[0]).unwrap().units, "V");
        assert_eq!(daq.host().curve(ids[1]).unwrap().units, "mA");
    }

    #[test]
    fn test_drift_reaches_samplers() {
        let config = config();
        let (mut daq, ids) = start(&config);
        let drift = Drift {
            base: HashMap::from([("PV:A".to_string(), (10.0, 2.0))]),
            started: Instant::now() - Duration::from_secs(5),
        };

        drift.apply(daq.client_mut());
        let expected = 10.0 + 2.0 * 1.0f64.sin();
        let ready: Vec<SourceId> = daq.watched_sources().collect();
        assert!(!ready.is_empty());
        for source in ready {
            daq.on_source_ready(source);
        }

        let value = daq.host().curve(ids[0]).unwrap().value().unwrap();
        assert!((value - expected).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_zero_tick_interval_runs() {
        let mut config = config();
        config.daq.tick_interval_ms = 0;
        let (mut daq, _) = start(&config);

        let update = interval(config.daq.tick_interval() * 5);
        assert_eq!(update.period(), Duration::from_millis(5));
        assert_eq!(daq.on_tick(), Duration::from_millis(1));
    }

    #[test]
    fn test_description_follows_core_suffix() {
        let mut config = config();
        config.daq.fetch_descriptions = true;
        config.daq.description_suffix = ":DESC".into();
        config.sim.channels[0].description = Some("Beam current".into());
        let (daq, ids) = start(&config);

        assert_eq!(daq.host().curve(ids[0]).unwrap().comment, "Beam current");
    }

    #[test]
    fn test_drift_amplitude() {
        let sim: SimConfig = toml::from_str(
            r#"
            [[channels]]
            name = "A"
            value = 0.0

            [[channels]]
            name = "B"
            value = -40.0
            "#,
        )
        .unwrap();
        let drift = Drift::new(&sim);
        assert_eq!(drift.base["A"], (0.0, 1.0));
        assert_eq!(drift.base["B"], (-40.0, 2.0));
    }

    #[test]
    fn test_terminate_unwatches() {
        let (daq, _) = start(&config());
        assert!(!daq.host().sources().is_empty());

        let (client, model) = daq.terminate();
        assert!(model.sources().is_empty());
        assert_eq!(client.open_channels(), 0);
    }
}
