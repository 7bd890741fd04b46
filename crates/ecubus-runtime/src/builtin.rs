//! Diagnostic plugins every node ships with.
//!
//! | Name | Ports | Behaviour |
//! |---|---|---|
//! | `echo` | required latch `in`, provided `out` | forwards each new value of `in` to `out` |
//! | `heartbeat` | none | publishes `hb|<counter>` on the publish bus once per period |

use std::time::Duration;

use async_trait::async_trait;
use ecubus_middleware::PublishBus;
use ecubus_types::{BusError, PortDecl, ValueKind};
use tracing::{debug, warn};

use crate::component::{Plugin, PluginCatalog, PluginContext, ProvidedPort, RequiredPort, StopSignal};

pub const ECHO: &str = "echo";
pub const HEARTBEAT: &str = "heartbeat";

/// How often `echo` checks its input for a new value.
pub const ECHO_POLL: Duration = Duration::from_millis(10);

pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

/// Catalog containing `echo` and `heartbeat`.
pub fn builtin_catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with(ECHO, || Box::new(Echo::default()))
        .with(HEARTBEAT, || Box::new(Heartbeat::new(HEARTBEAT_PERIOD)))
}

// ─────────────────────────────────────────────────────────────────────────────
// echo
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Echo {
    input: Option<RequiredPort>,
    output: Option<ProvidedPort>,
}

#[async_trait]
impl Plugin for Echo {
    fn ports(&self) -> Vec<PortDecl> {
        vec![
            PortDecl::required("in", ValueKind::Text),
            PortDecl::provided("out", ValueKind::Text),
        ]
    }

    fn init(&mut self, ctx: &PluginContext) -> Result<(), BusError> {
        self.input = Some(ctx.required("in")?);
        self.output = Some(ctx.provided("out")?);
        Ok(())
    }

    async fn run(&mut self, mut stop: StopSignal) -> Result<(), BusError> {
        let (Some(input), Some(output)) = (&self.input, &self.output) else {
            return Err(BusError::NotInstalled(ECHO.to_string()));
        };

        let mut seen = 0;
        loop {
            tokio::select! {
                _ = stop.stopped() => return Ok(()),
                _ = tokio::time::sleep(ECHO_POLL) => {}
            }
            let generation = input.generation();
            if generation == seen {
                continue;
            }
            seen = generation;
            if let Some(value) = input.read() {
                // A failed forward is not fatal; the next value may get through.
                if let Err(e) = output.write(value) {
                    warn!(port = %output.id(), error = %e, "echo forward failed");
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// heartbeat
// ─────────────────────────────────────────────────────────────────────────────

pub struct Heartbeat {
    period: Duration,
    bus: Option<PublishBus>,
}

impl Heartbeat {
    pub fn new(period: Duration) -> Self {
        Self { period, bus: None }
    }
}

#[async_trait]
impl Plugin for Heartbeat {
    fn ports(&self) -> Vec<PortDecl> {
        Vec::new()
    }

    fn init(&mut self, ctx: &PluginContext) -> Result<(), BusError> {
        self.bus = Some(ctx.publisher());
        Ok(())
    }

    async fn run(&mut self, mut stop: StopSignal) -> Result<(), BusError> {
        let Some(bus) = &self.bus else {
            return Err(BusError::NotInstalled(HEARTBEAT.to_string()));
        };

        let mut ticker = tokio::time::interval(self.period);
        let mut counter: u64 = 0;
        loop {
            tokio::select! {
                _ = stop.stopped() => return Ok(()),
                _ = ticker.tick() => {
                    let delivered = bus.publish(&format!("hb|{counter}"));
                    debug!(counter, delivered, "heartbeat");
                    counter += 1;
                }
            }
        }
    }
}
