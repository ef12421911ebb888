//! Tickos host - runs kernel ticks against a snapshot file.
//!
//! Every tick is a full host invocation: load the snapshot, run one tick,
//! write the snapshot back. Nothing else survives between ticks.
//!
//! The demo workload is a producer that queues kitchen orders on a topic and
//! a cook that works through them in phases.

use clap::Parser;
use std::path::{Path, PathBuf};

use tickos_core::kernel::KernelSnapshot;
use tickos_core::observability::init_tracing_with;
use tickos_core::tracer::SpanTracer;
use tickos_core::{Config, Kernel};

#[derive(Parser, Debug)]
#[command(name = "tickos-host", version, about = "Run tickos kernel ticks against a snapshot file")]
struct Args {
    /// Snapshot file, created on first run.
    #[arg(long, env = "TICKOS_STATE", default_value = "tickos-state.json")]
    state: PathBuf,

    /// JSON config file.
    #[arg(long, env = "TICKOS_CONFIG")]
    config: Option<PathBuf>,

    /// Number of ticks, each a full load/tick/save cycle.
    #[arg(long, default_value_t = 1)]
    ticks: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    init_tracing_with(&config.observability);

    for _ in 0..args.ticks {
        run_once(&config, &args.state)?;
    }
    Ok(())
}

fn run_once(config: &Config, state: &Path) -> tickos_core::Result<()> {
    let mut kernel = match KernelSnapshot::read_from(state)? {
        Some(snapshot) => Kernel::restore(config.clone(), demo::registry(), snapshot)?,
        None => {
            tracing::info!(state = %state.display(), "no snapshot, seeding demo processes");
            let mut kernel = Kernel::new(config.clone(), demo::registry());
            demo::seed(&mut kernel)?;
            kernel
        }
    };

    let tick = kernel.next_tick();
    let tracer = SpanTracer::root("tickos-host");
    let report = kernel.tick(tick, &tracer);
    kernel.snapshot().write_to(state)?;

    tracing::info!(
        tick,
        ran = report.ran,
        deferred = report.deferred,
        faulted = report.faulted,
        processes = kernel.scheduler().count(),
        queued = kernel.topics().topic_length(demo::ORDERS_TOPIC),
        "tick_persisted"
    );
    Ok(())
}

mod demo {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use tickos_core::kernel::{Routine, RoutineRegistry, RunContext, RunResult, Throttles};
    use tickos_core::tasks::{PhasedRoutine, PhasedWorker, Step};
    use tickos_core::{Kernel, Result, SpawnRequest};

    pub const ORDERS_TOPIC: &str = "kitchen_orders";
    const STATUS_TOPIC: &str = "kitchen_status";
    const ORDER_PERIOD: u64 = 5;
    const ORDER_TTL: u64 = 30;
    const MAX_QUEUED: usize = 3;

    pub fn registry() -> RoutineRegistry {
        let mut registry = RoutineRegistry::new();
        registry
            .register("producer", || Producer)
            .register("cook", || PhasedRoutine::new(Cook));
        registry
    }

    pub fn seed(kernel: &mut Kernel) -> Result<()> {
        kernel.spawn(SpawnRequest::new("producer", 10.0))?;
        kernel.spawn(SpawnRequest::new("cook", 5.0))?;
        Ok(())
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct ProducerMemory {
        throttles: Throttles,
        sent: u64,
    }

    /// Queues an order every few ticks unless the cook is falling behind.
    #[derive(Debug)]
    struct Producer;

    impl Routine for Producer {
        fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<RunResult> {
            let mut memory: ProducerMemory = ctx.load()?;
            let tick = ctx.tick();

            let backlog = ctx.topics().topic_length(ORDERS_TOPIC);
            if backlog < MAX_QUEUED {
                let sent = memory.sent;
                let queued = memory.throttles.call("orders", ORDER_PERIOD, tick, || {
                    let priority = if sent % 3 == 0 { 2.0 } else { 1.0 };
                    ctx.topics().send_request(
                        ORDERS_TOPIC,
                        priority,
                        json!({ "order": sent, "portions": 2 + sent % 4 }),
                        ORDER_TTL,
                    )
                });
                if let Some(sequence) = queued {
                    sequence?;
                    memory.sent += 1;
                }
            }

            ctx.tracer()
                .log("producer run", &json!({ "backlog": backlog, "sent": memory.sent }));
            ctx.store(&memory)?;
            Ok(RunResult::Running)
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Order {
        order: u64,
        portions: u64,
        #[serde(default)]
        prepared: u64,
    }

    #[derive(Debug)]
    struct Cook;

    impl PhasedWorker for Cook {
        type Details = Order;

        fn topic(&self) -> &str {
            ORDERS_TOPIC
        }

        fn load(&mut self, _ctx: &mut RunContext<'_>, order: &mut Order) -> Result<Step> {
            order.prepared += 1;
            if order.prepared >= order.portions {
                Ok(Step::Next { sleep: 0 })
            } else {
                Ok(Step::Stay { sleep: 2 })
            }
        }

        fn act(&mut self, ctx: &mut RunContext<'_>, order: &mut Order) -> Result<Step> {
            ctx.tracer()
                .log("cooking", &json!({ "order": order.order, "portions": order.portions }));
            Ok(Step::Next { sleep: 3 })
        }

        fn unload(&mut self, ctx: &mut RunContext<'_>, order: &mut Order) -> Result<Step> {
            ctx.topics()
                .send_request(STATUS_TOPIC, 1.0, json!({ "served": order.order }), 10)?;
            Ok(Step::Done)
        }

        fn report_status(&mut self, ctx: &mut RunContext<'_>, order: &Order) -> Result<()> {
            ctx.topics().send_request(
                STATUS_TOPIC,
                0.5,
                json!({ "working_on": order.order, "prepared": order.prepared }),
                10,
            )?;
            Ok(())
        }
    }
}
