//! A GUI-less process kept alive by its main worker.
//!
//! Two components are wired by key during start-up. A ticker emits a few
//! frames from a timer on an I/O worker; a recorder counts them on the main
//! worker and asks the main worker to stop once it has seen enough. The
//! process blocks on the main worker's exit future and then shuts the
//! context down.
//!
//! Run with `RUST_LOG=keystone_com=debug cargo run --example headless_host`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use keystone_com::{
    Context, EndpointDebug, HasSignals, HasSlots, SigSlotConnection, Signal, Signals, Slot, Slots,
    Worker, WorkerBuilder,
};
use tracing_subscriber::EnvFilter;

const FRAMES: u32 = 5;

struct Ticker {
    signals: Signals,
    frame: Signal<u32>,
}

impl Ticker {
    fn new() -> Self {
        let frame = Signal::new();
        let mut signals = Signals::new();
        signals.declare("frame", frame.clone());
        Self { signals, frame }
    }
}

impl HasSignals for Ticker {
    fn signals(&self) -> &Signals {
        &self.signals
    }
}

struct Recorder {
    slots: Slots,
}

impl Recorder {
    fn new(main: &Worker) -> Self {
        let seen = Arc::new(AtomicU32::new(0));
        let handle = main.clone();
        let mut slots = Slots::new();
        slots.declare(
            "on_frame",
            Slot::with_worker(
                move |frame: &u32| {
                    let count = seen.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::info!(frame, count, "frame recorded");
                    if count == FRAMES {
                        handle.request_stop();
                    }
                },
                main,
            ),
        );
        Self { slots }
    }
}

impl HasSlots for Recorder {
    fn slots(&self) -> &Slots {
        &self.slots
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let context = Context::new();
    let main = context.default_worker();
    let io = WorkerBuilder::new().name("ticker-io").build();
    context.add_worker("io", io.clone());

    let ticker = Ticker::new();
    let recorder = Recorder::new(&main);

    let mut wiring = SigSlotConnection::new();
    wiring.connect(&ticker, "frame", &recorder, "on_frame")?;
    println!("{}", EndpointDebug::new("ticker").signals(&ticker.signals));
    println!("{}", EndpointDebug::new("recorder").slots(&recorder.slots));

    let frame = ticker.frame.clone();
    let next = AtomicU32::new(0);
    let timer = io.create_timer(Duration::from_millis(20), false, move || {
        let _ = frame.async_emit(next.fetch_add(1, Ordering::SeqCst));
    });
    timer.start()?;

    let exit_code = main.get_future().get_cloned()?;
    timer.stop();
    wiring.disconnect();
    context.shutdown();

    tracing::info!(exit_code, "host finished");
    Ok(())
}
